use crate::engine::EngineId;
use crate::router::{ClickMode, PointerMode, WheelMode};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "viz-host",
    version,
    about = "Multi-engine, audio- and pointer-reactive visualizer host"
)]
pub struct Config {
    /// Visualizer system to start with.
    #[arg(long, value_enum, default_value_t = EngineId::Faceted)]
    pub system: EngineId,

    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Substring match against input device names.
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    /// Run without opening the audio input at all.
    #[arg(long, default_value_t = false)]
    pub no_audio: bool,

    #[arg(long, value_enum)]
    pub pointer_mode: Option<PointerMode>,

    #[arg(long, value_enum)]
    pub click_mode: Option<ClickMode>,

    #[arg(long, value_enum)]
    pub wheel_mode: Option<WheelMode>,

    /// Master enable for the reactivity router.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub reactivity: bool,

    /// Global cap on live GPU contexts (hard limit 16).
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub max_contexts: u8,

    /// Destroy engine instances on switch-out instead of caching them.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub destroy_on_switch: bool,

    /// Gallery-preview deep link (`?system=quantum&hue=200&hideui=true`).
    #[arg(long)]
    pub link: Option<String>,

    /// Start with the HUD hidden.
    #[arg(long, default_value_t = false)]
    pub hideui: bool,

    /// Parameter snapshot to load at startup.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}
