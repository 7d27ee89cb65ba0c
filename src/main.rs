use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cfg = viz_host::config::Config::parse();
    if cfg.list_devices {
        viz_host::audio::list_input_devices()?;
        return Ok(());
    }

    viz_host::app::run(cfg)
}
