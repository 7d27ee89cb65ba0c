use crate::audio::AudioSystem;
use crate::config::Config;
use crate::context::BufferBackend;
use crate::deeplink::DeepLink;
use crate::diag::DiagEvent;
use crate::engine::EngineId;
use crate::input::{InputEvent, InputQueue, SurfaceBounds};
use crate::params::{ParamField, ParamStore};
use crate::router::{ClickMode, PointerMode, WheelMode};
use crate::scheduler::EngineScheduler;
use crate::snapshot::Snapshot;
use crate::surface::SurfaceStage;
use crate::terminal::TerminalHost;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers, MouseEventKind};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

const HUD_ROWS: u16 = 2;
/// Features older than this are treated as a dropped stream, not a frame.
const AUDIO_FRESH_MS: f32 = 250.0;

pub fn run(cfg: Config) -> anyhow::Result<()> {
    let mut term = TerminalHost::open()?;
    let mut out = BufWriter::new(TerminalHost::writer());

    let mut show_hud = !cfg.hideui;
    let mut hud_notice = String::new();

    // Deep link wins over --system; an unknown system degrades to faceted.
    let mut initial = cfg.system;
    let mut pending_link: Option<DeepLink> = None;
    if let Some(raw) = &cfg.link {
        let link = DeepLink::parse(raw);
        if !link.system_recognized {
            hud_notice = format!("deep link fell back to {}", link.system.as_str());
        }
        initial = link.system;
        if link.hideui {
            show_hud = false;
        }
        pending_link = Some(link);
    }

    let mut bounds = term.bounds(hud_rows(show_hud));

    let store = Rc::new(ParamStore::new());
    let stage = SurfaceStage::new(term.viewport(hud_rows(show_hud)), 1.0);
    let mut scheduler = EngineScheduler::new(
        Rc::clone(&store),
        Box::new(BufferBackend::new()),
        stage,
        cfg.max_contexts as usize,
        cfg.destroy_on_switch,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    {
        let router = scheduler.router_mut();
        router.set_enabled(cfg.reactivity);
        router.set_pointer_mode(cfg.pointer_mode);
        router.set_click_mode(cfg.click_mode);
        router.set_wheel_mode(cfg.wheel_mode);
    }

    if let Some(path) = &cfg.snapshot {
        match Snapshot::load(path) {
            Ok(snapshot) => {
                snapshot.apply(&store);
                initial = snapshot.system;
            }
            Err(err) => hud_notice = format!("snapshot load failed: {err}"),
        }
    }

    scheduler
        .switch_to(initial)
        .map_err(|e| anyhow::anyhow!("initial switch to {}: {e}", initial.as_str()))?;
    if let Some(link) = pending_link.take() {
        link.apply_params(&store);
    }

    // Audio denial leaves the audio-reactive channel dark; everything else
    // keeps running.
    let audio = if cfg.no_audio {
        None
    } else {
        match AudioSystem::new(cfg.device.as_deref()) {
            Ok(system) => Some(system),
            Err(err) => {
                scheduler
                    .diagnostics_mut()
                    .report(DiagEvent::PermissionDenied { what: "audio" });
                hud_notice = format!("audio unavailable: {err}");
                None
            }
        }
    };
    let audio_features = audio.as_ref().map(|a| a.features());

    let snapshot_path = snapshot_storage_path();
    let mut queue = InputQueue::new();
    let mut pacer = FramePacer::new(cfg.fps);

    loop {
        let frame_start = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(k) if k.kind != KeyEventKind::Release => {
                    if handle_key(
                        k.code,
                        k.modifiers,
                        &mut scheduler,
                        &store,
                        &mut show_hud,
                        snapshot_path.as_deref(),
                        &mut hud_notice,
                    ) {
                        return Ok(());
                    }
                    bounds = term.bounds(hud_rows(show_hud));
                }
                Event::Mouse(m) => {
                    // UI rows are excluded from capture inside `normalize`.
                    match m.kind {
                        MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                            if let Some((x, y)) = bounds.normalize(m.column, m.row) {
                                let buttons =
                                    matches!(m.kind, MouseEventKind::Drag(_)) as u8;
                                queue.push(InputEvent::Pointer { x, y, buttons });
                            }
                        }
                        MouseEventKind::Up(_) => {
                            if let Some((x, y)) = bounds.normalize(m.column, m.row) {
                                queue.push(InputEvent::PointerEnd { x, y });
                            }
                        }
                        MouseEventKind::ScrollUp => queue.push(InputEvent::Wheel { dy: -1.0 }),
                        MouseEventKind::ScrollDown => queue.push(InputEvent::Wheel { dy: 1.0 }),
                        _ => {}
                    }
                }
                Event::Resize(c, r) => {
                    term.note_resize(c, r);
                    bounds = term.bounds(hud_rows(show_hud));
                    scheduler.resize(term.viewport(hud_rows(show_hud)));
                }
                _ => {}
            }
        }

        if let Some(features) = &audio_features {
            if features.age_ms() < AUDIO_FRESH_MS {
                queue.push(InputEvent::AudioFrame(features.load()));
            }
        }

        scheduler.tick(queue.drain());

        draw_frame(
            &mut out,
            &scheduler,
            &store,
            &bounds,
            show_hud,
            pacer.fps(),
            &hud_notice,
        )?;

        pacer.finish_frame(frame_start);
    }
}

fn hud_rows(show_hud: bool) -> u16 {
    if show_hud {
        HUD_ROWS
    } else {
        0
    }
}

fn handle_key(
    code: KeyCode,
    mods: KeyModifiers,
    scheduler: &mut EngineScheduler,
    store: &Rc<ParamStore>,
    show_hud: &mut bool,
    snapshot_path: Option<&std::path::Path>,
    hud_notice: &mut String,
) -> bool {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return true;
    }

    match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => true,
        KeyCode::Char('1') => {
            scheduler.request_switch(EngineId::Faceted);
            false
        }
        KeyCode::Char('2') => {
            scheduler.request_switch(EngineId::Quantum);
            false
        }
        KeyCode::Char('3') => {
            scheduler.request_switch(EngineId::Holographic);
            false
        }
        KeyCode::Char('4') => {
            scheduler.request_switch(EngineId::Polychora);
            false
        }
        KeyCode::Char('g') | KeyCode::Char('G') => {
            if let Some(active) = scheduler.active() {
                store.cycle_geometry(active, 1);
            }
            false
        }
        KeyCode::Char('v') | KeyCode::Char('V') => {
            if let Some(active) = scheduler.active() {
                let next = store.get(active, ParamField::Variant) as i64 + 1;
                let wrapped = next.rem_euclid(active.variant_count());
                if let Some(engine) = scheduler.instance_mut(active) {
                    engine.set_variant(wrapped);
                }
                let store = Rc::clone(store);
                scheduler.router_mut().rebase(&store);
            }
            false
        }
        KeyCode::Char('r') | KeyCode::Char('R') => {
            let on = !scheduler.router().enabled();
            scheduler.router_mut().set_enabled(on);
            false
        }
        KeyCode::Char('p') | KeyCode::Char('P') => {
            let next = cycle_pointer(scheduler.router().pointer_mode());
            scheduler.router_mut().set_pointer_mode(next);
            false
        }
        KeyCode::Char('c') | KeyCode::Char('C') => {
            let next = cycle_click(scheduler.router().click_mode());
            scheduler.router_mut().set_click_mode(next);
            false
        }
        KeyCode::Char('w') | KeyCode::Char('W') => {
            let next = cycle_wheel(scheduler.router().wheel_mode());
            scheduler.router_mut().set_wheel_mode(next);
            false
        }
        KeyCode::Char('i') | KeyCode::Char('I') => {
            *show_hud = !*show_hud;
            false
        }
        KeyCode::Char('s') | KeyCode::Char('S') => {
            if let (Some(active), Some(path)) = (scheduler.active(), snapshot_path) {
                match Snapshot::capture(store, active).save(path) {
                    Ok(()) => *hud_notice = format!("saved {}", path.display()),
                    Err(err) => *hud_notice = format!("save failed: {err}"),
                }
            }
            false
        }
        KeyCode::Char('l') | KeyCode::Char('L') => {
            if let Some(path) = snapshot_path {
                match Snapshot::load(path) {
                    Ok(snapshot) => {
                        snapshot.apply(store);
                        scheduler.request_switch(snapshot.system);
                        *hud_notice = format!("loaded {}", path.display());
                    }
                    Err(err) => *hud_notice = format!("load failed: {err}"),
                }
            }
            false
        }
        _ => false,
    }
}

fn cycle_pointer(cur: Option<PointerMode>) -> Option<PointerMode> {
    match cur {
        None => Some(PointerMode::Rotations),
        Some(PointerMode::Rotations) => Some(PointerMode::Velocity),
        Some(PointerMode::Velocity) => Some(PointerMode::Distance),
        Some(PointerMode::Distance) => None,
    }
}

fn cycle_click(cur: Option<ClickMode>) -> Option<ClickMode> {
    match cur {
        None => Some(ClickMode::Burst),
        Some(ClickMode::Burst) => Some(ClickMode::Blast),
        Some(ClickMode::Blast) => Some(ClickMode::Ripple),
        Some(ClickMode::Ripple) => None,
    }
}

fn cycle_wheel(cur: Option<WheelMode>) -> Option<WheelMode> {
    match cur {
        None => Some(WheelMode::Cycle),
        Some(WheelMode::Cycle) => Some(WheelMode::Wave),
        Some(WheelMode::Wave) => Some(WheelMode::Sweep),
        Some(WheelMode::Sweep) => None,
    }
}

fn draw_frame(
    out: &mut BufWriter<std::io::Stdout>,
    scheduler: &EngineScheduler,
    store: &ParamStore,
    bounds: &SurfaceBounds,
    show_hud: bool,
    fps: f32,
    hud_notice: &str,
) -> anyhow::Result<()> {
    let visual_rows = bounds.visual_rows();

    // Live base coat from the active parameter vector. The layer buffers
    // carry the real per-role output; the terminal shows the content layer.
    let (r, g, b) = match scheduler.active() {
        Some(active) => {
            let p = store.snapshot(active);
            hsv_rgb(p.hue, p.saturation, p.intensity)
        }
        None => (0, 0, 0),
    };
    write!(out, "\x1b[48;2;{r};{g};{b}m")?;
    for row in 1..=visual_rows {
        write!(out, "\x1b[{row};1H\x1b[2K")?;
    }
    write!(out, "\x1b[0m")?;

    if show_hud {
        let hud = build_hud(scheduler, store, fps, hud_notice);
        for (i, line) in hud.iter().enumerate().take(HUD_ROWS as usize) {
            let row = visual_rows as usize + 1 + i;
            let clipped: String = line.chars().take(bounds.cols as usize).collect();
            write!(out, "\x1b[{row};1H\x1b[0m\x1b[2K{clipped}")?;
        }
    }

    out.flush()?;
    Ok(())
}

fn build_hud(
    scheduler: &EngineScheduler,
    store: &ParamStore,
    fps: f32,
    hud_notice: &str,
) -> [String; 2] {
    let router = scheduler.router();
    let active = scheduler.active();
    let line1 = match active {
        Some(engine) => {
            let p = store.snapshot(engine);
            format!(
                "System: {} | geo {} | var {} | density {:>5.1} | hue {:>5.1} | int {:>4.2} | ctx {}/{} | FPS {:>4.1}",
                engine.meta().name,
                p.geometry,
                p.variant,
                p.grid_density,
                p.hue,
                p.intensity,
                scheduler.pool().live_count(),
                scheduler.pool().max_live(),
                fps,
            )
        }
        None => format!("System: <none> | FPS {:>4.1}", fps),
    };
    let line2 = format!(
        "Router: {} | pointer {} | click {} | wheel {} | keys: 1-4 system, g geometry, v variant, p/c/w modes, r router, s/l snapshot, i HUD, q quit{}",
        if router.enabled() { "on" } else { "off" },
        mode_label(router.pointer_mode().map(|m| format!("{m:?}"))),
        mode_label(router.click_mode().map(|m| format!("{m:?}"))),
        mode_label(router.wheel_mode().map(|m| format!("{m:?}"))),
        if hud_notice.is_empty() {
            String::new()
        } else {
            format!(" | {hud_notice}")
        },
    );
    [line1, line2]
}

fn mode_label(mode: Option<String>) -> String {
    mode.unwrap_or_else(|| "off".to_string())
}

fn hsv_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let s = saturation.clamp(0.0, 1.0);
    let v = value.clamp(0.0, 1.0);
    let c = v * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

fn snapshot_storage_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("viz-host").join("snapshot.json"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("viz-host")
            .join("snapshot.json"),
    )
}

/// Paces the loop to the configured frame rate and keeps an exponentially
/// smoothed frames-per-second estimate from the real frame spacing, so the
/// HUD shows what the host actually achieved rather than the target.
struct FramePacer {
    target: Duration,
    last_frame: Instant,
    avg_frame_secs: f32,
}

impl FramePacer {
    fn new(fps: u32) -> Self {
        Self {
            target: Duration::from_secs_f32(1.0 / fps.max(1) as f32),
            last_frame: Instant::now(),
            avg_frame_secs: 0.0,
        }
    }

    /// Sleep out the remainder of the frame budget, then fold the measured
    /// frame-to-frame spacing into the average.
    fn finish_frame(&mut self, started: Instant) {
        let work = started.elapsed();
        if work < self.target {
            std::thread::sleep(self.target - work);
        }
        let now = Instant::now();
        let spacing = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.avg_frame_secs = if self.avg_frame_secs == 0.0 {
            spacing
        } else {
            self.avg_frame_secs * 0.9 + spacing * 0.1
        };
    }

    fn fps(&self) -> f32 {
        if self.avg_frame_secs <= f32::EPSILON {
            0.0
        } else {
            1.0 / self.avg_frame_secs
        }
    }
}
