use crate::audio::AudioFeatures;
use crate::engine::EngineId;
use crate::input::InputEvent;
use crate::params::{ParamField, Params, ParamStore};
use clap::ValueEnum;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Effects below this magnitude stop animating.
pub const EFFECT_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PointerMode {
    Rotations,
    Velocity,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClickMode {
    Burst,
    Blast,
    Ripple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WheelMode {
    Cycle,
    Wave,
    Sweep,
}

impl PointerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rotations" => Some(Self::Rotations),
            "velocity" => Some(Self::Velocity),
            "distance" => Some(Self::Distance),
            _ => None,
        }
    }
}

impl ClickMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "burst" => Some(Self::Burst),
            "blast" => Some(Self::Blast),
            "ripple" => Some(Self::Ripple),
            _ => None,
        }
    }
}

impl WheelMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cycle" => Some(Self::Cycle),
            "wave" => Some(Self::Wave),
            "sweep" => Some(Self::Sweep),
            _ => None,
        }
    }
}

/// Input channels the router can claim from an engine's native reactivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Pointer,
    Click,
    Wheel,
    Audio,
}

/// Rolling mean of pointer travel over the last five samples.
#[derive(Debug, Default)]
struct VelocityState {
    last: Option<(f64, f64)>,
    deltas: VecDeque<f64>,
}

impl VelocityState {
    fn push(&mut self, x: f64, y: f64) -> f64 {
        if let Some((lx, ly)) = self.last {
            let d = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();
            if self.deltas.len() == 5 {
                self.deltas.pop_front();
            }
            self.deltas.push_back(d);
        }
        self.last = Some((x, y));
        self.mean()
    }

    fn mean(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }
        self.deltas.iter().sum::<f64>() / self.deltas.len() as f64
    }

    fn reset(&mut self) {
        self.last = None;
        self.deltas.clear();
    }
}

const SWEEP_FIELDS: [(ParamField, f64); 5] = [
    // 2% of each field's range per wheel event.
    (ParamField::Hue, 7.2),
    (ParamField::Intensity, 0.02),
    (ParamField::Saturation, 0.02),
    (ParamField::Chaos, 0.02),
    (ParamField::Speed, 0.058),
];

/// Rotating focus over the sweep field set.
#[derive(Debug, Default)]
struct SweepState {
    focus: usize,
}

impl SweepState {
    fn apply(&mut self, dy: f64, store: &ParamStore, engine: EngineId) {
        let (field, step) = SWEEP_FIELDS[self.focus % SWEEP_FIELDS.len()];
        let cur = store.get(engine, field);
        store.set(engine, field, cur + dy.signum() * step);
        // Wander to the next field with 10% probability per event.
        if fastrand::f64() < 0.1 {
            self.focus = (self.focus + 1) % SWEEP_FIELDS.len();
        }
    }
}

/// One animated click effect. Amplitudes decay per frame; the effect is
/// dropped once every amplitude falls under `EFFECT_FLOOR`.
enum ClickEffect {
    Burst {
        base_chaos: f64,
        base_speed: f64,
        base_intensity: f64,
        amps: [f64; 3],
    },
    Blast {
        base_hue: f64,
        base_saturation: f64,
        amps: [f64; 4],
    },
    Ripple {
        base_morph: f64,
        boost: f64,
        amp: f64,
    },
}

const BURST_FACTORS: [f64; 3] = [0.94, 0.92, 0.91];
const BLAST_FACTORS: [f64; 4] = [0.88, 0.89, 0.90, 0.88];

impl ClickEffect {
    /// Decay, write the frame's values, report whether the effect is live.
    fn step(&mut self, store: &ParamStore, engine: EngineId) -> bool {
        match self {
            Self::Burst {
                base_chaos,
                base_speed,
                base_intensity,
                amps,
            } => {
                for (a, f) in amps.iter_mut().zip(BURST_FACTORS) {
                    *a *= f;
                }
                store.set(engine, ParamField::Chaos, *base_chaos + 0.8 * amps[0]);
                store.set(engine, ParamField::Speed, *base_speed + 1.5 * amps[1]);
                store.set(
                    engine,
                    ParamField::Intensity,
                    *base_intensity + 0.5 * amps[2],
                );
                amps.iter().any(|a| *a >= EFFECT_FLOOR)
            }
            Self::Blast {
                base_hue,
                base_saturation,
                amps,
            } => {
                for (a, f) in amps.iter_mut().zip(BLAST_FACTORS) {
                    *a *= f;
                }
                store.set(engine, ParamField::Chaos, (0.3 + amps[0]).min(1.0));
                store.set(engine, ParamField::Speed, (1.0 + 2.0 * amps[1]).min(3.0));
                store.set(engine, ParamField::Hue, *base_hue + 60.0 * amps[2]);
                store.set(
                    engine,
                    ParamField::Saturation,
                    *base_saturation + 0.3 * amps[3],
                );
                amps.iter().any(|a| *a >= EFFECT_FLOOR)
            }
            Self::Ripple {
                base_morph,
                boost,
                amp,
            } => {
                *amp *= 0.9;
                store.set(engine, ParamField::MorphFactor, *base_morph + *boost * *amp);
                *amp >= EFFECT_FLOOR
            }
        }
    }
}

/// Frame-synchronous decay loop for click effects. State lives here, not in
/// hidden per-frame closures; an engine switch clears everything so no stale
/// animation crosses over.
#[derive(Default)]
pub struct EffectsAnimator {
    effects: Vec<ClickEffect>,
}

impl EffectsAnimator {
    fn push(&mut self, effect: ClickEffect) {
        self.effects.push(effect);
    }

    fn step(&mut self, store: &ParamStore, engine: EngineId) {
        self.effects.retain_mut(|e| e.step(store, engine));
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.effects.is_empty()
    }
}

/// The single place that maps input events to parameter updates.
///
/// Mode behavior is identical whichever engine is active; arbitration with
/// engine-native reactivity happens through `suppresses` plus the tick
/// ordering (native writes first, router writes last).
pub struct ReactivityRouter {
    enabled: bool,
    pointer: Option<PointerMode>,
    click: Option<ClickMode>,
    wheel: Option<WheelMode>,
    motion_granted: bool,
    engine: Option<EngineId>,
    baseline: Option<Params>,
    velocity: VelocityState,
    sweep: SweepState,
    effects: EffectsAnimator,
    queue: Vec<InputEvent>,
}

impl ReactivityRouter {
    pub fn new() -> Self {
        Self {
            enabled: true,
            pointer: None,
            click: None,
            wheel: None,
            motion_granted: false,
            engine: None,
            baseline: None,
            velocity: VelocityState::default(),
            sweep: SweepState::default(),
            effects: EffectsAnimator::default(),
            queue: Vec::new(),
        }
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_pointer_mode(&mut self, mode: Option<PointerMode>) {
        self.pointer = mode;
    }

    pub fn set_click_mode(&mut self, mode: Option<ClickMode>) {
        self.click = mode;
    }

    pub fn set_wheel_mode(&mut self, mode: Option<WheelMode>) {
        self.wheel = mode;
    }

    pub fn pointer_mode(&self) -> Option<PointerMode> {
        self.pointer
    }

    pub fn click_mode(&self) -> Option<ClickMode> {
        self.click
    }

    pub fn wheel_mode(&self) -> Option<WheelMode> {
        self.wheel
    }

    /// Motion routes stay dark until the platform grant lands.
    pub fn set_motion_granted(&mut self, granted: bool) {
        self.motion_granted = granted;
    }

    /// Whether the active engine must yield a native channel to the router.
    pub fn suppresses(&self, channel: Channel) -> bool {
        if !self.enabled {
            return false;
        }
        match channel {
            Channel::Pointer => self.pointer.is_some(),
            Channel::Click => self.click.is_some(),
            Channel::Wheel => self.wheel.is_some(),
            // The single analyzer feeds the router, so an enabled router
            // always owns the audio channel.
            Channel::Audio => true,
        }
    }

    /// Called by the scheduler on every switch: select the new engine,
    /// capture its parameter baseline, drop all transient state.
    pub fn attach_engine(&mut self, engine: EngineId, store: &ParamStore) {
        self.engine = Some(engine);
        self.baseline = Some(store.snapshot(engine));
        self.velocity.reset();
        self.effects.clear();
        self.queue.clear();
    }

    pub fn attached_engine(&self) -> Option<EngineId> {
        self.engine
    }

    /// Re-capture the baseline after variant reseeding.
    pub fn rebase(&mut self, store: &ParamStore) {
        if let Some(engine) = self.engine {
            self.baseline = Some(store.snapshot(engine));
        }
    }

    pub fn ingest(&mut self, event: InputEvent) {
        self.queue.push(event);
    }

    pub fn effects_idle(&self) -> bool {
        self.effects.is_idle()
    }

    /// Apply every queued event and step the effect animator. Runs after
    /// the engine's native pass within a tick, so router writes land last.
    pub fn flush(&mut self, store: &ParamStore) {
        let events = std::mem::take(&mut self.queue);
        let Some(engine) = self.engine else {
            return;
        };
        if !self.enabled {
            return;
        }
        for event in events {
            match event {
                InputEvent::Pointer { x, y, .. } => self.on_pointer(store, engine, x, y),
                InputEvent::PointerEnd { x, y } => self.on_click(store, engine, x, y),
                InputEvent::Wheel { dy } => self.on_wheel(store, engine, dy),
                InputEvent::Motion { alpha, beta, gamma } => {
                    self.on_motion(store, engine, alpha, beta, gamma)
                }
                InputEvent::AudioFrame(features) => self.on_audio(store, engine, &features),
            }
        }
        self.effects.step(store, engine);
    }

    fn on_pointer(&mut self, store: &ParamStore, engine: EngineId, x: f64, y: f64) {
        let Some(mode) = self.pointer else {
            return;
        };
        match mode {
            PointerMode::Rotations => {
                let base_hue = self
                    .baseline
                    .map(|b| b.hue)
                    .unwrap_or(engine.meta().defaults.hue);
                store.set(engine, ParamField::Rot4dXw, (x - 0.5) * 4.0 * PI);
                store.set(engine, ParamField::Rot4dYw, (x - 0.5) * 2.8 * PI);
                store.set(engine, ParamField::Rot4dZw, (y - 0.5) * 4.0 * PI);
                store.set(engine, ParamField::Hue, base_hue + (x - 0.5) * 30.0);
            }
            PointerMode::Velocity => {
                let mean = self.velocity.push(x, y);
                store.set(engine, ParamField::Chaos, (mean * 30.0).clamp(0.0, 1.0));
                store.set(engine, ParamField::Speed, (0.5 + mean * 15.0).clamp(0.5, 3.0));
                store.set(engine, ParamField::GridDensity, 10.0 + y * 90.0);
                store.set(engine, ParamField::Intensity, 0.4 + x * 0.6);
                store.set(engine, ParamField::Hue, 280.0 + mean * 80.0);
            }
            PointerMode::Distance => {
                let d = (((x - 0.5).powi(2) + (y - 0.5).powi(2)).sqrt() / 0.707).min(1.0);
                store.set(engine, ParamField::GridDensity, 5.0 + 95.0 * d);
                store.set(engine, ParamField::Intensity, 0.2 + 0.8 * (1.0 - d));
                store.set(engine, ParamField::Saturation, 0.4 + 0.6 * (1.0 - d));
                store.set(engine, ParamField::Hue, 320.0 + 40.0 * d);
            }
        }
    }

    fn on_click(&mut self, store: &ParamStore, engine: EngineId, x: f64, y: f64) {
        let Some(mode) = self.click else {
            return;
        };
        match mode {
            ClickMode::Burst => self.effects.push(ClickEffect::Burst {
                base_chaos: store.get(engine, ParamField::Chaos),
                base_speed: store.get(engine, ParamField::Speed),
                base_intensity: store.get(engine, ParamField::Intensity),
                amps: [1.0; 3],
            }),
            ClickMode::Blast => self.effects.push(ClickEffect::Blast {
                base_hue: store.get(engine, ParamField::Hue),
                base_saturation: store.get(engine, ParamField::Saturation),
                amps: [1.0; 4],
            }),
            ClickMode::Ripple => {
                let d = (((x - 0.5).powi(2) + (y - 0.5).powi(2)).sqrt() / 0.707).min(1.0);
                self.effects.push(ClickEffect::Ripple {
                    base_morph: store.get(engine, ParamField::MorphFactor),
                    boost: 0.1 + 0.2 * (1.0 - d),
                    amp: 1.0,
                });
            }
        }
    }

    fn on_wheel(&mut self, store: &ParamStore, engine: EngineId, dy: f64) {
        let Some(mode) = self.wheel else {
            return;
        };
        if dy == 0.0 {
            return;
        }
        match mode {
            WheelMode::Cycle => {
                let density = store.get(engine, ParamField::GridDensity);
                store.set(engine, ParamField::GridDensity, density + dy.signum() * 0.8);
                let hue = store.get(engine, ParamField::Hue);
                store.set(engine, ParamField::Hue, hue + dy.signum() * 3.0);
            }
            WheelMode::Wave => {
                let morph = store.get(engine, ParamField::MorphFactor);
                let next = (morph + dy.signum() * 0.02).clamp(0.2, 2.0);
                store.set(engine, ParamField::MorphFactor, next);
            }
            WheelMode::Sweep => self.sweep.apply(dy, store, engine),
        }
    }

    fn on_motion(&mut self, store: &ParamStore, engine: EngineId, alpha: f64, beta: f64, gamma: f64) {
        if !self.motion_granted {
            return;
        }
        store.set(engine, ParamField::Rot4dXw, beta.to_radians());
        store.set(engine, ParamField::Rot4dYw, gamma.to_radians());
        store.set(engine, ParamField::Rot4dZw, alpha.to_radians());
    }

    /// Audio route, relative to the attached baseline. A silent frame
    /// produces no parameter change at all.
    fn on_audio(&mut self, store: &ParamStore, engine: EngineId, features: &AudioFeatures) {
        if features.is_silent() {
            return;
        }
        let base = self
            .baseline
            .unwrap_or_else(|| engine.meta().defaults);
        store.set(
            engine,
            ParamField::Hue,
            base.hue + features.mid as f64 * 120.0,
        );
        store.set(
            engine,
            ParamField::MorphFactor,
            base.morph_factor + features.mid as f64,
        );
        store.set(
            engine,
            ParamField::Intensity,
            base.intensity + features.bass as f64 * 0.3,
        );
    }
}

impl Default for ReactivityRouter {
    fn default() -> Self {
        Self::new()
    }
}
