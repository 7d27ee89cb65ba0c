use crate::audio::AudioFeatures;
use crate::context::{AcquireError, ContextPool, CtxId, Validation};
use crate::params::{ParamField, Params, ParamStore, SetOutcome};
use crate::surface::{Surface, SurfaceRegistry, SurfaceRole, SurfaceStage, ROLE_COUNT};
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub const ENGINE_COUNT: usize = 4;

/// Closed set of visualizer systems hosted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum EngineId {
    Faceted,
    Quantum,
    Holographic,
    Polychora,
}

impl EngineId {
    pub const ALL: [Self; ENGINE_COUNT] = [
        Self::Faceted,
        Self::Quantum,
        Self::Holographic,
        Self::Polychora,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Faceted => 0,
            Self::Quantum => 1,
            Self::Holographic => 2,
            Self::Polychora => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Faceted => "faceted",
            Self::Quantum => "quantum",
            Self::Holographic => "holographic",
            Self::Polychora => "polychora",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "faceted" => Some(Self::Faceted),
            "quantum" => Some(Self::Quantum),
            "holographic" => Some(Self::Holographic),
            "polychora" => Some(Self::Polychora),
            _ => None,
        }
    }

    pub fn meta(self) -> &'static EngineMeta {
        &ENGINE_METAS[self.index()]
    }

    pub fn variant_count(self) -> i64 {
        self.meta().variant_count
    }

    pub fn default_params(self) -> Params {
        self.meta().defaults
    }
}

/// Which input channels an engine reacts to on its own. The router
/// suppresses a native channel whenever it has a mode selected for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeProfile {
    pub pointer: bool,
    pub click: bool,
    pub audio: bool,
}

/// Static per-engine identity: human name, surface-id prefix, variant table
/// size, parameter seed, and the optional native-reactivity profile.
pub struct EngineMeta {
    pub name: &'static str,
    pub prefix: &'static str,
    pub variant_count: i64,
    pub defaults: Params,
    pub native: Option<NativeProfile>,
}

static ENGINE_METAS: [EngineMeta; ENGINE_COUNT] = [
    EngineMeta {
        name: "Faceted",
        prefix: "",
        variant_count: 8,
        defaults: Params {
            geometry: 0,
            variant: 0,
            grid_density: 15.0,
            morph_factor: 1.0,
            chaos: 0.2,
            speed: 1.0,
            hue: 200.0,
            intensity: 0.5,
            saturation: 0.8,
            rot4d_xw: 0.0,
            rot4d_yw: 0.0,
            rot4d_zw: 0.0,
            dimension: 3.5,
        },
        native: None,
    },
    EngineMeta {
        name: "Quantum",
        prefix: "quantum",
        variant_count: 8,
        defaults: Params {
            geometry: 0,
            variant: 0,
            grid_density: 20.0,
            morph_factor: 1.0,
            chaos: 0.2,
            speed: 1.0,
            hue: 280.0,
            intensity: 0.7,
            saturation: 0.9,
            rot4d_xw: 0.0,
            rot4d_yw: 0.0,
            rot4d_zw: 0.0,
            dimension: 3.8,
        },
        native: Some(NativeProfile {
            pointer: false,
            click: false,
            audio: true,
        }),
    },
    EngineMeta {
        name: "Holographic",
        prefix: "holo",
        variant_count: 30,
        defaults: Params {
            geometry: 0,
            variant: 0,
            grid_density: 30.0,
            morph_factor: 1.2,
            chaos: 0.3,
            speed: 0.9,
            hue: 320.0,
            intensity: 0.6,
            saturation: 0.9,
            rot4d_xw: 0.0,
            rot4d_yw: 0.0,
            rot4d_zw: 0.0,
            dimension: 3.6,
        },
        native: Some(NativeProfile {
            pointer: false,
            click: true,
            audio: true,
        }),
    },
    EngineMeta {
        name: "Polychora",
        prefix: "polychora",
        variant_count: 6,
        defaults: Params {
            geometry: 0,
            variant: 0,
            grid_density: 25.0,
            morph_factor: 1.0,
            chaos: 0.15,
            speed: 1.1,
            hue: 260.0,
            intensity: 0.6,
            saturation: 0.85,
            rot4d_xw: 0.0,
            rot4d_yw: 0.0,
            rot4d_zw: 0.0,
            dimension: 4.0,
        },
        native: None,
    },
];

pub const GEOMETRY_NAMES: [&str; 8] = [
    "tetrahedron",
    "hypercube",
    "sphere",
    "torus",
    "klein bottle",
    "fractal",
    "wave",
    "crystal",
];

pub fn geometry_name(index: i64) -> &'static str {
    GEOMETRY_NAMES[index.clamp(0, 7) as usize]
}

/// Role-local parameter seed derived from (engine, variant, role). Variant
/// changes regenerate these; sticky overrides re-apply on top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleSeed {
    pub density_mul: f64,
    pub speed_mul: f64,
    pub hue_shift: f64,
    pub intensity_mul: f64,
}

impl RoleSeed {
    pub fn derive(engine: EngineId, variant: i64, role: SurfaceRole) -> Self {
        let key = (engine.index() as u64) << 32 | (variant as u64) << 8 | role.index() as u64;
        let h1 = splitmix(key);
        let h2 = splitmix(h1);
        let h3 = splitmix(h2);
        let base_intensity = match role {
            SurfaceRole::Background => 0.4,
            SurfaceRole::Shadow => 0.5,
            SurfaceRole::Content => 1.0,
            SurfaceRole::Highlight => 1.2,
            SurfaceRole::Accent => 1.5,
        };
        Self {
            density_mul: 0.6 + unit(h1) * 0.8,
            speed_mul: 0.75 + unit(h2) * 0.5,
            hue_shift: (unit(h3) - 0.5) * 60.0,
            intensity_mul: base_intensity,
        }
    }
}

fn splitmix(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn unit(h: u64) -> f64 {
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Per-layer uniform set handed to the driver each frame. This is the whole
/// interface between the parameter vector and the opaque renderers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayerUniforms {
    pub density: f64,
    pub morph: f64,
    pub chaos: f64,
    pub speed: f64,
    pub hue: f64,
    pub intensity: f64,
    pub saturation: f64,
    pub rot4d: [f64; 3],
    pub dimension: f64,
    pub time: f64,
    pub audio_level: f64,
}

#[derive(Debug)]
struct LayerRenderer {
    role: SurfaceRole,
    surface: &'static Surface,
    ctx: CtxId,
    seed: RoleSeed,
    uniforms: LayerUniforms,
}

impl LayerRenderer {
    fn update(&mut self, p: &Params, audio: Option<&AudioFeatures>, tick: u64) {
        let audio_level = audio.map(|a| a.smooth as f64).unwrap_or(0.0);
        self.uniforms = LayerUniforms {
            density: (p.grid_density * self.seed.density_mul).clamp(5.0, 100.0),
            morph: p.morph_factor,
            chaos: p.chaos,
            speed: p.speed * self.seed.speed_mul,
            hue: (p.hue + self.seed.hue_shift).rem_euclid(360.0),
            intensity: (p.intensity * self.seed.intensity_mul).clamp(0.0, 1.0),
            saturation: p.saturation,
            rot4d: [p.rot4d_xw, p.rot4d_yw, p.rot4d_zw],
            dimension: p.dimension,
            time: tick as f64 / 60.0,
            audio_level,
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    CreateFailed {
        engine: EngineId,
        surface: &'static str,
        cause: AcquireError,
    },
}

impl EngineError {
    pub fn cause(&self) -> &AcquireError {
        match self {
            Self::CreateFailed { cause, .. } => cause,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed {
                engine,
                surface,
                cause,
            } => write!(
                f,
                "engine {} create failed on {surface}: {cause}",
                engine.as_str()
            ),
        }
    }
}

impl std::error::Error for EngineError {}

/// One live visualizer system: five renderers bound to its five surfaces, a
/// suspended-or-running render loop, and the sticky override map that
/// survives variant changes.
#[derive(Debug)]
pub struct Engine {
    id: EngineId,
    store: Rc<ParamStore>,
    renderers: Vec<LayerRenderer>,
    active: bool,
    tick: u64,
    pending_audio: Option<AudioFeatures>,
    overrides: BTreeMap<ParamField, f64>,
}

impl Engine {
    /// Acquire contexts for all five surfaces and construct the renderers.
    /// Partial acquisition is an error: every context already acquired is
    /// released before returning.
    pub fn create(
        id: EngineId,
        store: Rc<ParamStore>,
        pool: &mut ContextPool,
        stage: &SurfaceStage,
    ) -> Result<Self, EngineError> {
        let variant = store.get(id, ParamField::Variant) as i64;

        let mut renderers: Vec<LayerRenderer> = Vec::with_capacity(ROLE_COUNT);
        for surface in SurfaceRegistry::surfaces(id) {
            match pool.acquire(surface, stage) {
                Ok(ctx) => renderers.push(LayerRenderer {
                    role: surface.role,
                    surface,
                    ctx,
                    seed: RoleSeed::derive(id, variant, surface.role),
                    uniforms: LayerUniforms::default(),
                }),
                Err(cause) => {
                    for r in renderers {
                        pool.release(r.ctx);
                    }
                    return Err(EngineError::CreateFailed {
                        engine: id,
                        surface: surface.id,
                        cause,
                    });
                }
            }
        }

        Ok(Self {
            id,
            store,
            renderers,
            active: false,
            tick: 0,
            pending_audio: None,
            overrides: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn set_active(&mut self, on: bool) {
        self.active = on;
    }

    pub fn contexts(&self) -> Vec<CtxId> {
        self.renderers.iter().map(|r| r.ctx).collect()
    }

    pub fn role_seed(&self, role: SurfaceRole) -> RoleSeed {
        self.renderers[role.index()].seed
    }

    pub fn override_map(&self) -> &BTreeMap<ParamField, f64> {
        &self.overrides
    }

    /// Forward a parameter write to the store and record it as a sticky
    /// override so it survives variant reseeding.
    pub fn update_param(&mut self, field: ParamField, value: f64) -> SetOutcome {
        if field == ParamField::Variant {
            return self.set_variant(value as i64);
        }
        let outcome = self.store.set(self.id, field, value);
        if !matches!(outcome, SetOutcome::Invalid) {
            self.overrides.insert(field, self.store.get(self.id, field));
        }
        outcome
    }

    /// Variant change: write the index, regenerate the role-local seeds,
    /// then re-apply the sticky override map on top.
    pub fn set_variant(&mut self, variant: i64) -> SetOutcome {
        let outcome = self.store.set(self.id, ParamField::Variant, variant);
        let stored = self.store.get(self.id, ParamField::Variant) as i64;
        for r in &mut self.renderers {
            r.seed = RoleSeed::derive(self.id, stored, r.role);
        }
        let overrides: Vec<(ParamField, f64)> =
            self.overrides.iter().map(|(f, v)| (*f, *v)).collect();
        for (field, value) in overrides {
            self.store.set(self.id, field, value);
        }
        outcome
    }

    /// Cache an audio frame for the next tick. Older frames are replaced,
    /// never queued.
    pub fn apply_audio(&mut self, features: AudioFeatures) {
        self.pending_audio = Some(features);
    }

    /// Native reactivity pass. Runs before the router inside a tick, so a
    /// router write to the same field lands last and wins.
    pub fn apply_native(&mut self, audio: &AudioFeatures, suppressed: bool) {
        if suppressed || audio.is_silent() {
            return;
        }
        let Some(native) = self.id.meta().native else {
            return;
        };
        if !native.audio {
            return;
        }
        let base = self.id.default_params();
        self.store.set(
            self.id,
            ParamField::Intensity,
            base.intensity + audio.peak as f64 * 0.2,
        );
    }

    /// Single render frame: pull the current parameter vector, fold in the
    /// queued audio frame, update all five renderers, submit draws. No-op
    /// while suspended.
    pub fn tick(&mut self, pool: &mut ContextPool) {
        if !self.active {
            return;
        }
        self.tick += 1;
        let params = self.store.snapshot(self.id);
        let audio = self.pending_audio.take();
        for r in &mut self.renderers {
            r.update(&params, audio.as_ref(), self.tick);
            pool.submit(r.ctx, &r.uniforms);
        }
    }

    /// All five contexts bound and passing the basic-shader probe.
    pub fn validate(&self, pool: &mut ContextPool) -> bool {
        self.renderers
            .iter()
            .all(|r| pool.validate(r.surface) == Validation::Ok)
    }

    /// Stop the loop, dispose renderers, release every context. The
    /// instance is consumed; sticky overrides die with it.
    pub fn destroy(mut self, pool: &mut ContextPool) {
        self.active = false;
        for r in self.renderers.drain(..) {
            pool.release(r.ctx);
        }
    }
}
