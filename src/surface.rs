use crate::engine::{EngineId, ENGINE_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    Background,
    Shadow,
    Content,
    Highlight,
    Accent,
}

pub const ROLE_COUNT: usize = 5;

impl SurfaceRole {
    pub const ALL: [Self; ROLE_COUNT] = [
        Self::Background,
        Self::Shadow,
        Self::Content,
        Self::Highlight,
        Self::Accent,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Background => 0,
            Self::Shadow => 1,
            Self::Content => 2,
            Self::Highlight => 3,
            Self::Accent => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Shadow => "shadow",
            Self::Content => "content",
            Self::Highlight => "highlight",
            Self::Accent => "accent",
        }
    }
}

/// Immutable descriptor of one layered drawing target. Surfaces live in the
/// registry for the process lifetime and are always passed by reference.
#[derive(Debug, PartialEq, Eq)]
pub struct Surface {
    pub engine: EngineId,
    pub role: SurfaceRole,
    pub id: &'static str,
}

macro_rules! surface_set {
    ($engine:expr, $bg:literal, $sh:literal, $co:literal, $hi:literal, $ac:literal) => {
        [
            Surface { engine: $engine, role: SurfaceRole::Background, id: $bg },
            Surface { engine: $engine, role: SurfaceRole::Shadow, id: $sh },
            Surface { engine: $engine, role: SurfaceRole::Content, id: $co },
            Surface { engine: $engine, role: SurfaceRole::Highlight, id: $hi },
            Surface { engine: $engine, role: SurfaceRole::Accent, id: $ac },
        ]
    };
}

// Surface id scheme is load-bearing for snapshot compatibility: faceted
// carries the bare role names, every other engine prefixes them.
static FACETED_SURFACES: [Surface; ROLE_COUNT] = surface_set!(
    EngineId::Faceted,
    "background-canvas",
    "shadow-canvas",
    "content-canvas",
    "highlight-canvas",
    "accent-canvas"
);

static QUANTUM_SURFACES: [Surface; ROLE_COUNT] = surface_set!(
    EngineId::Quantum,
    "quantum-background-canvas",
    "quantum-shadow-canvas",
    "quantum-content-canvas",
    "quantum-highlight-canvas",
    "quantum-accent-canvas"
);

static HOLOGRAPHIC_SURFACES: [Surface; ROLE_COUNT] = surface_set!(
    EngineId::Holographic,
    "holo-background-canvas",
    "holo-shadow-canvas",
    "holo-content-canvas",
    "holo-highlight-canvas",
    "holo-accent-canvas"
);

static POLYCHORA_SURFACES: [Surface; ROLE_COUNT] = surface_set!(
    EngineId::Polychora,
    "polychora-background-canvas",
    "polychora-shadow-canvas",
    "polychora-content-canvas",
    "polychora-highlight-canvas",
    "polychora-accent-canvas"
);

/// Build-time table of the five layered surfaces per engine. Lookups are
/// total; there is no runtime mutation.
pub struct SurfaceRegistry;

impl SurfaceRegistry {
    pub fn surfaces(engine: EngineId) -> &'static [Surface; ROLE_COUNT] {
        match engine {
            EngineId::Faceted => &FACETED_SURFACES,
            EngineId::Quantum => &QUANTUM_SURFACES,
            EngineId::Holographic => &HOLOGRAPHIC_SURFACES,
            EngineId::Polychora => &POLYCHORA_SURFACES,
        }
    }

    pub fn surface(engine: EngineId, role: SurfaceRole) -> &'static Surface {
        &Self::surfaces(engine)[role.index()]
    }

    pub fn lookup(id: &str) -> Option<&'static Surface> {
        for engine in EngineId::ALL {
            for surface in Self::surfaces(engine) {
                if surface.id == id {
                    return Some(surface);
                }
            }
        }
        None
    }
}

/// Cap on the device-pixel-ratio applied when sizing surfaces.
pub const DPR_CAP: f64 = 2.0;

/// Runtime companion to the registry: owns per-surface pixel sizes and the
/// composited flag. The scheduler is the only writer; at most one engine's
/// surface set is composited at any time.
pub struct SurfaceStage {
    viewport: (u32, u32),
    dpr: f64,
    composited: [bool; ENGINE_COUNT],
    sizes: [[(u32, u32); ROLE_COUNT]; ENGINE_COUNT],
}

impl SurfaceStage {
    pub fn new(viewport: (u32, u32), dpr: f64) -> Self {
        Self {
            viewport,
            dpr: dpr.max(0.0),
            composited: [false; ENGINE_COUNT],
            sizes: [[(0, 0); ROLE_COUNT]; ENGINE_COUNT],
        }
    }

    pub fn set_viewport(&mut self, viewport: (u32, u32)) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_composited(&mut self, engine: EngineId, on: bool) {
        self.composited[engine.index()] = on;
    }

    pub fn is_composited(&self, engine: EngineId) -> bool {
        self.composited[engine.index()]
    }

    pub fn composited_engines(&self) -> Vec<EngineId> {
        EngineId::ALL
            .into_iter()
            .filter(|e| self.composited[e.index()])
            .collect()
    }

    /// Resize an engine's five surfaces to the current viewport at the
    /// capped device-pixel ratio.
    pub fn prepare_engine(&mut self, engine: EngineId) {
        let scale = self.dpr.min(DPR_CAP).max(0.0);
        let w = (self.viewport.0 as f64 * scale) as u32;
        let h = (self.viewport.1 as f64 * scale) as u32;
        for slot in &mut self.sizes[engine.index()] {
            *slot = (w, h);
        }
    }

    pub fn surface_size(&self, surface: &Surface) -> (u32, u32) {
        self.sizes[surface.engine.index()][surface.role.index()]
    }

    /// A surface is ready for context acquisition when its engine is
    /// composited and it has a non-zero pixel area.
    pub fn surface_ready(&self, surface: &Surface) -> bool {
        let (w, h) = self.surface_size(surface);
        self.is_composited(surface.engine) && w > 0 && h > 0
    }
}
