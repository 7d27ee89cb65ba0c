use crate::engine::LayerUniforms;
use crate::surface::{Surface, SurfaceStage};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Default global cap on live rendering contexts.
pub const MAX_LIVE_CONTEXTS: usize = 5;
/// Requesting a cap above this is a configuration error, not a clamp.
pub const HARD_CONTEXT_CAP: usize = 16;

/// Nominal inter-acquisition pacing; avoids driver stalls when binding a
/// five-surface set in one burst. Policy, not invariant.
pub const ACQUIRE_PACING: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxState {
    Free,
    Bound,
    Lost,
}

/// Handle to a pooled context. Valid until `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CtxId(u64);

/// Opaque driver-side handle.
pub type BackendCtx = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPreference {
    Default,
    HighPerformance,
}

/// Context creation options mirroring the layering contract: alpha and depth
/// on, antialias off, premultiplied alpha, no preserved buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub alpha: bool,
    pub depth: bool,
    pub antialias: bool,
    pub premultiplied_alpha: bool,
    pub preserve_drawing_buffer: bool,
    pub power_preference: PowerPreference,
    pub fail_if_major_performance_caveat: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            alpha: true,
            depth: true,
            antialias: false,
            premultiplied_alpha: true,
            preserve_drawing_buffer: false,
            power_preference: PowerPreference::HighPerformance,
            fail_if_major_performance_caveat: false,
        }
    }
}

impl ContextOptions {
    /// Retry flags after a first creation failure.
    pub fn conservative() -> Self {
        Self {
            power_preference: PowerPreference::Default,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    CreationRefused(String),
    ImmediateLoss,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreationRefused(reason) => write!(f, "driver refused context: {reason}"),
            Self::ImmediateLoss => write!(f, "context lost immediately after creation"),
        }
    }
}

impl std::error::Error for ContextError {}

/// Driver seam. The production backend manages per-surface pixel buffers;
/// tests drive the pool with a scripted fake.
pub trait GpuBackend {
    fn create_context(
        &mut self,
        surface: &'static Surface,
        size: (u32, u32),
        options: &ContextOptions,
    ) -> Result<BackendCtx, ContextError>;

    /// Validation probe: create and delete a trivial vertex-shader-like
    /// resource, reporting whether the context is healthy.
    fn probe(&mut self, ctx: BackendCtx) -> bool;

    fn submit(&mut self, ctx: BackendCtx, uniforms: &LayerUniforms);

    /// Driver-level destruction (lose-context or equivalent).
    fn destroy(&mut self, ctx: BackendCtx);

    /// Drain driver-initiated loss notifications.
    fn poll_lost(&mut self) -> Vec<BackendCtx>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    AlreadyBound,
    CapacityExceeded { live: usize, cap: usize },
    SurfaceNotReady,
    CreationFailed(String),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyBound => write!(f, "surface already has a live context"),
            Self::CapacityExceeded { live, cap } => {
                write!(f, "context cap reached ({live}/{cap})")
            }
            Self::SurfaceNotReady => write!(f, "surface not ready"),
            Self::CreationFailed(reason) => write!(f, "context creation failed: {reason}"),
        }
    }
}

impl std::error::Error for AcquireError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Lost,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolConfigError {
    CapTooLarge { requested: usize, hard_cap: usize },
    CapZero,
}

impl fmt::Display for PoolConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapTooLarge { requested, hard_cap } => {
                write!(f, "context cap {requested} exceeds hard cap {hard_cap}")
            }
            Self::CapZero => write!(f, "context cap must be at least 1"),
        }
    }
}

impl std::error::Error for PoolConfigError {}

struct Entry {
    surface: &'static Surface,
    state: CtxState,
    backend_ctx: BackendCtx,
}

/// Enforces the global live-context cap and mediates acquisition, release,
/// validation, and loss recovery against the driver seam.
pub struct ContextPool {
    backend: Box<dyn GpuBackend>,
    entries: BTreeMap<u64, Entry>,
    next_id: u64,
    max_live: usize,
    pacing: Duration,
    last_acquire: Option<Instant>,
    loss_handlers: Vec<Box<dyn FnMut(&'static Surface)>>,
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("next_id", &self.next_id)
            .field("max_live", &self.max_live)
            .field("pacing", &self.pacing)
            .field("last_acquire", &self.last_acquire)
            .field("live_count", &self.entries.len())
            .finish()
    }
}

impl ContextPool {
    pub fn new(backend: Box<dyn GpuBackend>, max_live: usize) -> Result<Self, PoolConfigError> {
        if max_live == 0 {
            return Err(PoolConfigError::CapZero);
        }
        if max_live > HARD_CONTEXT_CAP {
            return Err(PoolConfigError::CapTooLarge {
                requested: max_live,
                hard_cap: HARD_CONTEXT_CAP,
            });
        }
        Ok(Self {
            backend,
            entries: BTreeMap::new(),
            next_id: 1,
            max_live,
            pacing: ACQUIRE_PACING,
            last_acquire: None,
            loss_handlers: Vec::new(),
        })
    }

    /// Zero the inter-acquisition pacing delay (tests, benchmarks).
    pub fn set_pacing(&mut self, pacing: Duration) {
        self.pacing = pacing;
    }

    pub fn max_live(&self) -> usize {
        self.max_live
    }

    /// Every allocated context counts against the cap, including lost ones
    /// that have not been released yet.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    pub fn state(&self, id: CtxId) -> Option<CtxState> {
        self.entries.get(&id.0).map(|e| e.state)
    }

    pub fn surface_of(&self, id: CtxId) -> Option<&'static Surface> {
        self.entries.get(&id.0).map(|e| e.surface)
    }

    pub fn acquire(
        &mut self,
        surface: &'static Surface,
        stage: &SurfaceStage,
    ) -> Result<CtxId, AcquireError> {
        if self.live_count() >= self.max_live {
            return Err(AcquireError::CapacityExceeded {
                live: self.live_count(),
                cap: self.max_live,
            });
        }
        if self.entry_for(surface).is_some() {
            return Err(AcquireError::AlreadyBound);
        }
        if !stage.surface_ready(surface) {
            return Err(AcquireError::SurfaceNotReady);
        }

        self.pace();
        let size = stage.surface_size(surface);
        let backend_ctx = match self.create_validated(surface, size, &ContextOptions::default()) {
            Ok(ctx) => ctx,
            // One retry with conservative flags before giving up.
            Err(_) => self
                .create_validated(surface, size, &ContextOptions::conservative())
                .map_err(|e| AcquireError::CreationFailed(e.to_string()))?,
        };

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                surface,
                state: CtxState::Bound,
                backend_ctx,
            },
        );
        self.last_acquire = Some(Instant::now());
        Ok(CtxId(id))
    }

    fn create_validated(
        &mut self,
        surface: &'static Surface,
        size: (u32, u32),
        options: &ContextOptions,
    ) -> Result<BackendCtx, ContextError> {
        let ctx = self.backend.create_context(surface, size, options)?;
        if !self.backend.probe(ctx) {
            self.backend.destroy(ctx);
            return Err(ContextError::ImmediateLoss);
        }
        Ok(ctx)
    }

    /// Driver-level destruction, then drop the entry. Must run before the
    /// surface is reused by another engine.
    pub fn release(&mut self, id: CtxId) {
        if let Some(entry) = self.entries.remove(&id.0) {
            self.backend.destroy(entry.backend_ctx);
        }
    }

    pub fn validate(&mut self, surface: &Surface) -> Validation {
        let Some((key, backend_ctx, state)) = self
            .entries
            .iter()
            .find(|(_, e)| e.surface.id == surface.id)
            .map(|(k, e)| (*k, e.backend_ctx, e.state))
        else {
            return Validation::Missing;
        };
        if state == CtxState::Lost {
            return Validation::Lost;
        }
        if self.backend.probe(backend_ctx) {
            Validation::Ok
        } else {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.state = CtxState::Lost;
            }
            Validation::Lost
        }
    }

    pub fn submit(&mut self, id: CtxId, uniforms: &LayerUniforms) {
        if let Some(entry) = self.entries.get(&id.0) {
            if entry.state == CtxState::Bound {
                self.backend.submit(entry.backend_ctx, uniforms);
            }
        }
    }

    /// Subscribe to driver-initiated loss. Handlers run from `pump_losses`
    /// on the scheduler tick, never inside the driver callback.
    pub fn on_loss(&mut self, handler: impl FnMut(&'static Surface) + 'static) {
        self.loss_handlers.push(Box::new(handler));
    }

    /// Drain driver loss notifications: mark entries `Lost`, run handlers,
    /// and return the affected surfaces.
    pub fn pump_losses(&mut self) -> Vec<&'static Surface> {
        let lost = self.backend.poll_lost();
        if lost.is_empty() {
            return Vec::new();
        }
        let mut surfaces = Vec::new();
        for backend_ctx in lost {
            for entry in self.entries.values_mut() {
                if entry.backend_ctx == backend_ctx && entry.state != CtxState::Lost {
                    entry.state = CtxState::Lost;
                    surfaces.push(entry.surface);
                }
            }
        }
        for surface in &surfaces {
            for handler in &mut self.loss_handlers {
                handler(surface);
            }
        }
        surfaces
    }

    fn entry_for(&self, surface: &Surface) -> Option<&Entry> {
        self.entries.values().find(|e| e.surface.id == surface.id)
    }

    fn pace(&self) {
        if self.pacing.is_zero() {
            return;
        }
        if let Some(last) = self.last_acquire {
            let elapsed = last.elapsed();
            if elapsed < self.pacing {
                std::thread::sleep(self.pacing - elapsed);
            }
        }
    }
}

/// Production backend for the terminal host: each context owns an RGBA
/// staging buffer sized to its surface, which stands in for the GPU-resident
/// state of the layering contract.
pub struct BufferBackend {
    next: BackendCtx,
    buffers: BTreeMap<BackendCtx, LayerBuffer>,
}

struct LayerBuffer {
    pixels: Vec<u8>,
}

impl BufferBackend {
    pub fn new() -> Self {
        Self {
            next: 1,
            buffers: BTreeMap::new(),
        }
    }

    pub fn buffer(&self, ctx: BackendCtx) -> Option<&[u8]> {
        self.buffers.get(&ctx).map(|b| b.pixels.as_slice())
    }
}

impl Default for BufferBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for BufferBackend {
    fn create_context(
        &mut self,
        _surface: &'static Surface,
        size: (u32, u32),
        _options: &ContextOptions,
    ) -> Result<BackendCtx, ContextError> {
        let (w, h) = size;
        if w == 0 || h == 0 {
            return Err(ContextError::CreationRefused("zero-sized surface".into()));
        }
        let bytes = (w as usize) * (h as usize) * 4;
        let ctx = self.next;
        self.next += 1;
        self.buffers.insert(
            ctx,
            LayerBuffer {
                pixels: vec![0; bytes],
            },
        );
        Ok(ctx)
    }

    fn probe(&mut self, ctx: BackendCtx) -> bool {
        self.buffers.contains_key(&ctx)
    }

    fn submit(&mut self, ctx: BackendCtx, uniforms: &LayerUniforms) {
        let Some(buf) = self.buffers.get_mut(&ctx) else {
            return;
        };
        // Flat base coat from the layer uniforms; enough to make the frame
        // observable without committing to a visual style.
        let (r, g, b) = hue_to_rgb(uniforms.hue, uniforms.saturation, uniforms.intensity);
        let alpha = (uniforms.intensity.clamp(0.0, 1.0) * 255.0) as u8;
        for px in buf.pixels.chunks_exact_mut(4) {
            px[0] = r;
            px[1] = g;
            px[2] = b;
            px[3] = alpha;
        }
    }

    fn destroy(&mut self, ctx: BackendCtx) {
        self.buffers.remove(&ctx);
    }

    fn poll_lost(&mut self) -> Vec<BackendCtx> {
        Vec::new()
    }
}

fn hue_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
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
