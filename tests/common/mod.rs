#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use viz_host::context::{BackendCtx, ContextError, ContextOptions, GpuBackend};
use viz_host::engine::LayerUniforms;
use viz_host::params::ParamStore;
use viz_host::scheduler::EngineScheduler;
use viz_host::surface::{Surface, SurfaceStage};

/// Scriptable driver seam shared by the pool, engine, and scheduler suites.
#[derive(Default)]
pub struct FakeState {
    pub created: Vec<&'static str>,
    pub destroyed: Vec<BackendCtx>,
    pub submits: usize,
    /// Creation fails for these surface ids, every attempt.
    pub fail_surfaces: Vec<&'static str>,
    /// Creation fails once for these surface ids, then succeeds (exercises
    /// the conservative-flags retry).
    pub fail_once: Vec<&'static str>,
    /// Probe failures by backend context id.
    pub fail_probe: BTreeSet<BackendCtx>,
    /// Contexts reported lost on the next poll.
    pub lose_next: Vec<BackendCtx>,
    pub live: BTreeSet<BackendCtx>,
    /// Audio level carried by the most recent submit.
    pub last_audio_level: f64,
}

pub struct FakeGpuBackend {
    pub state: Rc<RefCell<FakeState>>,
    next: BackendCtx,
}

impl FakeGpuBackend {
    pub fn new() -> (Self, Rc<RefCell<FakeState>>) {
        let state = Rc::new(RefCell::new(FakeState::default()));
        (
            Self {
                state: Rc::clone(&state),
                next: 1,
            },
            state,
        )
    }
}

impl GpuBackend for FakeGpuBackend {
    fn create_context(
        &mut self,
        surface: &'static Surface,
        _size: (u32, u32),
        _options: &ContextOptions,
    ) -> Result<BackendCtx, ContextError> {
        let mut state = self.state.borrow_mut();
        if state.fail_surfaces.contains(&surface.id) {
            return Err(ContextError::CreationRefused("scripted failure".into()));
        }
        if let Some(pos) = state.fail_once.iter().position(|s| *s == surface.id) {
            state.fail_once.remove(pos);
            return Err(ContextError::CreationRefused("scripted first-try failure".into()));
        }
        let ctx = self.next;
        self.next += 1;
        state.created.push(surface.id);
        state.live.insert(ctx);
        Ok(ctx)
    }

    fn probe(&mut self, ctx: BackendCtx) -> bool {
        let state = self.state.borrow();
        state.live.contains(&ctx) && !state.fail_probe.contains(&ctx)
    }

    fn submit(&mut self, _ctx: BackendCtx, uniforms: &LayerUniforms) {
        let mut state = self.state.borrow_mut();
        state.submits += 1;
        state.last_audio_level = uniforms.audio_level;
    }

    fn destroy(&mut self, ctx: BackendCtx) {
        let mut state = self.state.borrow_mut();
        state.live.remove(&ctx);
        state.destroyed.push(ctx);
    }

    fn poll_lost(&mut self) -> Vec<BackendCtx> {
        std::mem::take(&mut self.state.borrow_mut().lose_next)
    }
}

pub fn test_stage() -> SurfaceStage {
    SurfaceStage::new((64, 48), 1.0)
}

pub fn make_scheduler(
    max_live: usize,
    destroy_on_switch: bool,
) -> (EngineScheduler, Rc<RefCell<FakeState>>, Rc<ParamStore>) {
    let (backend, state) = FakeGpuBackend::new();
    let store = Rc::new(ParamStore::new());
    let mut scheduler = EngineScheduler::new(
        Rc::clone(&store),
        Box::new(backend),
        test_stage(),
        max_live,
        destroy_on_switch,
    )
    .expect("scheduler construction should succeed");
    scheduler.pool_mut().set_pacing(Duration::ZERO);
    (scheduler, state, store)
}
