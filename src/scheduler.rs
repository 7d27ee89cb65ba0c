use crate::context::{AcquireError, ContextPool, GpuBackend, PoolConfigError};
use crate::diag::{DiagEvent, Diagnostics};
use crate::engine::{Engine, EngineError, EngineId};
use crate::input::InputEvent;
use crate::params::ParamStore;
use crate::router::{Channel, ReactivityRouter};
use crate::surface::SurfaceStage;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// Engine the scheduler degrades to when a recovery switch fails.
pub const DEFAULT_ENGINE: EngineId = EngineId::Faceted;

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchError {
    CapacityExceeded { live: usize, cap: usize },
    CreateFailed { engine: EngineId, reason: String },
    ValidationFailed { engine: EngineId },
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { live, cap } => {
                write!(f, "context cap reached ({live}/{cap})")
            }
            Self::CreateFailed { engine, reason } => {
                write!(f, "create {} failed: {reason}", engine.as_str())
            }
            Self::ValidationFailed { engine } => {
                write!(f, "{} failed context validation", engine.as_str())
            }
        }
    }
}

impl std::error::Error for SwitchError {}

/// Owns the context pool, the surface stage, the router, and every engine
/// instance; maintains exactly one active engine and mediates switches with
/// the deterministic transition protocol.
pub struct EngineScheduler {
    store: Rc<ParamStore>,
    pool: ContextPool,
    stage: SurfaceStage,
    router: ReactivityRouter,
    instances: BTreeMap<EngineId, Engine>,
    active: Option<EngineId>,
    destroy_on_switch: bool,
    requested: Option<EngineId>,
    recovery: Option<EngineId>,
    recovery_causes: BTreeSet<String>,
    diag: Diagnostics,
}

impl EngineScheduler {
    pub fn new(
        store: Rc<ParamStore>,
        backend: Box<dyn GpuBackend>,
        stage: SurfaceStage,
        max_live: usize,
        destroy_on_switch: bool,
    ) -> Result<Self, PoolConfigError> {
        Ok(Self {
            store,
            pool: ContextPool::new(backend, max_live)?,
            stage,
            router: ReactivityRouter::new(),
            instances: BTreeMap::new(),
            active: None,
            destroy_on_switch,
            requested: None,
            recovery: None,
            recovery_causes: BTreeSet::new(),
            diag: Diagnostics::new(),
        })
    }

    pub fn active(&self) -> Option<EngineId> {
        self.active
    }

    pub fn store(&self) -> &Rc<ParamStore> {
        &self.store
    }

    pub fn router(&self) -> &ReactivityRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut ReactivityRouter {
        &mut self.router
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ContextPool {
        &mut self.pool
    }

    pub fn stage(&self) -> &SurfaceStage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut SurfaceStage {
        &mut self.stage
    }

    pub fn instance(&self, id: EngineId) -> Option<&Engine> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: EngineId) -> Option<&mut Engine> {
        self.instances.get_mut(&id)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diag
    }

    pub fn set_destroy_on_switch(&mut self, on: bool) {
        self.destroy_on_switch = on;
    }

    /// Latest request wins; an in-flight recovery is superseded.
    pub fn request_switch(&mut self, target: EngineId) {
        self.requested = Some(target);
    }

    pub fn resize(&mut self, viewport: (u32, u32)) {
        self.stage.set_viewport(viewport);
        if let Some(active) = self.active {
            self.stage.prepare_engine(active);
        }
    }

    /// The deterministic transition protocol. On success exactly the five
    /// target surfaces are composited, all five contexts are bound, and the
    /// router is attached to the target.
    pub fn switch_to(&mut self, target: EngineId) -> Result<(), SwitchError> {
        // No-op guard: a healthy active target stays untouched.
        if self.active == Some(target) {
            let healthy = self
                .instances
                .get(&target)
                .map(|e| e.validate(&mut self.pool))
                .unwrap_or(false);
            if healthy {
                return Ok(());
            }
        }

        let prev = self.active;

        // Hide every engine's surface set before any resource work.
        for engine in EngineId::ALL {
            self.stage.set_composited(engine, false);
        }

        // Deactivate the previous engine; destroy it only per policy, or
        // unconditionally when it is the unhealthy target being rebuilt.
        if let Some(p) = prev {
            if let Some(engine) = self.instances.get_mut(&p) {
                engine.set_active(false);
            }
            if p == target || self.destroy_on_switch {
                if let Some(engine) = self.instances.remove(&p) {
                    engine.destroy(&mut self.pool);
                }
            }
        }
        self.active = None;

        // Prepare target surfaces: composited, sized to the viewport.
        self.stage.set_composited(target, true);
        self.stage.prepare_engine(target);

        // Reuse a cached instance only if every context still validates.
        let reusable = self
            .instances
            .get(&target)
            .map(|e| e.validate(&mut self.pool))
            .unwrap_or(false);
        if !reusable {
            if let Some(stale) = self.instances.remove(&target) {
                stale.destroy(&mut self.pool);
            }
            if let Err(err) = self.create_instance(target) {
                return self.fail_switch(prev, target, err);
            }
        }

        // Validate before activation; a failed probe fails the switch.
        let valid = self
            .instances
            .get(&target)
            .map(|e| e.validate(&mut self.pool))
            .unwrap_or(false);
        if !valid {
            if let Some(bad) = self.instances.remove(&target) {
                bad.destroy(&mut self.pool);
            }
            return self.fail_switch(prev, target, SwitchError::ValidationFailed { engine: target });
        }

        if let Some(engine) = self.instances.get_mut(&target) {
            engine.set_active(true);
        }
        self.active = Some(target);
        self.router.attach_engine(target, &self.store);
        Ok(())
    }

    /// Create the target instance, with the forced-cleanup retry when the
    /// global context cap is the blocker.
    fn create_instance(&mut self, target: EngineId) -> Result<(), SwitchError> {
        match Engine::create(target, Rc::clone(&self.store), &mut self.pool, &self.stage) {
            Ok(engine) => {
                self.instances.insert(target, engine);
                Ok(())
            }
            Err(err) => {
                if let AcquireError::CapacityExceeded { live, cap } = err.cause() {
                    self.diag.report(DiagEvent::CapacityExceeded {
                        live: *live,
                        cap: *cap,
                    });
                    // Free every non-target cached instance and retry once.
                    let others: Vec<EngineId> = self
                        .instances
                        .keys()
                        .copied()
                        .filter(|e| *e != target)
                        .collect();
                    for other in others {
                        if let Some(inst) = self.instances.remove(&other) {
                            inst.destroy(&mut self.pool);
                        }
                    }
                    match Engine::create(
                        target,
                        Rc::clone(&self.store),
                        &mut self.pool,
                        &self.stage,
                    ) {
                        Ok(engine) => {
                            self.instances.insert(target, engine);
                            Ok(())
                        }
                        Err(err) => Err(self.engine_error_to_switch(target, err)),
                    }
                } else {
                    Err(self.engine_error_to_switch(target, err))
                }
            }
        }
    }

    fn engine_error_to_switch(&mut self, target: EngineId, err: EngineError) -> SwitchError {
        match err.cause() {
            AcquireError::CapacityExceeded { live, cap } => SwitchError::CapacityExceeded {
                live: *live,
                cap: *cap,
            },
            AcquireError::SurfaceNotReady => {
                let EngineError::CreateFailed { surface, .. } = &err;
                self.diag
                    .report(DiagEvent::SurfaceNotReady { surface: *surface });
                SwitchError::CreateFailed {
                    engine: target,
                    reason: err.to_string(),
                }
            }
            AcquireError::CreationFailed(reason) => {
                let EngineError::CreateFailed { surface, .. } = &err;
                self.diag.report(DiagEvent::ContextCreationFailed {
                    surface: *surface,
                    reason: reason.clone(),
                });
                SwitchError::CreateFailed {
                    engine: target,
                    reason: err.to_string(),
                }
            }
            AcquireError::AlreadyBound => SwitchError::CreateFailed {
                engine: target,
                reason: err.to_string(),
            },
        }
    }

    /// Roll back a failed switch: restore the previous engine as active when
    /// its instance is still cached, and surface the failure.
    fn fail_switch(
        &mut self,
        prev: Option<EngineId>,
        target: EngineId,
        err: SwitchError,
    ) -> Result<(), SwitchError> {
        self.stage.set_composited(target, false);
        self.diag.report(DiagEvent::SwitchFailed {
            target,
            reason: err.to_string(),
        });
        if let Some(p) = prev {
            if p != target && self.instances.contains_key(&p) {
                self.stage.set_composited(p, true);
                self.stage.prepare_engine(p);
                let healthy = self
                    .instances
                    .get(&p)
                    .map(|e| e.validate(&mut self.pool))
                    .unwrap_or(false);
                if healthy {
                    if let Some(engine) = self.instances.get_mut(&p) {
                        engine.set_active(true);
                    }
                    self.active = Some(p);
                    self.router.attach_engine(p, &self.store);
                } else {
                    self.stage.set_composited(p, false);
                }
            }
        }
        Err(err)
    }

    /// One cooperative frame: drain driver loss events, apply pending switch
    /// requests, route inputs, run the native-then-router write phases, and
    /// tick the active engine.
    pub fn tick(&mut self, events: Vec<InputEvent>) {
        let lost = self.pool.pump_losses();
        if !lost.is_empty() {
            for surface in &lost {
                self.diag.report(DiagEvent::ContextLost {
                    surface: surface.id,
                });
            }
            if let Some(active) = self.active {
                if lost.iter().any(|s| s.engine == active) {
                    self.recovery = Some(active);
                }
            }
        }

        self.pump_switches();

        let audio_frame = events.iter().rev().find_map(|e| match e {
            InputEvent::AudioFrame(f) => Some(*f),
            _ => None,
        });
        for event in events {
            self.router.ingest(event);
        }

        if let Some(active) = self.active {
            let audio_suppressed = self.router.suppresses(Channel::Audio);
            if let Some(engine) = self.instances.get_mut(&active) {
                if let Some(features) = audio_frame {
                    engine.apply_audio(features);
                    engine.apply_native(&features, audio_suppressed);
                }
            }
            // Router writes land after the native pass: last write wins.
            self.router.flush(&self.store);
            if let Some(engine) = self.instances.get_mut(&active) {
                engine.tick(&mut self.pool);
            }
        }
    }

    /// Schedule a recovery rebuild of the active engine (driver loss path).
    pub fn schedule_recovery(&mut self, engine: EngineId) {
        self.recovery = Some(engine);
    }

    fn pump_switches(&mut self) {
        if let Some(target) = self.requested.take() {
            // A user request supersedes any pending recovery.
            self.recovery = None;
            let _ = self.switch_to(target);
            return;
        }
        if let Some(target) = self.recovery.take() {
            if let Err(err) = self.switch_to(target) {
                // Surface each distinct recovery failure cause once, then
                // degrade to the default engine.
                let cause = err.to_string();
                if self.recovery_causes.insert(cause.clone()) {
                    self.diag.report(DiagEvent::SwitchFailed {
                        target,
                        reason: format!("recovery: {cause}"),
                    });
                }
                if target != DEFAULT_ENGINE {
                    let _ = self.switch_to(DEFAULT_ENGINE);
                }
            }
        }
    }
}
