mod common;

use common::FakeGpuBackend;
use std::time::Duration;

use viz_host::context::{AcquireError, ContextPool, PoolConfigError, Validation};
use viz_host::engine::EngineId;
use viz_host::surface::{SurfaceRegistry, SurfaceRole};

fn ready_stage(engines: &[EngineId]) -> viz_host::surface::SurfaceStage {
    let mut stage = common::test_stage();
    for &engine in engines {
        stage.set_composited(engine, true);
        stage.prepare_engine(engine);
    }
    stage
}

fn pool(cap: usize) -> (ContextPool, std::rc::Rc<std::cell::RefCell<common::FakeState>>) {
    let (backend, state) = FakeGpuBackend::new();
    let mut pool = ContextPool::new(Box::new(backend), cap).expect("pool should build");
    pool.set_pacing(Duration::ZERO);
    (pool, state)
}

#[test]
fn surface_ids_follow_the_prefix_scheme() {
    for engine in EngineId::ALL {
        for surface in SurfaceRegistry::surfaces(engine) {
            let prefix = engine.meta().prefix;
            let expected = if prefix.is_empty() {
                format!("{}-canvas", surface.role.as_str())
            } else {
                format!("{}-{}-canvas", prefix, surface.role.as_str())
            };
            assert_eq!(surface.id, expected);
            assert_eq!(
                viz_host::surface::SurfaceRegistry::lookup(surface.id),
                Some(surface)
            );
        }
    }
    assert_eq!(viz_host::surface::SurfaceRegistry::lookup("bogus-canvas"), None);
}

#[test]
fn pool_rejects_caps_beyond_hard_limit() {
    let (backend, _) = FakeGpuBackend::new();
    let err = ContextPool::new(Box::new(backend), 17).expect_err("17 must hard-fail");
    assert!(matches!(err, PoolConfigError::CapTooLarge { .. }));

    let (backend, _) = FakeGpuBackend::new();
    let err = ContextPool::new(Box::new(backend), 0).expect_err("0 must fail");
    assert_eq!(err, PoolConfigError::CapZero);
}

#[test]
fn acquire_enforces_the_global_cap() {
    let stage = ready_stage(&[EngineId::Faceted, EngineId::Quantum]);
    let (mut pool, _) = pool(5);

    for surface in SurfaceRegistry::surfaces(EngineId::Faceted) {
        pool.acquire(surface, &stage).expect("within cap");
    }
    assert_eq!(pool.live_count(), 5);

    let extra = SurfaceRegistry::surface(EngineId::Quantum, SurfaceRole::Background);
    let err = pool.acquire(extra, &stage).expect_err("cap must hold");
    assert!(matches!(err, AcquireError::CapacityExceeded { live: 5, cap: 5 }));
    assert_eq!(pool.live_count(), 5);
}

#[test]
fn acquire_rejects_double_binding_one_surface() {
    let stage = ready_stage(&[EngineId::Faceted]);
    let (mut pool, _) = pool(5);

    let surface = SurfaceRegistry::surface(EngineId::Faceted, SurfaceRole::Content);
    pool.acquire(surface, &stage).expect("first bind");
    let err = pool.acquire(surface, &stage).expect_err("second bind must fail");
    assert_eq!(err, AcquireError::AlreadyBound);
}

#[test]
fn acquire_requires_a_ready_surface() {
    // Not composited at all.
    let stage = common::test_stage();
    let (mut pool, _) = pool(5);
    let surface = SurfaceRegistry::surface(EngineId::Quantum, SurfaceRole::Content);
    let err = pool.acquire(surface, &stage).expect_err("invisible surface");
    assert_eq!(err, AcquireError::SurfaceNotReady);

    // Composited but zero-sized (viewport never prepared).
    let mut stage = common::test_stage();
    stage.set_composited(EngineId::Quantum, true);
    let err = pool.acquire(surface, &stage).expect_err("zero-sized surface");
    assert_eq!(err, AcquireError::SurfaceNotReady);
}

#[test]
fn release_frees_capacity_and_destroys_at_driver_level() {
    let stage = ready_stage(&[EngineId::Faceted]);
    let (mut pool, state) = pool(5);

    let surface = SurfaceRegistry::surface(EngineId::Faceted, SurfaceRole::Accent);
    let id = pool.acquire(surface, &stage).expect("bind");
    assert_eq!(pool.live_count(), 1);

    pool.release(id);
    assert_eq!(pool.live_count(), 0);
    assert_eq!(state.borrow().destroyed.len(), 1);
    assert!(state.borrow().live.is_empty());

    // The surface can be bound again afterwards.
    pool.acquire(surface, &stage).expect("rebind after release");
}

#[test]
fn creation_failure_retries_once_with_conservative_flags() {
    let stage = ready_stage(&[EngineId::Holographic]);
    let (mut pool, state) = pool(5);
    let surface = SurfaceRegistry::surface(EngineId::Holographic, SurfaceRole::Shadow);

    state.borrow_mut().fail_once.push(surface.id);
    pool.acquire(surface, &stage)
        .expect("second attempt with conservative flags should succeed");
    assert_eq!(pool.live_count(), 1);

    // A persistent driver refusal still fails after the retry.
    let other = SurfaceRegistry::surface(EngineId::Holographic, SurfaceRole::Accent);
    state.borrow_mut().fail_surfaces.push(other.id);
    let err = pool.acquire(other, &stage).expect_err("persistent failure");
    assert!(matches!(err, AcquireError::CreationFailed(_)));
}

#[test]
fn validate_reports_ok_lost_and_missing() {
    let stage = ready_stage(&[EngineId::Polychora]);
    let (mut pool, state) = pool(5);

    let bound = SurfaceRegistry::surface(EngineId::Polychora, SurfaceRole::Content);
    let missing = SurfaceRegistry::surface(EngineId::Polychora, SurfaceRole::Shadow);
    pool.acquire(bound, &stage).expect("bind");

    assert_eq!(pool.validate(bound), Validation::Ok);
    assert_eq!(pool.validate(missing), Validation::Missing);

    // Fail the probe: the pool marks the context lost and stays lost.
    let ctx = *state.borrow().live.iter().next().expect("one live ctx");
    state.borrow_mut().fail_probe.insert(ctx);
    assert_eq!(pool.validate(bound), Validation::Lost);
    state.borrow_mut().fail_probe.clear();
    assert_eq!(pool.validate(bound), Validation::Lost);
}

#[test]
fn loss_handlers_run_from_the_pump_not_the_driver() {
    let stage = ready_stage(&[EngineId::Quantum]);
    let (mut pool, state) = pool(5);

    let surface = SurfaceRegistry::surface(EngineId::Quantum, SurfaceRole::Highlight);
    pool.acquire(surface, &stage).expect("bind");

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen_in_handler = std::rc::Rc::clone(&seen);
    pool.on_loss(move |s| seen_in_handler.borrow_mut().push(s.id));

    let ctx = *state.borrow().live.iter().next().expect("one live ctx");
    state.borrow_mut().lose_next.push(ctx);
    assert!(seen.borrow().is_empty(), "no handler before the pump runs");

    let lost = pool.pump_losses();
    assert_eq!(lost.len(), 1);
    assert_eq!(seen.borrow().as_slice(), &[surface.id]);
    assert_eq!(pool.validate(surface), Validation::Lost);
}
