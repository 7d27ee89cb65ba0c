mod common;

use common::FakeGpuBackend;
use std::rc::Rc;
use std::time::Duration;

use viz_host::audio::AudioFeatures;
use viz_host::context::ContextPool;
use viz_host::engine::{Engine, EngineId, RoleSeed};
use viz_host::params::{ParamField, ParamStore};
use viz_host::surface::{SurfaceRegistry, SurfaceRole, SurfaceStage};

fn harness(
    engine: EngineId,
) -> (
    ContextPool,
    SurfaceStage,
    Rc<ParamStore>,
    Rc<std::cell::RefCell<common::FakeState>>,
) {
    let (backend, state) = FakeGpuBackend::new();
    let mut pool = ContextPool::new(Box::new(backend), 16).expect("pool should build");
    pool.set_pacing(Duration::ZERO);
    let mut stage = common::test_stage();
    stage.set_composited(engine, true);
    stage.prepare_engine(engine);
    (pool, stage, Rc::new(ParamStore::new()), state)
}

#[test]
fn create_binds_all_five_surfaces() {
    let (mut pool, stage, store, state) = harness(EngineId::Quantum);
    let engine = Engine::create(EngineId::Quantum, Rc::clone(&store), &mut pool, &stage)
        .expect("create should succeed");

    assert_eq!(engine.contexts().len(), 5);
    assert_eq!(pool.live_count(), 5);
    let created = state.borrow().created.clone();
    let expected: Vec<&str> = SurfaceRegistry::surfaces(EngineId::Quantum)
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(created, expected);
}

#[test]
fn partial_acquisition_failure_releases_everything() {
    let (mut pool, stage, store, state) = harness(EngineId::Holographic);
    state
        .borrow_mut()
        .fail_surfaces
        .push(SurfaceRegistry::surfaces(EngineId::Holographic)[2].id);

    let err = Engine::create(EngineId::Holographic, store, &mut pool, &stage)
        .expect_err("third surface is scripted to fail");
    assert!(matches!(
        err,
        viz_host::engine::EngineError::CreateFailed { .. }
    ));
    assert_eq!(pool.live_count(), 0);
    assert_eq!(state.borrow().destroyed.len(), 2, "the two bound contexts released");
}

#[test]
fn tick_is_a_noop_while_suspended() {
    let (mut pool, stage, store, state) = harness(EngineId::Faceted);
    let mut engine =
        Engine::create(EngineId::Faceted, store, &mut pool, &stage).expect("create");

    engine.tick(&mut pool);
    assert_eq!(engine.tick_count(), 0);
    assert_eq!(state.borrow().submits, 0);

    engine.set_active(true);
    engine.tick(&mut pool);
    assert_eq!(engine.tick_count(), 1);
    assert_eq!(state.borrow().submits, 5, "one draw per surface per tick");

    engine.set_active(false);
    engine.tick(&mut pool);
    assert_eq!(engine.tick_count(), 1);
    assert_eq!(state.borrow().submits, 5);
}

#[test]
fn sticky_overrides_survive_variant_changes() {
    let (mut pool, stage, store, _) = harness(EngineId::Holographic);
    let mut engine =
        Engine::create(EngineId::Holographic, Rc::clone(&store), &mut pool, &stage)
            .expect("create");

    engine.set_variant(5);
    let seeds_v5 = RoleSeed::derive(EngineId::Holographic, 5, SurfaceRole::Content);
    assert_eq!(engine.role_seed(SurfaceRole::Content), seeds_v5);

    engine.update_param(ParamField::GridDensity, 42.0);
    engine.set_variant(6);

    // Role-local seeds regenerated, sticky override preserved.
    let seeds_v6 = RoleSeed::derive(EngineId::Holographic, 6, SurfaceRole::Content);
    assert_eq!(engine.role_seed(SurfaceRole::Content), seeds_v6);
    assert_ne!(seeds_v5, seeds_v6);
    assert_eq!(
        store.get(EngineId::Holographic, ParamField::GridDensity),
        42.0
    );
    assert_eq!(store.get(EngineId::Holographic, ParamField::Variant), 6.0);
}

#[test]
fn overrides_reset_after_destroy_and_recreate() {
    let (mut pool, stage, store, _) = harness(EngineId::Quantum);
    let mut engine = Engine::create(EngineId::Quantum, Rc::clone(&store), &mut pool, &stage)
        .expect("create");
    engine.update_param(ParamField::GridDensity, 88.0);
    assert!(!engine.override_map().is_empty());
    engine.destroy(&mut pool);
    assert_eq!(pool.live_count(), 0);

    let engine = Engine::create(EngineId::Quantum, Rc::clone(&store), &mut pool, &stage)
        .expect("recreate");
    assert!(engine.override_map().is_empty(), "overrides die with the instance");
    // Parameter state itself persists across recreation.
    assert_eq!(store.get(EngineId::Quantum, ParamField::GridDensity), 88.0);
}

#[test]
fn apply_audio_replaces_rather_than_queues() {
    let (mut pool, stage, store, state) = harness(EngineId::Quantum);
    let mut engine =
        Engine::create(EngineId::Quantum, store, &mut pool, &stage).expect("create");
    engine.set_active(true);

    let quiet = AudioFeatures {
        smooth: 0.1,
        energy: 0.1,
        ..AudioFeatures::default()
    };
    let loud = AudioFeatures {
        smooth: 0.9,
        energy: 0.9,
        ..AudioFeatures::default()
    };
    engine.apply_audio(quiet);
    engine.apply_audio(loud);
    engine.tick(&mut pool);
    assert_eq!(state.borrow().submits, 5);
    let level = state.borrow().last_audio_level;
    assert!((level - 0.9f32 as f64).abs() < 1e-6, "latest frame wins");

    // The cached frame is consumed by the tick, not retained.
    engine.tick(&mut pool);
    assert_eq!(engine.tick_count(), 2);
    assert_eq!(state.borrow().last_audio_level, 0.0);
}

#[test]
fn native_audio_pass_respects_suppression() {
    let (mut pool, stage, store, _) = harness(EngineId::Quantum);
    let mut engine = Engine::create(EngineId::Quantum, Rc::clone(&store), &mut pool, &stage)
        .expect("create");

    let frame = AudioFeatures {
        bass: 0.9,
        energy: 0.8,
        peak: 0.9,
        ..AudioFeatures::default()
    };

    engine.apply_native(&frame, true);
    assert_eq!(store.get(EngineId::Quantum, ParamField::Intensity), 0.7);

    engine.apply_native(&frame, false);
    let expected = 0.7 + 0.9f32 as f64 * 0.2;
    assert!((store.get(EngineId::Quantum, ParamField::Intensity) - expected).abs() < 1e-6);
}

#[test]
fn native_pass_is_inert_for_engines_without_a_profile() {
    let (mut pool, stage, store, _) = harness(EngineId::Faceted);
    let mut engine = Engine::create(EngineId::Faceted, Rc::clone(&store), &mut pool, &stage)
        .expect("create");

    let frame = AudioFeatures {
        bass: 0.9,
        energy: 0.8,
        peak: 0.9,
        ..AudioFeatures::default()
    };
    let before = store.snapshot(EngineId::Faceted);
    engine.apply_native(&frame, false);
    assert_eq!(store.snapshot(EngineId::Faceted), before);
}

#[test]
fn update_param_on_variant_field_reseeds_roles() {
    let (mut pool, stage, store, _) = harness(EngineId::Holographic);
    let mut engine =
        Engine::create(EngineId::Holographic, Rc::clone(&store), &mut pool, &stage)
            .expect("create");

    engine.update_param(ParamField::Variant, 9.0);
    assert_eq!(store.get(EngineId::Holographic, ParamField::Variant), 9.0);
    assert_eq!(
        engine.role_seed(SurfaceRole::Accent),
        RoleSeed::derive(EngineId::Holographic, 9, SurfaceRole::Accent)
    );
    // Variant itself is not a sticky override.
    assert!(engine.override_map().get(&ParamField::Variant).is_none());
}
