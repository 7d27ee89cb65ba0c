use std::f64::consts::PI;
use std::rc::Rc;

use viz_host::audio::AudioFeatures;
use viz_host::engine::EngineId;
use viz_host::input::InputEvent;
use viz_host::params::{wrap_angle, ParamField, ParamStore};
use viz_host::router::{Channel, ClickMode, PointerMode, ReactivityRouter, WheelMode};

fn attached_router(engine: EngineId) -> (ReactivityRouter, Rc<ParamStore>) {
    let store = Rc::new(ParamStore::new());
    let mut router = ReactivityRouter::new();
    router.attach_engine(engine, &store);
    (router, store)
}

fn loud_frame(bass: f32, mid: f32, high: f32, energy: f32) -> AudioFeatures {
    AudioFeatures {
        bass,
        mid,
        high,
        energy,
        transient: 0.0,
        rhythm: 0.0,
        peak: bass.max(mid).max(high),
        smooth: energy,
    }
}

#[test]
fn distance_mode_center_pointer_is_deterministic() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_pointer_mode(Some(PointerMode::Distance));
    store.set(EngineId::Faceted, ParamField::Hue, 200.0);

    router.ingest(InputEvent::Pointer {
        x: 0.5,
        y: 0.5,
        buttons: 0,
    });
    router.flush(&store);

    assert_eq!(store.get(EngineId::Faceted, ParamField::GridDensity), 5.0);
    assert_eq!(store.get(EngineId::Faceted, ParamField::Intensity), 1.0);
    assert_eq!(store.get(EngineId::Faceted, ParamField::Saturation), 1.0);
    assert_eq!(store.get(EngineId::Faceted, ParamField::Hue), 320.0);
}

#[test]
fn distance_mode_far_corner_drops_intensity() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_pointer_mode(Some(PointerMode::Distance));

    router.ingest(InputEvent::Pointer {
        x: 1.0,
        y: 1.0,
        buttons: 0,
    });
    router.flush(&store);

    // d saturates at 1 for the corner.
    assert_eq!(store.get(EngineId::Faceted, ParamField::GridDensity), 100.0);
    assert!((store.get(EngineId::Faceted, ParamField::Intensity) - 0.2).abs() < 1e-9);
    assert!((store.get(EngineId::Faceted, ParamField::Saturation) - 0.4).abs() < 1e-9);
    assert_eq!(store.get(EngineId::Faceted, ParamField::Hue), 0.0);
}

#[test]
fn rotations_mode_maps_pointer_to_wrapped_angles() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_pointer_mode(Some(PointerMode::Rotations));

    router.ingest(InputEvent::Pointer {
        x: 0.75,
        y: 0.25,
        buttons: 0,
    });
    router.flush(&store);

    let xw = store.get(EngineId::Faceted, ParamField::Rot4dXw);
    let yw = store.get(EngineId::Faceted, ParamField::Rot4dYw);
    let zw = store.get(EngineId::Faceted, ParamField::Rot4dZw);
    assert!((xw - wrap_angle(0.25 * 4.0 * PI)).abs() < 1e-9);
    assert!((yw - wrap_angle(0.25 * 2.8 * PI)).abs() < 1e-9);
    assert!((zw - wrap_angle(-0.25 * 4.0 * PI)).abs() < 1e-9);
    // Hue tracks the attach-time baseline (faceted seeds at 200).
    assert!((store.get(EngineId::Faceted, ParamField::Hue) - 207.5).abs() < 1e-9);
}

#[test]
fn velocity_mode_tracks_rolling_mean_of_deltas() {
    let (mut router, store) = attached_router(EngineId::Quantum);
    router.set_pointer_mode(Some(PointerMode::Velocity));

    router.ingest(InputEvent::Pointer {
        x: 0.0,
        y: 0.5,
        buttons: 0,
    });
    router.ingest(InputEvent::Pointer {
        x: 0.1,
        y: 0.5,
        buttons: 0,
    });
    router.flush(&store);

    // One delta of 0.1: chaos = 0.1*30 clamped, speed = 0.5 + 0.1*15.
    assert_eq!(store.get(EngineId::Quantum, ParamField::Chaos), 1.0);
    assert!((store.get(EngineId::Quantum, ParamField::Speed) - 2.0).abs() < 1e-9);
    assert!((store.get(EngineId::Quantum, ParamField::GridDensity) - 55.0).abs() < 1e-9);
    assert!((store.get(EngineId::Quantum, ParamField::Intensity) - 0.46).abs() < 1e-9);
    assert!((store.get(EngineId::Quantum, ParamField::Hue) - 288.0).abs() < 1e-9);
}

#[test]
fn wheel_cycle_accumulates_and_wraps() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_wheel_mode(Some(WheelMode::Cycle));
    store.set(EngineId::Faceted, ParamField::GridDensity, 15.0);
    store.set(EngineId::Faceted, ParamField::Hue, 200.0);

    for _ in 0..10 {
        router.ingest(InputEvent::Wheel { dy: 3.0 });
    }
    router.flush(&store);

    assert!((store.get(EngineId::Faceted, ParamField::GridDensity) - 23.0).abs() < 1e-9);
    assert!((store.get(EngineId::Faceted, ParamField::Hue) - 230.0).abs() < 1e-9);
}

#[test]
fn wheel_zero_delta_is_a_noop() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_wheel_mode(Some(WheelMode::Cycle));
    let before = store.snapshot(EngineId::Faceted);

    router.ingest(InputEvent::Wheel { dy: 0.0 });
    router.flush(&store);

    assert_eq!(store.snapshot(EngineId::Faceted), before);
}

#[test]
fn wheel_wave_clamps_to_its_sub_range() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_wheel_mode(Some(WheelMode::Wave));
    store.set(EngineId::Faceted, ParamField::MorphFactor, 1.99);

    for _ in 0..5 {
        router.ingest(InputEvent::Wheel { dy: 1.0 });
    }
    router.flush(&store);
    assert_eq!(store.get(EngineId::Faceted, ParamField::MorphFactor), 2.0);

    for _ in 0..200 {
        router.ingest(InputEvent::Wheel { dy: -1.0 });
    }
    router.flush(&store);
    assert!((store.get(EngineId::Faceted, ParamField::MorphFactor) - 0.2).abs() < 1e-9);
}

#[test]
fn wheel_sweep_steps_the_focused_field() {
    fastrand::seed(7);
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_wheel_mode(Some(WheelMode::Sweep));
    let hue_before = store.get(EngineId::Faceted, ParamField::Hue);

    router.ingest(InputEvent::Wheel { dy: 1.0 });
    router.flush(&store);

    // Sweep starts focused on hue; one event steps 2% of its range.
    let hue_after = store.get(EngineId::Faceted, ParamField::Hue);
    assert!((hue_after - (hue_before + 7.2).rem_euclid(360.0)).abs() < 1e-9);
}

#[test]
fn click_burst_decays_back_toward_base_and_stops() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_click_mode(Some(ClickMode::Burst));
    let base_chaos = store.get(EngineId::Faceted, ParamField::Chaos);
    let base_speed = store.get(EngineId::Faceted, ParamField::Speed);

    router.ingest(InputEvent::PointerEnd { x: 0.5, y: 0.5 });
    router.flush(&store);
    assert!(!router.effects_idle());

    // First frame: amplitudes decayed once from 1.0.
    assert!((store.get(EngineId::Faceted, ParamField::Chaos) - (base_chaos + 0.8 * 0.94)).abs() < 1e-9);
    assert!((store.get(EngineId::Faceted, ParamField::Speed) - (base_speed + 1.5 * 0.92)).abs() < 1e-9);

    let mut frames = 1;
    while !router.effects_idle() {
        router.flush(&store);
        frames += 1;
        assert!(frames < 200, "burst effect must terminate");
    }
    // Slowest amplitude is 0.94^n < 0.01 => n = 75.
    assert!((70..=80).contains(&frames), "stopped after {frames} frames");
    assert!((store.get(EngineId::Faceted, ParamField::Chaos) - base_chaos).abs() < 0.01);
    assert!((store.get(EngineId::Faceted, ParamField::Speed) - base_speed).abs() < 0.02);
}

#[test]
fn click_ripple_scales_with_distance_to_center() {
    let (mut router, store) = attached_router(EngineId::Holographic);
    router.set_click_mode(Some(ClickMode::Ripple));
    let base = store.get(EngineId::Holographic, ParamField::MorphFactor);

    router.ingest(InputEvent::PointerEnd { x: 0.5, y: 0.5 });
    router.flush(&store);

    // Center click: boost = 0.1 + 0.2, first frame decayed once.
    let got = store.get(EngineId::Holographic, ParamField::MorphFactor);
    assert!((got - (base + 0.3 * 0.9)).abs() < 1e-9);
}

#[test]
fn engine_switch_clears_pending_effects() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_click_mode(Some(ClickMode::Blast));
    router.ingest(InputEvent::PointerEnd { x: 0.5, y: 0.5 });
    router.flush(&store);
    assert!(!router.effects_idle());

    router.attach_engine(EngineId::Quantum, &store);
    assert!(router.effects_idle(), "no stale timers across switches");
}

#[test]
fn audio_route_offsets_from_the_attached_baseline() {
    let (mut router, store) = attached_router(EngineId::Quantum);

    router.ingest(InputEvent::AudioFrame(loud_frame(0.9, 0.1, 0.1, 0.8)));
    router.flush(&store);

    // Quantum baseline: hue 280, morph 1.0, intensity 0.7.
    assert!((store.get(EngineId::Quantum, ParamField::Hue) - 292.0).abs() < 1e-4);
    assert!((store.get(EngineId::Quantum, ParamField::MorphFactor) - 1.1).abs() < 1e-4);
    assert!((store.get(EngineId::Quantum, ParamField::Intensity) - 0.97).abs() < 1e-4);
}

#[test]
fn silent_audio_frames_change_nothing() {
    let (mut router, store) = attached_router(EngineId::Quantum);
    let before = store.snapshot(EngineId::Quantum);

    router.ingest(InputEvent::AudioFrame(loud_frame(0.0, 0.0, 0.0, 0.0)));
    router.flush(&store);

    assert_eq!(store.snapshot(EngineId::Quantum), before);
}

#[test]
fn disabled_router_routes_nothing() {
    let (mut router, store) = attached_router(EngineId::Faceted);
    router.set_pointer_mode(Some(PointerMode::Distance));
    router.set_enabled(false);
    let before = store.snapshot(EngineId::Faceted);

    router.ingest(InputEvent::Pointer {
        x: 0.1,
        y: 0.9,
        buttons: 0,
    });
    router.flush(&store);

    assert_eq!(store.snapshot(EngineId::Faceted), before);
    assert!(!router.suppresses(Channel::Pointer));
}

#[test]
fn channel_suppression_follows_mode_selection() {
    let (mut router, _) = attached_router(EngineId::Quantum);
    assert!(!router.suppresses(Channel::Pointer));
    assert!(!router.suppresses(Channel::Click));
    assert!(!router.suppresses(Channel::Wheel));
    // The single analyzer feeds the router, so audio is always claimed
    // while the router is enabled.
    assert!(router.suppresses(Channel::Audio));

    router.set_pointer_mode(Some(PointerMode::Velocity));
    router.set_click_mode(Some(ClickMode::Burst));
    router.set_wheel_mode(Some(WheelMode::Sweep));
    assert!(router.suppresses(Channel::Pointer));
    assert!(router.suppresses(Channel::Click));
    assert!(router.suppresses(Channel::Wheel));
}

#[test]
fn invalid_mode_names_fall_back_to_off() {
    assert_eq!(PointerMode::parse("spiral"), None);
    assert_eq!(ClickMode::parse("boom"), None);
    assert_eq!(WheelMode::parse(""), None);
    assert_eq!(PointerMode::parse("distance"), Some(PointerMode::Distance));
}

#[test]
fn router_write_wins_over_native_write_in_one_tick() {
    // Simulated tick ordering: native writes first, router flush second.
    let (mut router, store) = attached_router(EngineId::Quantum);

    // Native engine pass bumps intensity from its own audio coupling.
    store.set(EngineId::Quantum, ParamField::Intensity, 0.88);
    // Router processes the same frame afterwards.
    router.ingest(InputEvent::AudioFrame(loud_frame(0.9, 0.1, 0.1, 0.8)));
    router.flush(&store);

    assert!((store.get(EngineId::Quantum, ParamField::Intensity) - 0.97).abs() < 1e-4);
}
