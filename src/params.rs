use crate::engine::{EngineId, ENGINE_COUNT};
use std::cell::{Cell, RefCell};
use std::f64::consts::{PI, TAU};

/// Canonical parameter vector shared by every visualizer system.
///
/// Every field is stored post-clamp: a read never observes an out-of-range
/// value. `hue` lives in `[0, 360)`; the 4D rotation angles are wrapped into
/// `(-pi, pi]` on write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub geometry: i64,
    pub variant: i64,
    pub grid_density: f64,
    pub morph_factor: f64,
    pub chaos: f64,
    pub speed: f64,
    pub hue: f64,
    pub intensity: f64,
    pub saturation: f64,
    pub rot4d_xw: f64,
    pub rot4d_yw: f64,
    pub rot4d_zw: f64,
    pub dimension: f64,
}

pub const GEOMETRY_COUNT: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamField {
    Geometry,
    Variant,
    GridDensity,
    MorphFactor,
    Chaos,
    Speed,
    Hue,
    Intensity,
    Saturation,
    Rot4dXw,
    Rot4dYw,
    Rot4dZw,
    Dimension,
}

pub const FIELD_COUNT: usize = 13;

impl ParamField {
    pub const ALL: [Self; FIELD_COUNT] = [
        Self::Geometry,
        Self::Variant,
        Self::GridDensity,
        Self::MorphFactor,
        Self::Chaos,
        Self::Speed,
        Self::Hue,
        Self::Intensity,
        Self::Saturation,
        Self::Rot4dXw,
        Self::Rot4dYw,
        Self::Rot4dZw,
        Self::Dimension,
    ];

    /// Wire name as used by snapshots and deep links.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Variant => "variant",
            Self::GridDensity => "gridDensity",
            Self::MorphFactor => "morphFactor",
            Self::Chaos => "chaos",
            Self::Speed => "speed",
            Self::Hue => "hue",
            Self::Intensity => "intensity",
            Self::Saturation => "saturation",
            Self::Rot4dXw => "rot4dXW",
            Self::Rot4dYw => "rot4dYW",
            Self::Rot4dZw => "rot4dZW",
            Self::Dimension => "dimension",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "geometry" => Some(Self::Geometry),
            "variant" => Some(Self::Variant),
            "gridDensity" => Some(Self::GridDensity),
            "morphFactor" => Some(Self::MorphFactor),
            "chaos" => Some(Self::Chaos),
            "speed" => Some(Self::Speed),
            "hue" => Some(Self::Hue),
            "intensity" => Some(Self::Intensity),
            "saturation" => Some(Self::Saturation),
            "rot4dXW" => Some(Self::Rot4dXw),
            "rot4dYW" => Some(Self::Rot4dYw),
            "rot4dZW" => Some(Self::Rot4dZw),
            "dimension" => Some(Self::Dimension),
            _ => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Geometry | Self::Variant)
    }
}

impl Params {
    pub fn value(&self, field: ParamField) -> f64 {
        match field {
            ParamField::Geometry => self.geometry as f64,
            ParamField::Variant => self.variant as f64,
            ParamField::GridDensity => self.grid_density,
            ParamField::MorphFactor => self.morph_factor,
            ParamField::Chaos => self.chaos,
            ParamField::Speed => self.speed,
            ParamField::Hue => self.hue,
            ParamField::Intensity => self.intensity,
            ParamField::Saturation => self.saturation,
            ParamField::Rot4dXw => self.rot4d_xw,
            ParamField::Rot4dYw => self.rot4d_yw,
            ParamField::Rot4dZw => self.rot4d_zw,
            ParamField::Dimension => self.dimension,
        }
    }

    fn set_value(&mut self, field: ParamField, v: f64) {
        match field {
            ParamField::Geometry => self.geometry = v as i64,
            ParamField::Variant => self.variant = v as i64,
            ParamField::GridDensity => self.grid_density = v,
            ParamField::MorphFactor => self.morph_factor = v,
            ParamField::Chaos => self.chaos = v,
            ParamField::Speed => self.speed = v,
            ParamField::Hue => self.hue = v,
            ParamField::Intensity => self.intensity = v,
            ParamField::Saturation => self.saturation = v,
            ParamField::Rot4dXw => self.rot4d_xw = v,
            ParamField::Rot4dYw => self.rot4d_yw = v,
            ParamField::Rot4dZw => self.rot4d_zw = v,
            ParamField::Dimension => self.dimension = v,
        }
    }
}

/// Wraps an angle into `(-pi, pi]` so that `v` and `v + 2*pi` store identically.
pub fn wrap_angle(v: f64) -> f64 {
    let mut a = v % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Clamp a raw numeric write into the field's declared range.
///
/// `variant_count` is the active engine's variant table size; every other
/// range is fixed schema data.
pub fn clamp_value(field: ParamField, raw: f64, variant_count: i64) -> f64 {
    match field {
        ParamField::Geometry => (raw.floor() as i64).clamp(0, GEOMETRY_COUNT - 1) as f64,
        ParamField::Variant => (raw.floor() as i64).clamp(0, variant_count.max(1) - 1) as f64,
        ParamField::GridDensity => raw.clamp(5.0, 100.0),
        ParamField::MorphFactor => raw.clamp(0.0, 2.0),
        ParamField::Chaos => raw.clamp(0.0, 1.0),
        ParamField::Speed => raw.clamp(0.1, 3.0),
        ParamField::Hue => raw.rem_euclid(360.0),
        ParamField::Intensity => raw.clamp(0.0, 1.0),
        ParamField::Saturation => raw.clamp(0.0, 1.0),
        ParamField::Rot4dXw | ParamField::Rot4dYw | ParamField::Rot4dZw => wrap_angle(raw),
        ParamField::Dimension => raw.clamp(3.0, 4.5),
    }
}

/// Untyped write payload. Anything that is not a finite number is rejected
/// with `SetOutcome::Invalid` without touching the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl ParamValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Real(r) if r.is_finite() => Some(*r),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetOutcome {
    Unchanged,
    Changed { old: f64, new: f64 },
    /// Wrong-typed or non-finite payload. The field keeps its old value.
    Invalid,
}

impl SetOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHandle(u64);

type ChangeCallback = Box<dyn FnMut(EngineId, ParamField, f64, f64)>;

struct Subscriber {
    id: u64,
    engine: EngineId,
    cb: ChangeCallback,
}

/// Single source of truth for the parameter vector of every engine.
///
/// Interior mutability keeps the store shareable (`Rc<ParamStore>`) across
/// the scheduler, the router, and engine instances on the single-threaded
/// host tick. Subscriber callbacks run after the parameter borrow has been
/// released, so a callback may freely read the store; subscriptions added or
/// removed from inside a callback take effect on the next notification.
pub struct ParamStore {
    engines: RefCell<[Params; ENGINE_COUNT]>,
    subs: RefCell<Vec<Subscriber>>,
    dead_subs: RefCell<Vec<u64>>,
    next_sub: Cell<u64>,
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("engines", &self.engines)
            .field("sub_count", &self.subs.borrow().len())
            .field("next_sub", &self.next_sub)
            .finish()
    }
}

impl ParamStore {
    pub fn new() -> Self {
        Self {
            engines: RefCell::new([
                EngineId::Faceted.default_params(),
                EngineId::Quantum.default_params(),
                EngineId::Holographic.default_params(),
                EngineId::Polychora.default_params(),
            ]),
            subs: RefCell::new(Vec::new()),
            dead_subs: RefCell::new(Vec::new()),
            next_sub: Cell::new(1),
        }
    }

    pub fn get(&self, engine: EngineId, field: ParamField) -> f64 {
        self.engines.borrow()[engine.index()].value(field)
    }

    pub fn set(
        &self,
        engine: EngineId,
        field: ParamField,
        value: impl Into<ParamValue>,
    ) -> SetOutcome {
        let Some(raw) = value.into().as_number() else {
            return SetOutcome::Invalid;
        };
        let clamped = clamp_value(field, raw, engine.variant_count());
        let old = {
            let mut engines = self.engines.borrow_mut();
            let p = &mut engines[engine.index()];
            let old = p.value(field);
            if old == clamped {
                return SetOutcome::Unchanged;
            }
            p.set_value(field, clamped);
            old
        };
        self.notify(engine, field, old, clamped);
        SetOutcome::Changed { old, new: clamped }
    }

    /// Apply a batch in one write; one notification per field that changed.
    /// Invalid entries are skipped, valid ones still land.
    pub fn batch_set(
        &self,
        engine: EngineId,
        values: &[(ParamField, ParamValue)],
    ) -> Vec<ParamField> {
        let mut changes = Vec::new();
        {
            let mut engines = self.engines.borrow_mut();
            let p = &mut engines[engine.index()];
            for (field, value) in values {
                let Some(raw) = value.as_number() else {
                    continue;
                };
                let clamped = clamp_value(*field, raw, engine.variant_count());
                let old = p.value(*field);
                if old != clamped {
                    p.set_value(*field, clamped);
                    changes.push((*field, old, clamped));
                }
            }
        }
        for (field, old, new) in &changes {
            self.notify(engine, *field, *old, *new);
        }
        changes.into_iter().map(|(f, _, _)| f).collect()
    }

    pub fn snapshot(&self, engine: EngineId) -> Params {
        self.engines.borrow()[engine.index()]
    }

    /// Write every schema field of `params` through `set`, so clamping and
    /// change notifications apply as usual.
    pub fn restore(&self, engine: EngineId, params: Params) {
        for field in ParamField::ALL {
            self.set(engine, field, params.value(field));
        }
    }

    /// Step `geometry` by `dir`, wrapping across the 0..7 table.
    pub fn cycle_geometry(&self, engine: EngineId, dir: i64) -> SetOutcome {
        let cur = self.get(engine, ParamField::Geometry) as i64;
        let next = (cur + dir).rem_euclid(GEOMETRY_COUNT);
        self.set(engine, ParamField::Geometry, next)
    }

    pub fn subscribe(
        &self,
        engine: EngineId,
        cb: impl FnMut(EngineId, ParamField, f64, f64) + 'static,
    ) -> SubHandle {
        let id = self.next_sub.get();
        self.next_sub.set(id + 1);
        self.subs.borrow_mut().push(Subscriber {
            id,
            engine,
            cb: Box::new(cb),
        });
        SubHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubHandle) {
        // The subscriber list may be checked out during a notification;
        // tombstone the id and let the next sweep drop it.
        self.dead_subs.borrow_mut().push(handle.0);
        // During a notification the list is checked out; the merge-back
        // sweep in `notify` consumes the tombstone instead.
        let mut subs = self.subs.borrow_mut();
        subs.retain(|s| s.id != handle.0);
    }

    fn notify(&self, engine: EngineId, field: ParamField, old: f64, new: f64) {
        let mut taken = std::mem::take(&mut *self.subs.borrow_mut());
        let dead = self.dead_subs.borrow().clone();
        for sub in &mut taken {
            if sub.engine == engine && !dead.contains(&sub.id) {
                (sub.cb)(engine, field, old, new);
            }
        }
        let mut subs = self.subs.borrow_mut();
        // Callbacks may have subscribed while the list was checked out.
        taken.append(&mut *subs);
        let dead = self.dead_subs.borrow().clone();
        taken.retain(|s| !dead.contains(&s.id));
        *subs = taken;
        self.dead_subs.borrow_mut().clear();
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}
