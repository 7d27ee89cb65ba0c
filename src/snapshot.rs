use crate::engine::{geometry_name, EngineId};
use crate::params::{clamp_value, ParamField, Params, ParamStore};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// Versioned, schema-stable capture of one engine's parameters. The wire
/// format is shared with the gallery persistence layer, so field names and
/// legacy aliases are load-bearing.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub system: EngineId,
    pub params: Params,
    pub geometry_name: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    Io(String),
    Parse(String),
    UnknownSystem(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Parse(msg) => write!(f, "snapshot parse error: {msg}"),
            Self::UnknownSystem(s) => write!(f, "unknown system: {s}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Older gallery builds wrote these short names.
const ALIASES: [(&str, ParamField); 6] = [
    ("density", ParamField::GridDensity),
    ("morph", ParamField::MorphFactor),
    ("geom", ParamField::Geometry),
    ("rotXW", ParamField::Rot4dXw),
    ("rotYW", ParamField::Rot4dYw),
    ("rotZW", ParamField::Rot4dZw),
];

/// Serialized form. Writes always use the canonical field names; aliases
/// exist only on the read side.
#[derive(Serialize)]
struct SnapshotDoc<'a> {
    system: &'a str,
    parameters: WireParams,
    #[serde(rename = "geometryName")]
    geometry_name: &'a str,
    created: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    geometry: i64,
    variant: i64,
    grid_density: f64,
    morph_factor: f64,
    chaos: f64,
    speed: f64,
    hue: f64,
    intensity: f64,
    saturation: f64,
    #[serde(rename = "rot4dXW")]
    rot4d_xw: f64,
    #[serde(rename = "rot4dYW")]
    rot4d_yw: f64,
    #[serde(rename = "rot4dZW")]
    rot4d_zw: f64,
    dimension: f64,
}

impl From<&Params> for WireParams {
    fn from(p: &Params) -> Self {
        Self {
            geometry: p.geometry,
            variant: p.variant,
            grid_density: p.grid_density,
            morph_factor: p.morph_factor,
            chaos: p.chaos,
            speed: p.speed,
            hue: p.hue,
            intensity: p.intensity,
            saturation: p.saturation,
            rot4d_xw: p.rot4d_xw,
            rot4d_yw: p.rot4d_yw,
            rot4d_zw: p.rot4d_zw,
            dimension: p.dimension,
        }
    }
}

impl Snapshot {
    pub fn capture(store: &ParamStore, engine: EngineId) -> Self {
        Self::capture_at(
            store,
            engine,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Deterministic variant for tests and batch exports.
    pub fn capture_at(store: &ParamStore, engine: EngineId, created: String) -> Self {
        let params = store.snapshot(engine);
        Self {
            system: engine,
            geometry_name: geometry_name(params.geometry).to_string(),
            params,
            created,
        }
    }

    /// Write every captured field back through the store. Clamping and
    /// change notification apply as for any other write.
    pub fn apply(&self, store: &ParamStore) {
        store.restore(self.system, self.params);
    }

    fn doc(&self) -> SnapshotDoc<'_> {
        SnapshotDoc {
            system: self.system.as_str(),
            parameters: WireParams::from(&self.params),
            geometry_name: &self.geometry_name,
            created: &self.created,
        }
    }

    pub fn to_text(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(&self.doc()).map_err(|e| SnapshotError::Parse(e.to_string()))
    }

    /// Lenient reader: unknown fields are ignored, legacy aliases resolve,
    /// and non-numeric values fall back to the engine's field defaults.
    pub fn from_json(value: &Value) -> Result<Self, SnapshotError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SnapshotError::Parse("snapshot must be an object".to_string()))?;

        let system_raw = obj
            .get("system")
            .and_then(Value::as_str)
            .ok_or_else(|| SnapshotError::Parse("missing 'system'".to_string()))?;
        let system = EngineId::parse(system_raw)
            .ok_or_else(|| SnapshotError::UnknownSystem(system_raw.to_string()))?;

        let mut params = system.default_params();
        if let Some(raw) = obj.get("parameters").and_then(Value::as_object) {
            for field in ParamField::ALL {
                if let Some(v) = lookup_field(raw, field).and_then(Value::as_f64) {
                    set_clamped(&mut params, field, v, system);
                }
            }
        }

        let geometry_name = obj
            .get("geometryName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| geometry_name(params.geometry).to_string());
        let created = obj
            .get("created")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            system,
            params,
            geometry_name,
            created,
        })
    }

    pub fn parse(text: &str) -> Result<Self, SnapshotError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SnapshotError::Parse(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SnapshotError::Io(e.to_string()))?;
        Self::parse(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Io(e.to_string()))?;
        }
        let body = self.to_text()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &body).map_err(|e| SnapshotError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| SnapshotError::Io(e.to_string()))
    }
}

fn lookup_field<'a>(raw: &'a Map<String, Value>, field: ParamField) -> Option<&'a Value> {
    if let Some(v) = raw.get(field.as_str()) {
        return Some(v);
    }
    ALIASES
        .iter()
        .find(|(_, f)| *f == field)
        .and_then(|(alias, _)| raw.get(*alias))
}

fn set_clamped(params: &mut Params, field: ParamField, value: f64, system: EngineId) {
    if !value.is_finite() {
        return;
    }
    let clamped = clamp_value(field, value, system.variant_count());
    match field {
        ParamField::Geometry => params.geometry = clamped as i64,
        ParamField::Variant => params.variant = clamped as i64,
        ParamField::GridDensity => params.grid_density = clamped,
        ParamField::MorphFactor => params.morph_factor = clamped,
        ParamField::Chaos => params.chaos = clamped,
        ParamField::Speed => params.speed = clamped,
        ParamField::Hue => params.hue = clamped,
        ParamField::Intensity => params.intensity = clamped,
        ParamField::Saturation => params.saturation = clamped,
        ParamField::Rot4dXw => params.rot4d_xw = clamped,
        ParamField::Rot4dYw => params.rot4d_yw = clamped,
        ParamField::Rot4dZw => params.rot4d_zw = clamped,
        ParamField::Dimension => params.dimension = clamped,
    }
}
