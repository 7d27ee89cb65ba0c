use crate::engine::EngineId;
use crate::params::{ParamField, ParamStore};

/// Parsed gallery-preview deep link:
/// `?system=<engine>&<param>=<number>&...&hideui=(true|false)`.
///
/// An unknown or missing system falls back to faceted; unknown parameter
/// names and non-numeric values are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepLink {
    pub system: EngineId,
    pub system_recognized: bool,
    pub params: Vec<(ParamField, f64)>,
    pub hideui: bool,
}

impl DeepLink {
    /// Accepts a bare query string, a `?`-prefixed one, or a full URL.
    pub fn parse(raw: &str) -> Self {
        let query = match raw.split_once('?') {
            Some((_, q)) => q,
            None => raw,
        };

        let mut system = None;
        let mut params = Vec::new();
        let mut hideui = false;

        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "system" => system = EngineId::parse(value),
                "hideui" => hideui = matches!(value, "true" | "1"),
                _ => {
                    if let (Some(field), Ok(number)) = (ParamField::parse(key), value.parse::<f64>())
                    {
                        params.push((field, number));
                    }
                }
            }
        }

        Self {
            system: system.unwrap_or(EngineId::Faceted),
            system_recognized: system.is_some(),
            params,
            hideui,
        }
    }

    /// Write each numeric parameter through the store's clamped `set`.
    pub fn apply_params(&self, store: &ParamStore) {
        for (field, value) in &self.params {
            store.set(self.system, *field, *value);
        }
    }
}
