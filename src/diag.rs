use crate::engine::EngineId;
use crate::params::ParamField;
use std::fmt;

/// Error signals surfaced to the host. The host never exits on its own;
/// every fatal-for-one-switch condition lands here and the previously
/// running engine keeps running.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagEvent {
    InvalidValue { engine: EngineId, field: ParamField },
    CapacityExceeded { live: usize, cap: usize },
    SurfaceNotReady { surface: &'static str },
    ContextCreationFailed { surface: &'static str, reason: String },
    ContextLost { surface: &'static str },
    CreateFailed { engine: EngineId, reason: String },
    SwitchFailed { target: EngineId, reason: String },
    PermissionDenied { what: &'static str },
}

impl fmt::Display for DiagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { engine, field } => {
                write!(f, "invalid value for {}.{}", engine.as_str(), field.as_str())
            }
            Self::CapacityExceeded { live, cap } => {
                write!(f, "context capacity exceeded ({live}/{cap} live)")
            }
            Self::SurfaceNotReady { surface } => write!(f, "surface not ready: {surface}"),
            Self::ContextCreationFailed { surface, reason } => {
                write!(f, "context creation failed on {surface}: {reason}")
            }
            Self::ContextLost { surface } => write!(f, "context lost: {surface}"),
            Self::CreateFailed { engine, reason } => {
                write!(f, "engine {} create failed: {reason}", engine.as_str())
            }
            Self::SwitchFailed { target, reason } => {
                write!(f, "switch to {} failed: {reason}", target.as_str())
            }
            Self::PermissionDenied { what } => write!(f, "permission denied: {what}"),
        }
    }
}

pub type DiagSink = Box<dyn FnMut(&DiagEvent)>;

/// Fan-out point for diagnostics. Defaults to dropping events; the binary
/// installs a sink that mirrors them onto the HUD.
pub struct Diagnostics {
    sink: Option<DiagSink>,
    history: Vec<DiagEvent>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            sink: None,
            history: Vec::new(),
        }
    }

    pub fn set_sink(&mut self, sink: DiagSink) {
        self.sink = Some(sink);
    }

    pub fn report(&mut self, event: DiagEvent) {
        if let Some(sink) = &mut self.sink {
            sink(&event);
        }
        self.history.push(event);
    }

    pub fn history(&self) -> &[DiagEvent] {
        &self.history
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
