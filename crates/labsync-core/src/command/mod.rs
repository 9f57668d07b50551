// ── Equipment commands ──
//
// Optimistic command issuance: mutate the mirror first, send the command,
// roll back if it could not be sent. The server's next patch is the
// authority either way.

mod pump;

use serde_json::{Value, json};

pub use pump::PumpController;

/// A command the pump controller can issue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpCommand {
    Start,
    Stop,
    SetSpeed(f64),
}

impl PumpCommand {
    /// Command name in the server's vocabulary.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Start | Self::Stop => "toggle_pump",
            Self::SetSpeed(_) => "set_pump_speed",
        }
    }

    /// `speed` is the clamped value actually applied locally.
    pub(crate) fn params(&self, equipment_id: &str, speed: Option<f64>) -> Value {
        match self {
            Self::Start | Self::Stop => json!({ "equipment_id": equipment_id }),
            Self::SetSpeed(requested) => json!({
                "equipment_id": equipment_id,
                "speed": speed.unwrap_or(*requested),
            }),
        }
    }
}

/// Transient, human-readable result of the last command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub message: String,
}

impl CommandOutcome {
    pub(crate) fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
        }
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
        }
    }
}
