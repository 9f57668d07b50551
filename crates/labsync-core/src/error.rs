// ── Core error types ──
//
// Errors surfaced by the sync engine. Transport failures are recovered by
// the reconnect loop and only reach callers through `send_command`; patch
// failures are recovered locally and surfaced as alerts.

use thiserror::Error;

/// A patch (or hydration payload) that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("invalid patch path '{path}'")]
    InvalidPath { path: String },

    #[error("invalid value at '{path}': expected {expected}")]
    InvalidValue {
        path: String,
        expected: &'static str,
    },

    #[error("cannot build {category} entity '{id}': {reason}")]
    InvalidEntity {
        category: String,
        id: String,
        reason: String,
    },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to the lab server")]
    NotConnected,

    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Timed out after {timeout_secs}s waiting for {waiting_for}")]
    Timeout {
        timeout_secs: u64,
        waiting_for: &'static str,
    },

    #[error("Lab state snapshot could not be applied: {reason}")]
    HydrationFailed { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{category} '{id}' not found")]
    NotFound { category: String, id: String },

    #[error("'{id}' is not a {expected}")]
    WrongKind { id: String, expected: &'static str },

    #[error("Collection '{name}' is already registered")]
    CategoryExists { name: String },

    #[error(transparent)]
    Patch(#[from] PatchError),

    // ── Command errors ───────────────────────────────────────────────
    #[error("A command is already pending for '{id}'")]
    CommandPending { id: String },

    #[error("Cannot {action} '{id}' while it is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Wire errors ──────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<labsync_api::Error> for CoreError {
    fn from(err: labsync_api::Error) -> Self {
        match err {
            labsync_api::Error::LinkClosed => CoreError::NotConnected,
            labsync_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            labsync_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            labsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            other @ (labsync_api::Error::Backpressure | labsync_api::Error::Serialization(_)) => {
                CoreError::Transport(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_closed_maps_to_not_connected() {
        let err = CoreError::from(labsync_api::Error::LinkClosed);
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[test]
    fn patch_error_message_names_the_path() {
        let err = PatchError::InvalidValue {
            path: "/sensors/t1/value".into(),
            expected: "number",
        };
        assert_eq!(
            CoreError::from(err).to_string(),
            "invalid value at '/sensors/t1/value': expected number"
        );
    }
}
