//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use labsync_config::ConfigError;
use labsync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the lab server at {url}: {reason}")]
    #[diagnostic(
        code(labsync::connection_failed),
        help(
            "Check that the server is running and accepts WebSocket connections.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected to the lab server")]
    #[diagnostic(
        code(labsync::not_connected),
        help("The connection dropped before the command could be sent. Try again.")
    )]
    NotConnected,

    #[error("Timed out after {seconds}s waiting for {waiting_for}")]
    #[diagnostic(
        code(labsync::timeout),
        help(
            "Is the server reachable? Increase the wait with --timeout,\n\
             or run with -v to see connection attempts."
        )
    )]
    Timeout {
        seconds: u64,
        waiting_for: &'static str,
    },

    #[error("The server's initial state could not be loaded: {reason}")]
    #[diagnostic(
        code(labsync::hydration_failed),
        help("The server sent a snapshot this client cannot read. Run with -v for details.")
    )]
    HydrationFailed { reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{category} '{id}' not found")]
    #[diagnostic(
        code(labsync::not_found),
        help("Run: labsync status {category} to see what the server reports")
    )]
    NotFound { category: String, id: String },

    #[error("'{id}' is not a {expected}")]
    #[diagnostic(code(labsync::wrong_kind))]
    WrongKind { id: String, expected: &'static str },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("A command is already pending for '{id}'")]
    #[diagnostic(code(labsync::command_pending))]
    CommandPending { id: String },

    #[error("Cannot {action} '{id}' while it is {status}")]
    #[diagnostic(
        code(labsync::invalid_transition),
        help("Use `labsync pump {id} toggle` to flip whatever state it is in.")
    )]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(labsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(labsync::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(labsync::no_config),
        help(
            "Pass --url ws://host:port/ws, set LABSYNC_URL,\n\
             or add a [profiles.default] section to {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(labsync::config))]
    Config(ConfigError),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(labsync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(labsync::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not render TOML: {0}")]
    #[diagnostic(code(labsync::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::CommandPending { .. } | Self::InvalidTransition { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::WrongKind { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotConnected => CliError::NotConnected,
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Timeout {
                timeout_secs,
                waiting_for,
            } => CliError::Timeout {
                seconds: timeout_secs,
                waiting_for,
            },
            CoreError::HydrationFailed { reason } => CliError::HydrationFailed { reason },
            CoreError::NotFound { category, id } => CliError::NotFound { category, id },
            CoreError::WrongKind { id, expected } => CliError::WrongKind { id, expected },
            CoreError::CommandPending { id } => CliError::CommandPending { id },
            CoreError::InvalidTransition { id, action, status } => {
                CliError::InvalidTransition { id, action, status }
            }
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other @ (CoreError::CategoryExists { .. }
            | CoreError::Patch(_)
            | CoreError::Transport(_)) => CliError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
