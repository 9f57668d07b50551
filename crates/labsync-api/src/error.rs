use thiserror::Error;

/// Top-level error type for the `labsync-api` crate.
///
/// Covers transport and wire-format failures. `labsync-core` maps these
/// into connection-level diagnostics and user-visible alerts.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed (refused, DNS, handshake).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The link's outbound side is gone; nothing can be sent.
    #[error("Link is closed")]
    LinkClosed,

    /// The outbound queue is full; the frame was dropped.
    #[error("Outbound queue full, frame dropped")]
    Backpressure,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if a later reconnect might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::LinkClosed
        )
    }
}
