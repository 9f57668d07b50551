// ── Runtime sync configuration ──
//
// These types describe *how* to talk to the lab server. They never touch
// disk; the CLI (or any other embedder) builds a `SyncConfig` and hands
// it in.

use std::time::Duration;

use url::Url;

/// Reconnect schedule after the transport closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay for attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
    /// Attempts before giving up and waiting for a manual reconnect.
    pub max_attempts: u32,
    /// Delay before a user-triggered reconnect.
    pub manual_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            max_attempts: 5,
            manual_delay: Duration::from_millis(100),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once
    /// the schedule is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt))
    }
}

/// Configuration for one lab server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base WebSocket URL (e.g. `ws://localhost:8000/ws`). The session
    /// endpoint appends the client id.
    pub url: Url,
    pub reconnect: ReconnectConfig,
    /// How long a command result stays visible before auto-clearing.
    pub result_ttl: Duration,
    /// Infer a pump from its id when equipment carries no `type` tag.
    pub infer_equipment_kind: bool,
}

impl SyncConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectConfig::default(),
            result_ttl: Duration::from_secs(3),
            infer_equipment_kind: true,
        }
    }

    /// `<base>/<client_id>`, tolerating a trailing slash on the base.
    pub fn session_url(&self, client_id: &str) -> Result<Url, url::ParseError> {
        let base = self.url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{client_id}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_is_linear_and_bounded() {
        let cfg = ReconnectConfig::default();
        let delays: Vec<_> = (1..=5).map(|n| cfg.delay_for(n).unwrap()).collect();
        assert_eq!(
            delays,
            [2, 4, 6, 8, 10].map(Duration::from_secs).to_vec()
        );
        assert_eq!(cfg.delay_for(6), None);
        assert_eq!(cfg.delay_for(0), None);
    }

    #[test]
    fn session_url_appends_client_id() {
        let cfg = SyncConfig::new("ws://localhost:8000/ws".parse().unwrap());
        assert_eq!(
            cfg.session_url("abc").unwrap().as_str(),
            "ws://localhost:8000/ws/abc"
        );

        let cfg = SyncConfig::new("ws://localhost:8000/ws/".parse().unwrap());
        assert_eq!(
            cfg.session_url("abc").unwrap().as_str(),
            "ws://localhost:8000/ws/abc"
        );
    }

    #[test]
    fn defaults() {
        let cfg = SyncConfig::new("ws://lab/ws".parse().unwrap());
        assert_eq!(cfg.result_ttl, Duration::from_secs(3));
        assert!(cfg.infer_equipment_kind);
        assert_eq!(cfg.reconnect.max_attempts, 5);
    }
}
