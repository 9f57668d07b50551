// ── Alerts ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Error,
}

/// A user-visible notice. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(message: impl Into<String>, severity: AlertSeverity) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Build from a wire payload. Missing or malformed fields fall back to
    /// defaults; server-assigned `id` and `timestamp` are kept when present.
    pub fn from_payload(value: &Value) -> Self {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let severity = value
            .get("severity")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let mut alert = Self::new(message, severity);
        if let Some(id) = value.get("id").and_then(Value::as_str) {
            id.clone_into(&mut alert.id);
        }
        if let Some(ts) = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            alert.timestamp = ts.with_timezone(&Utc);
        }
        alert
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Error
    }
}
