//! JSON message shapes exchanged with the lab server.
//!
//! Three directions matter:
//!
//! - server → client hydration: `{"type": "initial_state", "data": {...}}`
//! - server → client incremental update: `{"type": "patch", "patch": [...]}`
//! - client → server command: `{"type": "command", "command": ..., "params": {...}}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── Patch operations ─────────────────────────────────────────────────

/// The subset of RFC 6902 operations the mirror understands.
///
/// Anything else the server emits (`move`, `copy`, `test`) lands in
/// [`PatchOp::Unsupported`] so a single odd operation does not make the
/// whole frame unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
    #[serde(other)]
    Unsupported,
}

/// One `{op, path, value?}` instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,

    /// `/`-delimited path of the form `/<category>/<id>[/<prop>...]`.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    /// Path segments with empty pieces dropped (`"/a//b/"` → `["a", "b"]`).
    ///
    /// RFC 6901 escapes (`~1` for `/`, `~0` for `~`) are decoded.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.replace("~1", "/").replace("~0", "~"))
            .collect()
    }
}

// ── Server → client ──────────────────────────────────────────────────

/// Full-state payload carried by `initial_state`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    /// Integer on the wire today; strings are accepted as well.
    #[serde(default)]
    pub version: Option<Value>,

    #[serde(default)]
    pub sensors: Map<String, Value>,

    #[serde(default)]
    pub equipment: Map<String, Value>,

    #[serde(default)]
    pub alerts: Vec<Value>,

    /// Any other top-level category, keyed by name.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialState {
        data: Snapshot,
    },
    Patch {
        patch: Vec<PatchOperation>,
        #[serde(default)]
        version: Option<Value>,
    },
    CommandError {
        error: String,
    },
    /// Message types this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}

// ── Client → server ──────────────────────────────────────────────────

/// A frame sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Command { command: String, params: Value },
}

impl ClientMessage {
    pub fn command(name: impl Into<String>, params: Value) -> Self {
        Self::Command {
            command: name.into(),
            params,
        }
    }

    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Render a JSON scalar the way the mirror stores versions (`3` → `"3"`).
pub fn version_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
