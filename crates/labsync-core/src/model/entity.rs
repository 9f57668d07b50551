// ── Entity contract ──
//
// Everything a reactive container stores implements `Entity`; everything
// a patch path can descend into implements `PathMutable`. Values that are
// neither (open-ended JSON) go through `assign_path`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use crate::error::PatchError;

/// A target that accepts path-addressed mutations.
///
/// `path` is relative to the target. An empty path is a no-op.
pub trait PathMutable {
    fn update_property(&mut self, path: &[String], value: &Value) -> Result<(), PatchError>;
}

/// An identity-bearing record owned by exactly one container.
pub trait Entity: PathMutable + Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable identifier, assigned at creation and never reassigned.
    fn id(&self) -> &str;

    /// Type tag (`"sensor"`, `"pump"`, ...).
    fn kind(&self) -> &'static str;

    /// Timestamp of the last successful mutation.
    fn last_updated(&self) -> DateTime<Utc>;

    /// JSON view for snapshots and debugging.
    fn to_json(&self) -> Value;

    /// Merge a whole-entity payload: every top-level key is routed
    /// through [`update_property`](PathMutable::update_property).
    fn update(&mut self, data: &Value) -> Result<(), PatchError> {
        match data {
            Value::Object(fields) => {
                for (key, value) in fields {
                    self.update_property(std::slice::from_ref(key), value)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            _ => Err(PatchError::InvalidValue {
                path: format!("/{}", self.id()),
                expected: "object",
            }),
        }
    }
}

/// Builds a fresh entity for an unknown id from the first payload that
/// references it.
pub type EntityFactory<T> = Arc<dyn Fn(&str, &Value) -> Result<T, PatchError> + Send + Sync>;

// ── Helpers shared by entity implementations ─────────────────────────

/// Next mutation timestamp: wall clock, but never behind `previous`.
pub(crate) fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::nanoseconds(1)
    }
}

/// Render a path for error messages.
pub(crate) fn display_path(path: &[String]) -> String {
    let mut out = String::new();
    for segment in path {
        out.push('/');
        out.push_str(segment);
    }
    out
}

pub(crate) fn expect_f64(path: &[String], value: &Value) -> Result<f64, PatchError> {
    value.as_f64().ok_or_else(|| PatchError::InvalidValue {
        path: display_path(path),
        expected: "number",
    })
}

pub(crate) fn expect_string(path: &[String], value: &Value) -> Result<String, PatchError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| PatchError::InvalidValue {
            path: display_path(path),
            expected: "string",
        })
}

pub(crate) fn expect_timestamp(path: &[String], value: &Value) -> Result<DateTime<Utc>, PatchError> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| PatchError::InvalidValue {
            path: display_path(path),
            expected: "RFC 3339 timestamp",
        })
}

/// Structural assignment into plain JSON, creating intermediate objects
/// as needed. Array levels are indexed by decimal segment when in range;
/// any other non-object level is replaced by an object.
pub fn assign_path(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };

    if let Value::Array(items) = target {
        if let Some(slot) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            assign_path(slot, rest, value);
            return;
        }
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let slot = map.entry(head.clone()).or_insert(Value::Null);
        assign_path(slot, rest, value);
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn assign_creates_intermediate_levels() {
        let mut target = json!({});
        assign_path(&mut target, &path(&["calibration", "offset", "c"]), json!(0.25));
        assert_eq!(target, json!({ "calibration": { "offset": { "c": 0.25 } } }));
    }

    #[test]
    fn assign_replaces_scalars_on_the_way_down() {
        let mut target = json!({ "mode": "auto" });
        assign_path(&mut target, &path(&["mode", "setpoint"]), json!(4));
        assert_eq!(target, json!({ "mode": { "setpoint": 4 } }));
    }

    #[test]
    fn assign_indexes_arrays_in_range() {
        let mut target = json!({ "stages": [{ "t": 1 }, { "t": 2 }] });
        assign_path(&mut target, &path(&["stages", "1", "t"]), json!(9));
        assert_eq!(target, json!({ "stages": [{ "t": 1 }, { "t": 9 }] }));
    }

    #[test]
    fn assign_with_empty_path_overwrites() {
        let mut target = json!(1);
        assign_path(&mut target, &[], json!("x"));
        assert_eq!(target, json!("x"));
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let future = Utc::now() + TimeDelta::hours(1);
        assert!(next_timestamp(future) > future);
    }

    #[test]
    fn display_path_joins_segments() {
        assert_eq!(display_path(&path(&["a", "b"])), "/a/b");
    }
}
