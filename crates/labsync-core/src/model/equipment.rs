// ── Controllable equipment ──
//
// Equipment is a sum type: common fields (status, open-ended properties,
// command history) plus a typed variant. Patch paths hit the variant's
// typed fields first and fall back to the `properties` extension map, so
// equipment-specific attributes need no schema change.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{
    Entity, PathMutable, assign_path, display_path, expect_f64, expect_string, next_timestamp,
};
use crate::error::PatchError;

/// Maximum number of entries kept in [`CommandHistory`].
pub const COMMAND_HISTORY_CAPACITY: usize = 10;

pub const DEFAULT_MIN_SPEED: f64 = 500.0;
pub const DEFAULT_MAX_SPEED: f64 = 2000.0;

// ── Status ───────────────────────────────────────────────────────────

/// Run state. Anything the server sends outside the known set (a valve's
/// `"open"`, say) is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EquipmentStatus {
    #[default]
    Stopped,
    Running,
    Error,
    Other(String),
}

impl From<String> for EquipmentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "stopped" => Self::Stopped,
            "running" => Self::Running,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<EquipmentStatus> for String {
    fn from(status: EquipmentStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Running => f.write_str("running"),
            Self::Error => f.write_str("error"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

// ── Command history ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

/// FIFO ring of the most recent local commands; oldest evicted first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CommandHistory {
    entries: VecDeque<CommandRecord>,
}

impl CommandHistory {
    pub fn record(&mut self, command: impl Into<String>) {
        if self.entries.len() == COMMAND_HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(CommandRecord {
            command: command.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CommandRecord> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&CommandRecord> {
        self.entries.back()
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

/// Speed-controlled pump. `min_speed <= speed <= max_speed` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pump {
    speed: f64,
    min_speed: f64,
    max_speed: f64,
}

impl Default for Pump {
    fn default() -> Self {
        Self {
            speed: DEFAULT_MIN_SPEED,
            min_speed: DEFAULT_MIN_SPEED,
            max_speed: DEFAULT_MAX_SPEED,
        }
    }
}

impl Pump {
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Clamp `requested` into range and store it. Returns the stored value.
    pub fn set_speed(&mut self, requested: f64) -> f64 {
        self.speed = if requested.is_nan() {
            self.min_speed
        } else {
            requested.max(self.min_speed).min(self.max_speed)
        };
        self.speed
    }

    /// Position of `speed` within the range, 0–100.
    pub fn speed_percentage(&self) -> f64 {
        let span = self.max_speed - self.min_speed;
        if span <= 0.0 {
            return 0.0;
        }
        (self.speed - self.min_speed) / span * 100.0
    }

    fn set_limits(&mut self, min: f64, max: f64, path: &[String]) -> Result<(), PatchError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(PatchError::InvalidValue {
                path: display_path(path),
                expected: "minSpeed <= maxSpeed",
            });
        }
        self.min_speed = min;
        self.max_speed = max;
        self.set_speed(self.speed);
        Ok(())
    }

    /// Apply whichever bounds a whole-entity payload carries, both at once.
    /// Returns `false` when the payload names neither.
    fn merge_limits(&mut self, fields: &Map<String, Value>) -> Result<bool, PatchError> {
        let min = limit_field(fields, MIN_SPEED_KEYS)?;
        let max = limit_field(fields, MAX_SPEED_KEYS)?;
        let Some(path) = max.as_ref().or(min.as_ref()).map(|(key, _)| vec![key.clone()]) else {
            return Ok(false);
        };
        self.set_limits(
            min.map_or(self.min_speed, |(_, v)| v),
            max.map_or(self.max_speed, |(_, v)| v),
            &path,
        )?;
        Ok(true)
    }

    /// Route a single-segment path to a typed field. `None` means "not mine".
    fn update_typed(&mut self, path: &[String], value: &Value) -> Option<Result<(), PatchError>> {
        let [field] = path else { return None };
        let result = match field.as_str() {
            "speed" => expect_f64(path, value).map(|v| {
                self.set_speed(v);
            }),
            "minSpeed" | "min_speed" => {
                expect_f64(path, value).and_then(|v| self.set_limits(v, self.max_speed, path))
            }
            "maxSpeed" | "max_speed" => {
                expect_f64(path, value).and_then(|v| self.set_limits(self.min_speed, v, path))
            }
            _ => return None,
        };
        Some(result)
    }
}

const MIN_SPEED_KEYS: [&str; 2] = ["minSpeed", "min_speed"];
const MAX_SPEED_KEYS: [&str; 2] = ["maxSpeed", "max_speed"];

fn is_limit_key(key: &str) -> bool {
    MIN_SPEED_KEYS.contains(&key) || MAX_SPEED_KEYS.contains(&key)
}

fn limit_field(
    fields: &Map<String, Value>,
    keys: [&str; 2],
) -> Result<Option<(String, f64)>, PatchError> {
    let Some((key, value)) = keys
        .into_iter()
        .find_map(|key| fields.get(key).map(|value| (key.to_owned(), value)))
    else {
        return Ok(None);
    };
    let bound = expect_f64(std::slice::from_ref(&key), value)?;
    Ok(Some((key, bound)))
}

// ── Variants ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EquipmentVariant {
    Generic,
    Pump(Pump),
}

impl EquipmentVariant {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Generic => "equipment",
            Self::Pump(_) => "pump",
        }
    }
}

// ── Equipment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Equipment {
    id: String,
    status: EquipmentStatus,
    properties: Map<String, Value>,
    history: CommandHistory,
    variant: EquipmentVariant,
    last_updated: DateTime<Utc>,
}

impl Equipment {
    pub fn new(id: impl Into<String>, variant: EquipmentVariant) -> Self {
        Self {
            id: id.into(),
            status: EquipmentStatus::Stopped,
            properties: Map::new(),
            history: CommandHistory::default(),
            variant,
            last_updated: Utc::now(),
        }
    }

    pub fn generic(id: &str) -> Self {
        Self::new(id, EquipmentVariant::Generic)
    }

    pub fn pump(id: &str) -> Self {
        Self::new(id, EquipmentVariant::Pump(Pump::default()))
    }

    pub fn status(&self) -> &EquipmentStatus {
        &self.status
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn command_history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn variant(&self) -> &EquipmentVariant {
        &self.variant
    }

    pub fn as_pump(&self) -> Option<&Pump> {
        match &self.variant {
            EquipmentVariant::Pump(p) => Some(p),
            EquipmentVariant::Generic => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == EquipmentStatus::Running
    }

    pub fn can_start(&self) -> bool {
        self.status == EquipmentStatus::Stopped
    }

    pub fn can_stop(&self) -> bool {
        self.status == EquipmentStatus::Running
    }

    // ── Local commands ───────────────────────────────────────────────

    pub fn start(&mut self) {
        self.status = EquipmentStatus::Running;
        self.history.record("start");
        self.touch();
    }

    pub fn stop(&mut self) {
        self.status = EquipmentStatus::Stopped;
        self.history.record("stop");
        self.touch();
    }

    /// Clamp-and-set the pump speed. `None` if this is not a pump.
    pub fn set_speed(&mut self, requested: f64) -> Option<f64> {
        let EquipmentVariant::Pump(pump) = &mut self.variant else {
            return None;
        };
        let applied = pump.set_speed(requested);
        self.history.record(format!("set_speed:{applied}"));
        self.touch();
        Some(applied)
    }

    fn touch(&mut self) {
        self.last_updated = next_timestamp(self.last_updated);
    }

    fn merge_properties(&mut self, path: &[String], value: &Value) -> Result<(), PatchError> {
        let Value::Object(fields) = value else {
            return Err(PatchError::InvalidValue {
                path: display_path(path),
                expected: "object",
            });
        };
        for (key, v) in fields {
            self.properties.insert(key.clone(), v.clone());
        }
        Ok(())
    }

    /// Structural write into the extension map.
    fn assign_property(&mut self, path: &[String], value: &Value) {
        let Some((key, rest)) = path.split_first() else {
            return;
        };
        let slot = self.properties.entry(key.clone()).or_insert(Value::Null);
        assign_path(slot, rest, value.clone());
    }
}

impl PathMutable for Equipment {
    fn update_property(&mut self, path: &[String], value: &Value) -> Result<(), PatchError> {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();

        match segments.as_slice() {
            [] | ["id" | "type" | "commandHistory" | "lastUpdated"] => return Ok(()),
            ["status"] => self.status = EquipmentStatus::from(expect_string(path, value)?),
            ["properties"] => self.merge_properties(path, value)?,
            ["properties", ..] => self.assign_property(&path[1..], value),
            _ => {
                let typed = match &mut self.variant {
                    EquipmentVariant::Pump(pump) => pump.update_typed(path, value),
                    EquipmentVariant::Generic => None,
                };
                match typed {
                    Some(result) => result?,
                    None => self.assign_property(path, value),
                }
            }
        }

        self.touch();
        Ok(())
    }
}

impl Entity for Equipment {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        self.variant.tag()
    }

    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Pump bounds in the payload are applied before anything else, so a
    /// `speed` is clamped against the range it arrived with whatever the
    /// key order.
    fn update(&mut self, data: &Value) -> Result<(), PatchError> {
        let fields = match data {
            Value::Object(fields) => fields,
            Value::Null => return Ok(()),
            _ => {
                return Err(PatchError::InvalidValue {
                    path: format!("/{}", self.id),
                    expected: "object",
                });
            }
        };

        let limits_applied = match &mut self.variant {
            EquipmentVariant::Pump(pump) => pump.merge_limits(fields)?,
            EquipmentVariant::Generic => false,
        };
        if limits_applied {
            self.touch();
        }

        for (key, value) in fields {
            if limits_applied && is_limit_key(key) {
                continue;
            }
            self.update_property(std::slice::from_ref(key), value)?;
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        let mut out = serde_json::json!({
            "id": self.id,
            "type": self.kind(),
            "status": self.status,
            "properties": self.properties,
            "commandHistory": self.history,
            "lastUpdated": self.last_updated,
        });
        if let (Value::Object(map), EquipmentVariant::Pump(pump)) = (&mut out, &self.variant) {
            map.insert("speed".into(), pump.speed.into());
            map.insert("minSpeed".into(), pump.min_speed.into());
            map.insert("maxSpeed".into(), pump.max_speed.into());
        }
        out
    }
}

// ── Kind registry ────────────────────────────────────────────────────

pub type EquipmentConstructor = fn(&str) -> Equipment;

/// Maps a payload's `type` tag to the constructor for that variant.
///
/// The lab server does not tag equipment today, so when no tag is present
/// and `infer_from_id` is set, ids containing `"pump"` build a [`Pump`].
#[derive(Debug, Clone)]
pub struct EquipmentKinds {
    constructors: IndexMap<String, EquipmentConstructor>,
    infer_from_id: bool,
}

impl Default for EquipmentKinds {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EquipmentKinds {
    pub fn new(infer_from_id: bool) -> Self {
        let mut kinds = Self {
            constructors: IndexMap::new(),
            infer_from_id,
        };
        kinds.register("equipment", Equipment::generic);
        kinds.register("pump", Equipment::pump);
        kinds
    }

    pub fn register(&mut self, tag: impl Into<String>, constructor: EquipmentConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    /// The tag a payload for `id` resolves to.
    pub fn resolve<'a>(&'a self, id: &str, data: &'a Value) -> &'a str {
        if let Some(tag) = data.get("type").and_then(Value::as_str) {
            if self.constructors.contains_key(tag) {
                return tag;
            }
            tracing::debug!(id, tag, "unregistered equipment type, using generic");
            return "equipment";
        }
        if self.infer_from_id && id.to_ascii_lowercase().contains("pump") {
            "pump"
        } else {
            "equipment"
        }
    }

    /// Construct and populate a new entity.
    pub fn build(&self, id: &str, data: &Value) -> Result<Equipment, PatchError> {
        let tag = self.resolve(id, data);
        let constructor = self
            .constructors
            .get(tag)
            .copied()
            .unwrap_or(Equipment::generic as EquipmentConstructor);
        let mut equipment = constructor(id);
        equipment.update(data)?;
        Ok(equipment)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
