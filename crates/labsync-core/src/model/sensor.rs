// ── Sensor ──

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::entity::{
    Entity, PathMutable, display_path, expect_f64, expect_string, expect_timestamp,
    next_timestamp,
};
use crate::error::PatchError;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SensorStatus {
    #[default]
    Normal,
    Warning,
    Error,
}

/// A single measured quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    id: String,
    value: f64,
    unit: String,
    status: SensorStatus,
    last_updated: DateTime<Utc>,
}

impl Sensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: 0.0,
            unit: String::new(),
            status: SensorStatus::Normal,
            last_updated: Utc::now(),
        }
    }

    /// Factory used by the sensors container for lazily created entries.
    pub fn from_payload(id: &str, data: &Value) -> Result<Self, PatchError> {
        let mut sensor = Self::new(id);
        sensor.update(data)?;
        Ok(sensor)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    pub fn is_healthy(&self) -> bool {
        self.status == SensorStatus::Normal
    }
}

impl PathMutable for Sensor {
    fn update_property(&mut self, path: &[String], value: &Value) -> Result<(), PatchError> {
        let Some(field) = path.first() else {
            return Ok(());
        };
        if path.len() > 1 {
            return Err(PatchError::InvalidPath {
                path: display_path(path),
            });
        }

        match field.as_str() {
            "value" => self.value = expect_f64(path, value)?,
            "unit" => self.unit = expect_string(path, value)?,
            "status" => {
                let raw = expect_string(path, value)?;
                self.status =
                    SensorStatus::from_str(&raw).map_err(|_| PatchError::InvalidValue {
                        path: display_path(path),
                        expected: "one of normal, warning, error",
                    })?;
            }
            // Sample time supplied by the server; may legitimately go backwards.
            "timestamp" => {
                self.last_updated = expect_timestamp(path, value)?;
                return Ok(());
            }
            "id" | "type" | "lastUpdated" => return Ok(()),
            other => {
                tracing::debug!(sensor = %self.id, field = other, "ignoring unknown sensor field");
                return Ok(());
            }
        }

        self.last_updated = next_timestamp(self.last_updated);
        Ok(())
    }
}

impl Entity for Sensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "sensor"
    }

    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Like the default merge, except a server `timestamp` is applied after
    /// every other field so the bumps from those writes cannot mask it.
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

        for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "timestamp") {
            self.update_property(std::slice::from_ref(key), value)?;
        }
        if let Some(sample_time) = fields.get("timestamp") {
            self.update_property(&["timestamp".to_owned()], sample_time)?;
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.kind(),
            "value": self.value,
            "unit": self.unit,
            "status": self.status,
            "lastUpdated": self.last_updated,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
