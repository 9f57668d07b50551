// ── Lab state aggregate ──
//
// The single root of the client-side mirror. Owns every container, the
// alert log and scalar metadata. Constructed once per session and handed
// to the connection manager and controllers explicitly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::watch;

use super::alerts::AlertLog;
use super::collection::{Collection, EntityCollection};
use crate::error::CoreError;
use crate::model::{
    Alert, AlertSeverity, Entity, EntityFactory, Equipment, EquipmentKinds, Sensor, SensorStatus,
};
use crate::stream::{EntityStream, ItemStream};

/// Category names with dedicated handling; never registrable.
const RESERVED_CATEGORIES: &[&str] = &["sensors", "equipment", "alerts", "version"];

/// Scalar state published alongside the containers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMeta {
    pub version: String,
    pub is_connected: bool,
    /// Bumped after every fully applied patch batch or hydration.
    pub last_update: Option<DateTime<Utc>>,
}

pub struct LabState {
    pub(crate) sensors: EntityCollection<Sensor>,
    pub(crate) equipment: EntityCollection<Equipment>,
    pub(crate) extra: IndexMap<String, Box<dyn Collection>>,
    pub(crate) alerts: AlertLog,
    meta: watch::Sender<StateMeta>,
}

impl Default for LabState {
    fn default() -> Self {
        Self::new()
    }
}

impl LabState {
    pub fn new() -> Self {
        Self::with_equipment_kinds(EquipmentKinds::default())
    }

    /// Use a custom equipment kind registry for lazily created equipment.
    pub fn with_equipment_kinds(kinds: EquipmentKinds) -> Self {
        let (meta, _) = watch::channel(StateMeta::default());
        let equipment_factory: EntityFactory<Equipment> =
            Arc::new(move |id: &str, data: &Value| kinds.build(id, data));

        Self {
            sensors: EntityCollection::new("sensors", Arc::new(Sensor::from_payload)),
            equipment: EntityCollection::new("equipment", equipment_factory),
            extra: IndexMap::new(),
            alerts: AlertLog::new(),
            meta,
        }
    }

    // ── Category registry ────────────────────────────────────────────

    /// Register an additional top-level category. Patches and hydration
    /// payloads addressed to `name` are routed to the new collection.
    pub fn register_collection<T: Entity>(
        &mut self,
        name: &str,
        factory: EntityFactory<T>,
    ) -> Result<(), CoreError> {
        if RESERVED_CATEGORIES.contains(&name) || self.extra.contains_key(name) {
            return Err(CoreError::CategoryExists {
                name: name.to_owned(),
            });
        }
        tracing::debug!(category = name, "registering collection");
        self.extra.insert(
            name.to_owned(),
            Box::new(EntityCollection::new(name, factory)),
        );
        Ok(())
    }

    /// All routable category names, built-ins first.
    pub fn categories(&self) -> Vec<String> {
        ["sensors", "equipment"]
            .into_iter()
            .map(str::to_owned)
            .chain(self.extra.keys().cloned())
            .collect()
    }

    pub fn collection(&self, name: &str) -> Option<&dyn Collection> {
        match name {
            "sensors" => Some(&self.sensors),
            "equipment" => Some(&self.equipment),
            other => self.extra.get(other).map(|c| &**c),
        }
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> Option<&mut (dyn Collection + 'static)> {
        match name {
            "sensors" => Some(&mut self.sensors),
            "equipment" => Some(&mut self.equipment),
            other => self.extra.get_mut(other).map(|c| &mut **c),
        }
    }

    /// Typed access to a registered collection.
    pub fn collection_of<T: Entity>(&self, name: &str) -> Option<&EntityCollection<T>> {
        self.collection(name)?
            .as_any()
            .downcast_ref::<EntityCollection<T>>()
    }

    // ── Containers ───────────────────────────────────────────────────

    pub fn sensors(&self) -> &EntityCollection<Sensor> {
        &self.sensors
    }

    pub fn equipment(&self) -> &EntityCollection<Equipment> {
        &self.equipment
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    pub fn sensor(&self, id: &str) -> Option<Arc<Sensor>> {
        self.sensors.get(id)
    }

    pub fn equipment_item(&self, id: &str) -> Option<Arc<Equipment>> {
        self.equipment.get(id)
    }

    // ── Alerts ───────────────────────────────────────────────────────

    pub fn add_alert(&mut self, message: impl Into<String>, severity: AlertSeverity) -> Arc<Alert> {
        let alert = Alert::new(message, severity);
        match severity {
            AlertSeverity::Error => tracing::error!(message = %alert.message, "alert raised"),
            AlertSeverity::Warning => tracing::warn!(message = %alert.message, "alert raised"),
            AlertSeverity::Info => tracing::info!(message = %alert.message, "alert raised"),
        }
        self.alerts.push(alert)
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn meta(&self) -> StateMeta {
        self.meta.borrow().clone()
    }

    pub fn version(&self) -> String {
        self.meta.borrow().version.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.meta.borrow().is_connected
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.meta.borrow().last_update
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        self.meta.send_if_modified(|meta| {
            if meta.version == version {
                return false;
            }
            meta.version = version;
            true
        });
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.meta.send_if_modified(|meta| {
            let changed = meta.is_connected != connected;
            meta.is_connected = connected;
            changed
        });
    }

    pub(crate) fn touch(&mut self) {
        self.meta
            .send_modify(|meta| meta.last_update = Some(Utc::now()));
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_meta(&self) -> watch::Receiver<StateMeta> {
        self.meta.subscribe()
    }

    pub fn subscribe_sensors(&self) -> EntityStream<Sensor> {
        self.sensors.subscribe()
    }

    pub fn subscribe_equipment(&self) -> EntityStream<Equipment> {
        self.equipment.subscribe()
    }

    pub fn subscribe_alerts(&self) -> watch::Receiver<Arc<Vec<Arc<Alert>>>> {
        self.alerts.subscribe()
    }

    /// Per-sensor feed for time-series consumers. Only updates whose
    /// timestamp is strictly newer than the last delivered one arrive.
    pub fn subscribe_sensor(&mut self, id: &str) -> ItemStream<Sensor> {
        self.sensors.subscribe_item(id)
    }

    // ── Derived views ────────────────────────────────────────────────

    /// Sensors still producing usable readings (anything not in `error`).
    pub fn active_sensors(&self) -> Vec<Arc<Sensor>> {
        self.sensors
            .values()
            .into_iter()
            .filter(|s| s.status() != SensorStatus::Error)
            .collect()
    }

    pub fn running_equipment(&self) -> Vec<Arc<Equipment>> {
        self.equipment
            .values()
            .into_iter()
            .filter(|e| e.is_running())
            .collect()
    }

    pub fn critical_alerts(&self) -> Vec<Arc<Alert>> {
        self.alerts
            .iter()
            .filter(|a| a.is_critical())
            .cloned()
            .collect()
    }

    /// Whole mirror as JSON, shaped like a hydration payload.
    pub fn to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("version".into(), Value::String(self.version()));
        for name in self.categories() {
            if let Some(collection) = self.collection(&name) {
                out.insert(name, collection.to_json());
            }
        }
        out.insert(
            "alerts".into(),
            serde_json::to_value(self.alerts.snapshot().as_slice()).unwrap_or(Value::Null),
        );
        Value::Object(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::PatchError;
    use crate::model::PathMutable;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Minimal third entity type for registry tests.
    #[derive(Debug, Clone)]
    struct Incubator {
        id: String,
        temp: f64,
        last_updated: DateTime<Utc>,
    }

    impl PathMutable for Incubator {
        fn update_property(&mut self, path: &[String], value: &Value) -> Result<(), PatchError> {
            if path.first().map(String::as_str) == Some("temp") {
                self.temp = value.as_f64().unwrap_or(self.temp);
                self.last_updated = Utc::now();
            }
            Ok(())
        }
    }

    impl Entity for Incubator {
        fn id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> &'static str {
            "incubator"
        }
        fn last_updated(&self) -> DateTime<Utc> {
            self.last_updated
        }
        fn to_json(&self) -> Value {
            json!({ "id": self.id, "temp": self.temp })
        }
    }

    fn incubator_factory() -> EntityFactory<Incubator> {
        Arc::new(|id: &str, data: &Value| {
            let mut inc = Incubator {
                id: id.to_owned(),
                temp: 0.0,
                last_updated: Utc::now(),
            };
            inc.update(data)?;
            Ok(inc)
        })
    }

    #[test]
    fn builtin_categories_are_registered() {
        let state = LabState::new();
        assert_eq!(state.categories(), vec!["sensors", "equipment"]);
        assert!(state.collection("sensors").is_some());
        assert!(state.collection("incubators").is_none());
    }

    #[test]
    fn register_rejects_duplicates_and_reserved_names() {
        let mut state = LabState::new();
        state
            .register_collection("incubators", incubator_factory())
            .unwrap();

        for name in ["incubators", "sensors", "alerts", "version"] {
            let err = state
                .register_collection(name, incubator_factory())
                .unwrap_err();
            assert!(matches!(err, CoreError::CategoryExists { .. }), "{name}");
        }
    }

    #[test]
    fn typed_access_to_registered_collection() {
        let mut state = LabState::new();
        state
            .register_collection("incubators", incubator_factory())
            .unwrap();
        state
            .collection_mut("incubators")
            .unwrap()
            .update_item("inc_1", &json!({ "temp": 37.0 }))
            .unwrap();

        let incubators = state.collection_of::<Incubator>("incubators").unwrap();
        assert!((incubators.get("inc_1").unwrap().temp - 37.0).abs() < f64::EPSILON);
        assert!(state.collection_of::<Sensor>("incubators").is_none());
    }

    #[test]
    fn derived_views() {
        let mut state = LabState::new();
        state
            .sensors
            .update_item("ok", &json!({ "status": "normal" }))
            .unwrap();
        state
            .sensors
            .update_item("warn", &json!({ "status": "warning" }))
            .unwrap();
        state
            .sensors
            .update_item("bad", &json!({ "status": "error" }))
            .unwrap();
        state
            .equipment
            .update_item("pump_1", &json!({ "status": "running" }))
            .unwrap();
        state
            .equipment
            .update_item("valve_a", &json!({ "status": "open" }))
            .unwrap();
        state.add_alert("disk", AlertSeverity::Warning);
        state.add_alert("overheat", AlertSeverity::Error);

        let active: Vec<_> = state.active_sensors().iter().map(|s| s.id().to_owned()).collect();
        assert_eq!(active, vec!["ok", "warn"]);

        let running: Vec<_> = state
            .running_equipment()
            .iter()
            .map(|e| e.id().to_owned())
            .collect();
        assert_eq!(running, vec!["pump_1"]);

        let critical = state.critical_alerts();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "overheat");
    }

    #[test]
    fn meta_changes_are_published() {
        let mut state = LabState::new();
        let mut rx = state.subscribe_meta();

        state.set_version("4");
        state.set_connected(true);
        assert!(rx.has_changed().unwrap());
        let meta = rx.borrow_and_update().clone();
        assert_eq!(meta.version, "4");
        assert!(meta.is_connected);

        state.set_version("4");
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn to_json_has_every_category() {
        let mut state = LabState::new();
        state.set_version("2");
        state.sensors.update_item("t", &json!({ "value": 1 })).unwrap();
        state.add_alert("hello", AlertSeverity::Info);

        let json = state.to_json();
        assert_eq!(json["version"], "2");
        assert_eq!(json["sensors"]["t"]["value"], 1.0);
        assert_eq!(json["equipment"], json!({}));
        assert_eq!(json["alerts"][0]["message"], "hello");
    }
}
