// ── Hydration ──
//
// Full-state resynchronization. Everything is cleared, then repopulated
// through the same per-entity paths incremental patches use.

use labsync_api::{Snapshot, version_string};
use serde_json::{Map, Value};

use super::LabState;
use super::collection::Collection;
use crate::error::PatchError;
use crate::model::Alert;

impl LabState {
    /// Replace the whole mirror with `snapshot`.
    ///
    /// Categories in the payload that have no registered collection are
    /// skipped. On error the mirror holds whatever was applied before the
    /// failing entity, and the version and `last_update` are left alone;
    /// the sync client reports the failure to hydration waiters.
    pub fn hydrate(&mut self, snapshot: &Snapshot) -> Result<(), PatchError> {
        self.sensors.clear();
        self.equipment.clear();
        for collection in self.extra.values_mut() {
            collection.clear();
        }
        self.alerts.clear();

        populate(&mut self.sensors, &snapshot.sensors)?;
        populate(&mut self.equipment, &snapshot.equipment)?;

        for (name, payload) in &snapshot.extra {
            let Some(collection) = self.extra.get_mut(name) else {
                tracing::debug!(category = %name, "no collection registered, skipping");
                continue;
            };
            let Value::Object(items) = payload else {
                return Err(PatchError::InvalidValue {
                    path: format!("/{name}"),
                    expected: "object",
                });
            };
            populate(&mut **collection, items)?;
        }

        // Server order is oldest first; pushing to the head leaves the
        // newest alert first.
        for alert in &snapshot.alerts {
            self.alerts.push(Alert::from_payload(alert));
        }

        if let Some(version) = &snapshot.version {
            self.set_version(version_string(version));
        }

        tracing::debug!(
            sensors = self.sensors.len(),
            equipment = self.equipment.len(),
            alerts = self.alerts.len(),
            "hydrated"
        );
        self.touch();
        Ok(())
    }
}

fn populate(collection: &mut dyn Collection, items: &Map<String, Value>) -> Result<(), PatchError> {
    for (id, data) in items {
        Collection::update_item(collection, id, data)?;
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
