// ── Patch application ──
//
// Turns a path-addressed operation stream into typed mutations. Operations
// are applied strictly in order; a failing operation aborts the rest of
// its batch, leaving earlier operations applied.

use labsync_api::{PatchOp, PatchOperation, version_string};
use serde_json::Value;

use super::LabState;
use crate::error::PatchError;
use crate::model::Alert;

impl LabState {
    /// Apply a batch and bump `last_update` once it has fully applied.
    pub fn apply_patch(&mut self, ops: &[PatchOperation]) -> Result<(), PatchError> {
        for op in ops {
            self.apply_operation(op)?;
        }
        self.touch();
        Ok(())
    }

    /// Apply a server `patch` frame. The frame's `version`, when present,
    /// becomes the root version once the batch has applied.
    pub fn apply_server_patch(
        &mut self,
        ops: &[PatchOperation],
        version: Option<&Value>,
    ) -> Result<(), PatchError> {
        self.apply_patch(ops)?;
        if let Some(version) = version {
            self.set_version(version_string(version));
        }
        Ok(())
    }

    /// Apply a single operation without touching `last_update`.
    pub fn apply_operation(&mut self, op: &PatchOperation) -> Result<(), PatchError> {
        if op.op == PatchOp::Unsupported {
            tracing::warn!(path = %op.path, "skipping unsupported patch operation");
            return Ok(());
        }

        let segments = op.segments();
        let Some((category, rest)) = segments.split_first() else {
            return Err(PatchError::InvalidPath {
                path: op.path.clone(),
            });
        };
        let value = op.value.as_ref().unwrap_or(&Value::Null);

        match category.as_str() {
            "version" => {
                if op.op != PatchOp::Remove {
                    self.set_version(version_string(value));
                }
                return Ok(());
            }
            "alerts" => return self.apply_alert_operation(op.op, rest, value),
            _ => {}
        }

        let Some(collection) = self.collection_mut(category) else {
            tracing::warn!(category = %category, path = %op.path, "unknown patch category");
            return Ok(());
        };
        let Some((id, rest)) = rest.split_first() else {
            return Err(PatchError::InvalidPath {
                path: op.path.clone(),
            });
        };

        match op.op {
            PatchOp::Add | PatchOp::Replace if rest.is_empty() => {
                collection.update_item(id, value)
            }
            PatchOp::Add | PatchOp::Replace => collection.update_item_property(id, rest, value),
            PatchOp::Remove if !rest.is_empty() => {
                tracing::warn!(path = %op.path, "property removal is not supported, skipping");
                Ok(())
            }
            PatchOp::Remove => {
                if !collection.remove(id) {
                    tracing::debug!(category = %category, id = %id, "remove of unknown entity");
                }
                Ok(())
            }
            PatchOp::Unsupported => Ok(()),
        }
    }

    fn apply_alert_operation(
        &mut self,
        op: PatchOp,
        rest: &[String],
        value: &Value,
    ) -> Result<(), PatchError> {
        match (op, rest.first()) {
            (PatchOp::Add, _) => {
                self.alerts.push(Alert::from_payload(value));
            }
            (PatchOp::Remove, Some(index)) => {
                let removed = index.parse::<usize>().ok().and_then(|i| self.alerts.remove(i));
                if removed.is_none() {
                    tracing::debug!(index = %index, "alert index out of range");
                }
            }
            (PatchOp::Replace, None) => {
                let Value::Array(items) = value else {
                    return Err(PatchError::InvalidValue {
                        path: "/alerts".into(),
                        expected: "array",
                    });
                };
                self.alerts.replace_all(items.iter().map(Alert::from_payload));
            }
            _ => {
                tracing::debug!(?op, "ignoring alert operation");
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
