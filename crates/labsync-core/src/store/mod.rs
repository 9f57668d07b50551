// ── Reactive lab state ──
//
// Entity containers with push-based change notification, the alert log,
// and the `LabState` aggregate that routes patches to them.

mod alerts;
mod collection;
mod hydrate;
mod lab_state;
mod patch;

pub use alerts::{ALERT_CAPACITY, AlertLog};
pub use collection::{Collection, EntityCollection};
pub use lab_state::{LabState, StateMeta};
