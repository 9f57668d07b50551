//! Client-side mirror of a server-authoritative laboratory state.
//!
//! - **[`SyncClient`]**: owns the transport and the connection lifecycle:
//!   hydration from `initial_state`, incremental `patch` application, and
//!   reconnect with linear backoff. Generic over the
//!   [`Connector`](labsync_api::Connector) so tests can run in memory.
//!
//! - **[`LabState`]**: the single aggregate of sensors, equipment, any
//!   runtime-registered categories, the bounded alert log and metadata.
//!   Routes each patch operation to the container for its category.
//!
//! - **[`EntityCollection<T>`]**: insertion-ordered reactive container
//!   with `watch` snapshots ([`EntityStream`]) and monotonic per-entity
//!   feeds ([`ItemStream`]).
//!
//! - **[`PumpController`]**: optimistic, single-flight pump commands with
//!   rollback when the command cannot be sent.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandOutcome, PumpCommand, PumpController};
pub use config::{ReconnectConfig, SyncConfig};
pub use connection::{ConnectionState, SharedState, SyncClient, new_shared_state};
pub use error::{CoreError, PatchError};
pub use store::{ALERT_CAPACITY, AlertLog, Collection, EntityCollection, LabState, StateMeta};
pub use stream::{EntityStream, ItemStream};

pub use model::{
    Alert, AlertSeverity, COMMAND_HISTORY_CAPACITY, CommandHistory, CommandRecord, Entity,
    EntityFactory, Equipment, EquipmentKinds, EquipmentStatus, EquipmentVariant, PathMutable,
    Pump, Sensor, SensorStatus,
};
