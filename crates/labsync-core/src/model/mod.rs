// ── Lab domain model ──
//
// Typed records mirrored from the lab server. Each implements `Entity`
// so the generic containers can create, update and serialize it without
// knowing its concrete type.

pub mod alert;
pub mod entity;
pub mod equipment;
pub mod sensor;

pub use alert::{Alert, AlertSeverity};
pub use entity::{Entity, EntityFactory, PathMutable, assign_path};
pub use equipment::{
    COMMAND_HISTORY_CAPACITY, CommandHistory, CommandRecord, Equipment, EquipmentConstructor,
    EquipmentKinds, EquipmentStatus, EquipmentVariant, Pump,
};
pub use sensor::{Sensor, SensorStatus};
