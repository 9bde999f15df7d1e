use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    InUse,
}

/// `status`/`current_driver_id` and the driver's `current_vehicle_id`
/// form one logical record; bind and release write both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub model: String,
    pub color: String,
    pub plate: String,
    pub capacity: u32,
    pub status: VehicleStatus,
    pub current_driver_id: Option<Uuid>,
}
