use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GeoPoint;
use crate::models::ride::DriverSnapshot;

/// A driver with an active assignment stays `Available`; "on a ride"
/// is implied by the ride documents pointing at them, not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub location: GeoPoint,
    pub avatar_url: Option<String>,
    pub status: DriverStatus,
    /// Vehicle bound for the current shift. A driver without a vehicle
    /// is never matched. Capacity mirrors the bound vehicle and is 0
    /// while unbound.
    pub current_vehicle_id: Option<Uuid>,
    pub capacity: u32,
    pub rides_completed_today: u32,
    pub students_today: u32,
    pub distance_km_today: f64,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            driver_id: self.id,
            name: self.name.clone(),
            phone: self.phone.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == DriverStatus::Available && self.current_vehicle_id.is_some()
    }
}
