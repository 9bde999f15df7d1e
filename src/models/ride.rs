use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GeoPoint;

/// Authoritative lifecycle status of a ride request. `Completed` and
/// `Cancelled` are terminal; `Assigned` can be demoted back to
/// `Requested` via unassign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Assigned,
    DriverEnRoute,
    Arriving,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// States in which the `driver` snapshot must be present.
    pub fn requires_driver(self) -> bool {
        matches!(
            self,
            RideStatus::Assigned
                | RideStatus::DriverEnRoute
                | RideStatus::Arriving
                | RideStatus::Completed
        )
    }
}

/// Immutable copy of a student's display fields, captured when the
/// request is created (or when a peer joins). Never re-read from a
/// live profile row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerSnapshot {
    pub student_id: Uuid,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub avatar_url: Option<String>,
}

/// Immutable copy of a driver's display fields, captured at assignment
/// time and denormalized onto the ride request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub driver_id: Uuid,
    pub name: String,
    pub phone: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub student: PassengerSnapshot,
    pub slot: String,
    pub created_at: DateTime<Utc>,
    pub status: RideStatus,
    pub driver: Option<DriverSnapshot>,
    pub return_driver: Option<DriverSnapshot>,
    pub ready_to_leave: bool,
    pub peers: Vec<PassengerSnapshot>,
}

impl RideRequest {
    /// Seats consumed by this request: the requesting student plus any
    /// peers riding together from the same pickup.
    pub fn seats(&self) -> u32 {
        1 + self.peers.len() as u32
    }

    pub fn assigned_to(&self, driver_id: Uuid) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|d| d.driver_id == driver_id)
    }
}
