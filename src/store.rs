use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::ride::{RideRequest, RideStatus};
use crate::models::vehicle::Vehicle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Rides,
    Drivers,
    Vehicles,
}

/// Change notification published after every mutation. Carries no
/// document body: consumers re-query, so delivery is level-triggered
/// and a lost event is repaired by the next one.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub id: Uuid,
}

/// In-memory document store with live change notifications. Stands in
/// for the real document database behind the same subscribe/mutate
/// contract.
pub struct Store {
    rides: DashMap<Uuid, RideRequest>,
    drivers: DashMap<Uuid, Driver>,
    vehicles: DashMap<Uuid, Vehicle>,
    changes_tx: broadcast::Sender<ChangeEvent>,
}

impl Store {
    pub fn new(event_buffer_size: usize) -> Self {
        let (changes_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            rides: DashMap::new(),
            drivers: DashMap::new(),
            vehicles: DashMap::new(),
            changes_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes_tx.subscribe()
    }

    fn publish(&self, topic: Topic, id: Uuid) {
        // No subscribers is fine (tests, startup).
        let _ = self.changes_tx.send(ChangeEvent { topic, id });
    }

    pub fn insert_ride(&self, ride: RideRequest) {
        let id = ride.id;
        self.rides.insert(id, ride);
        self.publish(Topic::Rides, id);
    }

    pub fn insert_driver(&self, driver: Driver) {
        let id = driver.id;
        self.drivers.insert(id, driver);
        self.publish(Topic::Drivers, id);
    }

    pub fn insert_vehicle(&self, vehicle: Vehicle) {
        let id = vehicle.id;
        self.vehicles.insert(id, vehicle);
        self.publish(Topic::Vehicles, id);
    }

    pub fn ride(&self, id: Uuid) -> Result<RideRequest, AppError> {
        self.rides
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))
    }

    pub fn driver(&self, id: Uuid) -> Result<Driver, AppError> {
        self.drivers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
    }

    pub fn vehicle(&self, id: Uuid) -> Result<Vehicle, AppError> {
        self.vehicles
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("vehicle {id} not found")))
    }

    /// Atomic check-and-mutate of one ride document. The closure runs
    /// against a draft under the map entry lock; the draft is committed
    /// only if it upholds the driver-presence rule, and the change
    /// event fires after the lock is released.
    pub fn update_ride<F>(&self, id: Uuid, mutate: F) -> Result<RideRequest, AppError>
    where
        F: FnOnce(&mut RideRequest) -> Result<(), AppError>,
    {
        let updated = {
            let mut entry = self
                .rides
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;
            let mut draft = entry.value().clone();
            mutate(&mut draft)?;

            // A ride holds a driver snapshot exactly in the states that
            // imply one; a write that breaks this never lands.
            if draft.driver.is_some() != draft.status.requires_driver() {
                return Err(AppError::Internal(format!(
                    "ride {id} update rejected: status {:?} with driver snapshot {}",
                    draft.status,
                    if draft.driver.is_some() {
                        "present"
                    } else {
                        "absent"
                    }
                )));
            }

            *entry.value_mut() = draft.clone();
            draft
        };

        self.publish(Topic::Rides, id);
        Ok(updated)
    }

    pub fn update_driver<F>(&self, id: Uuid, mutate: F) -> Result<Driver, AppError>
    where
        F: FnOnce(&mut Driver) -> Result<(), AppError>,
    {
        let updated = {
            let mut entry = self
                .drivers
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;
            mutate(entry.value_mut())?;
            entry.value().clone()
        };

        self.publish(Topic::Drivers, id);
        Ok(updated)
    }

    pub fn update_vehicle<F>(&self, id: Uuid, mutate: F) -> Result<Vehicle, AppError>
    where
        F: FnOnce(&mut Vehicle) -> Result<(), AppError>,
    {
        let updated = {
            let mut entry = self
                .vehicles
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("vehicle {id} not found")))?;
            mutate(entry.value_mut())?;
            entry.value().clone()
        };

        self.publish(Topic::Vehicles, id);
        Ok(updated)
    }

    pub fn rides(&self) -> Vec<RideRequest> {
        self.rides.iter().map(|e| e.value().clone()).collect()
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.drivers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.iter().map(|e| e.value().clone()).collect()
    }

    /// Live query: unmatched outbound requests, oldest first. The
    /// dispatch loop processes them in this order so a pass is
    /// deterministic.
    pub fn pending_requests(&self) -> Vec<RideRequest> {
        let mut pending: Vec<RideRequest> = self
            .rides
            .iter()
            .filter(|e| e.value().status == RideStatus::Requested)
            .map(|e| e.value().clone())
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.id));
        pending
    }

    /// Live query: completed rides flagged ready to leave that still
    /// need a return driver.
    pub fn awaiting_return(&self) -> Vec<RideRequest> {
        let mut waiting: Vec<RideRequest> = self
            .rides
            .iter()
            .filter(|e| {
                let r = e.value();
                r.status == RideStatus::Completed && r.ready_to_leave && r.return_driver.is_none()
            })
            .map(|e| e.value().clone())
            .collect();
        waiting.sort_by_key(|r| (r.created_at, r.id));
        waiting
    }

    /// Seats currently held by in-flight outbound assignments for one
    /// driver. Recomputed from scratch on every call; no incremental
    /// counter is trusted across dispatch passes.
    pub fn outbound_load(&self, driver_id: Uuid) -> u32 {
        self.rides
            .iter()
            .filter(|e| {
                let r = e.value();
                matches!(
                    r.status,
                    RideStatus::Assigned | RideStatus::DriverEnRoute | RideStatus::Arriving
                ) && r.assigned_to(driver_id)
            })
            .map(|e| e.value().seats())
            .sum()
    }

    /// Seats held by pending return-leg assignments for one driver.
    pub fn return_load(&self, driver_id: Uuid) -> u32 {
        self.rides
            .iter()
            .filter(|e| {
                let r = e.value();
                r.ready_to_leave
                    && r.return_driver
                        .as_ref()
                        .is_some_and(|d| d.driver_id == driver_id)
            })
            .map(|e| e.value().seats())
            .sum()
    }

    /// Rides a driver is currently working: assigned or underway,
    /// oldest first. Feeds the workflow's candidate set.
    pub fn rides_for_driver(&self, driver_id: Uuid, statuses: &[RideStatus]) -> Vec<RideRequest> {
        let mut rides: Vec<RideRequest> = self
            .rides
            .iter()
            .filter(|e| {
                let r = e.value();
                statuses.contains(&r.status) && r.assigned_to(driver_id)
            })
            .map(|e| e.value().clone())
            .collect();
        rides.sort_by_key(|r| (r.created_at, r.id));
        rides
    }

    /// Return-leg rides bound to a driver that have not been driven yet.
    pub fn return_rides_for_driver(&self, driver_id: Uuid) -> Vec<RideRequest> {
        let mut rides: Vec<RideRequest> = self
            .rides
            .iter()
            .filter(|e| {
                let r = e.value();
                r.ready_to_leave
                    && r.return_driver
                        .as_ref()
                        .is_some_and(|d| d.driver_id == driver_id)
            })
            .map(|e| e.value().clone())
            .collect();
        rides.sort_by_key(|r| (r.created_at, r.id));
        rides
    }
}
