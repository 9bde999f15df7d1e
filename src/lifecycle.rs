//! Authoritative ride lifecycle transitions. Every operation validates
//! the current status first, then performs a single atomic document
//! update; an illegal transition is rejected with a typed error before
//! anything is written.

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::engine::matcher::check_outbound_capacity;
use crate::models::ride::{PassengerSnapshot, RideRequest, RideStatus};
use crate::notify::{Notification, Notifier};
use crate::store::Store;

pub fn create_request(
    store: &Store,
    student: PassengerSnapshot,
    slot: String,
    peers: Vec<PassengerSnapshot>,
) -> RideRequest {
    let ride = RideRequest {
        id: Uuid::new_v4(),
        student,
        slot,
        created_at: Utc::now(),
        status: RideStatus::Requested,
        driver: None,
        return_driver: None,
        ready_to_leave: false,
        peers,
    };

    store.insert_ride(ride.clone());
    ride
}

/// Assigns a driver to a requested ride. Used by both the dispatch
/// loop and the coordinator's manual/bulk override; both paths run the
/// same availability and capacity guards, so an override cannot
/// silently overfill a vehicle.
pub fn assign(
    store: &Store,
    notifier: &dyn Notifier,
    ride_id: Uuid,
    driver_id: Uuid,
) -> Result<RideRequest, AppError> {
    let driver = store.driver(driver_id)?;
    if !driver.is_dispatchable() {
        return Err(AppError::Validation(format!(
            "driver {} is not available with a bound vehicle",
            driver.name
        )));
    }

    let ride = store.ride(ride_id)?;
    check_outbound_capacity(store, &driver, ride.seats())?;

    let snapshot = driver.snapshot();
    let updated = store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::Requested {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "assign",
            });
        }
        ride.status = RideStatus::Assigned;
        ride.driver = Some(snapshot.clone());
        Ok(())
    })?;

    notifier.send(Notification::DriverAssigned {
        ride_id: updated.id,
        student_id: updated.student.student_id,
        driver: snapshot,
    });

    Ok(updated)
}

/// Coordinator bulk override: assigns each listed ride to the driver,
/// reporting per-ride outcomes instead of failing the batch.
pub fn assign_bulk(
    store: &Store,
    notifier: &dyn Notifier,
    ride_ids: &[Uuid],
    driver_id: Uuid,
) -> Vec<(Uuid, Result<RideRequest, AppError>)> {
    ride_ids
        .iter()
        .map(|&ride_id| (ride_id, assign(store, notifier, ride_id, driver_id)))
        .collect()
}

/// Manual demotion back into the dispatch pool. Clears the driver
/// snapshot; the next pass is free to re-match the request.
pub fn unassign(store: &Store, ride_id: Uuid) -> Result<RideRequest, AppError> {
    store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::Assigned {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "unassign",
            });
        }
        ride.status = RideStatus::Requested;
        ride.driver = None;
        Ok(())
    })
}

pub fn start(
    store: &Store,
    notifier: &dyn Notifier,
    ride_id: Uuid,
) -> Result<RideRequest, AppError> {
    let updated = store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::Assigned {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "start",
            });
        }
        ride.status = RideStatus::DriverEnRoute;
        Ok(())
    })?;

    notifier.send(Notification::RideStarted {
        ride_id: updated.id,
        student_id: updated.student.student_id,
    });

    Ok(updated)
}

pub fn arrive(store: &Store, ride_id: Uuid) -> Result<RideRequest, AppError> {
    store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::DriverEnRoute {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "arrive",
            });
        }
        ride.status = RideStatus::Arriving;
        Ok(())
    })
}

pub fn complete(
    store: &Store,
    notifier: &dyn Notifier,
    ride_id: Uuid,
) -> Result<RideRequest, AppError> {
    let updated = store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::Arriving {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "complete",
            });
        }
        ride.status = RideStatus::Completed;
        Ok(())
    })?;

    notifier.send(Notification::RideCompleted {
        ride_id: updated.id,
        student_id: updated.student.student_id,
    });

    Ok(updated)
}

/// Cancellation is reachable from any non-terminal state. The driver
/// snapshot is cleared so the `driver iff assigned-or-later` invariant
/// holds for cancelled rides too.
pub fn cancel(store: &Store, ride_id: Uuid) -> Result<RideRequest, AppError> {
    store.update_ride(ride_id, |ride| {
        if ride.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "cancel",
            });
        }
        ride.status = RideStatus::Cancelled;
        ride.driver = None;
        Ok(())
    })
}

/// Orthogonal flag on a completed ride; status does not change. Feeds
/// the dispatch loop's return-leg query.
pub fn mark_ready_to_leave(store: &Store, ride_id: Uuid) -> Result<RideRequest, AppError> {
    store.update_ride(ride_id, |ride| {
        if ride.status != RideStatus::Completed {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                action: "mark ready to leave",
            });
        }
        ride.ready_to_leave = true;
        Ok(())
    })
}

/// Attaches the return-leg driver. The return trip is tracked by this
/// field alone; there is no additional status value.
pub fn assign_return_driver(
    store: &Store,
    ride_id: Uuid,
    driver_id: Uuid,
) -> Result<RideRequest, AppError> {
    let driver = store.driver(driver_id)?;
    if !driver.is_dispatchable() {
        return Err(AppError::Validation(format!(
            "driver {} is not available with a bound vehicle",
            driver.name
        )));
    }

    let snapshot = driver.snapshot();
    store.update_ride(ride_id, |ride| {
        if !ride.ready_to_leave {
            return Err(AppError::Validation(
                "ride is not flagged ready to leave".to_string(),
            ));
        }
        if ride.return_driver.is_some() {
            return Err(AppError::Conflict(
                "ride already has a return driver".to_string(),
            ));
        }
        ride.return_driver = Some(snapshot.clone());
        Ok(())
    })
}

/// Marks a return round as driven by clearing the ready flag; the
/// `return_driver` snapshot stays on the record as history.
pub fn finish_return(store: &Store, ride_id: Uuid) -> Result<RideRequest, AppError> {
    store.update_ride(ride_id, |ride| {
        if !ride.ready_to_leave || ride.return_driver.is_none() {
            return Err(AppError::Validation(
                "ride has no pending return trip".to_string(),
            ));
        }
        ride.ready_to_leave = false;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::driver::{Driver, DriverStatus};
    use crate::models::ride::PassengerSnapshot;
    use crate::models::GeoPoint;
    use crate::notify::LogNotifier;

    fn student(seed: u128, address: &str) -> PassengerSnapshot {
        PassengerSnapshot {
            student_id: Uuid::from_u128(seed),
            name: format!("student-{seed}"),
            address: address.to_string(),
            location: GeoPoint {
                lat: 42.35,
                lng: -71.08,
            },
            avatar_url: None,
        }
    }

    fn driver(store: &Store, seed: u128, capacity: u32) -> Driver {
        let driver = Driver {
            id: Uuid::from_u128(seed),
            name: format!("driver-{seed}"),
            phone: "555-0100".to_string(),
            address: "1 Beacon Hill".to_string(),
            location: GeoPoint {
                lat: 42.36,
                lng: -71.07,
            },
            avatar_url: None,
            status: DriverStatus::Available,
            current_vehicle_id: Some(Uuid::from_u128(seed + 5000)),
            capacity,
            rides_completed_today: 0,
            students_today: 0,
            distance_km_today: 0.0,
            updated_at: chrono::Utc::now(),
        };
        store.insert_driver(driver.clone());
        driver
    }

    #[test]
    fn assign_sets_driver_snapshot_and_status_together() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        let updated = assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        assert_eq!(updated.status, RideStatus::Assigned);
        assert_eq!(updated.driver.unwrap().driver_id, d.id);
    }

    #[test]
    fn assign_rejects_non_requested_ride() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        let err = assign(&store, &LogNotifier, ride.id, d.id).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn manual_assign_respects_capacity() {
        let store = Store::new(16);
        let d = driver(&store, 1, 2);

        for seed in 0..2u128 {
            let ride = create_request(
                &store,
                student(20 + seed, "Hanover St"),
                "18:00".into(),
                vec![],
            );
            assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        }

        let overflow = create_request(&store, student(30, "Hanover St"), "18:00".into(), vec![]);
        let err = assign(&store, &LogNotifier, overflow.id, d.id).unwrap_err();
        assert!(matches!(err, AppError::CapacityExceeded(_)));
        assert_eq!(store.ride(overflow.id).unwrap().status, RideStatus::Requested);
    }

    #[test]
    fn unassign_demotes_and_clears_driver() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        let updated = unassign(&store, ride.id).unwrap();

        assert_eq!(updated.status, RideStatus::Requested);
        assert!(updated.driver.is_none());
    }

    #[test]
    fn full_outbound_path_reaches_completed() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        start(&store, &LogNotifier, ride.id).unwrap();
        arrive(&store, ride.id).unwrap();
        let done = complete(&store, &LogNotifier, ride.id).unwrap();

        assert_eq!(done.status, RideStatus::Completed);
        assert!(done.driver.is_some());
    }

    #[test]
    fn complete_requires_arriving() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);
        assign(&store, &LogNotifier, ride.id, d.id).unwrap();

        let err = complete(&store, &LogNotifier, ride.id).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn cancel_clears_driver_and_is_terminal() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);
        assign(&store, &LogNotifier, ride.id, d.id).unwrap();

        let cancelled = cancel(&store, ride.id).unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert!(cancelled.driver.is_none());

        let err = cancel(&store, ride.id).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn ready_to_leave_requires_completed_and_keeps_status() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        assert!(mark_ready_to_leave(&store, ride.id).is_err());

        assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        start(&store, &LogNotifier, ride.id).unwrap();
        arrive(&store, ride.id).unwrap();
        complete(&store, &LogNotifier, ride.id).unwrap();

        let flagged = mark_ready_to_leave(&store, ride.id).unwrap();
        assert_eq!(flagged.status, RideStatus::Completed);
        assert!(flagged.ready_to_leave);
    }

    #[test]
    fn return_driver_attaches_once_without_status_change() {
        let store = Store::new(16);
        let d = driver(&store, 1, 4);
        let back = driver(&store, 2, 4);
        let ride = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);

        assign(&store, &LogNotifier, ride.id, d.id).unwrap();
        start(&store, &LogNotifier, ride.id).unwrap();
        arrive(&store, ride.id).unwrap();
        complete(&store, &LogNotifier, ride.id).unwrap();
        mark_ready_to_leave(&store, ride.id).unwrap();

        let updated = assign_return_driver(&store, ride.id, back.id).unwrap();
        assert_eq!(updated.status, RideStatus::Completed);
        assert_eq!(updated.return_driver.unwrap().driver_id, back.id);

        let err = assign_return_driver(&store, ride.id, d.id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn bulk_assign_reports_per_ride_outcomes() {
        let store = Store::new(16);
        let d = driver(&store, 1, 1);
        let first = create_request(&store, student(10, "Newbury St"), "18:00".into(), vec![]);
        let second = create_request(&store, student(11, "Newbury St"), "18:00".into(), vec![]);

        let results = assign_bulk(&store, &LogNotifier, &[first.id, second.id], d.id);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1.as_ref().unwrap_err(),
            AppError::CapacityExceeded(_)
        ));
    }
}
