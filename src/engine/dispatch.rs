//! Reactive dispatch loop. One long-lived task owns both live queries
//! (pending outbound requests and ready-to-leave return trips) and
//! runs a full matching pass on every change notification, so passes
//! are serialized through a single actor and cannot interleave.

use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::engine::matcher::{self, PassState};
use crate::engine::zones::classify;
use crate::lifecycle;
use crate::models::driver::Driver;
use crate::state::AppState;
use crate::store::ChangeEvent;

/// What one pass did. Two passes over an unchanged snapshot must
/// produce `matched == 0 && return_matched == 0` on the second run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub matched: usize,
    pub return_matched: usize,
    pub unmatched: usize,
}

pub async fn run_dispatch_loop(state: Arc<AppState>) {
    let mut changes = state.store.subscribe();
    info!("dispatch loop started");

    // Drivers and requests may already exist before the loop spins up.
    run_pass(&state);

    loop {
        match changes.recv().await {
            Ok(ChangeEvent { .. }) => {}
            Err(RecvError::Lagged(skipped)) => {
                // Level-triggered: a pass over the current snapshot
                // covers whatever we missed.
                warn!(skipped, "dispatch loop lagged behind change feed");
            }
            Err(RecvError::Closed) => {
                warn!("dispatch loop stopped: change feed closed");
                return;
            }
        }

        // Coalesce bursts of notifications into one pass.
        while changes.try_recv().is_ok() {}

        run_pass(&state);
    }
}

/// One dispatch pass: snapshot the driver pool, derive per-driver load
/// and zone from in-flight assignments, match every pending request
/// oldest-first, then hand out return-leg drivers. Per-item failures
/// are logged and skipped; the next notification retries them.
pub fn run_pass(state: &AppState) -> PassSummary {
    let started = Instant::now();
    let mut summary = PassSummary::default();

    let mut pool: Vec<Driver> = state
        .store
        .drivers()
        .into_iter()
        .filter(|d| d.is_dispatchable())
        .collect();
    pool.sort_by_key(|d| d.id);

    summary = outbound_pass(state, &pool, summary);
    summary = return_pass(state, &pool, summary);

    state.metrics.dispatch_passes_total.inc();
    state
        .metrics
        .dispatch_pass_duration_seconds
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .pending_requests
        .set(state.store.pending_requests().len() as i64);

    for driver in &pool {
        if driver.capacity > 0 {
            let utilization =
                state.store.outbound_load(driver.id) as f64 / driver.capacity as f64;
            state
                .metrics
                .driver_utilization
                .with_label_values(&[&driver.id.to_string()])
                .set(utilization);
        }
    }

    summary
}

fn outbound_pass(state: &AppState, pool: &[Driver], mut summary: PassSummary) -> PassSummary {
    let mut pass = PassState::derive(&state.store, pool);

    for request in state.store.pending_requests() {
        let zone = classify(&request.student.address);

        let Some(driver_id) = matcher::select_driver(zone, request.seats(), pool, &mut pass)
        else {
            debug!(ride_id = %request.id, ?zone, "no eligible driver; request stays pending");
            summary.unmatched += 1;
            continue;
        };

        match lifecycle::assign(&state.store, state.notifier.as_ref(), request.id, driver_id) {
            Ok(assigned) => {
                info!(ride_id = %assigned.id, driver_id = %driver_id, ?zone, "request matched");
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["matched"])
                    .inc();
                summary.matched += 1;
            }
            Err(err) => {
                warn!(ride_id = %request.id, error = %err, "assignment write failed; will retry next pass");
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                summary.unmatched += 1;
            }
        }
    }

    summary
}

/// Return-leg matching: no zone tiering, a random draw from the pool
/// filtered to drivers with seats left for the group.
fn return_pass(state: &AppState, pool: &[Driver], mut summary: PassSummary) -> PassSummary {
    let mut rng = rand::thread_rng();

    for request in state.store.awaiting_return() {
        let eligible: Vec<&Driver> = pool
            .iter()
            .filter(|d| {
                state.store.return_load(d.id) + request.seats() <= d.capacity
            })
            .collect();

        let Some(driver) = eligible.choose(&mut rng) else {
            debug!(ride_id = %request.id, "no driver free for return leg");
            summary.unmatched += 1;
            continue;
        };

        match lifecycle::assign_return_driver(&state.store, request.id, driver.id) {
            Ok(assigned) => {
                info!(ride_id = %assigned.id, driver_id = %driver.id, "return driver attached");
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["return"])
                    .inc();
                summary.return_matched += 1;
            }
            Err(err) => {
                warn!(ride_id = %request.id, error = %err, "return assignment failed; will retry next pass");
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                summary.unmatched += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::driver::DriverStatus;
    use crate::models::ride::{PassengerSnapshot, RideStatus};
    use crate::models::GeoPoint;
    use crate::state::Venue;

    fn app() -> AppState {
        AppState::new(
            64,
            Venue {
                name: "Community Hall".to_string(),
                location: GeoPoint {
                    lat: 42.3601,
                    lng: -71.0589,
                },
            },
        )
    }

    fn seed_driver(state: &AppState, seed: u128, capacity: u32, with_vehicle: bool) -> Uuid {
        let driver = Driver {
            id: Uuid::from_u128(seed),
            name: format!("driver-{seed}"),
            phone: "555-0100".to_string(),
            address: "5 Beacon Hill".to_string(),
            location: GeoPoint {
                lat: 42.36,
                lng: -71.07,
            },
            avatar_url: None,
            status: DriverStatus::Available,
            current_vehicle_id: with_vehicle.then(|| Uuid::from_u128(seed + 5000)),
            capacity,
            rides_completed_today: 0,
            students_today: 0,
            distance_km_today: 0.0,
            updated_at: chrono::Utc::now(),
        };
        state.store.insert_driver(driver);
        Uuid::from_u128(seed)
    }

    fn seed_request(state: &AppState, seed: u128, address: &str) -> Uuid {
        let student = PassengerSnapshot {
            student_id: Uuid::from_u128(seed),
            name: format!("student-{seed}"),
            address: address.to_string(),
            location: GeoPoint {
                lat: 42.35,
                lng: -71.08,
            },
            avatar_url: None,
        };
        lifecycle::create_request(&state.store, student, "18:00".into(), vec![]).id
    }

    #[test]
    fn pass_matches_pending_requests_to_available_drivers() {
        let state = app();
        let driver_id = seed_driver(&state, 1, 4, true);
        let ride_id = seed_request(&state, 10, "221 Newbury St");

        let summary = run_pass(&state);
        assert_eq!(summary.matched, 1);

        let ride = state.store.ride(ride_id).unwrap();
        assert_eq!(ride.status, RideStatus::Assigned);
        assert_eq!(ride.driver.unwrap().driver_id, driver_id);
    }

    #[test]
    fn pass_is_idempotent_on_unchanged_snapshot() {
        let state = app();
        seed_driver(&state, 1, 4, true);
        seed_request(&state, 10, "221 Newbury St");
        seed_request(&state, 11, "44 Hanover St");

        let first = run_pass(&state);
        assert_eq!(first.matched, 2);

        let second = run_pass(&state);
        assert_eq!(second.matched, 0);
        assert_eq!(second.return_matched, 0);
    }

    #[test]
    fn no_drivers_leaves_requests_pending_without_error() {
        let state = app();
        let ride_id = seed_request(&state, 10, "221 Newbury St");

        for _ in 0..3 {
            let summary = run_pass(&state);
            assert_eq!(summary.matched, 0);
            assert_eq!(summary.unmatched, 1);
        }

        assert_eq!(state.store.ride(ride_id).unwrap().status, RideStatus::Requested);
    }

    #[test]
    fn driver_without_vehicle_is_never_matched() {
        let state = app();
        seed_driver(&state, 1, 4, false);
        let ride_id = seed_request(&state, 10, "221 Newbury St");

        run_pass(&state);
        assert_eq!(state.store.ride(ride_id).unwrap().status, RideStatus::Requested);
    }

    #[test]
    fn driver_load_never_exceeds_capacity_within_one_pass() {
        let state = app();
        let full_zone = seed_driver(&state, 1, 4, true);
        let idle = seed_driver(&state, 2, 4, true);

        // Driver 1 already carries 3 back_bay pickups.
        for seed in 0..3u128 {
            let ride_id = seed_request(&state, 20 + seed, "221 Newbury St");
            lifecycle::assign(&state.store, state.notifier.as_ref(), ride_id, full_zone).unwrap();
        }

        // Fourth back_bay request tops driver 1 off; the fifth must
        // fall through to the idle driver.
        let fourth = seed_request(&state, 30, "360 Boylston St");
        let fifth = seed_request(&state, 31, "12 Back Bay Rd");

        let summary = run_pass(&state);
        assert_eq!(summary.matched, 2);

        assert_eq!(
            state.store.ride(fourth).unwrap().driver.unwrap().driver_id,
            full_zone
        );
        assert_eq!(
            state.store.ride(fifth).unwrap().driver.unwrap().driver_id,
            idle
        );
        assert!(state.store.outbound_load(full_zone) <= 4);
        assert!(state.store.outbound_load(idle) <= 4);
    }

    #[test]
    fn at_capacity_everywhere_leaves_overflow_pending() {
        let state = app();
        let only = seed_driver(&state, 1, 1, true);

        let first = seed_request(&state, 10, "221 Newbury St");
        let second = seed_request(&state, 11, "221 Newbury St");

        let summary = run_pass(&state);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.unmatched, 1);

        assert_eq!(state.store.ride(first).unwrap().status, RideStatus::Assigned);
        assert_eq!(state.store.ride(second).unwrap().status, RideStatus::Requested);
        assert_eq!(state.store.outbound_load(only), 1);
    }

    #[test]
    fn unassigned_ride_is_rematched_on_the_next_pass() {
        let state = app();
        seed_driver(&state, 1, 4, true);
        let ride_id = seed_request(&state, 10, "221 Newbury St");

        run_pass(&state);
        lifecycle::unassign(&state.store, ride_id).unwrap();
        assert!(state.store.ride(ride_id).unwrap().driver.is_none());

        let summary = run_pass(&state);
        assert_eq!(summary.matched, 1);
        assert_eq!(state.store.ride(ride_id).unwrap().status, RideStatus::Assigned);
    }

    #[test]
    fn return_leg_draws_a_driver_with_seats_left() {
        let state = app();
        let driver_id = seed_driver(&state, 1, 4, true);
        let ride_id = seed_request(&state, 10, "221 Newbury St");

        run_pass(&state);
        lifecycle::start(&state.store, state.notifier.as_ref(), ride_id).unwrap();
        lifecycle::arrive(&state.store, ride_id).unwrap();
        lifecycle::complete(&state.store, state.notifier.as_ref(), ride_id).unwrap();
        lifecycle::mark_ready_to_leave(&state.store, ride_id).unwrap();

        let summary = run_pass(&state);
        assert_eq!(summary.return_matched, 1);

        let ride = state.store.ride(ride_id).unwrap();
        assert_eq!(ride.status, RideStatus::Completed);
        assert_eq!(ride.return_driver.unwrap().driver_id, driver_id);

        // Settled: nothing more to do.
        assert_eq!(run_pass(&state), PassSummary::default());
    }

    #[test]
    fn return_leg_respects_capacity() {
        let state = app();
        seed_driver(&state, 1, 1, true);

        for seed in 0..2u128 {
            let ride_id = seed_request(&state, 10 + seed, "221 Newbury St");
            // Drive each one out individually.
            let driver_id = Uuid::from_u128(1);
            lifecycle::assign(&state.store, state.notifier.as_ref(), ride_id, driver_id).unwrap();
            lifecycle::start(&state.store, state.notifier.as_ref(), ride_id).unwrap();
            lifecycle::arrive(&state.store, ride_id).unwrap();
            lifecycle::complete(&state.store, state.notifier.as_ref(), ride_id).unwrap();
            lifecycle::mark_ready_to_leave(&state.store, ride_id).unwrap();
        }

        let summary = run_pass(&state);
        assert_eq!(summary.return_matched, 1);
        assert_eq!(summary.unmatched, 1);
    }
}
