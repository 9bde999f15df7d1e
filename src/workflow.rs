//! Per-driver working session: dashboard -> preview -> active ->
//! completed -> (next round | dashboard). The session is the client's
//! view; the store's lifecycle status stays authoritative. Preview has
//! no server-side status, active maps to driver_en_route/arriving, and
//! completed maps to completed, so rehydration always rebuilds from
//! the store rather than from session memory.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle;
use crate::models::driver::{Driver, DriverStatus};
use crate::models::ride::{PassengerSnapshot, RideRequest, RideStatus};
use crate::models::vehicle::VehicleStatus;
use crate::routing::{self, Direction, Waypoint, WaypointKind};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Dashboard,
    Preview,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverSession {
    pub driver_id: Uuid,
    pub phase: SessionPhase,
    pub direction: Direction,
    pub ride_ids: Vec<Uuid>,
    pub waypoints: Vec<Waypoint>,
    pub navigation_url: String,
}

impl DriverSession {
    fn dashboard(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            phase: SessionPhase::Dashboard,
            direction: Direction::Outbound,
            ride_ids: Vec::new(),
            waypoints: Vec::new(),
            navigation_url: String::new(),
        }
    }

    pub fn unvisited_stops(&self) -> usize {
        self.waypoints
            .iter()
            .filter(|w| {
                matches!(w.kind, WaypointKind::Pickup | WaypointKind::Dropoff)
                    || (w.kind == WaypointKind::End && w.student_id.is_some())
            })
            .filter(|w| !w.visited)
            .count()
    }
}

fn current_phase(state: &AppState, driver_id: Uuid) -> SessionPhase {
    state
        .sessions
        .get(&driver_id)
        .map(|s| s.phase)
        .unwrap_or(SessionPhase::Dashboard)
}

/// Binds a vehicle to a driver for the shift. Both sides of the
/// pairing are written; switching vehicles releases the old one first.
pub fn bind_vehicle(state: &AppState, driver_id: Uuid, vehicle_id: Uuid) -> Result<Driver, AppError> {
    let driver = state.store.driver(driver_id)?;
    if driver.current_vehicle_id == Some(vehicle_id) {
        return Ok(driver);
    }
    if driver.current_vehicle_id.is_some() {
        release_vehicle(state, driver_id)?;
    }

    let vehicle = state.store.update_vehicle(vehicle_id, |vehicle| {
        if vehicle.status != VehicleStatus::Available || vehicle.current_driver_id.is_some() {
            return Err(AppError::Conflict(format!(
                "vehicle {} is already in use",
                vehicle.plate
            )));
        }
        vehicle.status = VehicleStatus::InUse;
        vehicle.current_driver_id = Some(driver_id);
        Ok(())
    })?;

    state.store.update_driver(driver_id, |driver| {
        driver.current_vehicle_id = Some(vehicle.id);
        driver.capacity = vehicle.capacity;
        driver.updated_at = chrono::Utc::now();
        Ok(())
    })
}

/// Releases the driver's vehicle. Rejected while the driver still has
/// a ride underway, so capacity cannot vanish out from under an
/// active round.
pub fn release_vehicle(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let driver = state.store.driver(driver_id)?;
    let vehicle_id = driver
        .current_vehicle_id
        .ok_or_else(|| AppError::Validation("driver has no bound vehicle".to_string()))?;

    if current_phase(state, driver_id) == SessionPhase::Active {
        return Err(AppError::Conflict(
            "cannot release vehicle during an active ride".to_string(),
        ));
    }
    let underway = state.store.rides_for_driver(
        driver_id,
        &[RideStatus::DriverEnRoute, RideStatus::Arriving],
    );
    if !underway.is_empty() {
        return Err(AppError::Conflict(
            "cannot release vehicle while rides are underway".to_string(),
        ));
    }

    state.store.update_vehicle(vehicle_id, |vehicle| {
        vehicle.status = VehicleStatus::Available;
        vehicle.current_driver_id = None;
        Ok(())
    })?;

    state.store.update_driver(driver_id, |driver| {
        driver.current_vehicle_id = None;
        driver.capacity = 0;
        driver.updated_at = chrono::Utc::now();
        Ok(())
    })
}

/// Candidate passenger set for the driver's next round. Outbound work
/// (assigned pickups) takes precedence; otherwise a pending return
/// round is offered.
fn candidate_round(
    state: &AppState,
    driver_id: Uuid,
    statuses: &[RideStatus],
) -> (Direction, Vec<RideRequest>) {
    let outbound = state.store.rides_for_driver(driver_id, statuses);
    if !outbound.is_empty() {
        return (Direction::Outbound, outbound);
    }

    (
        Direction::Return,
        state.store.return_rides_for_driver(driver_id),
    )
}

fn round_passengers(rides: &[RideRequest]) -> Vec<PassengerSnapshot> {
    // One stop per request; peers share the requesting student's stop.
    rides.iter().map(|r| r.student.clone()).collect()
}

fn build_session(
    state: &AppState,
    driver: &Driver,
    direction: Direction,
    rides: &[RideRequest],
    phase: SessionPhase,
) -> DriverSession {
    let passengers = round_passengers(rides);

    let waypoints = match direction {
        Direction::Outbound => routing::build_waypoints(
            &driver.address,
            driver.location,
            &passengers,
            &state.venue.name,
            state.venue.location,
            Direction::Outbound,
        ),
        Direction::Return => routing::build_waypoints(
            &state.venue.name,
            state.venue.location,
            &passengers,
            &state.venue.name,
            state.venue.location,
            Direction::Return,
        ),
    };

    let navigation_url = routing::navigation_url(&waypoints);

    DriverSession {
        driver_id: driver.id,
        phase,
        direction,
        ride_ids: rides.iter().map(|r| r.id).collect(),
        waypoints,
        navigation_url,
    }
}

/// `dashboard -> preview`. Binds the chosen vehicle, gathers the
/// driver's assigned passengers and proposes a waypoint ordering. No
/// ride status changes yet.
pub fn assign_me(
    state: &AppState,
    driver_id: Uuid,
    vehicle_id: Uuid,
) -> Result<DriverSession, AppError> {
    let phase = current_phase(state, driver_id);
    if phase != SessionPhase::Dashboard {
        return Err(AppError::Conflict(format!(
            "driver already has a round in {phase:?}"
        )));
    }

    let driver = state.store.driver(driver_id)?;
    if driver.status != DriverStatus::Available {
        return Err(AppError::Validation(format!(
            "driver {} is not available",
            driver.name
        )));
    }

    // All validation happens before the bind below persists anything;
    // a rejected assign_me leaves driver and vehicle untouched.
    let (direction, rides) = candidate_round(state, driver_id, &[RideStatus::Assigned]);
    if rides.is_empty() {
        return Err(AppError::Validation(
            "no passengers assigned to this driver yet".to_string(),
        ));
    }

    let driver = bind_vehicle(state, driver_id, vehicle_id)?;

    let session = build_session(state, &driver, direction, &rides, SessionPhase::Preview);
    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}

/// `preview -> active`. Promotes every outbound passenger through the
/// lifecycle start transition and begins waypoint tracking.
pub fn accept(state: &AppState, driver_id: Uuid) -> Result<DriverSession, AppError> {
    let mut session = state
        .sessions
        .get(&driver_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has no session")))?;

    if session.phase != SessionPhase::Preview {
        return Err(AppError::Conflict(format!(
            "cannot accept a round in {:?}",
            session.phase
        )));
    }

    if session.direction == Direction::Outbound {
        for &ride_id in &session.ride_ids {
            lifecycle::start(&state.store, state.notifier.as_ref(), ride_id)?;
        }
    }

    session.phase = SessionPhase::Active;
    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}

/// `preview -> dashboard`. Discards the candidate round; tentatively
/// held outbound requests go back to the dispatch pool.
pub fn release(state: &AppState, driver_id: Uuid) -> Result<DriverSession, AppError> {
    let session = state
        .sessions
        .get(&driver_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has no session")))?;

    if session.phase != SessionPhase::Preview {
        return Err(AppError::Conflict(format!(
            "cannot release a round in {:?}",
            session.phase
        )));
    }

    if session.direction == Direction::Outbound {
        for &ride_id in &session.ride_ids {
            if let Err(err) = lifecycle::unassign(&state.store, ride_id) {
                tracing::warn!(ride_id = %ride_id, error = %err, "failed to return ride to pool");
            }
        }
    }

    let dashboard = DriverSession::dashboard(driver_id);
    state.sessions.insert(driver_id, dashboard.clone());
    Ok(dashboard)
}

/// Driver confirmation of one stop. Client-held until the round is
/// saved; nothing is persisted here.
pub fn toggle_waypoint(
    state: &AppState,
    driver_id: Uuid,
    index: usize,
) -> Result<DriverSession, AppError> {
    let mut session = state
        .sessions
        .get(&driver_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has no session")))?;

    if session.phase != SessionPhase::Active {
        return Err(AppError::Conflict(format!(
            "cannot toggle waypoints in {:?}",
            session.phase
        )));
    }

    let waypoint = session
        .waypoints
        .get_mut(index)
        .ok_or_else(|| AppError::Validation(format!("no waypoint at index {index}")))?;
    waypoint.visited = !waypoint.visited;

    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}

/// `active -> completed`. Soft-blocks when stops remain unvisited
/// unless `force` is set, then completes every passenger and credits
/// the driver's daily counters. The vehicle stays bound.
pub fn complete(state: &AppState, driver_id: Uuid, force: bool) -> Result<DriverSession, AppError> {
    let mut session = state
        .sessions
        .get(&driver_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has no session")))?;

    if session.phase != SessionPhase::Active {
        return Err(AppError::Conflict(format!(
            "cannot complete a round in {:?}",
            session.phase
        )));
    }

    let unvisited = session.unvisited_stops();
    if unvisited > 0 && !force {
        return Err(AppError::Validation(format!(
            "{unvisited} stops not yet confirmed; pass force=true to complete anyway"
        )));
    }

    // The coordinator may have cancelled a passenger mid-route; such
    // rides are dropped from the round rather than wedging it, and
    // only passengers actually delivered are credited.
    let mut students = 0u32;
    for &ride_id in &session.ride_ids {
        let ride = match state.store.ride(ride_id) {
            Ok(ride) => ride,
            Err(err) => {
                tracing::warn!(ride_id = %ride_id, error = %err, "ride missing at completion; skipping");
                continue;
            }
        };

        let delivered = if session.direction == Direction::Outbound {
            if ride.status.is_terminal() {
                continue;
            }
            complete_outbound_ride(state, ride_id, ride.status)
        } else {
            if !ride.ready_to_leave || ride.return_driver.is_none() {
                continue;
            }
            lifecycle::finish_return(&state.store, ride_id).map(|_| ())
        };

        match delivered {
            Ok(()) => students += ride.seats(),
            Err(err) => {
                tracing::warn!(ride_id = %ride_id, error = %err, "could not complete passenger; skipping");
            }
        }
    }

    let distance_km = routing::route_distance_km(&session.waypoints);
    state.store.update_driver(driver_id, |driver| {
        if students > 0 {
            driver.rides_completed_today += 1;
            driver.students_today += students;
            driver.distance_km_today += distance_km;
        }
        driver.updated_at = chrono::Utc::now();
        Ok(())
    })?;

    session.phase = SessionPhase::Completed;
    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}

/// Walks one outbound passenger forward to completed. A passenger
/// added mid-route may still be a step or two behind.
fn complete_outbound_ride(
    state: &AppState,
    ride_id: Uuid,
    status: RideStatus,
) -> Result<(), AppError> {
    let mut status = status;
    if status == RideStatus::Assigned {
        status = lifecycle::start(&state.store, state.notifier.as_ref(), ride_id)?.status;
    }
    if status == RideStatus::DriverEnRoute {
        lifecycle::arrive(&state.store, ride_id)?;
    }
    lifecycle::complete(&state.store, state.notifier.as_ref(), ride_id)?;
    Ok(())
}

/// `completed -> preview`. Immediately offers the next round (new
/// outbound pickups, or a pending return round) with the vehicle
/// still bound.
pub fn assign_next(state: &AppState, driver_id: Uuid) -> Result<DriverSession, AppError> {
    if current_phase(state, driver_id) != SessionPhase::Completed {
        return Err(AppError::Conflict(
            "no completed round to continue from".to_string(),
        ));
    }

    let driver = state.store.driver(driver_id)?;
    let (direction, rides) = candidate_round(state, driver_id, &[RideStatus::Assigned]);
    if rides.is_empty() {
        return Err(AppError::Validation(
            "no further passengers waiting for this driver".to_string(),
        ));
    }

    let session = build_session(state, &driver, direction, &rides, SessionPhase::Preview);
    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}

/// `completed -> dashboard`. Releases the vehicle and takes the driver
/// offline for the day.
pub fn done_for_today(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let phase = current_phase(state, driver_id);
    if !matches!(phase, SessionPhase::Completed | SessionPhase::Dashboard) {
        return Err(AppError::Conflict(format!(
            "cannot sign off during {phase:?}"
        )));
    }

    state.sessions.insert(driver_id, DriverSession::dashboard(driver_id));
    release_vehicle(state, driver_id)?;

    state.store.update_driver(driver_id, |driver| {
        driver.status = DriverStatus::Offline;
        driver.updated_at = chrono::Utc::now();
        Ok(())
    })
}

/// Merges coordinator edits to the passenger list into an active
/// round. Visited flags carry over by student; stops for removed
/// passengers disappear, new passengers appear unvisited.
pub fn reconcile_passengers(state: &AppState, driver_id: Uuid) -> Result<DriverSession, AppError> {
    let session = state
        .sessions
        .get(&driver_id)
        .map(|s| s.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has no session")))?;

    if session.phase != SessionPhase::Active {
        return Err(AppError::Conflict(format!(
            "cannot reconcile a round in {:?}",
            session.phase
        )));
    }

    let driver = state.store.driver(driver_id)?;
    let (direction, rides) = candidate_round(
        state,
        driver_id,
        &[
            RideStatus::Assigned,
            RideStatus::DriverEnRoute,
            RideStatus::Arriving,
        ],
    );

    let mut rebuilt = build_session(state, &driver, direction, &rides, SessionPhase::Active);
    for waypoint in &mut rebuilt.waypoints {
        let carried = session.waypoints.iter().any(|old| {
            old.visited
                && old.kind == waypoint.kind
                && old.student_id == waypoint.student_id
        });
        if carried {
            waypoint.visited = true;
        }
    }

    state.sessions.insert(driver_id, rebuilt.clone());
    Ok(rebuilt)
}

/// Rebuilds session state strictly from the store after a crash or
/// reload: underway rides mean an active round, anything else lands
/// on the dashboard. Client-only memory (visited flags, previews) is
/// deliberately not restored.
pub fn rehydrate(state: &AppState, driver_id: Uuid) -> Result<DriverSession, AppError> {
    let driver = state.store.driver(driver_id)?;

    let underway = state.store.rides_for_driver(
        driver_id,
        &[RideStatus::DriverEnRoute, RideStatus::Arriving],
    );

    let session = if underway.is_empty() {
        DriverSession::dashboard(driver_id)
    } else {
        build_session(
            state,
            &driver,
            Direction::Outbound,
            &underway,
            SessionPhase::Active,
        )
    };

    state.sessions.insert(driver_id, session.clone());
    Ok(session)
}
