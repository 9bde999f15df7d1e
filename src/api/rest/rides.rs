use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle;
use crate::models::ride::{PassengerSnapshot, RideRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride).get(list_rides))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/assign", post(assign_ride))
        .route("/rides/:id/unassign", post(unassign_ride))
        .route("/rides/:id/arrive", post(arrive_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/ready", post(mark_ready))
        .route("/rides/bulk-assign", post(bulk_assign))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub student: PassengerSnapshot,
    pub slot: String,
    #[serde(default)]
    pub peers: Vec<PassengerSnapshot>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct BulkAssignRequest {
    pub ride_ids: Vec<Uuid>,
    pub driver_id: Uuid,
}

#[derive(Serialize)]
pub struct BulkAssignResponse {
    pub assigned: Vec<Uuid>,
    pub failed: Vec<BulkAssignFailure>,
}

#[derive(Serialize)]
pub struct BulkAssignFailure {
    pub ride_id: Uuid,
    pub error: String,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<RideRequest>, AppError> {
    if payload.student.name.trim().is_empty() {
        return Err(AppError::Validation("student name cannot be empty".to_string()));
    }
    if payload.slot.trim().is_empty() {
        return Err(AppError::Validation("time slot cannot be empty".to_string()));
    }

    let ride = lifecycle::create_request(&state.store, payload.student, payload.slot, payload.peers);
    Ok(Json(ride))
}

async fn list_rides(State(state): State<Arc<AppState>>) -> Json<Vec<RideRequest>> {
    let mut rides = state.store.rides();
    rides.sort_by_key(|r| (r.created_at, r.id));
    Json(rides)
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(state.store.ride(id)?))
}

/// Coordinator manual override. Runs the same availability and
/// capacity guards as the dispatch loop.
async fn assign_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<RideRequest>, AppError> {
    let ride = lifecycle::assign(&state.store, state.notifier.as_ref(), id, payload.driver_id)?;
    state
        .metrics
        .assignments_total
        .with_label_values(&["manual"])
        .inc();
    Ok(Json(ride))
}

async fn unassign_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::unassign(&state.store, id)?))
}

async fn arrive_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::arrive(&state.store, id)?))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::cancel(&state.store, id)?))
}

async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::mark_ready_to_leave(&state.store, id)?))
}

async fn bulk_assign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BulkAssignRequest>,
) -> Result<Json<BulkAssignResponse>, AppError> {
    let results = lifecycle::assign_bulk(
        &state.store,
        state.notifier.as_ref(),
        &payload.ride_ids,
        payload.driver_id,
    );

    let mut response = BulkAssignResponse {
        assigned: Vec::new(),
        failed: Vec::new(),
    };

    for (ride_id, result) in results {
        match result {
            Ok(_ride) => {
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["manual"])
                    .inc();
                response.assigned.push(ride_id);
            }
            Err(err) => response.failed.push(BulkAssignFailure {
                ride_id,
                error: err.to_string(),
            }),
        }
    }

    Ok(Json(response))
}
