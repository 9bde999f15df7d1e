use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus};
use crate::models::GeoPoint;
use crate::state::AppState;
use crate::workflow::{self, DriverSession};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/session", post(assign_me).get(rehydrate))
        .route("/drivers/:id/session/accept", post(accept))
        .route("/drivers/:id/session/release", post(release))
        .route("/drivers/:id/session/complete", post(complete))
        .route("/drivers/:id/session/next", post(assign_next))
        .route("/drivers/:id/session/done", post(done_for_today))
        .route("/drivers/:id/session/reconcile", post(reconcile))
        .route(
            "/drivers/:id/session/waypoints/:index/toggle",
            post(toggle_waypoint),
        )
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub location: GeoPoint,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    pub vehicle_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct CompleteRequest {
    #[serde(default)]
    pub force: bool,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        address: payload.address,
        location: payload.location,
        avatar_url: payload.avatar_url,
        status: DriverStatus::Available,
        current_vehicle_id: None,
        capacity: 0,
        rides_completed_today: 0,
        students_today: 0,
        distance_km_today: 0.0,
        updated_at: Utc::now(),
    };

    state.store.insert_driver(driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let mut drivers = state.store.drivers();
    drivers.sort_by_key(|d| d.id);
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.store.driver(id)?))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state.store.update_driver(id, |driver| {
        driver.status = payload.status;
        driver.updated_at = Utc::now();
        Ok(())
    })?;

    Ok(Json(driver))
}

async fn assign_me(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::assign_me(&state, id, payload.vehicle_id)?))
}

async fn rehydrate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::rehydrate(&state, id)?))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::accept(&state, id)?))
}

async fn release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::release(&state, id)?))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CompleteRequest>>,
) -> Result<Json<DriverSession>, AppError> {
    let force = payload.map(|Json(p)| p.force).unwrap_or(false);
    Ok(Json(workflow::complete(&state, id, force)?))
}

async fn assign_next(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::assign_next(&state, id)?))
}

async fn done_for_today(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(workflow::done_for_today(&state, id)?))
}

async fn reconcile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::reconcile_passengers(&state, id)?))
}

async fn toggle_waypoint(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<DriverSession>, AppError> {
    Ok(Json(workflow::toggle_waypoint(&state, id, index)?))
}
