use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vehicles", post(create_vehicle).get(list_vehicles))
        .route("/vehicles/:id", get(get_vehicle))
}

#[derive(Deserialize)]
pub struct CreateVehicleRequest {
    pub model: String,
    pub color: String,
    pub plate: String,
    pub capacity: u32,
}

async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateVehicleRequest>,
) -> Result<Json<Vehicle>, AppError> {
    if payload.capacity == 0 {
        return Err(AppError::Validation("capacity must be > 0".to_string()));
    }
    if payload.plate.trim().is_empty() {
        return Err(AppError::Validation("plate cannot be empty".to_string()));
    }

    let vehicle = Vehicle {
        id: Uuid::new_v4(),
        model: payload.model,
        color: payload.color,
        plate: payload.plate,
        capacity: payload.capacity,
        status: VehicleStatus::Available,
        current_driver_id: None,
    };

    state.store.insert_vehicle(vehicle.clone());
    Ok(Json(vehicle))
}

async fn list_vehicles(State(state): State<Arc<AppState>>) -> Json<Vec<Vehicle>> {
    let mut vehicles = state.store.vehicles();
    vehicles.sort_by_key(|v| v.id);
    Json(vehicles)
}

async fn get_vehicle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vehicle>, AppError> {
    Ok(Json(state.store.vehicle(id)?))
}
