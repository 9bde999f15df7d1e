use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::zones::{classify, Zone};
use crate::models::driver::DriverStatus;
use crate::models::ride::RideStatus;
use crate::state::AppState;
use crate::store::{ChangeEvent, Topic};

/// One frame on the coordinator board feed: a ride moving through its
/// lifecycle (including return-leg attachment) or a driver's live
/// standing. The board re-renders the affected row from the frame
/// alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardEvent {
    RideUpdated {
        ride_id: Uuid,
        status: RideStatus,
        zone: Zone,
        seats: u32,
        driver: Option<String>,
        return_driver: Option<String>,
        ready_to_leave: bool,
    },
    DriverUpdated {
        driver_id: Uuid,
        status: DriverStatus,
        vehicle_bound: bool,
        capacity: u32,
        outbound_load: u32,
    },
}

/// Projects a store change onto a board frame by re-reading the
/// document, so a frame always reflects the latest state rather than
/// the mutation that triggered it. Changes the board does not render
/// (vehicles, documents gone by read time) yield nothing.
fn board_event(state: &AppState, change: ChangeEvent) -> Option<BoardEvent> {
    match change.topic {
        Topic::Rides => {
            let ride = state.store.ride(change.id).ok()?;
            Some(BoardEvent::RideUpdated {
                ride_id: ride.id,
                status: ride.status,
                zone: classify(&ride.student.address),
                seats: ride.seats(),
                driver: ride.driver.map(|d| d.name),
                return_driver: ride.return_driver.map(|d| d.name),
                ready_to_leave: ride.ready_to_leave,
            })
        }
        Topic::Drivers => {
            let driver = state.store.driver(change.id).ok()?;
            Some(BoardEvent::DriverUpdated {
                driver_id: driver.id,
                status: driver.status,
                vehicle_bound: driver.current_vehicle_id.is_some(),
                capacity: driver.capacity,
                outbound_load: state.store.outbound_load(driver.id),
            })
        }
        Topic::Vehicles => None,
    }
}

/// Live coordinator board feed over the store's change stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut changes = state.store.subscribe();

    info!("coordinator board connected");

    loop {
        tokio::select! {
            change = changes.recv() => {
                let change = match change {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        // Frames are snapshots, so the next change for
                        // a document repairs anything skipped here.
                        warn!(skipped, "board feed lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(event) = board_event(&state, change) else {
                    continue;
                };

                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize board frame");
                        continue;
                    }
                };

                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("coordinator board disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{board_event, BoardEvent};
    use crate::engine::zones::Zone;
    use crate::lifecycle;
    use crate::models::driver::{Driver, DriverStatus};
    use crate::models::ride::{PassengerSnapshot, RideStatus};
    use crate::models::GeoPoint;
    use crate::state::{AppState, Venue};
    use crate::store::{ChangeEvent, Topic};

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

    fn seed_driver(state: &AppState, seed: u128) -> Uuid {
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
            current_vehicle_id: Some(Uuid::from_u128(seed + 1000)),
            capacity: 4,
            rides_completed_today: 0,
            students_today: 0,
            distance_km_today: 0.0,
            updated_at: Utc::now(),
        };
        state.store.insert_driver(driver);
        Uuid::from_u128(seed)
    }

    #[test]
    fn ride_change_projects_latest_ride_state() {
        let state = app();
        let driver_id = seed_driver(&state, 1);
        let ride =
            lifecycle::create_request(&state.store, student(10, "221 Newbury St"), "18:00".into(), vec![]);
        lifecycle::assign(&state.store, state.notifier.as_ref(), ride.id, driver_id).unwrap();

        let event = board_event(
            &state,
            ChangeEvent {
                topic: Topic::Rides,
                id: ride.id,
            },
        )
        .unwrap();

        assert_eq!(
            event,
            BoardEvent::RideUpdated {
                ride_id: ride.id,
                status: RideStatus::Assigned,
                zone: Zone::BackBay,
                seats: 1,
                driver: Some("driver-1".to_string()),
                return_driver: None,
                ready_to_leave: false,
            }
        );
    }

    #[test]
    fn driver_change_carries_live_load() {
        let state = app();
        let driver_id = seed_driver(&state, 1);
        let ride = lifecycle::create_request(
            &state.store,
            student(10, "44 Hanover St"),
            "18:00".into(),
            vec![student(11, "44 Hanover St")],
        );
        lifecycle::assign(&state.store, state.notifier.as_ref(), ride.id, driver_id).unwrap();

        let event = board_event(
            &state,
            ChangeEvent {
                topic: Topic::Drivers,
                id: driver_id,
            },
        )
        .unwrap();

        assert_eq!(
            event,
            BoardEvent::DriverUpdated {
                driver_id,
                status: DriverStatus::Available,
                vehicle_bound: true,
                capacity: 4,
                outbound_load: 2,
            }
        );
    }

    #[test]
    fn vehicle_and_stale_changes_project_nothing() {
        let state = app();
        assert_eq!(
            board_event(
                &state,
                ChangeEvent {
                    topic: Topic::Vehicles,
                    id: Uuid::from_u128(1),
                }
            ),
            None
        );
        assert_eq!(
            board_event(
                &state,
                ChangeEvent {
                    topic: Topic::Rides,
                    id: Uuid::from_u128(2),
                }
            ),
            None
        );
    }

    #[test]
    fn board_frames_are_tagged_json() {
        let state = app();
        let ride = lifecycle::create_request(
            &state.store,
            student(10, "12 Tremont St"),
            "18:00".into(),
            vec![],
        );

        let event = board_event(
            &state,
            ChangeEvent {
                topic: Topic::Rides,
                id: ride.id,
            },
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["kind"], "ride_updated");
        assert_eq!(json["status"], "requested");
        assert_eq!(json["zone"], "south_end");
    }
}
