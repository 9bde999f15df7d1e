//! Pure waypoint ordering and navigation URL rendering. No I/O, no
//! distance estimation; road routing belongs to the external provider.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo;
use crate::models::ride::PassengerSnapshot;
use crate::models::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Start,
    Pickup,
    Dropoff,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub location: GeoPoint,
    pub name: String,
    pub kind: WaypointKind,
    pub student_id: Option<Uuid>,
    /// Flipped only by explicit driver confirmation, never inferred
    /// from location.
    pub visited: bool,
}

impl Waypoint {
    fn stop(location: GeoPoint, name: &str, kind: WaypointKind, student_id: Option<Uuid>) -> Self {
        Self {
            location,
            name: name.to_string(),
            kind,
            student_id,
            visited: false,
        }
    }
}

/// Orders the stops for one round.
///
/// Outbound: `[start = origin, pickup x N in assignment order,
/// end = destination]`. Return: `[start = origin (the venue),
/// dropoff x N-1, end = last passenger's home]` with the last
/// passenger doubling as both a stop and the route terminus; the
/// destination argument is only used when the passenger list is empty.
pub fn build_waypoints(
    origin_name: &str,
    origin: GeoPoint,
    passengers: &[PassengerSnapshot],
    destination_name: &str,
    destination: GeoPoint,
    direction: Direction,
) -> Vec<Waypoint> {
    let mut waypoints = vec![Waypoint::stop(origin, origin_name, WaypointKind::Start, None)];

    match direction {
        Direction::Outbound => {
            for p in passengers {
                waypoints.push(Waypoint::stop(
                    p.location,
                    &p.address,
                    WaypointKind::Pickup,
                    Some(p.student_id),
                ));
            }
            waypoints.push(Waypoint::stop(
                destination,
                destination_name,
                WaypointKind::End,
                None,
            ));
        }
        Direction::Return => match passengers.split_last() {
            Some((last, rest)) => {
                for p in rest {
                    waypoints.push(Waypoint::stop(
                        p.location,
                        &p.address,
                        WaypointKind::Dropoff,
                        Some(p.student_id),
                    ));
                }
                waypoints.push(Waypoint::stop(
                    last.location,
                    &last.address,
                    WaypointKind::End,
                    Some(last.student_id),
                ));
            }
            None => {
                waypoints.push(Waypoint::stop(
                    destination,
                    destination_name,
                    WaypointKind::End,
                    None,
                ));
            }
        },
    }

    waypoints
}

/// Renders a turn-by-turn URL for the external navigation provider
/// from the same ordered list. Fire-and-forget; no response is ever
/// consumed.
pub fn navigation_url(waypoints: &[Waypoint]) -> String {
    fn coord(p: &GeoPoint) -> String {
        format!("{:.6},{:.6}", p.lat, p.lng)
    }

    let origin = waypoints.first().map(|w| coord(&w.location)).unwrap_or_default();
    let destination = waypoints.last().map(|w| coord(&w.location)).unwrap_or_default();

    let middle: Vec<String> = waypoints
        .iter()
        .skip(1)
        .take(waypoints.len().saturating_sub(2))
        .map(|w| coord(&w.location))
        .collect();

    let mut url = format!(
        "https://www.google.com/maps/dir/?api=1&travelmode=driving&origin={}&destination={}",
        urlencoding::encode(&origin),
        urlencoding::encode(&destination),
    );

    if !middle.is_empty() {
        url.push_str("&waypoints=");
        url.push_str(&urlencoding::encode(&middle.join("|")));
    }

    url
}

/// Straight-line length of the round, credited to the driver's daily
/// distance counter on completion.
pub fn route_distance_km(waypoints: &[Waypoint]) -> f64 {
    let points: Vec<GeoPoint> = waypoints.iter().map(|w| w.location).collect();
    geo::path_km(&points)
}
