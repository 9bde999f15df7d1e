use std::collections::HashMap;

use uuid::Uuid;

use crate::engine::zones::{classify, Zone};
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::ride::RideStatus;
use crate::store::Store;

/// Per-pass bookkeeping of driver load and tracked zone. Rebuilt from
/// the store at the start of every dispatch pass and threaded through
/// the matcher explicitly, so stale counters cannot survive a pass.
#[derive(Debug, Default)]
pub struct PassState {
    load: HashMap<Uuid, u32>,
    zone: HashMap<Uuid, Zone>,
}

impl PassState {
    /// Derives starting load and zone per driver from in-flight
    /// outbound assignments.
    pub fn derive(store: &Store, pool: &[Driver]) -> Self {
        let mut state = PassState::default();

        for driver in pool {
            let load = store.outbound_load(driver.id);
            if load > 0 {
                state.load.insert(driver.id, load);
            }

            // The zone a driver is "working" is implied by their most
            // recent in-flight pickup, not stored on the driver.
            let rides = store.rides_for_driver(
                driver.id,
                &[
                    RideStatus::Assigned,
                    RideStatus::DriverEnRoute,
                    RideStatus::Arriving,
                ],
            );
            if let Some(last) = rides.last() {
                state.zone.insert(driver.id, classify(&last.student.address));
            }
        }

        state
    }

    pub fn load(&self, driver_id: Uuid) -> u32 {
        self.load.get(&driver_id).copied().unwrap_or(0)
    }

    pub fn zone(&self, driver_id: Uuid) -> Option<Zone> {
        self.zone.get(&driver_id).copied()
    }

    /// Records a match locally before the persisted write is issued,
    /// so the same pass cannot hand the seats out twice.
    pub fn record(&mut self, driver_id: Uuid, zone: Zone, seats: u32) {
        *self.load.entry(driver_id).or_insert(0) += seats;
        self.zone.insert(driver_id, zone);
    }
}

pub fn fits(driver: &Driver, load: u32, seats: u32) -> bool {
    load + seats <= driver.capacity
}

/// Capacity guard shared by the dispatch path and the coordinator's
/// manual/bulk override, reading the driver's load fresh from the
/// store at commit time.
pub fn check_outbound_capacity(
    store: &Store,
    driver: &Driver,
    seats: u32,
) -> Result<(), AppError> {
    let load = store.outbound_load(driver.id);
    if !fits(driver, load, seats) {
        return Err(AppError::CapacityExceeded(format!(
            "driver {} has {load}/{} seats taken, cannot take {seats} more",
            driver.name, driver.capacity
        )));
    }
    Ok(())
}

/// Tiered driver selection, first hit wins:
/// 1. a driver already working the request's zone with room left,
/// 2. an idle driver (spread load to a fresh zone before over-filling
///    a partially loaded one),
/// 3. any driver with room left,
/// 4. none.
///
/// A hit updates `pass` synchronously; the caller persists afterwards.
pub fn select_driver(
    zone: Zone,
    seats: u32,
    pool: &[Driver],
    pass: &mut PassState,
) -> Option<Uuid> {
    let by_zone = pool
        .iter()
        .find(|d| pass.zone(d.id) == Some(zone) && fits(d, pass.load(d.id), seats));

    let chosen = by_zone
        .or_else(|| {
            pool.iter()
                .find(|d| pass.load(d.id) == 0 && fits(d, 0, seats))
        })
        .or_else(|| pool.iter().find(|d| fits(d, pass.load(d.id), seats)))?;

    let driver_id = chosen.id;
    pass.record(driver_id, zone, seats);
    Some(driver_id)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{fits, select_driver, PassState};
    use crate::engine::zones::Zone;
    use crate::models::driver::{Driver, DriverStatus};
    use crate::models::GeoPoint;

    fn driver(id_seed: u128, capacity: u32) -> Driver {
        Driver {
            id: Uuid::from_u128(id_seed),
            name: format!("driver-{id_seed}"),
            phone: "555-0100".to_string(),
            address: "1 Main St".to_string(),
            location: GeoPoint {
                lat: 42.35,
                lng: -71.08,
            },
            avatar_url: None,
            status: DriverStatus::Available,
            current_vehicle_id: Some(Uuid::from_u128(id_seed + 1000)),
            capacity,
            rides_completed_today: 0,
            students_today: 0,
            distance_km_today: 0.0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prefers_driver_already_in_zone() {
        let a = driver(1, 4);
        let b = driver(2, 4);
        let pool = vec![a.clone(), b.clone()];

        let mut pass = PassState::default();
        pass.record(b.id, Zone::BackBay, 1);

        let chosen = select_driver(Zone::BackBay, 1, &pool, &mut pass);
        assert_eq!(chosen, Some(b.id));
        assert_eq!(pass.load(b.id), 2);
    }

    #[test]
    fn falls_back_to_idle_driver_when_zone_driver_is_full() {
        let full = driver(1, 4);
        let idle = driver(2, 4);
        let pool = vec![full.clone(), idle.clone()];

        let mut pass = PassState::default();
        pass.record(full.id, Zone::BackBay, 4);

        let chosen = select_driver(Zone::BackBay, 1, &pool, &mut pass);
        assert_eq!(chosen, Some(idle.id));
    }

    #[test]
    fn prefers_idle_driver_over_partially_loaded_one_in_another_zone() {
        let partial = driver(1, 4);
        let idle = driver(2, 4);
        let pool = vec![partial.clone(), idle.clone()];

        let mut pass = PassState::default();
        pass.record(partial.id, Zone::NorthEnd, 2);

        let chosen = select_driver(Zone::BackBay, 1, &pool, &mut pass);
        assert_eq!(chosen, Some(idle.id));
    }

    #[test]
    fn last_resort_is_any_driver_with_room() {
        let partial = driver(1, 4);
        let pool = vec![partial.clone()];

        let mut pass = PassState::default();
        pass.record(partial.id, Zone::NorthEnd, 2);

        let chosen = select_driver(Zone::BackBay, 1, &pool, &mut pass);
        assert_eq!(chosen, Some(partial.id));
        assert_eq!(pass.load(partial.id), 3);
    }

    #[test]
    fn driver_at_capacity_is_never_selected() {
        let a = driver(1, 4);
        let pool = vec![a.clone()];

        let mut pass = PassState::default();
        pass.record(a.id, Zone::BackBay, 3);

        // Fourth back_bay seat fits; fifth does not.
        assert_eq!(select_driver(Zone::BackBay, 1, &pool, &mut pass), Some(a.id));
        assert_eq!(pass.load(a.id), 4);
        assert_eq!(select_driver(Zone::BackBay, 1, &pool, &mut pass), None);
    }

    #[test]
    fn group_larger_than_remaining_seats_does_not_fit() {
        let a = driver(1, 4);
        assert!(fits(&a, 2, 2));
        assert!(!fits(&a, 2, 3));
    }

    #[test]
    fn empty_pool_matches_nothing() {
        let mut pass = PassState::default();
        assert_eq!(select_driver(Zone::Other, 1, &[], &mut pass), None);
    }
}
