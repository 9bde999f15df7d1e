use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::GeoPoint;
use crate::notify::{LogNotifier, Notifier};
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::workflow::DriverSession;

/// The event everyone is being driven to.
#[derive(Debug, Clone)]
pub struct Venue {
    pub name: String,
    pub location: GeoPoint,
}

pub struct AppState {
    pub store: Store,
    /// One working session per driver, keyed by driver id. Session
    /// state is client-held by contract; this map is the server's copy
    /// of it for the driver currently connected.
    pub sessions: DashMap<Uuid, DriverSession>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Metrics,
    pub venue: Venue,
}

impl AppState {
    pub fn new(event_buffer_size: usize, venue: Venue) -> Self {
        Self {
            store: Store::new(event_buffer_size),
            sessions: DashMap::new(),
            notifier: Arc::new(LogNotifier),
            metrics: Metrics::new(),
            venue,
        }
    }
}
