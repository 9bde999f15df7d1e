use uuid::Uuid;

use crate::models::ride::DriverSnapshot;

/// Fixed vocabulary of push events emitted by the core. Delivery is
/// fire-and-forget; a failed send never propagates into a transition.
#[derive(Debug, Clone)]
pub enum Notification {
    DriverAssigned {
        ride_id: Uuid,
        student_id: Uuid,
        driver: DriverSnapshot,
    },
    RideStarted {
        ride_id: Uuid,
        student_id: Uuid,
    },
    RideCompleted {
        ride_id: Uuid,
        student_id: Uuid,
    },
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification);
}

/// Default notifier: structured log lines instead of a push provider.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: Notification) {
        match notification {
            Notification::DriverAssigned {
                ride_id,
                student_id,
                driver,
            } => {
                tracing::info!(
                    ride_id = %ride_id,
                    student_id = %student_id,
                    driver = %driver.name,
                    "notify: driver assigned"
                );
            }
            Notification::RideStarted { ride_id, student_id } => {
                tracing::info!(ride_id = %ride_id, student_id = %student_id, "notify: ride started");
            }
            Notification::RideCompleted { ride_id, student_id } => {
                tracing::info!(ride_id = %ride_id, student_id = %student_id, "notify: ride completed");
            }
        }
    }
}
