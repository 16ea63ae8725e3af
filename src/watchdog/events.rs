//! Status Events
//!
//! Normalized events handed to the internal message bus, and their wire
//! shapes.

use crate::domain::ports::{DISK_MSG_HANDLER, SERVICE_MSG_HANDLER};
use crate::hardware::identity::DriveIdentity;
use crate::hardware::selftest::StatusReason;
use serde::Serialize;
use serde_json::json;

/// Previous state reported for the first notification of a service
pub const PREVIOUS_STATE_NONE: &str = "N/A";

/// Kind of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Service,
    Disk,
}

/// A normalized status event, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A monitored service changed state (or is being announced)
    Service {
        service_name: String,
        previous_state: String,
    },

    /// A drive's presence or self-test result
    Disk {
        path_id: String,
        status: StatusReason,
        serial_number: String,
    },
}

impl StatusEvent {
    pub fn service(service_name: impl Into<String>, previous_state: impl Into<String>) -> Self {
        StatusEvent::Service {
            service_name: service_name.into(),
            previous_state: previous_state.into(),
        }
    }

    pub fn disk(identity: DriveIdentity, status: StatusReason) -> Self {
        StatusEvent::Disk {
            path_id: identity.stable_id,
            status,
            serial_number: identity.serial_number,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            StatusEvent::Service { .. } => EventKind::Service,
            StatusEvent::Disk { .. } => EventKind::Disk,
        }
    }

    /// Downstream handler this event is addressed to
    pub fn handler(&self) -> &'static str {
        match self {
            StatusEvent::Service { .. } => SERVICE_MSG_HANDLER,
            StatusEvent::Disk { .. } => DISK_MSG_HANDLER,
        }
    }

    /// Build the message body delivered to the handler
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            StatusEvent::Service {
                service_name,
                previous_state,
            } => json!({
                "actuator_request_type": {
                    "service_watchdog_controller": {
                        "service_name": service_name,
                        "service_request": "status",
                        "previous_state": previous_state,
                    }
                }
            }),
            StatusEvent::Disk {
                path_id,
                status,
                serial_number,
            } => json!({
                "sensor_response_type": "disk_status_drivemanager",
                "status": status,
                "serial_number": serial_number,
                "path_id": path_id,
            }),
        }
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusEvent::Service {
                service_name,
                previous_state,
            } => write!(f, "service {} (was {})", service_name, previous_state),
            StatusEvent::Disk {
                path_id,
                status,
                serial_number,
            } => write!(f, "disk {} [{}]: {}", path_id, serial_number, status),
        }
    }
}
