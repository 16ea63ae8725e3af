//! Event Emitter
//!
//! Builds status events and hands them to the message bus. Delivery failures
//! are logged and never reach the reactor.

use crate::domain::ports::{BusMessage, MessageBusRef};
use crate::hardware::identity::DriveIdentity;
use crate::hardware::selftest::StatusReason;
use crate::watchdog::events::StatusEvent;
use tracing::{debug, warn};

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    pub service_events: u64,
    pub disk_events: u64,
    pub delivery_failures: u64,
}

/// Fire-and-forget publisher of status events
pub struct EventEmitter {
    bus: MessageBusRef,
    stats: EmitterStats,
}

impl EventEmitter {
    pub fn new(bus: MessageBusRef) -> Self {
        Self {
            bus,
            stats: EmitterStats::default(),
        }
    }

    /// Publish a service status message
    pub fn emit_service(&mut self, service_name: &str, previous_state: &str) {
        self.emit(&StatusEvent::service(service_name, previous_state));
    }

    /// Publish a disk status message
    pub fn emit_disk(&mut self, identity: DriveIdentity, status: StatusReason) {
        self.emit(&StatusEvent::disk(identity, status));
    }

    /// Publish any status event
    pub fn emit(&mut self, event: &StatusEvent) {
        match event {
            StatusEvent::Service { .. } => self.stats.service_events += 1,
            StatusEvent::Disk { .. } => self.stats.disk_events += 1,
        }

        debug!("Emitting {}", event);
        let message = BusMessage {
            handler: event.handler().to_string(),
            payload: event.to_payload(),
        };

        if let Err(e) = self.bus.deliver(message) {
            self.stats.delivery_failures += 1;
            warn!("Dropped status event ({}): {}", event, e);
        }
    }

    pub fn emit_all<'a>(&mut self, events: impl IntoIterator<Item = &'a StatusEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn stats(&self) -> EmitterStats {
        self.stats
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
