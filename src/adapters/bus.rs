//! Message Bus Adapters
//!
//! - [`ChannelBus`]: bounded in-process queue drained by a consumer task
//! - [`LogBus`]: writes every message to the log (dry-run mode)

use crate::domain::ports::{BusMessage, MessageBus};
use crate::error::{Error, Result};
use tokio::sync::mpsc;
use tracing::info;

/// Bus backed by a bounded tokio channel
///
/// Delivery never waits: a full or closed queue is reported as an error.
#[derive(Debug, Clone)]
pub struct ChannelBus {
    sender: mpsc::Sender<BusMessage>,
}

impl ChannelBus {
    /// Create a bus and the receiving end of its queue
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl MessageBus for ChannelBus {
    fn deliver(&self, message: BusMessage) -> Result<()> {
        self.sender.try_send(message).map_err(|e| {
            let reason = match &e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            let message = e.into_inner();
            Error::BusDelivery {
                handler: message.handler,
                reason: reason.to_string(),
            }
        })
    }
}

/// Bus that only logs what it is given
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBus;

impl MessageBus for LogBus {
    fn deliver(&self, message: BusMessage) -> Result<()> {
        info!(handler = %message.handler, payload = %message.payload, "Bus message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn message(handler: &str) -> BusMessage {
        BusMessage {
            handler: handler.to_string(),
            payload: json!({"k": "v"}),
        }
    }

    #[test]
    fn test_channel_bus_delivers_in_order() {
        let (bus, mut rx) = ChannelBus::new(4);
        assert_ok!(bus.deliver(message("A")));
        assert_ok!(bus.deliver(message("B")));

        assert_eq!(rx.try_recv().unwrap().handler, "A");
        assert_eq!(rx.try_recv().unwrap().handler, "B");
    }

    #[test]
    fn test_full_queue_is_reported() {
        let (bus, _rx) = ChannelBus::new(1);
        bus.deliver(message("A")).unwrap();
        assert_matches!(
            bus.deliver(message("B")),
            Err(Error::BusDelivery { handler, .. }) if handler == "B"
        );
    }

    #[test]
    fn test_closed_queue_is_reported() {
        let (bus, rx) = ChannelBus::new(1);
        drop(rx);
        assert_matches!(bus.deliver(message("A")), Err(Error::BusDelivery { .. }));
    }
}
