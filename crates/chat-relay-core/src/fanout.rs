use metrics::counter;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::protocol::OutboundEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Outcome of one fanout pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Outbound queue was full; the event was dropped for that peer.
    pub dropped: usize,
    /// Peer's writer is gone.
    pub closed: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Enqueue `event` on every connection matching `predicate`.
///
/// Never blocks. A failed enqueue is logged and counted but does not stop the
/// pass and does not touch presence; closing a connection is the transport's job.
pub fn deliver<F>(registry: &ConnectionRegistry, predicate: F, event: &OutboundEvent) -> DeliveryReport
where
    F: Fn(&ConnectionId) -> bool,
{
    let mut report = DeliveryReport::default();
    for (id, sender) in registry.iter() {
        if !predicate(id) {
            continue;
        }
        match sender.try_send(event.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                counter!("chat_relay_delivery_failures_total", 1, "reason" => "queue_full");
                warn!(
                    connection_id = %id,
                    kind = event.kind(),
                    "outbound queue full; dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                report.closed += 1;
                counter!("chat_relay_delivery_failures_total", 1, "reason" => "peer_gone");
                warn!(
                    connection_id = %id,
                    kind = event.kind(),
                    "peer writer closed; dropping event"
                );
            }
        }
    }
    if report.delivered > 0 {
        counter!(
            "chat_relay_events_delivered_total",
            report.delivered as u64,
            "kind" => event.kind()
        );
    }
    report
}

pub fn send(registry: &ConnectionRegistry, event: &OutboundEvent) -> DeliveryReport {
    deliver(registry, |_| true, event)
}

pub fn send_except(
    registry: &ConnectionRegistry,
    exclude: &ConnectionId,
    event: &OutboundEvent,
) -> DeliveryReport {
    deliver(registry, |id| id != exclude, event)
}

pub fn send_to(
    registry: &ConnectionRegistry,
    target: &ConnectionId,
    event: &OutboundEvent,
) -> DeliveryReport {
    deliver(registry, |id| id == target, event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test_timeout::timeout]
    fn send_except_skips_the_excluded_connection() {
        let mut registry = ConnectionRegistry::new();
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.register(a, a_tx);
        registry.register(b, b_tx);

        let event = OutboundEvent::chat("Alice", "hi");
        let report = send_except(&registry, &a, &event);

        assert_eq!(report.delivered, 1);
        assert_eq!(b_rx.try_recv().unwrap(), event);
        assert!(a_rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn failed_peers_do_not_block_the_rest() {
        let mut registry = ConnectionRegistry::new();
        let (gone_tx, gone_rx) = mpsc::channel(4);
        drop(gone_rx);
        let (full_tx, mut full_rx) = mpsc::channel(1);
        full_tx
            .try_send(OutboundEvent::system("backlog"))
            .unwrap();
        let (ok_tx, mut ok_rx) = mpsc::channel(4);

        registry.register(ConnectionId::new(), gone_tx);
        registry.register(ConnectionId::new(), full_tx);
        registry.register(ConnectionId::new(), ok_tx);

        let event = OutboundEvent::system("Bob disconnected");
        let report = send(&registry, &event);

        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                dropped: 1,
                closed: 1
            }
        );
        assert_eq!(report.attempted(), 3);
        assert_eq!(ok_rx.try_recv().unwrap(), event);
        assert_eq!(full_rx.try_recv().unwrap(), OutboundEvent::system("backlog"));
        assert_eq!(registry.len(), 3);
    }

    #[test_timeout::timeout]
    fn send_to_targets_one_connection() {
        let mut registry = ConnectionRegistry::new();
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        let a = ConnectionId::new();
        registry.register(a, a_tx);
        registry.register(ConnectionId::new(), b_tx);

        let event = OutboundEvent::system("Your name is set to Alice");
        assert_eq!(send_to(&registry, &a, &event).delivered, 1);
        assert_eq!(a_rx.try_recv().unwrap(), event);
        assert!(b_rx.try_recv().is_err());
    }
}
