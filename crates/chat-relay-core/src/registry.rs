use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::OutboundEvent;

/// Stable identifier for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue feeding a connection's writer task.
pub type OutboundSender = mpsc::Sender<OutboundEvent>;

/// Live transport connections and their outbound queues. Knows nothing about names.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, OutboundSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live connections after insertion.
    pub fn register(&mut self, id: ConnectionId, sender: OutboundSender) -> usize {
        self.connections.insert(id, sender);
        self.connections.len()
    }

    /// Returns `true` if the connection was registered.
    pub fn deregister(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &OutboundSender)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn register_and_deregister() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert_eq!(registry.register(a, tx.clone()), 1);
        assert_eq!(registry.register(b, tx), 2);
        assert!(registry.contains(&a));

        assert!(registry.deregister(&a));
        assert!(!registry.deregister(&a));
        assert!(!registry.contains(&a));
        assert_eq!(registry.len(), 1);
    }

    #[test_timeout::timeout]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
