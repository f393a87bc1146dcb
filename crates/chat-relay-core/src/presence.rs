use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::PresenceEntry;
use crate::registry::ConnectionId;

/// Name reported for connections that never announced one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Identity and liveness bookkeeping for one named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub online: bool,
    pub last_liveness_at: Instant,
}

/// Connection → identity bindings, plus the name-keyed aggregate built from them.
///
/// Several connections may bind the same name (one user, two tabs). The
/// aggregated view collapses them into one row that is online when any of the
/// bindings is.
#[derive(Debug, Default)]
pub struct PresenceTable {
    bindings: HashMap<ConnectionId, IdentityBinding>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the binding for `id`.
    pub fn bind(&mut self, id: ConnectionId, name: impl Into<String>, now: Instant) {
        self.bindings.insert(
            id,
            IdentityBinding {
                connection_id: id,
                display_name: name.into(),
                online: true,
                last_liveness_at: now,
            },
        );
    }

    /// Refresh liveness. Returns `false` when the connection has no binding.
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) -> bool {
        match self.bindings.get_mut(id) {
            Some(binding) => {
                binding.online = true;
                binding.last_liveness_at = now;
                true
            }
            None => false,
        }
    }

    /// Flag the binding offline and return its name, or [`UNKNOWN_SENDER`].
    pub fn mark_offline(&mut self, id: &ConnectionId) -> String {
        match self.bindings.get_mut(id) {
            Some(binding) => {
                binding.online = false;
                binding.display_name.clone()
            }
            None => UNKNOWN_SENDER.to_string(),
        }
    }

    pub fn forget(&mut self, id: &ConnectionId) -> Option<IdentityBinding> {
        self.bindings.remove(id)
    }

    /// Take every online binding silent for longer than `timeout` offline.
    ///
    /// Returns the affected names, one per binding, sorted.
    pub fn sweep_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut timed_out = Vec::new();
        for binding in self.bindings.values_mut() {
            if binding.online && now.saturating_duration_since(binding.last_liveness_at) > timeout
            {
                binding.online = false;
                timed_out.push(binding.display_name.clone());
            }
        }
        timed_out.sort();
        timed_out
    }

    /// Bring back offline bindings whose last liveness is within `timeout`.
    pub fn sweep_recoveries(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut recovered = Vec::new();
        for binding in self.bindings.values_mut() {
            if !binding.online && now.saturating_duration_since(binding.last_liveness_at) <= timeout
            {
                binding.online = true;
                recovered.push(binding.display_name.clone());
            }
        }
        recovered.sort();
        recovered
    }

    /// One row per distinct name, sorted by name, `online` OR-ed across bindings.
    pub fn aggregated_view(&self) -> Vec<PresenceEntry> {
        let mut by_name: BTreeMap<&str, bool> = BTreeMap::new();
        for binding in self.bindings.values() {
            let online = by_name
                .entry(binding.display_name.as_str())
                .or_insert(false);
            *online |= binding.online;
        }
        by_name
            .into_iter()
            .map(|(name, online)| PresenceEntry {
                name: name.to_string(),
                online,
            })
            .collect()
    }

    pub fn display_name(&self, id: &ConnectionId) -> &str {
        self.bindings
            .get(id)
            .map(|binding| binding.display_name.as_str())
            .unwrap_or(UNKNOWN_SENDER)
    }

    pub fn binding(&self, id: &ConnectionId) -> Option<&IdentityBinding> {
        self.bindings.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.bindings.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
