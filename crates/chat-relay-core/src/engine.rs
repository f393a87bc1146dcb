use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::fanout;
use crate::presence::PresenceTable;
use crate::protocol::{InboundEvent, OutboundEvent, PresenceEntry};
use crate::registry::{ConnectionId, ConnectionRegistry, OutboundSender};

const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Silence after which a named connection is reported offline.
    pub liveness_timeout: Duration,
    /// Only rebroadcast presence on a heartbeat when the aggregated view changed.
    pub debounce_presence: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            debounce_presence: false,
        }
    }
}

/// Everything the engine reacts to, in the order the transport and timers produce it.
#[derive(Debug)]
pub enum SessionEvent {
    Opened {
        id: ConnectionId,
        sender: OutboundSender,
    },
    Closed {
        id: ConnectionId,
    },
    Inbound {
        id: ConnectionId,
        event: InboundEvent,
    },
    Sweep,
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

impl SessionEvent {
    fn metric_label(&self) -> &'static str {
        match self {
            SessionEvent::Opened { .. } => "opened",
            SessionEvent::Closed { .. } => "closed",
            SessionEvent::Inbound { event, .. } => match event {
                InboundEvent::SetName { .. } => "set_name",
                InboundEvent::Typing { .. } => "typing",
                InboundEvent::Ping => "ping",
                InboundEvent::Text { .. } => "text",
            },
            SessionEvent::Sweep => "sweep",
            SessionEvent::Stats { .. } => "stats",
        }
    }
}

/// Where a connection sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unnamed,
    Named { online: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub connections: usize,
    pub named_connections: usize,
    pub users: Vec<PresenceEntry>,
}

/// Single owner of the connection registry and presence table.
///
/// `handle` never awaits: outbound events are queued with `try_send`, so one
/// slow peer cannot stall the room.
#[derive(Debug)]
pub struct ChatSessionEngine {
    config: EngineConfig,
    registry: ConnectionRegistry,
    presence: PresenceTable,
    last_snapshot: Option<Vec<PresenceEntry>>,
}

impl ChatSessionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            presence: PresenceTable::new(),
            last_snapshot: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn phase(&self, id: &ConnectionId) -> Option<SessionPhase> {
        if let Some(binding) = self.presence.binding(id) {
            return Some(SessionPhase::Named {
                online: binding.online,
            });
        }
        self.registry
            .contains(id)
            .then_some(SessionPhase::Unnamed)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            connections: self.registry.len(),
            named_connections: self.presence.len(),
            users: self.presence.aggregated_view(),
        }
    }

    pub fn handle(&mut self, event: SessionEvent, now: Instant) {
        counter!("chat_relay_events_total", 1, "kind" => event.metric_label());
        match event {
            SessionEvent::Opened { id, sender } => self.on_open(id, sender),
            SessionEvent::Closed { id } => self.on_close(id),
            SessionEvent::Inbound { id, event } => self.on_inbound(id, event, now),
            SessionEvent::Sweep => self.on_sweep(now),
            SessionEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn on_open(&mut self, id: ConnectionId, sender: OutboundSender) {
        let active = self.registry.register(id, sender);
        gauge!("chat_relay_connections_active", active as f64);
        info!(connection_id = %id, active, "connection opened");
    }

    fn on_close(&mut self, id: ConnectionId) {
        let registered = self.registry.deregister(&id);
        if !registered && !self.presence.contains(&id) {
            debug!(connection_id = %id, "close for unknown connection ignored");
            return;
        }
        gauge!("chat_relay_connections_active", self.registry.len() as f64);

        let name = self.presence.mark_offline(&id);
        fanout::send(
            &self.registry,
            &OutboundEvent::system(format!("{name} disconnected")),
        );
        self.presence.forget(&id);
        self.broadcast_presence(true);

        info!(connection_id = %id, name = %name, "connection closed");
    }

    fn on_inbound(&mut self, id: ConnectionId, event: InboundEvent, now: Instant) {
        if !self.registry.contains(&id) {
            debug!(connection_id = %id, "event for closed connection dropped");
            return;
        }

        match event {
            InboundEvent::SetName { name } => {
                self.presence.bind(id, name.clone(), now);
                info!(connection_id = %id, name = %name, "display name set");
                fanout::send_to(
                    &self.registry,
                    &id,
                    &OutboundEvent::system(format!("Your name is set to {name}")),
                );
                fanout::send_except(
                    &self.registry,
                    &id,
                    &OutboundEvent::system(format!("{name} has joined the chat")),
                );
                self.broadcast_presence(true);
            }
            InboundEvent::Ping => {
                if self.presence.touch(&id, now) {
                    self.broadcast_presence(!self.config.debounce_presence);
                } else {
                    debug!(connection_id = %id, "heartbeat before name ignored");
                }
            }
            InboundEvent::Typing { typing } => {
                let sender = self.presence.display_name(&id);
                let event = OutboundEvent::typing(sender, typing);
                fanout::send_except(&self.registry, &id, &event);
            }
            InboundEvent::Text { text } => {
                let sender = self.presence.display_name(&id);
                let event = OutboundEvent::chat(sender, text);
                fanout::send_except(&self.registry, &id, &event);
            }
        }
    }

    fn on_sweep(&mut self, now: Instant) {
        let timeout = self.config.liveness_timeout;

        let timed_out = self.presence.sweep_timeouts(now, timeout);
        if !timed_out.is_empty() {
            counter!("chat_relay_liveness_timeouts_total", timed_out.len() as u64);
            for name in &timed_out {
                info!(name = %name, "binding timed out");
                fanout::send(
                    &self.registry,
                    &OutboundEvent::system(format!("{name} disconnected (timeout)")),
                );
            }
            self.broadcast_presence(true);
        }

        let recovered = self.presence.sweep_recoveries(now, timeout);
        if !recovered.is_empty() {
            counter!("chat_relay_liveness_recoveries_total", recovered.len() as u64);
            for name in &recovered {
                info!(name = %name, "binding recovered");
                fanout::send(
                    &self.registry,
                    &OutboundEvent::system(format!("{name} reconnected")),
                );
            }
            self.broadcast_presence(true);
        }
    }

    /// Send the full aggregated view to every connection.
    ///
    /// With `force == false` the snapshot is skipped when it matches the last one sent.
    fn broadcast_presence(&mut self, force: bool) {
        let users = self.presence.aggregated_view();
        if !force && self.last_snapshot.as_ref() == Some(&users) {
            debug!("presence unchanged; broadcast skipped");
            return;
        }
        self.last_snapshot = Some(users.clone());
        fanout::send(&self.registry, &OutboundEvent::active_users(users));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::UNKNOWN_SENDER;
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::Receiver<OutboundEvent>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<OutboundEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn open(engine: &mut ChatSessionEngine, now: Instant) -> Peer {
        let (tx, rx) = mpsc::channel(32);
        let id = ConnectionId::new();
        engine.handle(SessionEvent::Opened { id, sender: tx }, now);
        Peer { id, rx }
    }

    fn inbound(engine: &mut ChatSessionEngine, peer: &Peer, event: InboundEvent, now: Instant) {
        engine.handle(SessionEvent::Inbound { id: peer.id, event }, now);
    }

    fn set_name(engine: &mut ChatSessionEngine, peer: &Peer, name: &str, now: Instant) {
        inbound(
            engine,
            peer,
            InboundEvent::SetName {
                name: name.to_string(),
            },
            now,
        );
    }

    fn users(entries: &[(&str, bool)]) -> OutboundEvent {
        OutboundEvent::active_users(
            entries
                .iter()
                .map(|(name, online)| PresenceEntry {
                    name: name.to_string(),
                    online: *online,
                })
                .collect(),
        )
    }

    #[test_timeout::timeout]
    fn set_name_notifies_sender_and_others() {
        let now = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig::default());
        let mut alice = open(&mut engine, now);
        let mut bob = open(&mut engine, now);
        assert_eq!(engine.phase(&alice.id), Some(SessionPhase::Unnamed));

        set_name(&mut engine, &alice, "Alice", now);

        assert_eq!(
            alice.drain(),
            vec![
                OutboundEvent::system("Your name is set to Alice"),
                users(&[("Alice", true)]),
            ]
        );
        assert_eq!(
            bob.drain(),
            vec![
                OutboundEvent::system("Alice has joined the chat"),
                users(&[("Alice", true)]),
            ]
        );
        assert_eq!(
            engine.phase(&alice.id),
            Some(SessionPhase::Named { online: true })
        );
    }

    #[test_timeout::timeout]
    fn unnamed_sender_is_unknown_and_not_listed() {
        let now = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig::default());
        let anon = open(&mut engine, now);
        let mut bob = open(&mut engine, now);

        inbound(&mut engine, &anon, InboundEvent::Typing { typing: true }, now);
        inbound(
            &mut engine,
            &anon,
            InboundEvent::Text {
                text: "hello?".into(),
            },
            now,
        );
        inbound(&mut engine, &anon, InboundEvent::Ping, now);

        assert_eq!(
            bob.drain(),
            vec![
                OutboundEvent::typing(UNKNOWN_SENDER, true),
                OutboundEvent::chat(UNKNOWN_SENDER, "hello?"),
            ]
        );
        assert!(engine.stats().users.is_empty());
    }

    #[test_timeout::timeout]
    fn heartbeat_rebroadcasts_presence_unless_debounced() {
        let now = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig::default());
        let alice = open(&mut engine, now);
        let mut bob = open(&mut engine, now);
        set_name(&mut engine, &alice, "Alice", now);
        bob.drain();

        inbound(&mut engine, &alice, InboundEvent::Ping, now);
        assert_eq!(bob.drain(), vec![users(&[("Alice", true)])]);

        let mut engine = ChatSessionEngine::new(EngineConfig {
            debounce_presence: true,
            ..EngineConfig::default()
        });
        let alice = open(&mut engine, now);
        let mut bob = open(&mut engine, now);
        set_name(&mut engine, &alice, "Alice", now);
        bob.drain();

        inbound(&mut engine, &alice, InboundEvent::Ping, now);
        assert!(bob.drain().is_empty());
    }

    #[test_timeout::timeout]
    fn debounced_heartbeat_still_reports_changes() {
        let start = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig {
            debounce_presence: true,
            ..EngineConfig::default()
        });
        let alice = open(&mut engine, start);
        let mut bob = open(&mut engine, start);
        set_name(&mut engine, &alice, "Alice", start);
        engine.handle(SessionEvent::Sweep, start + Duration::from_secs(31));
        bob.drain();

        inbound(
            &mut engine,
            &alice,
            InboundEvent::Ping,
            start + Duration::from_secs(32),
        );
        assert_eq!(bob.drain(), vec![users(&[("Alice", true)])]);
    }

    #[test_timeout::timeout]
    fn events_after_close_are_dropped() {
        let now = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig::default());
        let alice = open(&mut engine, now);
        let mut bob = open(&mut engine, now);
        set_name(&mut engine, &alice, "Alice", now);
        engine.handle(SessionEvent::Closed { id: alice.id }, now);
        bob.drain();

        inbound(&mut engine, &alice, InboundEvent::Text { text: "late".into() }, now);
        engine.handle(SessionEvent::Closed { id: alice.id }, now);

        assert!(bob.drain().is_empty());
        assert_eq!(engine.phase(&alice.id), None);
    }

    #[test_timeout::timeout]
    fn stats_reply_reflects_state() {
        let now = Instant::now();
        let mut engine = ChatSessionEngine::new(EngineConfig::default());
        let alice = open(&mut engine, now);
        let _anon = open(&mut engine, now);
        set_name(&mut engine, &alice, "Alice", now);

        let (reply, mut rx) = oneshot::channel();
        engine.handle(SessionEvent::Stats { reply }, now);
        let stats = rx.try_recv().unwrap();

        assert_eq!(stats.connections, 2);
        assert_eq!(stats.named_connections, 1);
        assert_eq!(
            stats.users,
            vec![PresenceEntry {
                name: "Alice".into(),
                online: true
            }]
        );
    }
}
