//! Presence-aware chat relay core.
//!
//! Transport code feeds [`SessionEvent`]s into an [`EngineHandle`]; the engine
//! owns the [`ConnectionRegistry`] and [`PresenceTable`] and answers with
//! [`OutboundEvent`]s queued on each connection's sender.

pub mod engine;
pub mod fanout;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod sweeper;

pub use engine::{ChatSessionEngine, EngineConfig, EngineStats, SessionEvent, SessionPhase};
pub use fanout::DeliveryReport;
pub use presence::{IdentityBinding, PresenceTable, UNKNOWN_SENDER};
pub use protocol::{
    decode, ChatLine, ControlEvent, DecodeError, InboundEvent, OutboundEvent, PresenceEntry,
    SYSTEM_SENDER,
};
pub use registry::{ConnectionId, ConnectionRegistry, OutboundSender};
pub use service::{spawn_engine, EngineError, EngineHandle};
pub use sweeper::LivenessSweeper;
