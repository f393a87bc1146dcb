use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::{ChatSessionEngine, EngineStats, SessionEvent};
use crate::protocol::InboundEvent;
use crate::registry::{ConnectionId, OutboundSender};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session engine has stopped")]
    Stopped,
    #[error("session engine dropped the reply")]
    ReplyDropped,
}

/// Cloneable entry point into the engine task.
///
/// Every caller funnels through one unbounded queue, so the engine sees events
/// strictly one at a time.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EngineHandle {
    pub fn submit(&self, event: SessionEvent) -> Result<(), EngineError> {
        self.tx.send(event).map_err(|_| EngineError::Stopped)
    }

    pub fn open(&self, id: ConnectionId, sender: OutboundSender) -> Result<(), EngineError> {
        self.submit(SessionEvent::Opened { id, sender })
    }

    pub fn close(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.submit(SessionEvent::Closed { id })
    }

    pub fn inbound(&self, id: ConnectionId, event: InboundEvent) -> Result<(), EngineError> {
        self.submit(SessionEvent::Inbound { id, event })
    }

    pub fn sweep(&self) -> Result<(), EngineError> {
        self.submit(SessionEvent::Sweep)
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionEvent::Stats { reply })?;
        rx.await.map_err(|_| EngineError::ReplyDropped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Move `engine` onto its own task. The task ends once every handle is dropped.
pub fn spawn_engine(engine: ChatSessionEngine) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
    let task = tokio::spawn(async move {
        let mut engine = engine;
        info!(
            liveness_timeout_secs = engine.config().liveness_timeout.as_secs(),
            debounce_presence = engine.config().debounce_presence,
            "session engine started"
        );
        while let Some(event) = rx.recv().await {
            engine.handle(event, Instant::now());
        }
        debug!("session engine stopped");
    });
    (EngineHandle { tx }, task)
}
