use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::service::EngineHandle;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically asks the engine to reconcile stale and recovered bindings.
///
/// The sweep itself runs inside the engine task, queued behind whatever events
/// are already pending, so it never races message handling.
#[derive(Debug, Clone)]
pub struct LivenessSweeper {
    interval: Duration,
}

impl Default for LivenessSweeper {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl LivenessSweeper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn spawn(&self, engine: EngineHandle) -> JoinHandle<()> {
        let period = self.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if engine.sweep().is_err() {
                    debug!("engine stopped; liveness sweeper exiting");
                    break;
                }
            }
        })
    }
}
