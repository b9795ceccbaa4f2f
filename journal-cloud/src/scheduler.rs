//! Trigger loop driving the sync engine.

use crate::error::{CloudError, CloudResult};
use crate::sync_engine::SyncEngine;
use crate::types::{SyncCommand, SyncOutcome, SyncTrigger};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runs sync cycles on a timer and on host events.
///
/// At most one cycle is in flight; triggers that arrive meanwhile are
/// dropped, the next periodic tick picks up whatever they would have synced.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    command_rx: mpsc::Receiver<SyncCommand>,
}

/// Handle for sending triggers to a running [`SyncScheduler`].
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub async fn trigger(&self, trigger: SyncTrigger) -> CloudResult<()> {
        self.command_tx
            .send(SyncCommand::Trigger(trigger))
            .await
            .map_err(|_| CloudError::EngineStopped)
    }

    /// Stops the loop once any in-flight cycle has finished.
    pub async fn stop(&self) -> CloudResult<()> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| CloudError::EngineStopped)
    }
}

/// Creates a scheduler and its handle. Spawn [`SyncScheduler::run`] to start.
pub fn create_sync_scheduler(engine: Arc<SyncEngine>) -> (SyncHandle, SyncScheduler) {
    let (command_tx, command_rx) = mpsc::channel(64);
    (
        SyncHandle { command_tx },
        SyncScheduler { engine, command_rx },
    )
}

impl SyncScheduler {
    pub async fn run(mut self) {
        info!(
            "sync scheduler started (interval {:?})",
            self.engine.config().interval()
        );
        let mut cycles = JoinSet::new();
        let mut next_periodic = Instant::now() + self.engine.periodic_delay();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_periodic) => {
                    self.start(SyncTrigger::Periodic, &mut cycles);
                    next_periodic = Instant::now() + self.engine.periodic_delay();
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        warn!("sync task ended abnormally: {e}");
                    }
                    // Re-arm from the end of the cycle so backoff sees its outcome.
                    next_periodic = Instant::now() + self.engine.periodic_delay();
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Trigger(trigger)) => self.start(trigger, &mut cycles),
                        Some(SyncCommand::Stop) => {
                            info!("sync scheduler stopping");
                            break;
                        }
                        None => {
                            debug!("all sync handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        while cycles.join_next().await.is_some() {}
        info!("sync scheduler stopped");
    }

    fn start(&self, trigger: SyncTrigger, cycles: &mut JoinSet<()>) {
        if !cycles.is_empty() {
            debug!("{trigger:?} trigger dropped, a cycle is already running");
            return;
        }
        let engine = Arc::clone(&self.engine);
        cycles.spawn(async move {
            debug!("{trigger:?} sync starting");
            match engine.sync().await {
                Ok(SyncOutcome::Completed(_)) => {}
                Ok(outcome) => debug!("{trigger:?} sync skipped: {outcome:?}"),
                Err(e) => warn!("{trigger:?} sync failed: {e}"),
            }
        });
    }
}
