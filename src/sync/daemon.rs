//! Event loop driving the syncer
//!
//! One task, one event at a time: change triggers, the fallback timer and
//! handle commands are multiplexed with `tokio::select!` and each handler runs
//! to completion before the next event is looked at. At most one transfer and
//! one backup copy are ever in flight, at the cost of a stalled remote store
//! stalling the loop until its own network timeout fires.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::Syncer;
use crate::error::{Result, SyncError};
use crate::process::ProcessGuard;
use crate::watcher::{ChangeWatcher, WatchSignal};

/// Commands for the sync daemon
#[derive(Debug)]
pub enum DaemonCommand {
    /// Run a full reconciliation pass now (still subject to the process guard)
    SyncNow,
    /// Stop after the current operation
    Stop,
}

/// Handle to a running daemon. Dropping it also stops the loop.
pub struct DaemonHandle {
    sender: mpsc::Sender<DaemonCommand>,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    /// Queue a full reconciliation pass
    pub async fn sync_now(&self) -> Result<()> {
        self.sender
            .send(DaemonCommand::SyncNow)
            .await
            .map_err(|_| SyncError::Daemon("Daemon channel closed".to_string()))
    }

    /// Ask the loop to exit and wait until it has
    pub async fn stop(self) -> Result<()> {
        // A closed channel means the loop is already gone
        let _ = self.sender.send(DaemonCommand::Stop).await;
        self.task
            .await
            .map_err(|e| SyncError::Daemon(format!("sync loop failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Watcher-driven sync with a periodic full pass as fallback
pub struct SyncDaemon {
    syncer: Syncer,
    watcher: ChangeWatcher,
    guard: ProcessGuard,
    interval: Duration,
}

impl SyncDaemon {
    pub fn new(syncer: Syncer, watcher: ChangeWatcher, guard: ProcessGuard, interval: Duration) -> Self {
        Self {
            syncer,
            watcher,
            guard,
            interval,
        }
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> DaemonHandle {
        let (sender, receiver) = mpsc::channel(16);
        let task = tokio::spawn(self.run(receiver));
        DaemonHandle { sender, task }
    }

    /// Run the loop until a stop command arrives or every command sender is gone
    pub async fn run(self, mut commands: mpsc::Receiver<DaemonCommand>) {
        let SyncDaemon {
            syncer,
            mut watcher,
            guard,
            interval,
        } = self;

        // The initial pass just ran, so the first tick is one interval out
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        tracing::info!(
            "Sync daemon started (watching {}, fallback every {}s)",
            watcher.root().display(),
            interval.as_secs_f64()
        );

        loop {
            // Commands are polled first so a stop is seen on every iteration,
            // even while the watcher always has a trigger ready
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(DaemonCommand::SyncNow) => run_pass(&syncer, &guard).await,
                    Some(DaemonCommand::Stop) | None => break,
                },
                _ = ticker.tick() => run_pass(&syncer, &guard).await,
                signal = watcher.next(), if watching => match signal {
                    Some(WatchSignal::Changed(path)) => {
                        if guard.is_running() {
                            tracing::info!("Game is running, sync paused; skipping {}", path.display());
                            // A skipped trigger must not hold back the next one
                            watcher.forget(&path);
                        } else {
                            handle_change(&syncer, &path).await;
                        }
                    }
                    Some(WatchSignal::Error(e)) => tracing::error!("Watcher error: {}", e),
                    None => {
                        tracing::warn!("Change watcher closed, continuing with periodic sync only");
                        watching = false;
                    }
                },
            }
        }

        tracing::info!("Sync daemon stopped");
    }
}

async fn handle_change(syncer: &Syncer, path: &Path) {
    match syncer.sync_file(path).await {
        Ok(outcome) => tracing::debug!("Synced {}: {:?}", path.display(), outcome.decision),
        Err(e) if e.is_retryable() => tracing::error!(
            "Failed to sync file {}, retrying on next pass: {}",
            path.display(),
            e
        ),
        Err(e) => tracing::error!("Failed to sync file {}: {}", path.display(), e),
    }
}

async fn run_pass(syncer: &Syncer, guard: &ProcessGuard) {
    if guard.is_running() {
        tracing::debug!("Game is running, skipping periodic sync");
        return;
    }
    syncer.full_sync().await;
}
