//! Background worker for periodic and on-demand tasks.
//!
//! [`BackgroundWorker`] drives a [`BackgroundRunnable`] from an mpsc channel
//! plus a tick interval. [`ExpirySweeper`] is the runnable that times out
//! pending requests and lapsed subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::ClockSource;
use tokio::sync::{mpsc, oneshot};

use crate::correlation::CorrelationRegistry;
use crate::subscription::SubscriptionManager;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Processes a single submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Spawned task that feeds submitted tasks and ticks to a runnable.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. The task channel holds 256 entries.
    pub fn start(mut runnable: R, tick_interval_ms: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(std::time::Duration::from_millis(tick_interval_ms.max(1)));
            // The first tick completes immediately.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submits a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Submits a task without waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or its queue is full.
    pub fn try_submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .try_send(task)
                .map_err(|e| anyhow::anyhow!("worker rejected task: {e}")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the worker and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// ExpirySweeper
// ---------------------------------------------------------------------------

/// Counts of entries expired by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requests: usize,
    pub subscriptions: usize,
}

#[derive(Debug)]
pub enum SweepTask {
    /// Sweeps immediately, optionally reporting what was expired.
    SweepNow {
        done: Option<oneshot::Sender<SweepReport>>,
    },
}

/// Expires pending requests and lapsed subscriptions on every tick.
pub struct ExpirySweeper {
    registry: Arc<CorrelationRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    clock: Arc<dyn ClockSource>,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            clock,
        }
    }

    /// Runs one sweep at the current clock reading.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let report = SweepReport {
            requests: self.registry.sweep(now),
            subscriptions: self.subscriptions.sweep(now),
        };
        if report != SweepReport::default() {
            tracing::debug!(
                requests = report.requests,
                subscriptions = report.subscriptions,
                now,
                "expiry sweep"
            );
        }
        report
    }
}

#[async_trait]
impl BackgroundRunnable for ExpirySweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::SweepNow { done } => {
                let report = self.sweep();
                if let Some(done) = done {
                    let _ = done.send(report);
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        tracing::debug!("expiry sweeper stopped");
    }
}
