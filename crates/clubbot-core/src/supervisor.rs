//! Long-poll supervisor.
//!
//! Drains an [`UpdateSource`] forever: clears stale delivery state on start,
//! hands every update to an [`UpdateSink`] on its own task, and on a polling
//! conflict or any transport failure waits a fixed backoff and polls again.
//! Only the cancellation token ends the loop.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// One inbound update with its stream position.
#[derive(Clone, Debug)]
pub struct Polled<U> {
    pub update_id: i64,
    pub update: U,
}

#[async_trait]
pub trait UpdateSource: Send + Sync {
    type Update: Send + 'static;

    /// Drop any push registration and the pending backlog.
    async fn reset(&self) -> Result<()>;

    /// Long-poll for updates at or after `offset`.
    ///
    /// Implementations report a competing consumer as [`crate::Error::Conflict`].
    async fn poll(&self, offset: Option<i64>) -> Result<Vec<Polled<Self::Update>>>;
}

#[async_trait]
pub trait UpdateSink<U>: Send + Sync + 'static {
    async fn handle(&self, update: U);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Polling,
    Backoff,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub polls: u64,
    pub updates: u64,
    pub conflicts: u64,
    pub failures: u64,
}

pub struct PollSupervisor {
    backoff: Duration,
    state: Mutex<SupervisorState>,
}

impl PollSupervisor {
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            state: Mutex::new(SupervisorState::Starting),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SupervisorState::Stopped)
    }

    fn set_state(&self, next: SupervisorState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    pub async fn run<S, K>(&self, source: &S, sink: Arc<K>, cancel: CancellationToken) -> SupervisorStats
    where
        S: UpdateSource + ?Sized,
        K: UpdateSink<S::Update>,
    {
        let mut stats = SupervisorStats::default();
        let mut handlers = JoinSet::new();
        let mut offset: Option<i64> = None;

        self.set_state(SupervisorState::Starting);
        loop {
            let reset = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(stats, handlers).await,
                r = source.reset() => r,
            };
            match reset {
                Ok(()) => {
                    info!("Cleared webhook and pending updates");
                    break;
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!(backoff_secs = self.backoff.as_secs(), "Startup reset failed: {e}");
                    if !self.backoff_or_cancel(&cancel).await {
                        return self.finish(stats, handlers).await;
                    }
                }
            }
        }

        loop {
            self.set_state(SupervisorState::Polling);
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = source.poll(offset) => r,
            };
            stats.polls += 1;

            match polled {
                Ok(batch) => {
                    for item in batch {
                        offset = Some(item.update_id + 1);
                        stats.updates += 1;
                        let sink = sink.clone();
                        handlers.spawn(async move { sink.handle(item.update).await });
                    }
                    while let Some(done) = handlers.try_join_next() {
                        if let Err(e) = done {
                            error!("Update handler panicked: {e}");
                        }
                    }
                }
                Err(e) if e.is_conflict() => {
                    stats.conflicts += 1;
                    warn!(
                        backoff_secs = self.backoff.as_secs(),
                        "Another instance is polling this bot: {e}"
                    );
                    if !self.backoff_or_cancel(&cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    stats.failures += 1;
                    error!(backoff_secs = self.backoff.as_secs(), "Polling failed: {e}");
                    if !self.backoff_or_cancel(&cancel).await {
                        break;
                    }
                }
            }
        }

        self.finish(stats, handlers).await
    }

    // false when cancelled during the wait
    async fn backoff_or_cancel(&self, cancel: &CancellationToken) -> bool {
        self.set_state(SupervisorState::Backoff);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep(self.backoff) => true,
        }
    }

    async fn finish(&self, stats: SupervisorStats, mut handlers: JoinSet<()>) -> SupervisorStats {
        debug!(in_flight = handlers.len(), "Waiting for update handlers");
        while handlers.join_next().await.is_some() {}
        self.set_state(SupervisorState::Stopped);
        info!(
            polls = stats.polls,
            updates = stats.updates,
            conflicts = stats.conflicts,
            failures = stats.failures,
            "Poll supervisor stopped"
        );
        stats
    }
}
