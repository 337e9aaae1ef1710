// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! The polling loop
//!
//! One job at a time: a message is fully processed or aborted before the next
//! receive. Transport trouble is never fatal; the loop backs off and polls again.
//! Shutdown is honoured between polls, never in the middle of a run.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobRunner, RunOutcome};
use crate::job::Job;
use crate::queue::{QueueClient, ReceivedMessage};

/// Receive and backoff timings
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Long-poll wait per receive
    pub receive_wait: Duration,
    /// How long a received message stays invisible to other consumers
    pub lease: Duration,
    /// Pause after an empty poll
    pub idle_backoff: Duration,
    /// Pause after a transport error, before jitter
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            receive_wait: Duration::from_secs(3),
            lease: Duration::from_secs(60),
            idle_backoff: Duration::ZERO,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters kept across iterations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub empty_polls: u64,
    pub transport_errors: u64,
    pub poison_messages: u64,
    pub completed_runs: u64,
    pub aborted_runs: u64,
}

/// What a single iteration did
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Empty,
    TransportFailed,
    Poisoned,
    Processed(RunOutcome),
}

pub struct WorkerLoop {
    queue: Arc<dyn QueueClient>,
    runner: Arc<dyn JobRunner>,
    settings: PollSettings,
    stats: Arc<RwLock<WorkerStats>>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        runner: Arc<dyn JobRunner>,
        settings: PollSettings,
    ) -> Self {
        Self {
            queue,
            runner,
            settings,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Receive at most one message and handle it
    pub async fn poll_once(&self) -> PollOutcome {
        self.stats.write().await.polls += 1;

        let received = self
            .queue
            .receive(self.settings.receive_wait, self.settings.lease)
            .await;

        match received {
            Err(e) => {
                warn!(code = e.error_code(), "⚠️ Queue receive failed: {}", e);
                self.stats.write().await.transport_errors += 1;
                PollOutcome::TransportFailed
            }
            Ok(None) => {
                debug!("no messages");
                self.stats.write().await.empty_polls += 1;
                PollOutcome::Empty
            }
            Ok(Some(message)) => self.handle_message(message).await,
        }
    }

    async fn handle_message(&self, message: ReceivedMessage) -> PollOutcome {
        let job = match Job::parse(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    code = e.error_code(),
                    lease = %message.lease,
                    "☠️ Dropping poison message: {}",
                    e
                );
                if let Err(e) = self.queue.delete(&message.lease).await {
                    warn!(code = e.error_code(), "⚠️ Could not delete poison message: {}", e);
                }
                self.stats.write().await.poison_messages += 1;
                return PollOutcome::Poisoned;
            }
        };

        let outcome = self.runner.run(job, message.lease).await;
        {
            let mut stats = self.stats.write().await;
            if outcome.is_persisted() {
                stats.completed_runs += 1;
            } else {
                stats.aborted_runs += 1;
            }
        }
        PollOutcome::Processed(outcome)
    }

    /// Poll until `shutdown` is cancelled, then return the final counters
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStats {
        info!(
            wait_secs = self.settings.receive_wait.as_secs(),
            lease_secs = self.settings.lease.as_secs(),
            "👷 Worker loop started"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.poll_once().await {
                PollOutcome::Empty => self.settings.idle_backoff,
                PollOutcome::TransportFailed => self.error_backoff_with_jitter(),
                PollOutcome::Poisoned | PollOutcome::Processed(_) => Duration::ZERO,
            };

            if !pause.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        let stats = self.stats().await;
        info!(
            polls = stats.polls,
            completed = stats.completed_runs,
            aborted = stats.aborted_runs,
            "🛑 Worker loop stopped"
        );
        stats
    }

    fn error_backoff_with_jitter(&self) -> Duration {
        let base = self.settings.error_backoff;
        let spread = (base.as_millis() as u64 / 2).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}
