// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job pipeline
//!
//! A run walks one job through
//! `Fetching → Cropping → Classifying → Aggregating → Persisting → CleaningUp → Acknowledged`
//! and can abort from any stage. Only an acknowledged run deletes its message;
//! anything else is retried by queue redelivery.

pub mod errors;
pub mod orchestrator;
pub mod worker;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::job::{DetectionOutcome, DetectorId, Job};
use crate::storage::JobWorkspace;

pub use errors::StageError;
pub use orchestrator::{JobRunner, PipelineOrchestrator};
pub use worker::{PollOutcome, PollSettings, WorkerLoop, WorkerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    Fetching,
    Cropping,
    Classifying,
    Aggregating,
    Persisting,
    CleaningUp,
    Acknowledged,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Fetching => "fetching",
            RunStage::Cropping => "cropping",
            RunStage::Classifying => "classifying",
            RunStage::Aggregating => "aggregating",
            RunStage::Persisting => "persisting",
            RunStage::CleaningUp => "cleaning_up",
            RunStage::Acknowledged => "acknowledged",
        };
        f.write_str(name)
    }
}

/// State of one job while it moves through the stages
#[derive(Debug)]
pub struct PipelineRun {
    pub job: Job,
    pub workspace: JobWorkspace,
    pub source_image: Option<PathBuf>,
    pub cropped_image: Option<PathBuf>,
    pub detections: BTreeMap<DetectorId, DetectionOutcome>,
    pub verdict: BTreeMap<DetectorId, bool>,
    pub stage: RunStage,
}

impl PipelineRun {
    pub fn new(job: Job, workspace: JobWorkspace) -> Self {
        Self {
            job,
            workspace,
            source_image: None,
            cropped_image: None,
            detections: BTreeMap::new(),
            verdict: BTreeMap::new(),
            stage: RunStage::Fetching,
        }
    }

    fn advance(&mut self, stage: RunStage) {
        tracing::debug!(job_id = %self.job.id, from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Persisted and the message deleted
    Acknowledged {
        job_id: String,
        found: BTreeMap<DetectorId, bool>,
    },
    /// Persisted, but deleting the message failed; it will be redelivered
    Persisted { job_id: String },
    /// A stage failed; nothing was deleted
    Aborted {
        job_id: String,
        stage: RunStage,
        reason: String,
    },
}

impl RunOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            RunOutcome::Acknowledged { job_id, .. }
            | RunOutcome::Persisted { job_id }
            | RunOutcome::Aborted { job_id, .. } => job_id,
        }
    }

    /// Whether a result record was written
    pub fn is_persisted(&self) -> bool {
        !matches!(self, RunOutcome::Aborted { .. })
    }
}
