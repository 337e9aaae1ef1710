// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Drives one job through every stage
//!
//! Stages are chained with `?` inside `execute`. Cleanup and acknowledgement live
//! outside it in `run`: the workspace is removed on every path, and the message is
//! deleted only once the record has been persisted.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{PipelineRun, RunOutcome, RunStage, StageError};
use crate::fetch::ImageFetcher;
use crate::job::{aggregate_verdict, DetectionOutcome, DetectorId, Job, ResultRecord};
use crate::queue::{LeaseHandle, QueueClient};
use crate::storage::{ResultSink, WorkingArea};
use crate::vision::{CropSpec, DetectionParams, DetectorBank, ImageTransform};

/// Default bound on detectors evaluated at once
pub const DEFAULT_MAX_CONCURRENT_DETECTORS: usize = 4;

// Trait so the worker loop can be driven without real stages
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Process one leased job to completion; never fails, the outcome says how it ended
    async fn run(&self, job: Job, lease: LeaseHandle) -> RunOutcome;
}

pub struct PipelineOrchestrator {
    working_area: WorkingArea,
    fetcher: Arc<dyn ImageFetcher>,
    transform: Arc<dyn ImageTransform>,
    detectors: Arc<dyn DetectorBank>,
    sink: Arc<dyn ResultSink>,
    queue: Arc<dyn QueueClient>,
    params: DetectionParams,
    max_concurrent_detectors: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        working_area: WorkingArea,
        fetcher: Arc<dyn ImageFetcher>,
        transform: Arc<dyn ImageTransform>,
        detectors: Arc<dyn DetectorBank>,
        sink: Arc<dyn ResultSink>,
        queue: Arc<dyn QueueClient>,
    ) -> Self {
        Self {
            working_area,
            fetcher,
            transform,
            detectors,
            sink,
            queue,
            params: DetectionParams::default(),
            max_concurrent_detectors: DEFAULT_MAX_CONCURRENT_DETECTORS,
        }
    }

    pub fn with_detection_params(mut self, params: DetectionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_concurrent_detectors(mut self, limit: usize) -> Self {
        self.max_concurrent_detectors = limit.max(1);
        self
    }

    pub fn working_area(&self) -> &WorkingArea {
        &self.working_area
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<(), StageError> {
        // Fetching
        let workspace = self
            .working_area
            .acquire(&run.job.id)
            .await
            .map_err(StageError::WorkingArea)?;
        let source = workspace.source_path();
        self.fetcher.fetch(&run.job.source_url, &source).await?;
        run.source_image = Some(source.clone());

        // Cropping
        run.advance(RunStage::Cropping);
        let cropped = workspace.cropped_path();
        let spec = CropSpec::from(&run.job);
        let info = self.transform.crop(&source, &cropped, &spec).await?;
        debug!(job_id = %run.job.id, region = ?info.region, "cropped source image");
        run.cropped_image = Some(cropped.clone());

        // Classifying
        run.advance(RunStage::Classifying);
        run.detections = self.classify(&run.job.id, &cropped).await?;

        // Aggregating
        run.advance(RunStage::Aggregating);
        run.verdict = aggregate_verdict(&run.detections);

        // Persisting
        run.advance(RunStage::Persisting);
        let record = ResultRecord::new(&run.job, &run.detections);
        self.sink
            .put(&run.job.id, &record)
            .await
            .map_err(StageError::Persist)?;
        info!(
            job_id = %run.job.id,
            "💾 Stored result at {}",
            self.sink.location(&run.job.id)
        );
        Ok(())
    }

    /// Run every detector against `image`; a failing detector only marks its own entry
    async fn classify(
        &self,
        job_id: &str,
        image: &Path,
    ) -> Result<BTreeMap<DetectorId, DetectionOutcome>, StageError> {
        let detectors = self
            .detectors
            .list_detectors()
            .await
            .map_err(StageError::DetectorListing)?;

        let params = &self.params;
        let outcomes: BTreeMap<DetectorId, DetectionOutcome> = stream::iter(detectors)
            .map(|detector| async move {
                let outcome = match self.detectors.detect(&detector, image, params).await {
                    Ok(regions) => {
                        debug!(
                            job_id,
                            detector = %detector,
                            matches = regions.len(),
                            "detector finished"
                        );
                        DetectionOutcome::Matches(regions)
                    }
                    Err(e) => {
                        warn!(
                            job_id,
                            detector = %detector,
                            code = e.error_code(),
                            "⚠️ Detector failed: {}",
                            e
                        );
                        DetectionOutcome::Failed(e.to_string())
                    }
                };
                (detector, outcome)
            })
            .buffer_unordered(self.max_concurrent_detectors)
            .collect()
            .await;

        Ok(outcomes)
    }
}

#[async_trait]
impl JobRunner for PipelineOrchestrator {
    async fn run(&self, job: Job, lease: LeaseHandle) -> RunOutcome {
        let job_id = job.id.clone();
        let started = Instant::now();

        let workspace = match self.working_area.workspace(&job.id) {
            Ok(workspace) => workspace,
            Err(e) => {
                let err = StageError::WorkingArea(e);
                warn!(job_id = %job_id, code = err.error_code(), "❌ Run aborted: {}", err);
                return RunOutcome::Aborted {
                    job_id,
                    stage: err.stage(),
                    reason: err.to_string(),
                };
            }
        };

        info!(job_id = %job_id, url = %job.source_url, "🚀 Starting run");
        let mut run = PipelineRun::new(job, workspace);
        let result = self.execute(&mut run).await;
        let failed_stage = run.stage;

        run.advance(RunStage::CleaningUp);
        if let Err(e) = self.working_area.release(&run.workspace).await {
            warn!(
                job_id = %job_id,
                path = %run.workspace.path().display(),
                "⚠️ Workspace cleanup failed: {}",
                e
            );
        }

        if let Err(e) = result {
            warn!(
                job_id = %job_id,
                stage = %failed_stage,
                code = e.error_code(),
                "❌ Run aborted, leaving message for redelivery: {}",
                e
            );
            return RunOutcome::Aborted {
                job_id,
                stage: failed_stage,
                reason: e.to_string(),
            };
        }

        match self.queue.delete(&lease).await {
            Ok(()) => {
                run.advance(RunStage::Acknowledged);
                info!(
                    job_id = %job_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "✅ Deleted message"
                );
                RunOutcome::Acknowledged {
                    job_id,
                    found: run.verdict,
                }
            }
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    code = e.error_code(),
                    "⚠️ Result stored but message delete failed, job will be reprocessed: {}",
                    e
                );
                RunOutcome::Persisted { job_id }
            }
        }
    }
}
