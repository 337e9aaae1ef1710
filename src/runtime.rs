// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wiring a [`WorkerConfig`] into a running worker

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::fetch::HttpImageFetcher;
use crate::pipeline::{PipelineOrchestrator, WorkerLoop};
use crate::queue::{connect_queue, QueueClient};
use crate::storage::{connect_result_sink, ResultSink, WorkingArea};
use crate::vision::{ImageCropper, TemplateDetectorBank};

/// A fully assembled worker and the backends it talks to
pub struct Worker {
    pub queue: Arc<dyn QueueClient>,
    pub sink: Arc<dyn ResultSink>,
    pub worker: WorkerLoop,
}

/// Build every component named by `config`
pub fn build_worker(config: &WorkerConfig) -> Result<Worker> {
    config.validate()?;
    let queue = connect_queue(&config.queue_endpoint, config.request_timeout())
        .with_context(|| format!("connecting to queue {}", config.queue_endpoint))?;
    if config.queue_endpoint.trim() == "memory:" {
        warn!("⚠️ Memory queue only sees messages sent from this process");
    }
    build_worker_with_queue(config, queue)
}

/// Same as [`build_worker`] but consuming an already constructed queue
pub fn build_worker_with_queue(
    config: &WorkerConfig,
    queue: Arc<dyn QueueClient>,
) -> Result<Worker> {
    config.validate()?;

    let sink = connect_result_sink(&config.result_store_endpoint, config.request_timeout())
        .with_context(|| {
            format!(
                "connecting to result store {}",
                config.result_store_endpoint
            )
        })?;
    let fetcher = HttpImageFetcher::new(config.request_timeout(), config.max_image_bytes)
        .context("building image fetcher")?;

    let orchestrator = PipelineOrchestrator::new(
        WorkingArea::new(&config.working_root),
        Arc::new(fetcher),
        Arc::new(ImageCropper::new(config.max_image_bytes)),
        Arc::new(TemplateDetectorBank::new(&config.detector_directory)),
        sink.clone(),
        queue.clone(),
    )
    .with_detection_params(config.detection_params())
    .with_max_concurrent_detectors(config.max_concurrent_detectors);

    info!(
        working_root = %config.working_root.display(),
        detectors = %config.detector_directory.display(),
        "🔧 Worker assembled"
    );

    let worker = WorkerLoop::new(queue.clone(), Arc::new(orchestrator), config.poll_settings());
    Ok(Worker {
        queue,
        sink,
        worker,
    })
}
