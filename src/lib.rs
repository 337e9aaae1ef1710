// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod config;
pub mod fetch;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod storage;
pub mod transport;
pub mod vision;

// Re-export main types
pub use config::{ConfigError, WorkerConfig};
pub use fetch::{FetchError, HttpImageFetcher, ImageFetcher};
pub use job::{
    aggregate_verdict, DetectionOutcome, DetectorId, DetectorReport, ImageSize, Job,
    PoisonMessage, Region, ResultRecord, Selection,
};
pub use pipeline::{
    JobRunner, PipelineOrchestrator, PipelineRun, PollOutcome, PollSettings, RunOutcome,
    RunStage, StageError, WorkerLoop, WorkerStats,
};
pub use queue::{LeaseHandle, QueueClient, ReceivedMessage, TransportError};
pub use runtime::{build_worker, build_worker_with_queue, Worker};
pub use storage::{JobWorkspace, ResultSink, WorkingArea};
pub use vision::{DetectionParams, DetectorBank, DetectorError, ImageTransform, TransformError};
