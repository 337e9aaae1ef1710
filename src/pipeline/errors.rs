// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Error types for pipeline stages

use thiserror::Error;

use super::RunStage;
use crate::fetch::FetchError;
use crate::transport::TransportError;
use crate::vision::{DetectorError, TransformError};

/// A failure that aborts the run and leaves the message for redelivery
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Working area unavailable: {0}")]
    WorkingArea(std::io::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Crop failed: {0}")]
    Crop(#[from] TransformError),

    #[error("Cannot list detectors: {0}")]
    DetectorListing(DetectorError),

    #[error("Persist failed: {0}")]
    Persist(TransportError),
}

impl StageError {
    /// Stage the run was in when it failed
    pub fn stage(&self) -> RunStage {
        match self {
            StageError::WorkingArea(_) | StageError::Fetch(_) => RunStage::Fetching,
            StageError::Crop(_) => RunStage::Cropping,
            StageError::DetectorListing(_) => RunStage::Classifying,
            StageError::Persist(_) => RunStage::Persisting,
        }
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            StageError::WorkingArea(_) => "WORKING_AREA",
            StageError::Fetch(e) => e.error_code(),
            StageError::Crop(_) => "CROP_FAILED",
            StageError::DetectorListing(e) => e.error_code(),
            StageError::Persist(e) => e.error_code(),
        }
    }
}
