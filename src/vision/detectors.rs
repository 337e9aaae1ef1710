// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detector bank
//!
//! The pipeline only needs two capabilities: list the available detectors, and run
//! one detector against an image to get back match regions or an error.
//!
//! [`TemplateDetectorBank`] implements them over a directory of template images.
//! Each image file is one detector named by its file stem. Matching is normalized
//! cross-correlation on grayscale, followed by greedy overlap suppression.

use async_trait::async_trait;
use image::GrayImage;
use imageproc::template_matching::{match_template, MatchTemplateMethod};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::image_utils::{decode_image_bytes, has_image_extension, ImageError};
use crate::job::{DetectorId, Region};

/// Two matches overlapping more than this share of the smaller one are duplicates
const OVERLAP_LIMIT: f64 = 0.5;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Unknown detector: {0}")]
    UnknownDetector(String),

    #[error("Cannot read detector directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Template for detector {detector} is unusable: {reason}")]
    Template { detector: String, reason: String },

    #[error("Cannot load image {path}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("Detection task failed: {0}")]
    TaskFailed(String),
}

impl DetectorError {
    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            DetectorError::UnknownDetector(_) => "UNKNOWN_DETECTOR",
            DetectorError::Directory { .. } => "DETECTOR_DIRECTORY",
            DetectorError::Template { .. } => "BAD_TEMPLATE",
            DetectorError::Image { .. } => "BAD_IMAGE",
            DetectorError::TaskFailed(_) => "TASK_FAILED",
        }
    }
}

/// Tuning passed to every detector call
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// Minimum correlation score in (0, 1]
    pub threshold: f32,
    /// Cap on regions returned per detector
    pub max_matches: usize,
    /// Largest template file accepted
    pub max_image_bytes: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            max_matches: 32,
            max_image_bytes: super::image_utils::MAX_IMAGE_SIZE,
        }
    }
}

#[async_trait]
pub trait DetectorBank: Send + Sync {
    /// Every detector currently available, in a stable order
    async fn list_detectors(&self) -> Result<Vec<DetectorId>, DetectorError>;

    /// Run one detector against the image at `image`
    async fn detect(
        &self,
        detector: &DetectorId,
        image: &Path,
        params: &DetectionParams,
    ) -> Result<Vec<Region>, DetectorError>;
}

/// Find `template` inside `image`
///
/// Returns at most `params.max_matches` regions, best score first. A template
/// larger than the image cannot match anywhere.
pub fn find_matches(
    image: &GrayImage,
    template: &GrayImage,
    params: &DetectionParams,
) -> Vec<Region> {
    if template.width() == 0
        || template.height() == 0
        || template.width() > image.width()
        || template.height() > image.height()
    {
        return Vec::new();
    }

    let scores = match_template(
        image,
        template,
        MatchTemplateMethod::CrossCorrelationNormalized,
    );

    let mut candidates: Vec<(f32, Region)> = scores
        .enumerate_pixels()
        .filter(|(_, _, score)| score.0[0] >= params.threshold)
        .map(|(x, y, score)| {
            (
                score.0[0],
                Region {
                    x,
                    y,
                    w: template.width(),
                    h: template.height(),
                },
            )
        })
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    suppress_overlaps(candidates, params.max_matches)
}

/// Greedy non-maximum suppression over candidates sorted best first
fn suppress_overlaps(candidates: Vec<(f32, Region)>, limit: usize) -> Vec<Region> {
    let mut kept: Vec<Region> = Vec::new();
    for (_, region) in candidates {
        if kept.len() >= limit {
            break;
        }
        let duplicate = kept.iter().any(|k| {
            let smaller = k.area().min(region.area()).max(1) as f64;
            k.intersection(&region) as f64 / smaller > OVERLAP_LIMIT
        });
        if !duplicate {
            kept.push(region);
        }
    }
    kept
}

fn load_gray(bytes: &[u8], max_bytes: usize) -> Result<GrayImage, ImageError> {
    decode_image_bytes(bytes, max_bytes).map(|(img, _)| img.to_luma8())
}

/// Decode a crop written by the transform stage
///
/// No byte cap: the crop is lossless PNG cut from a source that already passed the
/// download cap, so it may legitimately be larger than the file it came from.
fn load_crop(bytes: &[u8]) -> Result<GrayImage, ImageError> {
    load_gray(bytes, usize::MAX)
}

/// Decoded template, valid while its file is unchanged
struct CachedTemplate {
    path: PathBuf,
    modified: SystemTime,
    image: Arc<GrayImage>,
}

/// Template-matching detectors backed by a directory of images
///
/// Templates are decoded once and reloaded when their file's modification time
/// changes, so replacing a template on disk takes effect on the next run.
pub struct TemplateDetectorBank {
    directory: PathBuf,
    templates: Arc<RwLock<HashMap<DetectorId, CachedTemplate>>>,
}

impl TemplateDetectorBank {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            templates: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn template_path(&self, detector: &str) -> Result<PathBuf, DetectorError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| DetectorError::Directory {
                path: self.directory.clone(),
                source: e,
            })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DetectorError::Directory {
                path: self.directory.clone(),
                source: e,
            })?
        {
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str());
            if has_image_extension(&path) && stem == Some(detector) {
                return Ok(path);
            }
        }

        Err(DetectorError::UnknownDetector(detector.to_string()))
    }

    async fn template(
        &self,
        detector: &DetectorId,
        max_bytes: usize,
    ) -> Result<Arc<GrayImage>, DetectorError> {
        let path = self.template_path(detector).await?;
        let template_error = |reason: String| DetectorError::Template {
            detector: detector.clone(),
            reason,
        };
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| template_error(e.to_string()))?;

        if let Some(cached) = self.templates.read().await.get(detector) {
            if cached.path == path && cached.modified == modified {
                return Ok(cached.image.clone());
            }
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| template_error(e.to_string()))?;
        let image = load_gray(&bytes, max_bytes).map_err(|e| template_error(e.to_string()))?;

        let image = Arc::new(image);
        self.templates.write().await.insert(
            detector.clone(),
            CachedTemplate {
                path,
                modified,
                image: image.clone(),
            },
        );
        debug!(
            "📐 Loaded template {} ({}x{})",
            detector,
            image.width(),
            image.height()
        );
        Ok(image)
    }

    /// Templates currently held in memory
    pub async fn cached_templates(&self) -> usize {
        self.templates.read().await.len()
    }
}

#[async_trait]
impl DetectorBank for TemplateDetectorBank {
    async fn list_detectors(&self) -> Result<Vec<DetectorId>, DetectorError> {
        let directory_error = |e| DetectorError::Directory {
            path: self.directory.clone(),
            source: e,
        };
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(directory_error)?;

        let mut detectors = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(directory_error)? {
            let path = entry.path();
            if !has_image_extension(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                detectors.push(stem.to_string());
            }
        }
        detectors.sort();
        detectors.dedup();

        info!(
            "🔎 {} detectors available in {}",
            detectors.len(),
            self.directory.display()
        );
        Ok(detectors)
    }

    async fn detect(
        &self,
        detector: &DetectorId,
        image: &Path,
        params: &DetectionParams,
    ) -> Result<Vec<Region>, DetectorError> {
        let template = self.template(detector, params.max_image_bytes).await?;

        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| DetectorError::Image {
                path: image.to_path_buf(),
                reason: e.to_string(),
            })?;

        let path = image.to_path_buf();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            let gray = load_crop(&bytes).map_err(|e| DetectorError::Image {
                path,
                reason: e.to_string(),
            })?;
            Ok(find_matches(&gray, &template, &params))
        })
        .await
        .map_err(|e| DetectorError::TaskFailed(e.to_string()))?
    }
}
