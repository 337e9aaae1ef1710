// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cropping a fetched image to the job's selection
//!
//! The selection is given in the coordinate space the submitter saw (`image`), so it
//! is scaled onto the decoded pixel grid before cutting.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::image_utils::{decode_image_bytes, encode_png, ImageError};
use crate::job::{ImageSize, Job, Region, Selection};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Selection {selection} maps to an empty region on a {width}x{height} image")]
    EmptyRegion {
        selection: Selection,
        width: u32,
        height: u32,
    },

    #[error("Crop task failed: {0}")]
    TaskFailed(String),
}

/// Crop geometry taken from a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropSpec {
    pub selection: Selection,
    pub image_size: ImageSize,
}

impl From<&Job> for CropSpec {
    fn from(job: &Job) -> Self {
        Self {
            selection: job.crop_region,
            image_size: job.image_size,
        }
    }
}

/// What a crop actually did, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropInfo {
    pub source_width: u32,
    pub source_height: u32,
    pub region: Region,
}

#[async_trait]
pub trait ImageTransform: Send + Sync {
    /// Crop `source` by `spec` and write the result to `destination`
    async fn crop(
        &self,
        source: &Path,
        destination: &Path,
        spec: &CropSpec,
    ) -> Result<CropInfo, TransformError>;
}

/// Map a selection from `image_size` coordinates onto a `width` x `height` grid
///
/// Edges are widened outward (floor on the left/top, ceil on the right/bottom) so a
/// scaled-down selection never loses its last row or column, then clamped.
pub fn scale_selection(
    spec: &CropSpec,
    width: u32,
    height: u32,
) -> Result<Region, TransformError> {
    let CropSpec {
        selection,
        image_size,
    } = *spec;

    let empty = || TransformError::EmptyRegion {
        selection,
        width,
        height,
    };
    if image_size.w == 0 || image_size.h == 0 {
        return Err(empty());
    }

    let scale_floor = |v: u64, actual: u32, nominal: u32| v * actual as u64 / nominal as u64;
    let scale_ceil = |v: u64, actual: u32, nominal: u32| {
        (v * actual as u64).div_ceil(nominal as u64)
    };

    let left = scale_floor(selection.x as u64, width, image_size.w).min(width as u64);
    let top = scale_floor(selection.y as u64, height, image_size.h).min(height as u64);
    let right = scale_ceil(selection.right(), width, image_size.w).min(width as u64);
    let bottom = scale_ceil(selection.bottom(), height, image_size.h).min(height as u64);

    if right <= left || bottom <= top {
        return Err(empty());
    }

    Ok(Region {
        x: left as u32,
        y: top as u32,
        w: (right - left) as u32,
        h: (bottom - top) as u32,
    })
}

/// Crops with the `image` crate and writes PNG
#[derive(Debug, Clone)]
pub struct ImageCropper {
    max_image_bytes: usize,
}

impl ImageCropper {
    pub fn new(max_image_bytes: usize) -> Self {
        Self { max_image_bytes }
    }
}

#[async_trait]
impl ImageTransform for ImageCropper {
    async fn crop(
        &self,
        source: &Path,
        destination: &Path,
        spec: &CropSpec,
    ) -> Result<CropInfo, TransformError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| TransformError::Read {
                path: source.to_path_buf(),
                source: e,
            })?;

        let max_bytes = self.max_image_bytes;
        let spec = *spec;
        let (encoded, info) = tokio::task::spawn_blocking(move || {
            let (img, _) = decode_image_bytes(&bytes, max_bytes)?;
            let region = scale_selection(&spec, img.width(), img.height())?;
            let cropped = img.crop_imm(region.x, region.y, region.w, region.h);
            let encoded = encode_png(&cropped)?;
            Ok::<_, TransformError>((
                encoded,
                CropInfo {
                    source_width: img.width(),
                    source_height: img.height(),
                    region,
                },
            ))
        })
        .await
        .map_err(|e| TransformError::TaskFailed(e.to_string()))??;

        tokio::fs::write(destination, &encoded)
            .await
            .map_err(|e| TransformError::Write {
                path: destination.to_path_buf(),
                source: e,
            })?;

        debug!(
            "✂️ Cropped {}x{} to {}x{}+{}+{}",
            info.source_width,
            info.source_height,
            info.region.w,
            info.region.h,
            info.region.x,
            info.region.y
        );
        Ok(info)
    }
}
