// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image processing for the pipeline
//!
//! This module provides:
//! - Byte-level decoding and format sniffing shared by every stage
//! - Cropping a source image down to the job's selection
//! - A bank of template detectors run against the cropped image
//!
//! Pixel work runs on the blocking pool.

pub mod detectors;
pub mod image_utils;
pub mod transform;

pub use detectors::{
    find_matches, DetectionParams, DetectorBank, DetectorError, TemplateDetectorBank,
};
pub use image_utils::{decode_image_bytes, detect_format, encode_png, ImageError, ImageInfo};
pub use transform::{
    scale_selection, CropInfo, CropSpec, ImageCropper, ImageTransform, TransformError,
};
