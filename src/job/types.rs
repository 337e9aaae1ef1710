// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job payloads carried in queue message bodies
//!
//! A payload is a JSON object:
//!
//! ```json
//! {"uid": "a1", "url": "http://x/img.png",
//!  "image": {"w": 100, "h": 100},
//!  "selection": {"x": 0, "y": 0, "w": 50, "h": 50}}
//! ```
//!
//! `selection` is expressed in the coordinate space of `image`, which is the size
//! the submitter saw the picture at. The real pixel size may differ.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Longest job id accepted, matching common filesystem name limits
const MAX_JOB_ID_LEN: usize = 255;

/// Crop rectangle in `image` coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Selection {
    /// Exclusive right edge
    pub fn right(&self) -> u64 {
        self.x as u64 + self.w as u64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.h as u64
    }

    /// Selection covering a whole image
    pub fn full(size: ImageSize) -> Self {
        Self {
            x: 0,
            y: 0,
            w: size.w,
            h: size.h,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

/// Source dimensions used to interpret a [`Selection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub w: u32,
    pub h: u32,
}

/// Why a payload could not become a [`Job`]
///
/// Poison messages are deleted on sight; redelivering them would fail forever.
#[derive(Debug, Error)]
pub enum PoisonMessage {
    #[error("Malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Job id is empty")]
    EmptyId,

    #[error("Job id {0:?} is not usable as a path component")]
    UnsafeId(String),

    #[error("Invalid source url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Image size must be non-zero, got {w}x{h}")]
    EmptyImage { w: u32, h: u32 },

    #[error("Selection must be non-zero, got {0}")]
    EmptySelection(Selection),

    #[error("Selection {selection} exceeds image bounds {w}x{h}")]
    SelectionOutOfBounds { selection: Selection, w: u32, h: u32 },
}

impl PoisonMessage {
    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            PoisonMessage::Malformed(_) => "MALFORMED_PAYLOAD",
            PoisonMessage::EmptyId => "EMPTY_JOB_ID",
            PoisonMessage::UnsafeId(_) => "UNSAFE_JOB_ID",
            PoisonMessage::InvalidUrl { .. } => "INVALID_URL",
            PoisonMessage::EmptyImage { .. } => "EMPTY_IMAGE",
            PoisonMessage::EmptySelection(_) => "EMPTY_SELECTION",
            PoisonMessage::SelectionOutOfBounds { .. } => "SELECTION_OUT_OF_BOUNDS",
        }
    }
}

/// One unit of work extracted from a queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "uid")]
    pub id: String,
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "selection")]
    pub crop_region: Selection,
    #[serde(rename = "image")]
    pub image_size: ImageSize,
}

impl Job {
    /// Parse and validate a queue message body
    pub fn parse(payload: &[u8]) -> Result<Self, PoisonMessage> {
        let job: Job = serde_json::from_slice(payload)?;
        job.validate()?;
        Ok(job)
    }

    /// Serialize back into a queue message body
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn validate(&self) -> Result<(), PoisonMessage> {
        if self.id.is_empty() {
            return Err(PoisonMessage::EmptyId);
        }
        if !is_safe_component(&self.id) {
            return Err(PoisonMessage::UnsafeId(self.id.clone()));
        }

        let url = Url::parse(&self.source_url).map_err(|e| PoisonMessage::InvalidUrl {
            url: self.source_url.clone(),
            reason: e.to_string(),
        })?;
        if !["http", "https", "file"].contains(&url.scheme()) {
            return Err(PoisonMessage::InvalidUrl {
                url: self.source_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let ImageSize { w, h } = self.image_size;
        if w == 0 || h == 0 {
            return Err(PoisonMessage::EmptyImage { w, h });
        }
        if self.crop_region.w == 0 || self.crop_region.h == 0 {
            return Err(PoisonMessage::EmptySelection(self.crop_region));
        }
        if self.crop_region.right() > w as u64 || self.crop_region.bottom() > h as u64 {
            return Err(PoisonMessage::SelectionOutOfBounds {
                selection: self.crop_region,
                w,
                h,
            });
        }

        Ok(())
    }
}

/// Whether `id` can name a single directory or file without escaping its parent
pub fn is_safe_component(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
}
