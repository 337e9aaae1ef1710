// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection outcomes and the persisted result record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{ImageSize, Job, Selection};

/// Detector identifier, the file stem of its template in the detector directory
pub type DetectorId = String;

/// Match rectangle in cropped-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Area shared with `other`
    pub fn intersection(&self, other: &Region) -> u64 {
        let left = self.x.max(other.x) as u64;
        let top = self.y.max(other.y) as u64;
        let right = (self.x as u64 + self.w as u64).min(other.x as u64 + other.w as u64);
        let bottom = (self.y as u64 + self.h as u64).min(other.y as u64 + other.h as u64);
        right.saturating_sub(left) * bottom.saturating_sub(top)
    }
}

/// What one detector produced for one image
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Matches(Vec<Region>),
    Failed(String),
}

impl DetectionOutcome {
    /// `None` when the detector could not evaluate the image
    pub fn found(&self) -> Option<bool> {
        match self {
            DetectionOutcome::Matches(regions) => Some(!regions.is_empty()),
            DetectionOutcome::Failed(_) => None,
        }
    }
}

/// Per-detector verdict; failed detectors are left out
pub fn aggregate_verdict(
    detections: &BTreeMap<DetectorId, DetectionOutcome>,
) -> BTreeMap<DetectorId, bool> {
    detections
        .iter()
        .filter_map(|(id, outcome)| outcome.found().map(|found| (id.clone(), found)))
        .collect()
}

/// Per-detector entry of a [`ResultRecord`]
///
/// `found` is `null` and `error` is set when the detector failed, so "no match"
/// and "could not evaluate" never look alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorReport {
    pub objects: Vec<Region>,
    pub found: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DetectionOutcome> for DetectorReport {
    fn from(outcome: &DetectionOutcome) -> Self {
        match outcome {
            DetectionOutcome::Matches(regions) => Self {
                objects: regions.clone(),
                found: Some(!regions.is_empty()),
                error: None,
            },
            DetectionOutcome::Failed(reason) => Self {
                objects: Vec::new(),
                found: None,
                error: Some(reason.clone()),
            },
        }
    }
}

/// Durable artifact written once per successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub uid: String,
    pub url: String,
    pub selection: Selection,
    pub image: ImageSize,
    pub processed_at: DateTime<Utc>,
    pub results: BTreeMap<DetectorId, DetectorReport>,
}

impl ResultRecord {
    pub fn new(job: &Job, detections: &BTreeMap<DetectorId, DetectionOutcome>) -> Self {
        Self {
            uid: job.id.clone(),
            url: job.source_url.clone(),
            selection: job.crop_region,
            image: job.image_size,
            processed_at: Utc::now(),
            results: detections
                .iter()
                .map(|(id, outcome)| (id.clone(), DetectorReport::from(outcome)))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}
