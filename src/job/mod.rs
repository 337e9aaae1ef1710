// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job and result data model
//!
//! - `types` - the job payload read from queue messages
//! - `record` - detection outcomes and the persisted result record

pub mod record;
pub mod types;

pub use record::{
    aggregate_verdict, DetectionOutcome, DetectorId, DetectorReport, Region, ResultRecord,
};
pub use types::{is_safe_component, ImageSize, Job, PoisonMessage, Selection};
