// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-job scratch directories
//!
//! Every run gets `<working_root>/<job id>/`. Acquiring reuses a directory left
//! behind by a crashed attempt; releasing tolerates a directory that is already
//! partly or fully gone.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::job::is_safe_component;

const SOURCE_FILE: &str = "source";
const CROPPED_FILE: &str = "cropped.png";

/// Handle to one job's scratch directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    job_id: String,
    path: PathBuf,
}

impl JobWorkspace {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the fetched image is written
    pub fn source_path(&self) -> PathBuf {
        self.path.join(SOURCE_FILE)
    }

    /// Where the cropped image is written
    pub fn cropped_path(&self) -> PathBuf {
        self.path.join(CROPPED_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct WorkingArea {
    root: PathBuf,
}

impl WorkingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle for `job_id` without touching the filesystem
    pub fn workspace(&self, job_id: &str) -> io::Result<JobWorkspace> {
        if !is_safe_component(job_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("job id {:?} cannot name a workspace", job_id),
            ));
        }
        Ok(JobWorkspace {
            job_id: job_id.to_string(),
            path: self.root.join(job_id),
        })
    }

    /// Create the job's directory if absent
    pub async fn acquire(&self, job_id: &str) -> io::Result<JobWorkspace> {
        let workspace = self.workspace(job_id)?;
        if tokio::fs::try_exists(&workspace.path).await.unwrap_or(false) {
            debug!(job_id, "♻️ Reusing leftover workspace {}", workspace.path.display());
        }
        tokio::fs::create_dir_all(&workspace.path).await?;
        Ok(workspace)
    }

    /// Remove the job's directory and everything in it
    pub async fn release(&self, workspace: &JobWorkspace) -> io::Result<()> {
        match remove_tree(&workspace.path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    job_id = workspace.job_id.as_str(),
                    error = %e,
                    "⚠️ Workspace removal failed, retrying once"
                );
                remove_tree(&workspace.path).await
            }
        }
    }

    pub async fn exists(&self, job_id: &str) -> bool {
        match self.workspace(job_id) {
            Ok(workspace) => tokio::fs::try_exists(&workspace.path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
