// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Directory-backed result store
//!
//! Records land at `<dir>/<job id>.json`. Each write goes to a temp file in the same
//! directory and is renamed into place, so readers never see a half-written record.

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::result_sink::ResultSink;
use crate::job::ResultRecord;
use crate::transport::TransportError;

pub struct FsResultSink {
    directory: PathBuf,
}

impl FsResultSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_path(&self, job_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", job_id))
    }
}

fn write_atomically(directory: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(directory)?;
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(target)?;
    Ok(())
}

#[async_trait]
impl ResultSink for FsResultSink {
    async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<(), TransportError> {
        let bytes = record.to_json()?;
        let directory = self.directory.clone();
        let target = self.record_path(job_id);

        debug!("📝 Writing {} bytes to {}", bytes.len(), target.display());
        tokio::task::spawn_blocking(move || write_atomically(&directory, &target, &bytes))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        Ok(())
    }

    fn location(&self, job_id: &str) -> String {
        self.record_path(job_id).display().to_string()
    }
}
