// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Result record persistence
//!
//! A sink stores one [`ResultRecord`] per job id. `put` must be a single atomic
//! write: either the whole record lands or nothing does, so a retried job can
//! simply write again.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::fs_sink::FsResultSink;
use super::http_sink::HttpResultSink;
use crate::job::ResultRecord;
use crate::transport::{Endpoint, TransportError};

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the full record for `job_id`, replacing any earlier one
    async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<(), TransportError>;

    /// Where the record for `job_id` can be read back
    fn location(&self, job_id: &str) -> String;
}

/// Statistics about result storage
#[derive(Debug, Clone, Default)]
pub struct ResultSinkStats {
    pub total_records: usize,
    pub puts: u64,
    pub overwrites: u64,
}

/// In-memory result storage
#[derive(Clone)]
pub struct MemoryResultSink {
    records: Arc<RwLock<HashMap<String, ResultRecord>>>,
    stats: Arc<RwLock<ResultSinkStats>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ResultSinkStats::default())),
        }
    }

    /// Retrieve the record for a job
    pub async fn get(&self, job_id: &str) -> Option<ResultRecord> {
        self.records.read().await.get(job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn stats(&self) -> ResultSinkStats {
        self.stats.read().await.clone()
    }

    /// Get all job IDs with stored records
    pub async fn list_jobs(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryResultSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<(), TransportError> {
        debug!("📥 Storing result for job {}", job_id);

        let mut records = self.records.write().await;
        let replaced = records.insert(job_id.to_string(), record.clone()).is_some();

        let mut stats = self.stats.write().await;
        stats.total_records = records.len();
        stats.puts += 1;
        if replaced {
            stats.overwrites += 1;
        }

        Ok(())
    }

    fn location(&self, job_id: &str) -> String {
        format!("memory:{}", job_id)
    }
}

/// Build a result sink for a configured endpoint
pub fn connect_result_sink(
    endpoint: &str,
    request_timeout: Duration,
) -> Result<Arc<dyn ResultSink>, TransportError> {
    match endpoint.parse::<Endpoint>()? {
        Endpoint::Memory => {
            info!("🗄️ Using in-process result store");
            Ok(Arc::new(MemoryResultSink::new()))
        }
        Endpoint::Directory(dir) => {
            info!("🗄️ Writing results to {}", dir.display());
            Ok(Arc::new(FsResultSink::new(dir)))
        }
        Endpoint::Http(base) => {
            info!("🗄️ Sending results to {}", base);
            Ok(Arc::new(HttpResultSink::new(base, request_timeout)?))
        }
    }
}
