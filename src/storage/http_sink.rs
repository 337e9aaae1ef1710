// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP document-store adapter: `PUT {base}/results/{job id}` with the JSON record

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::result_sink::ResultSink;
use crate::job::ResultRecord;
use crate::transport::{join_url, TransportError};

pub struct HttpResultSink {
    client: Client,
    base: Url,
}

impl HttpResultSink {
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fontdetective-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::unreachable(base.as_str(), e))?;

        Ok(Self { client, base })
    }

    fn record_url(&self, job_id: &str) -> Result<Url, TransportError> {
        join_url(&self.base, &["results", job_id])
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<(), TransportError> {
        let url = self.record_url(job_id)?;
        let body = record.to_json()?;

        debug!("📤 PUT {} ({} bytes)", url, body.len());
        let response = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::unreachable(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                endpoint: url.to_string(),
            });
        }
        Ok(())
    }

    fn location(&self, job_id: &str) -> String {
        match self.record_url(job_id) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/results/{}", self.base, job_id),
        }
    }
}
