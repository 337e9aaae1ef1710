// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Source image fetching
//!
//! Downloads the job's `url` into its workspace. `http(s)` goes through reqwest
//! with a per-request timeout and a body size cap; `file://` is read from local
//! disk, which is what local runs and tests use. Either way the bytes must sniff as
//! a known image format before anything lands at the destination.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::vision::image_utils::{detect_format, format_to_extension};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Timeout fetching: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status} for: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Source image exceeds {max} bytes: {url}")]
    TooLarge { url: String, max: usize },

    #[error("Not a recognised image: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "INVALID_URL",
            FetchError::Timeout(_) => "TIMEOUT",
            FetchError::Http(_) => "HTTP_ERROR",
            FetchError::HttpStatus { .. } => "HTTP_STATUS",
            FetchError::TooLarge { .. } => "TOO_LARGE",
            FetchError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            FetchError::Io { .. } => "IO_ERROR",
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Retrieve `url` and store it at `destination`
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError>;
}

/// Fetcher for `http`, `https` and `file` URLs
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fontdetective-worker/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self { client, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let map_request_error = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Http(e.to_string())
            }
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            max: self.max_bytes,
        };
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(too_large());
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_request_error)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn read_local(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let path = url.to_file_path().map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "not a local file path".to_string(),
        })?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| FetchError::io(&path, e))?;
        if metadata.len() > self.max_bytes as u64 {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                max: self.max_bytes,
            });
        }

        tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::io(&path, e))
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Fetching source image from: {}", parsed);
        let bytes = match parsed.scheme() {
            "http" | "https" => self.download(&parsed).await?,
            "file" => self.read_local(&parsed).await?,
            other => {
                return Err(FetchError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {:?}", other),
                })
            }
        };

        let format =
            detect_format(&bytes).map_err(|_| FetchError::UnsupportedFormat(url.to_string()))?;

        // Partial downloads never appear under the final name
        let partial = destination.with_extension("part");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| FetchError::io(&partial, e))?;
        tokio::fs::rename(&partial, destination)
            .await
            .map_err(|e| FetchError::io(destination, e))?;

        info!(
            "📥 Fetched {} bytes ({}) from: {}",
            bytes.len(),
            format_to_extension(format),
            url
        );
        Ok(())
    }
}
