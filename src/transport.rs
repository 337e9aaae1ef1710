// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared plumbing for the queue and result-store adapters
//!
//! Endpoints are plain strings in configuration:
//! - `memory:` - in-process backend
//! - `file:///dir` or a bare path - local directory
//! - `http://...` / `https://...` - remote service

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Queue or result store could not be reached or refused the request
///
/// Never fatal to the worker loop: the next poll or a redelivery retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("HTTP {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("Unknown or superseded lease: {0}")]
    UnknownLease(String),

    #[error("Unsupported endpoint: {0:?}")]
    UnsupportedEndpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn unreachable(endpoint: impl Into<String>, err: reqwest::Error) -> Self {
        TransportError::Unreachable {
            endpoint: endpoint.into(),
            reason: err.to_string(),
        }
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Unreachable { .. } => "UNREACHABLE",
            TransportError::HttpStatus { .. } => "HTTP_STATUS",
            TransportError::UnknownLease(_) => "UNKNOWN_LEASE",
            TransportError::UnsupportedEndpoint(_) => "UNSUPPORTED_ENDPOINT",
            TransportError::Serialization(_) => "SERIALIZATION",
            TransportError::Io(_) => "IO_ERROR",
        }
    }
}

/// Parsed backend location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Memory,
    Directory(PathBuf),
    Http(Url),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::UnsupportedEndpoint(s.to_string()));
        }

        match Url::parse(s) {
            Ok(url) => match url.scheme() {
                "memory" => Ok(Endpoint::Memory),
                "http" | "https" => Ok(Endpoint::Http(url)),
                "file" => url
                    .to_file_path()
                    .map(Endpoint::Directory)
                    .map_err(|_| TransportError::UnsupportedEndpoint(s.to_string())),
                _ => Err(TransportError::UnsupportedEndpoint(s.to_string())),
            },
            // Relative and absolute paths are not URLs
            Err(_) => Ok(Endpoint::Directory(PathBuf::from(s))),
        }
    }
}

/// Join `segments` onto `base`, keeping any path prefix the base already has
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::UnsupportedEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
