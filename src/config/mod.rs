// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Worker configuration
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML file,
//! `FONTDETECTIVE_*` environment variables, then command-line flags (applied by the
//! CLI after loading).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::PollSettings;
use crate::vision::image_utils::MAX_IMAGE_SIZE;
use crate::vision::DetectionParams;

/// Prefix for every environment override
pub const ENV_PREFIX: &str = "FONTDETECTIVE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// `memory:` or an `http(s)://` queue service
    pub queue_endpoint: String,
    /// `memory:`, a directory (bare path or `file://`), or an `http(s)://` store
    pub result_store_endpoint: String,
    /// Parent of the per-job scratch directories
    pub working_root: PathBuf,
    /// Directory of detector templates
    pub detector_directory: PathBuf,
    pub receive_wait_secs: u64,
    pub lease_secs: u64,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub max_concurrent_detectors: usize,
    /// Per-request timeout for fetching and for the HTTP adapters
    pub fetch_timeout_secs: u64,
    pub max_image_bytes: usize,
    pub match_threshold: f32,
    pub max_matches: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_endpoint: "memory:".to_string(),
            result_store_endpoint: "./results".to_string(),
            working_root: std::env::temp_dir().join("fontdetective"),
            detector_directory: PathBuf::from("./detectors"),
            receive_wait_secs: 3,
            lease_secs: 60,
            idle_backoff_ms: 0,
            error_backoff_ms: 1000,
            max_concurrent_detectors: 4,
            fetch_timeout_secs: 30,
            max_image_bytes: MAX_IMAGE_SIZE,
            match_threshold: 0.9,
            max_matches: 32,
        }
    }
}

impl WorkerConfig {
    /// Defaults overlaid with a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply `FONTDETECTIVE_<FIELD>` overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let var = format!("{}{}", ENV_PREFIX, name);
            lookup(&var).map(|value| (var, value))
        };

        if let Some((_, v)) = get("QUEUE_ENDPOINT") {
            self.queue_endpoint = v;
        }
        if let Some((_, v)) = get("RESULT_STORE_ENDPOINT") {
            self.result_store_endpoint = v;
        }
        if let Some((_, v)) = get("WORKING_ROOT") {
            self.working_root = PathBuf::from(v);
        }
        if let Some((_, v)) = get("DETECTOR_DIRECTORY") {
            self.detector_directory = PathBuf::from(v);
        }

        apply_parsed(get("RECEIVE_WAIT_SECS"), &mut self.receive_wait_secs)?;
        apply_parsed(get("LEASE_SECS"), &mut self.lease_secs)?;
        apply_parsed(get("IDLE_BACKOFF_MS"), &mut self.idle_backoff_ms)?;
        apply_parsed(get("ERROR_BACKOFF_MS"), &mut self.error_backoff_ms)?;
        apply_parsed(
            get("MAX_CONCURRENT_DETECTORS"),
            &mut self.max_concurrent_detectors,
        )?;
        apply_parsed(get("FETCH_TIMEOUT_SECS"), &mut self.fetch_timeout_secs)?;
        apply_parsed(get("MAX_IMAGE_BYTES"), &mut self.max_image_bytes)?;
        apply_parsed(get("MATCH_THRESHOLD"), &mut self.match_threshold)?;
        apply_parsed(get("MAX_MATCHES"), &mut self.max_matches)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("queue_endpoint is empty".to_string()));
        }
        if self.result_store_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "result_store_endpoint is empty".to_string(),
            ));
        }
        if self.working_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("working_root is empty".to_string()));
        }
        if self.lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "lease_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_detectors == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_detectors must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            lease: Duration::from_secs(self.lease_secs),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            threshold: self.match_threshold,
            max_matches: self.max_matches,
            max_image_bytes: self.max_image_bytes,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Render as TOML, as accepted by [`WorkerConfig::from_file`]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn apply_parsed<T: std::str::FromStr>(
    entry: Option<(String, String)>,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some((var, value)) = entry {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}
