use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    DEFAULT_HOST, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How request boundaries are found in the inbound byte stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Newline-terminated requests, reassembled across reads.
    #[default]
    Line,
    /// Every successful read is one request. Responses carry no terminator.
    Read,
}

impl std::str::FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(FramingMode::Line),
            "read" => Ok(FramingMode::Read),
            other => Err(format!("unknown framing '{other}', expected 'line' or 'read'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub framing: FramingMode,
    pub read_buffer_size: usize,
    pub max_request_bytes: usize,
    /// `0` runs requests inline on the event-loop thread.
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
    pub events_capacity: usize,
    /// Requests between summary log lines; `0` disables them.
    pub summary_every: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            framing: FramingMode::Line,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            workers: 2,
            queue_capacity: 64,
            request_timeout_ms: 30_000,
            events_capacity: 1024,
            summary_every: 100,
        }
    }
}

impl ServerConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("read_buffer_size", self.read_buffer_size as u64),
            ("max_request_bytes", self.max_request_bytes as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("events_capacity", self.events_capacity as u64),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be >= 1")));
            }
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
