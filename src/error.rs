//! Error types for the monitor.
//!
//! Sensor errors are always recovered where they happen. Cycle errors carry
//! their own severity: see [`MonitorError::is_fatal`].

use crate::rrd::StoreError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read one sensor server.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an unreadable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} did not return a JSON object")]
    NotAnObject { url: String },
}

/// Step of the column migration that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    Export,
    Edit,
    Rebuild,
    Verify,
    Replace,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Export => "export",
            Self::Edit => "edit",
            Self::Rebuild => "rebuild",
            Self::Verify => "verify",
            Self::Replace => "replace",
        };
        f.write_str(s)
    }
}

/// Errors from one polling cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to create store {path:?}: {source}")]
    StoreCreation {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("failed to read schema of store {path:?}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("migration of store {path:?} failed during {stage}: {source}")]
    Migration {
        path: PathBuf,
        stage: MigrationStage,
        #[source]
        source: StoreError,
    },

    #[error("failed to append sample to store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("store task failed: {0}")]
    Task(String),
}

impl MonitorError {
    /// fatal errors stop the process. creation is retried next cycle and a
    /// failed write only loses that cycle's sample.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StoreCreation { .. } | Self::Write { .. })
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
