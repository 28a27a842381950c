//! ==============================================================================
//! rrd/mod.rs - round-robin database primitives
//! ==============================================================================
//!
//! purpose:
//!     a small, self-contained round-robin time-series database. a store file
//!     holds an ordered list of data sources (columns) and a fixed set of
//!     archives, each archive being a ring of consolidated rows.
//!
//! structure:
//!     - mod.rs:    column/archive definitions, errors, the RoundRobinStore seam
//!     - engine.rs: in-memory database and the update/consolidation rules
//!     - format.rs: binary on-disk encoding
//!     - dump.rs:   structured full export used by schema migrations
//!     - file.rs:   RrdFile, the file-backed RoundRobinStore
//!
//! relationships:
//!     - used by: schema.rs (create / read_schema / export_full / rebuild_from_dump)
//!     - used by: writer.rs (append)
//!
//! ==============================================================================

mod dump;
mod engine;
mod file;
mod format;

pub use dump::{ArchiveDump, StoreDump};
pub use engine::{Accumulator, Database, FetchResult, StoreInfo};
pub use file::RrdFile;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// value recorded for "no data". never equal to itself, so always test with
/// [`is_unknown`].
pub const UNKNOWN: f64 = f64::NAN;

/// default heartbeat (seconds without an update before a column goes stale)
pub const DEFAULT_HEARTBEAT_SECS: u64 = 600;
pub const DEFAULT_MIN: f64 = -100.0;
pub const DEFAULT_MAX: f64 = 100.0;

/// longest data source name accepted
pub const MAX_NAME_LEN: usize = 19;

/// where a migrated store is built before it replaces `path`
pub fn staging_path(path: &Path) -> PathBuf {
    file::temp_path(path, ".migrating")
}

pub fn is_unknown(value: f64) -> bool {
    value.is_nan()
}

/// data source names follow the classic rrd rule: 1-19 chars of [A-Za-z0-9_]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is not a valid store file: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("store file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("illegal update time {timestamp}: last update was {last_update}")]
    IllegalUpdate { timestamp: i64, last_update: i64 },

    #[error("expected {expected} values, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("invalid store definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid dump: {0}")]
    InvalidDump(String),

    #[error("schema mismatch: expected columns {expected:?}, found {found:?}")]
    SchemaMismatch { expected: Vec<String>, found: Vec<String> },

    #[error("store has no column named '{0}'")]
    UnknownDataSource(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.to_path_buf());
        }
        Self::Io { path: path.to_path_buf(), source }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ==============================================================================
// definitions
// ==============================================================================

/// kind of a data source. only gauges are produced by the monitor, but the
/// tag is stored on disk so other kinds can be added without a format bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Gauge,
}

/// a column of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub kind: SourceKind,
    pub heartbeat_secs: u64,
    pub min: f64,
    pub max: f64,
}

impl DataSource {
    pub fn gauge(name: impl Into<String>, heartbeat_secs: u64, min: f64, max: f64) -> Self {
        Self { name: name.into(), kind: SourceKind::Gauge, heartbeat_secs, min, max }
    }

    /// out-of-range and non-finite values are recorded as unknown
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() || value < self.min || value > self.max {
            UNKNOWN
        } else {
            value
        }
    }
}

/// consolidation function of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Consolidation {
    Average,
    Min,
    Max,
    Last,
}

impl Consolidation {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Average => 0,
            Self::Min => 1,
            Self::Max => 2,
            Self::Last => 3,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Average),
            1 => Some(Self::Min),
            2 => Some(Self::Max),
            3 => Some(Self::Last),
            _ => None,
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        };
        f.write_str(s)
    }
}

/// retention policy of one archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDef {
    #[serde(rename = "type")]
    pub cf: Consolidation,
    /// fraction of unknown samples a row may contain and still be known
    pub xff: f64,
    /// primary steps consolidated into one row
    pub steps: u32,
    /// ring capacity
    pub rows: u32,
}

impl ArchiveDef {
    pub fn validate(&self) -> StoreResult<()> {
        if !(0.0..1.0).contains(&self.xff) {
            return Err(StoreError::InvalidDefinition(format!(
                "xff must be in [0, 1), got {}",
                self.xff
            )));
        }
        if self.steps == 0 || self.rows == 0 {
            return Err(StoreError::InvalidDefinition(format!(
                "archive {}:{}:{} needs steps and rows greater than zero",
                self.cf, self.steps, self.rows
            )));
        }
        Ok(())
    }

    /// seconds of history the archive holds at `step_secs`, if that fits a
    /// timestamp
    pub fn span_secs(&self, step_secs: u64) -> Option<i64> {
        step_secs
            .checked_mul(u64::from(self.steps))?
            .checked_mul(u64::from(self.rows))
            .and_then(|span| i64::try_from(span).ok())
    }
}

/// everything needed to create a fresh store file
#[derive(Debug, Clone)]
pub struct StoreSpec {
    pub step_secs: u64,
    /// last-update time of the empty store; first append must be later
    pub start: i64,
    pub data_sources: Vec<DataSource>,
    pub archives: Vec<ArchiveDef>,
}

// ==============================================================================
// the storage seam
// ==============================================================================

/// primitive operations the schema manager and writer depend on.
///
/// every mutating call must leave `path` either fully old or fully new.
pub trait RoundRobinStore: Send + Sync {
    fn create(&self, path: &Path, spec: &StoreSpec) -> StoreResult<()>;
    fn read_schema(&self, path: &Path) -> StoreResult<Vec<DataSource>>;
    fn append(&self, path: &Path, timestamp: i64, values: &[f64]) -> StoreResult<()>;
    fn export_full(&self, path: &Path) -> StoreResult<StoreDump>;
    fn rebuild_from_dump(&self, dump: &StoreDump, path: &Path) -> StoreResult<()>;
}
