//! Sensor polling into a round-robin database whose columns grow with the
//! set of reporting sensors.

pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod rrd;
pub mod schema;
pub mod sensor;
pub mod writer;

pub use config::MonitorConfig;
pub use domain::ReadingBatch;
pub use error::{FetchError, MigrationStage, MonitorError};
pub use monitor::{CycleReport, Monitor};
pub use schema::{EnsureOutcome, SchemaManager, StoreState};
pub use writer::StoreWriter;
