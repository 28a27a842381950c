//! ==============================================================================
//! schema.rs - keeps the store's columns in step with the reporting sensors
//! ==============================================================================
//!
//! purpose:
//!     the store file can't grow a column in place. when a batch brings a
//!     series the store has never seen, the whole store is exported, the new
//!     columns are added to the dump and a fresh file is built from it.
//!
//! states:
//!
//! ```text
//!     Absent  --ensure_store(batch)-->  Present(names(batch))
//!     Present(C) --ensure_store(batch), batch ⊆ C-->  Present(C)        (no I/O write)
//!     Present(C) --ensure_store(batch)-->  Present(C ++ missing)        (migration)
//! ```
//!
//! migration:
//!     1. export   full dump of the live file
//!     2. edit     append column defs, placeholder accumulators, unknown cells
//!     3. rebuild  write a new file at <store>.migrating
//!     4. verify   re-read the staged schema
//!     5. replace  rename over the live file
//!
//! ```text
//!     the live file is never written before step 5, and rename swaps the
//!     whole file, so readers see the old store or the new one. any failure
//!     is returned as MonitorError::Migration, which stops the monitor.
//! ```
//!
//! relationships:
//!     - used by: monitor.rs (every cycle, before writer.rs)
//!     - uses: rrd (RoundRobinStore primitives)
//!
//! ==============================================================================

use crate::config::{DataSourceDefaults, MonitorConfig};
use crate::domain::ReadingBatch;
use crate::error::{MigrationStage, MonitorError, Result};
use crate::rrd::{ArchiveDef, DataSource, RoundRobinStore, StoreError, StoreSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// seconds the empty store's last-update time sits before the creating cycle
const CREATE_START_OFFSET: i64 = 10;

/// whether a store file exists yet
#[derive(Debug, Clone, PartialEq)]
pub enum StoreState {
    Absent,
    Present(Vec<DataSource>),
}

/// what [`SchemaManager::ensure_store`] had to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created(Vec<String>),
    Unchanged,
    Migrated { added: Vec<String> },
}

pub struct SchemaManager {
    store: Arc<dyn RoundRobinStore>,
    path: PathBuf,
    step_secs: u64,
    defaults: DataSourceDefaults,
    archives: Vec<ArchiveDef>,
}

impl SchemaManager {
    pub fn new(
        store: Arc<dyn RoundRobinStore>,
        path: impl Into<PathBuf>,
        step_secs: u64,
        defaults: DataSourceDefaults,
        archives: Vec<ArchiveDef>,
    ) -> Self {
        Self { store, path: path.into(), step_secs, defaults, archives }
    }

    pub fn from_config(store: Arc<dyn RoundRobinStore>, config: &MonitorConfig) -> Self {
        Self::new(
            store,
            config.store.path.clone(),
            config.store.step_seconds,
            config.store.data_source.clone(),
            config.archives.clone(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> Result<StoreState> {
        match self.store.read_schema(&self.path) {
            Ok(columns) => Ok(StoreState::Present(columns)),
            Err(StoreError::NotFound(_)) => Ok(StoreState::Absent),
            Err(source) => Err(MonitorError::Schema { path: self.path.clone(), source }),
        }
    }

    /// make sure every series in `batch` has a column. `now` is the cycle
    /// time; a freshly created store accepts samples from just before it.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn ensure_store(&self, batch: &ReadingBatch, now: i64) -> Result<EnsureOutcome> {
        let current = match self.state()? {
            StoreState::Absent => return self.create(batch, now),
            StoreState::Present(columns) => columns,
        };

        let missing: Vec<String> = batch
            .names()
            .filter(|name| !current.iter().any(|ds| ds.name == *name))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            debug!("store schema already covers the batch");
            return Ok(EnsureOutcome::Unchanged);
        }

        info!(added = ?missing, "new series reported, migrating store");
        self.migrate(&current, &missing)?;
        Ok(EnsureOutcome::Migrated { added: missing })
    }

    fn create(&self, batch: &ReadingBatch, now: i64) -> Result<EnsureOutcome> {
        let names: Vec<String> = batch.names().map(str::to_string).collect();
        info!(columns = ?names, "creating store");
        let spec = StoreSpec {
            step_secs: self.step_secs,
            start: now - CREATE_START_OFFSET,
            data_sources: names.iter().map(|n| self.defaults.data_source(n)).collect(),
            archives: self.archives.clone(),
        };
        self.store
            .create(&self.path, &spec)
            .map_err(|source| MonitorError::StoreCreation { path: self.path.clone(), source })?;
        Ok(EnsureOutcome::Created(names))
    }

    fn migrate(&self, current: &[DataSource], missing: &[String]) -> Result<()> {
        let fail = |stage: MigrationStage| {
            let path = self.path.clone();
            move |source: StoreError| MonitorError::Migration { path, stage, source }
        };

        let mut dump = self.store.export_full(&self.path).map_err(fail(MigrationStage::Export))?;
        let rows: usize = dump.archives.iter().map(|a| a.rows.len()).sum();
        debug!(archives = dump.archives.len(), rows, "exported store");

        for name in missing {
            dump.add_column(self.defaults.data_source(name));
        }
        dump.validate().map_err(fail(MigrationStage::Edit))?;

        let expected: Vec<String> = current
            .iter()
            .map(|ds| ds.name.clone())
            .chain(missing.iter().cloned())
            .collect();

        let staging = crate::rrd::staging_path(&self.path);
        let staged = (|| -> Result<()> {
            self.store.rebuild_from_dump(&dump, &staging).map_err(fail(MigrationStage::Rebuild))?;
            let rebuilt = self.store.read_schema(&staging).map_err(fail(MigrationStage::Verify))?;
            check_columns(&expected, &rebuilt).map_err(fail(MigrationStage::Verify))?;
            fs::rename(&staging, &self.path)
                .map_err(|e| StoreError::io(&staging, e))
                .map_err(fail(MigrationStage::Replace))
        })();
        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_file(&staging) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(staging = %staging.display(), "could not remove staging file: {}", cleanup);
                }
            }
            return Err(e);
        }

        let after = self.store.read_schema(&self.path).map_err(fail(MigrationStage::Verify))?;
        check_columns(&expected, &after).map_err(fail(MigrationStage::Verify))?;
        info!(columns = ?expected, "store migrated");
        Ok(())
    }
}

fn check_columns(expected: &[String], found: &[DataSource]) -> std::result::Result<(), StoreError> {
    let found: Vec<String> = found.iter().map(|ds| ds.name.clone()).collect();
    if found != expected {
        return Err(StoreError::SchemaMismatch { expected: expected.to_vec(), found });
    }
    Ok(())
}
