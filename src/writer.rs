//! appends one row per cycle, laid out in the store's column order.

use crate::domain::ReadingBatch;
use crate::error::{MonitorError, Result};
use crate::rrd::{DataSource, RoundRobinStore, StoreError, UNKNOWN};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct StoreWriter {
    store: Arc<dyn RoundRobinStore>,
    path: PathBuf,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn RoundRobinStore>, path: impl Into<PathBuf>) -> Self {
        Self { store, path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// append `batch` as the sample for `timestamp` and return the row that
    /// was written. columns the batch does not mention get the unknown
    /// marker.
    pub fn write(&self, batch: &ReadingBatch, timestamp: i64) -> Result<Vec<f64>> {
        let fail = |source: StoreError| MonitorError::Write { path: self.path.clone(), source };

        let columns = self.store.read_schema(&self.path).map_err(fail)?;
        let row = build_row(&columns, batch).map_err(fail)?;
        self.store.append(&self.path, timestamp, &row).map_err(fail)?;

        debug!(timestamp, values = ?row, "sample written");
        Ok(row)
    }
}

/// values of `batch` in column order. every batch series must have a column.
pub fn build_row(columns: &[DataSource], batch: &ReadingBatch) -> std::result::Result<Vec<f64>, StoreError> {
    if let Some(stray) = batch.names().find(|n| !columns.iter().any(|ds| ds.name == *n)) {
        return Err(StoreError::UnknownDataSource(stray.to_string()));
    }
    Ok(columns.iter().map(|ds| batch.get(&ds.name).unwrap_or(UNKNOWN)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rrd::{
        is_unknown, ArchiveDef, Consolidation, RrdFile, StoreSpec, DEFAULT_HEARTBEAT_SECS,
    };
    use tempfile::TempDir;

    fn columns(names: &[&str]) -> Vec<DataSource> {
        names
            .iter()
            .map(|n| DataSource::gauge(*n, DEFAULT_HEARTBEAT_SECS, -100.0, 100.0))
            .collect()
    }

    #[test]
    fn test_missing_series_become_unknown() {
        let batch: ReadingBatch = [("a", 5.0)].into_iter().collect();
        let row = build_row(&columns(&["a", "b", "c"]), &batch).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row[0], 5.0);
        assert!(is_unknown(row[1]) && is_unknown(row[2]));
    }

    #[test]
    fn test_row_follows_column_order_not_batch_order() {
        let batch: ReadingBatch = [("a", 1.0), ("z", 26.0)].into_iter().collect();
        let row = build_row(&columns(&["z", "a"]), &batch).unwrap();
        assert_eq!(row, vec![26.0, 1.0]);
    }

    #[test]
    fn test_series_without_column_is_rejected() {
        let batch: ReadingBatch = [("a", 1.0), ("new", 2.0)].into_iter().collect();
        let err = build_row(&columns(&["a"]), &batch).unwrap_err();
        assert!(matches!(err, StoreError::UnknownDataSource(name) if name == "new"));
    }

    #[test]
    fn test_write_appends_and_reports_failures() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("temps.rrd");
        let store = Arc::new(RrdFile::new());
        store
            .create(
                &path,
                &StoreSpec {
                    step_secs: 300,
                    start: 0,
                    data_sources: columns(&["a", "b", "c"]),
                    archives: vec![ArchiveDef {
                        cf: Consolidation::Average,
                        xff: 0.5,
                        steps: 1,
                        rows: 5,
                    }],
                },
            )
            .unwrap();

        let writer = StoreWriter::new(store.clone(), &path);
        let batch: ReadingBatch = [("a", 5.0)].into_iter().collect();
        writer.write(&batch, 300).unwrap();

        let rows = store.export_full(&path).unwrap().archives[0].rows.clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], 5.0);
        assert!(is_unknown(rows[0][1]) && is_unknown(rows[0][2]));

        // same timestamp again: the store refuses and the writer says so
        let err = writer.write(&batch, 300).unwrap_err();
        assert!(matches!(err, MonitorError::Write { .. }));
        assert!(!err.is_fatal());
    }
}
