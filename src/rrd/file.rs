//! file-backed [`RoundRobinStore`]. every write builds the complete new file
//! next to the target and renames it into place.

use super::dump::StoreDump;
use super::engine::{Database, FetchResult, StoreInfo};
use super::format;
use super::{Consolidation, DataSource, RoundRobinStore, StoreError, StoreResult, StoreSpec};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct RrdFile;

impl RrdFile {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, path: &Path) -> StoreResult<Database> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        format::decode(path, &bytes)
    }

    pub fn save(&self, path: &Path, db: &Database) -> StoreResult<()> {
        write_atomic(path, &format::encode(db))
    }

    pub fn info(&self, path: &Path) -> StoreResult<StoreInfo> {
        Ok(self.load(path)?.info())
    }

    /// read side for graph rendering
    pub fn fetch(
        &self,
        path: &Path,
        cf: Consolidation,
        start: i64,
        end: i64,
    ) -> StoreResult<Option<FetchResult>> {
        Ok(self.load(path)?.fetch(cf, start, end))
    }
}

impl RoundRobinStore for RrdFile {
    fn create(&self, path: &Path, spec: &StoreSpec) -> StoreResult<()> {
        let db = Database::new(spec)?;
        debug!(
            path = %path.display(),
            sources = spec.data_sources.len(),
            archives = spec.archives.len(),
            "creating store file"
        );
        self.save(path, &db)
    }

    fn read_schema(&self, path: &Path) -> StoreResult<Vec<DataSource>> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        format::decode_schema(path, &bytes)
    }

    fn append(&self, path: &Path, timestamp: i64, values: &[f64]) -> StoreResult<()> {
        let mut db = self.load(path)?;
        db.update(timestamp, values)?;
        self.save(path, &db)
    }

    fn export_full(&self, path: &Path) -> StoreResult<StoreDump> {
        Ok(self.load(path)?.to_dump())
    }

    fn rebuild_from_dump(&self, dump: &StoreDump, path: &Path) -> StoreResult<()> {
        let db = Database::from_dump(dump)?;
        self.save(path, &db)
    }
}

/// sibling path used while a file is being written
pub(crate) fn temp_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = temp_path(path, ".tmp");
    let result = (|| -> std::io::Result<()> {
        let mut file =
            OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                debug!(tmp = %tmp.display(), "could not remove temporary file: {}", cleanup);
            }
        }
        return Err(StoreError::Io { path: path.to_path_buf(), source: e });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rrd::{is_unknown, ArchiveDef, DEFAULT_HEARTBEAT_SECS};
    use tempfile::TempDir;

    fn spec(names: &[&str]) -> StoreSpec {
        StoreSpec {
            step_secs: 300,
            start: 0,
            data_sources: names
                .iter()
                .map(|n| DataSource::gauge(*n, DEFAULT_HEARTBEAT_SECS, -100.0, 100.0))
                .collect(),
            archives: vec![ArchiveDef { cf: Consolidation::Average, xff: 0.5, steps: 1, rows: 8 }],
        }
    }

    #[test]
    fn test_create_append_export() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("temps.rrd");
        let store = RrdFile::new();

        store.create(&path, &spec(&["t1", "t2"])).unwrap();
        store.append(&path, 300, &[21.7, 19.0]).unwrap();
        store.append(&path, 600, &[21.9, f64::NAN]).unwrap();

        let names: Vec<String> =
            store.read_schema(&path).unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["t1", "t2"]);

        let dump = store.export_full(&path).unwrap();
        let rows = &dump.archives[0].rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![21.7, 19.0]);
        assert_eq!(rows[1][0], 21.9);
        assert!(is_unknown(rows[1][1]));
        assert!(!temp_path(&path, ".tmp").exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = RrdFile::new().read_schema(&dir.path().join("nope.rrd")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_failed_append_leaves_file_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("temps.rrd");
        let store = RrdFile::new();
        store.create(&path, &spec(&["t1"])).unwrap();
        store.append(&path, 300, &[1.0]).unwrap();
        let before = fs::read(&path).unwrap();

        assert!(store.append(&path, 300, &[2.0]).is_err());
        assert!(store.append(&path, 600, &[2.0, 3.0]).is_err());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_fetch_and_info() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("temps.rrd");
        let store = RrdFile::new();
        store.create(&path, &spec(&["t1"])).unwrap();
        for i in 1..=3 {
            store.append(&path, i * 300, &[i as f64]).unwrap();
        }
        let info = store.info(&path).unwrap();
        assert_eq!(info.last_update, 900);
        assert_eq!(info.archives[0].filled_rows, 3);

        let fetched = store.fetch(&path, Consolidation::Average, 600, 900).unwrap().unwrap();
        assert_eq!(fetched.rows, vec![(600, vec![2.0]), (900, vec![3.0])]);
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let dir = TempDir::new().expect("tempdir");
        // a directory at the target path makes the final rename fail
        let path = dir.path().join("temps.rrd");
        fs::create_dir(&path).unwrap();

        let err = RrdFile::new().create(&path, &spec(&["t1"])).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!temp_path(&path, ".tmp").exists());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = temp_path(Path::new("/var/lib/monitor/temps.rrd"), ".migrating");
        assert_eq!(p, Path::new("/var/lib/monitor/temps.rrd.migrating"));
    }
}
