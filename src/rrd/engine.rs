//! in-memory form of a store file and the rules for folding samples into
//! archive rows.

use super::{
    is_unknown, is_valid_name, ArchiveDef, Consolidation, DataSource, StoreError, StoreResult,
    StoreSpec, UNKNOWN,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ==============================================================================
// accumulator
// ==============================================================================

/// consolidation state of one column inside the archive's current row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    #[serde(with = "super::dump::unknown_as_null")]
    pub value: f64,
    pub known: u32,
    pub unknown: u32,
}

impl Accumulator {
    pub fn empty() -> Self {
        Self { value: UNKNOWN, known: 0, unknown: 0 }
    }

    /// state for a column that did not exist while the first `pending`
    /// samples of the current row were folded in
    pub fn placeholder(pending: u32) -> Self {
        Self { value: UNKNOWN, known: 0, unknown: pending }
    }

    pub fn samples(&self) -> u32 {
        self.known + self.unknown
    }

    fn fold(&mut self, cf: Consolidation, sample: f64) {
        if is_unknown(sample) {
            self.unknown += 1;
            return;
        }
        if self.known == 0 {
            self.value = sample;
        } else {
            self.value = match cf {
                Consolidation::Average => self.value + sample,
                Consolidation::Min => self.value.min(sample),
                Consolidation::Max => self.value.max(sample),
                Consolidation::Last => sample,
            };
        }
        self.known += 1;
    }

    fn consolidate(&self, cf: Consolidation, xff: f64) -> f64 {
        if self.known == 0 {
            return UNKNOWN;
        }
        if f64::from(self.unknown) / f64::from(self.samples()) > xff {
            return UNKNOWN;
        }
        match cf {
            Consolidation::Average => self.value / f64::from(self.known),
            _ => self.value,
        }
    }
}

// ==============================================================================
// archive
// ==============================================================================

#[derive(Debug, Clone)]
pub(super) struct Archive {
    pub(super) def: ArchiveDef,
    /// ring index of the newest row
    pub(super) cur_row: u32,
    pub(super) filled: u32,
    pub(super) accumulators: Vec<Accumulator>,
    /// `def.rows * width` values, row-major
    pub(super) data: Vec<f64>,
}

impl Archive {
    pub(super) fn new(def: ArchiveDef, width: usize) -> Self {
        let data = vec![UNKNOWN; def.rows as usize * width];
        Self { def, cur_row: 0, filled: 0, accumulators: vec![Accumulator::empty(); width], data }
    }

    fn width(&self) -> usize {
        self.accumulators.len()
    }

    /// seconds covered by one row
    pub(super) fn bucket_secs(&self, step_secs: u64) -> i64 {
        (step_secs * u64::from(self.def.steps)) as i64
    }

    fn row_mut(&mut self, index: u32) -> &mut [f64] {
        let width = self.width();
        let start = index as usize * width;
        &mut self.data[start..start + width]
    }

    pub(super) fn row(&self, index: u32) -> &[f64] {
        let width = self.width();
        let start = index as usize * width;
        &self.data[start..start + width]
    }

    /// rows oldest-first
    pub(super) fn chronological(&self) -> impl Iterator<Item = &[f64]> + '_ {
        let rows = self.def.rows;
        let oldest = if self.filled < rows { 0 } else { (self.cur_row + 1) % rows };
        (0..self.filled).map(move |i| self.row((oldest + i) % rows))
    }

    fn reset(&mut self) {
        self.accumulators.iter_mut().for_each(|a| *a = Accumulator::empty());
    }

    fn open_row(&mut self) {
        self.cur_row = if self.filled == 0 { 0 } else { (self.cur_row + 1) % self.def.rows };
        self.filled = (self.filled + 1).min(self.def.rows);
        self.write_current();
    }

    fn write_current(&mut self) {
        let (cf, xff) = (self.def.cf, self.def.xff);
        let values: Vec<f64> = self.accumulators.iter().map(|a| a.consolidate(cf, xff)).collect();
        let cur = self.cur_row;
        self.row_mut(cur).copy_from_slice(&values);
    }

    fn fold(&mut self, values: &[f64]) {
        let cf = self.def.cf;
        for (acc, &v) in self.accumulators.iter_mut().zip(values) {
            acc.fold(cf, v);
        }
    }

    fn update(&mut self, step_secs: u64, last_update: i64, timestamp: i64, values: &[f64]) {
        let bucket = self.bucket_secs(step_secs);
        if self.filled == 0 {
            self.reset();
            self.fold(values);
            self.open_row();
            return;
        }

        let prev = last_update.div_euclid(bucket);
        let next = timestamp.div_euclid(bucket);
        if next == prev {
            self.fold(values);
            self.write_current();
            return;
        }

        // buckets nobody wrote into
        let skipped = (next - prev - 1).min(i64::from(self.def.rows));
        for _ in 0..skipped {
            self.reset();
            self.open_row();
        }
        self.reset();
        self.fold(values);
        self.open_row();
    }
}

// ==============================================================================
// database
// ==============================================================================

/// result of [`Database::fetch`]
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub cf: Consolidation,
    /// seconds between rows
    pub resolution: i64,
    pub columns: Vec<String>,
    /// (row start time, values in column order)
    pub rows: Vec<(i64, Vec<f64>)>,
}

/// summary shown by `info`
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub step_secs: u64,
    pub last_update: i64,
    pub data_sources: Vec<DataSource>,
    pub archives: Vec<ArchiveInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    #[serde(flatten)]
    pub def: ArchiveDef,
    pub filled_rows: u32,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub(super) step_secs: u64,
    pub(super) last_update: i64,
    pub(super) sources: Vec<DataSource>,
    pub(super) archives: Vec<Archive>,
}

impl Database {
    pub fn new(spec: &StoreSpec) -> StoreResult<Self> {
        validate_layout(spec.step_secs, &spec.data_sources, &spec.archives)?;
        let width = spec.data_sources.len();
        Ok(Self {
            step_secs: spec.step_secs,
            last_update: spec.start,
            sources: spec.data_sources.clone(),
            archives: spec.archives.iter().cloned().map(|def| Archive::new(def, width)).collect(),
        })
    }

    pub fn step_secs(&self) -> u64 {
        self.step_secs
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn data_sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn archive_defs(&self) -> Vec<ArchiveDef> {
        self.archives.iter().map(|a| a.def.clone()).collect()
    }

    fn has_data(&self) -> bool {
        self.archives.iter().any(|a| a.filled > 0)
    }

    /// record one sample. `values` are in column order.
    pub fn update(&mut self, timestamp: i64, values: &[f64]) -> StoreResult<()> {
        if values.len() != self.sources.len() {
            return Err(StoreError::WidthMismatch {
                expected: self.sources.len(),
                actual: values.len(),
            });
        }
        if timestamp <= self.last_update {
            return Err(StoreError::IllegalUpdate { timestamp, last_update: self.last_update });
        }

        let elapsed = timestamp - self.last_update;
        let has_data = self.has_data();
        let values: Vec<f64> = self
            .sources
            .iter()
            .zip(values)
            .map(|(ds, &v)| {
                // a sample that arrives after the heartbeat expired does not
                // describe the silent interval
                if has_data && elapsed > ds.heartbeat_secs as i64 {
                    UNKNOWN
                } else {
                    ds.clamp(v)
                }
            })
            .collect();

        for archive in &mut self.archives {
            archive.update(self.step_secs, self.last_update, timestamp, &values);
        }
        self.last_update = timestamp;
        Ok(())
    }

    /// rows of the finest `cf` archive that reaches back to `start`, limited
    /// to `[start, end]`. falls back to the longest archive when none does.
    pub fn fetch(&self, cf: Consolidation, start: i64, end: i64) -> Option<FetchResult> {
        let mut candidates: Vec<&Archive> =
            self.archives.iter().filter(|a| a.def.cf == cf).collect();
        candidates.sort_by_key(|a| a.def.steps);

        let covers = |a: &Archive| {
            let bucket = a.bucket_secs(self.step_secs);
            self.last_update - i64::from(a.def.rows) * bucket <= start
        };
        let archive = candidates
            .iter()
            .copied()
            .find(|a| covers(a))
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .max_by_key(|a| i64::from(a.def.rows) * a.bucket_secs(self.step_secs))
            })?;

        let rows = self
            .timestamped_rows(archive)
            .into_iter()
            .filter(|(ts, _)| *ts >= start && *ts <= end)
            .collect();
        Some(FetchResult {
            cf,
            resolution: archive.bucket_secs(self.step_secs),
            columns: self.sources.iter().map(|ds| ds.name.clone()).collect(),
            rows,
        })
    }

    pub(super) fn timestamped_rows(&self, archive: &Archive) -> Vec<(i64, Vec<f64>)> {
        let bucket = archive.bucket_secs(self.step_secs);
        let newest = self.last_update.div_euclid(bucket) * bucket;
        let filled = i64::from(archive.filled);
        archive
            .chronological()
            .enumerate()
            .map(|(i, row)| (newest - (filled - 1 - i as i64) * bucket, row.to_vec()))
            .collect()
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            step_secs: self.step_secs,
            last_update: self.last_update,
            data_sources: self.sources.clone(),
            archives: self
                .archives
                .iter()
                .map(|a| ArchiveInfo { def: a.def.clone(), filled_rows: a.filled })
                .collect(),
        }
    }
}

pub(super) fn validate_layout(
    step_secs: u64,
    sources: &[DataSource],
    archives: &[ArchiveDef],
) -> StoreResult<()> {
    if step_secs == 0 {
        return Err(StoreError::InvalidDefinition("step must be greater than zero".into()));
    }
    if sources.is_empty() {
        return Err(StoreError::InvalidDefinition("at least one data source is required".into()));
    }
    if archives.is_empty() {
        return Err(StoreError::InvalidDefinition("at least one archive is required".into()));
    }
    let mut seen = HashSet::new();
    for ds in sources {
        if !is_valid_name(&ds.name) {
            return Err(StoreError::InvalidDefinition(format!(
                "invalid data source name '{}'",
                ds.name
            )));
        }
        if !seen.insert(ds.name.as_str()) {
            return Err(StoreError::InvalidDefinition(format!(
                "duplicate data source '{}'",
                ds.name
            )));
        }
        if ds.min > ds.max {
            return Err(StoreError::InvalidDefinition(format!(
                "data source '{}' has min above max",
                ds.name
            )));
        }
    }
    for def in archives {
        def.validate()?;
        if def.span_secs(step_secs).is_none() {
            return Err(StoreError::InvalidDefinition(format!(
                "archive {}:{}:{} at a {}s step spans more time than a timestamp can hold",
                def.cf, def.steps, def.rows, step_secs
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rrd::{DEFAULT_HEARTBEAT_SECS, DEFAULT_MAX, DEFAULT_MIN};

    const STEP: u64 = 300;

    fn gauge(name: &str) -> DataSource {
        DataSource::gauge(name, DEFAULT_HEARTBEAT_SECS, DEFAULT_MIN, DEFAULT_MAX)
    }

    fn db(names: &[&str], archives: Vec<ArchiveDef>) -> Database {
        let spec = StoreSpec {
            step_secs: STEP,
            start: 0,
            data_sources: names.iter().map(|n| gauge(n)).collect(),
            archives,
        };
        Database::new(&spec).unwrap()
    }

    fn avg(steps: u32, rows: u32) -> ArchiveDef {
        ArchiveDef { cf: Consolidation::Average, xff: 0.5, steps, rows }
    }

    fn rows_of(db: &Database, archive: usize) -> Vec<Vec<f64>> {
        db.archives[archive].chronological().map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_one_row_per_step() {
        let mut db = db(&["a"], vec![avg(1, 10)]);
        for i in 1..=3 {
            db.update(i * STEP as i64, &[i as f64]).unwrap();
        }
        assert_eq!(rows_of(&db, 0), vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_samples_in_same_bucket_are_consolidated() {
        let mut db = db(&["a"], vec![avg(1, 10)]);
        db.update(300, &[10.0]).unwrap();
        db.update(360, &[20.0]).unwrap();
        assert_eq!(rows_of(&db, 0), vec![vec![15.0]]);
    }

    #[test]
    fn test_min_max_last() {
        let defs = vec![
            ArchiveDef { cf: Consolidation::Min, xff: 0.5, steps: 3, rows: 4 },
            ArchiveDef { cf: Consolidation::Max, xff: 0.5, steps: 3, rows: 4 },
            ArchiveDef { cf: Consolidation::Last, xff: 0.5, steps: 3, rows: 4 },
        ];
        let mut db = db(&["a"], defs);
        db.update(900, &[5.0]).unwrap();
        db.update(1200, &[1.0]).unwrap();
        db.update(1500, &[9.0]).unwrap();
        assert_eq!(rows_of(&db, 0), vec![vec![1.0]]);
        assert_eq!(rows_of(&db, 1), vec![vec![9.0]]);
        assert_eq!(rows_of(&db, 2), vec![vec![9.0]]);
    }

    #[test]
    fn test_xff_marks_row_unknown() {
        let mut db = db(&["a"], vec![avg(3, 4)]);
        db.update(900, &[UNKNOWN]).unwrap();
        db.update(1000, &[UNKNOWN]).unwrap();
        db.update(1100, &[4.0]).unwrap();
        // 2 of 3 unknown > 0.5
        assert!(is_unknown(rows_of(&db, 0)[0][0]));
    }

    #[test]
    fn test_gap_fills_unknown_rows() {
        let mut db = db(&["a"], vec![avg(1, 10)]);
        db.update(300, &[1.0]).unwrap();
        db.update(1200, &[2.0]).unwrap();
        let rows = rows_of(&db, 0);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec![1.0]);
        assert!(is_unknown(rows[1][0]));
        assert!(is_unknown(rows[2][0]));
        // elapsed 900 > heartbeat 600
        assert!(is_unknown(rows[3][0]));
    }

    #[test]
    fn test_ring_wraps_and_keeps_newest() {
        let mut db = db(&["a"], vec![avg(1, 3)]);
        for i in 1..=5 {
            db.update(i * STEP as i64, &[i as f64]).unwrap();
        }
        assert_eq!(rows_of(&db, 0), vec![vec![3.0], vec![4.0], vec![5.0]]);
    }

    #[test]
    fn test_rejects_stale_timestamp_and_wrong_width() {
        let mut db = db(&["a", "b"], vec![avg(1, 3)]);
        db.update(300, &[1.0, 2.0]).unwrap();
        assert!(matches!(db.update(300, &[1.0, 2.0]), Err(StoreError::IllegalUpdate { .. })));
        assert!(matches!(db.update(600, &[1.0]), Err(StoreError::WidthMismatch { .. })));
    }

    #[test]
    fn test_fetch_picks_finest_covering_archive() {
        let mut db = db(&["a"], vec![avg(1, 4), avg(4, 10)]);
        for i in 1..=8 {
            db.update(i * STEP as i64, &[i as f64]).unwrap();
        }
        let recent = db.fetch(Consolidation::Average, 2400 - 600, 2400).unwrap();
        assert_eq!(recent.resolution, 300);
        assert_eq!(recent.rows.len(), 3);
        assert_eq!(recent.rows.last().unwrap(), &(2400, vec![8.0]));

        let long = db.fetch(Consolidation::Average, 0, 2400).unwrap();
        assert_eq!(long.resolution, 1200);
        assert!(db.fetch(Consolidation::Max, 0, 2400).is_none());
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        let spec = StoreSpec {
            step_secs: STEP,
            start: 0,
            data_sources: vec![gauge("a"), gauge("a")],
            archives: vec![avg(1, 1)],
        };
        assert!(matches!(Database::new(&spec), Err(StoreError::InvalidDefinition(_))));
    }

    #[test]
    fn test_new_rejects_overflowing_archive() {
        let spec = StoreSpec {
            step_secs: u64::MAX / 2,
            start: 0,
            data_sources: vec![gauge("a")],
            archives: vec![avg(4, 10)],
        };
        assert!(matches!(Database::new(&spec), Err(StoreError::InvalidDefinition(_))));
    }
}
