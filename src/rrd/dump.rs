//! full structured export of a store: schema, every archive's consolidation
//! state and every retained row. a dump can be edited and turned back into a
//! store file, which is how columns get added.

use super::engine::{validate_layout, Accumulator, Archive, Database};
use super::{ArchiveDef, DataSource, StoreError, StoreResult, UNKNOWN};
use serde::{Deserialize, Serialize};

/// bumped whenever the dump layout changes
pub const DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDump {
    pub version: u32,
    pub step_secs: u64,
    pub last_update: i64,
    pub data_sources: Vec<DataSource>,
    pub archives: Vec<ArchiveDump>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDump {
    pub def: ArchiveDef,
    /// one per data source, in column order
    pub accumulators: Vec<Accumulator>,
    /// oldest first, each row in column order
    #[serde(with = "rows_unknown_as_null")]
    pub rows: Vec<Vec<f64>>,
}

impl StoreDump {
    pub fn column_names(&self) -> Vec<&str> {
        self.data_sources.iter().map(|ds| ds.name.as_str()).collect()
    }

    /// append a column to the schema. every archive gets a placeholder
    /// accumulator and every retained row gets an unknown value, so existing
    /// values keep their position.
    pub fn add_column(&mut self, ds: DataSource) {
        self.data_sources.push(ds);
        for archive in &mut self.archives {
            let pending = archive.accumulators.first().map(Accumulator::samples).unwrap_or(0);
            archive.accumulators.push(Accumulator::placeholder(pending));
            for row in &mut archive.rows {
                row.push(UNKNOWN);
            }
        }
    }

    /// structural checks run before a dump is turned back into a store
    pub fn validate(&self) -> StoreResult<()> {
        if self.version != DUMP_VERSION {
            return Err(StoreError::InvalidDump(format!(
                "unsupported dump version {} (expected {})",
                self.version, DUMP_VERSION
            )));
        }
        let defs: Vec<ArchiveDef> = self.archives.iter().map(|a| a.def.clone()).collect();
        validate_layout(self.step_secs, &self.data_sources, &defs)
            .map_err(|e| StoreError::InvalidDump(e.to_string()))?;

        let width = self.data_sources.len();
        for (index, archive) in self.archives.iter().enumerate() {
            if archive.accumulators.len() != width {
                return Err(StoreError::InvalidDump(format!(
                    "archive {} has {} accumulators for {} columns",
                    index,
                    archive.accumulators.len(),
                    width
                )));
            }
            if archive.rows.len() > archive.def.rows as usize {
                return Err(StoreError::InvalidDump(format!(
                    "archive {} holds {} rows but only has room for {}",
                    index,
                    archive.rows.len(),
                    archive.def.rows
                )));
            }
            if let Some(row) = archive.rows.iter().position(|r| r.len() != width) {
                return Err(StoreError::InvalidDump(format!(
                    "archive {} row {} has {} values for {} columns",
                    index,
                    row,
                    archive.rows[row].len(),
                    width
                )));
            }
        }
        Ok(())
    }
}

impl Database {
    pub fn to_dump(&self) -> StoreDump {
        StoreDump {
            version: DUMP_VERSION,
            step_secs: self.step_secs,
            last_update: self.last_update,
            data_sources: self.sources.clone(),
            archives: self
                .archives
                .iter()
                .map(|a| ArchiveDump {
                    def: a.def.clone(),
                    accumulators: a.accumulators.clone(),
                    rows: a.chronological().map(<[f64]>::to_vec).collect(),
                })
                .collect(),
        }
    }

    /// rows are laid out from ring slot 0, so the newest sits at `len - 1`
    pub fn from_dump(dump: &StoreDump) -> StoreResult<Self> {
        dump.validate()?;
        let width = dump.data_sources.len();
        let archives = dump
            .archives
            .iter()
            .map(|a| {
                let mut archive = Archive::new(a.def.clone(), width);
                for (slot, row) in a.rows.iter().enumerate() {
                    archive.data[slot * width..(slot + 1) * width].copy_from_slice(row);
                }
                archive.filled = a.rows.len() as u32;
                archive.cur_row = archive.filled.saturating_sub(1);
                archive.accumulators = a.accumulators.clone();
                archive
            })
            .collect();
        Ok(Self {
            step_secs: dump.step_secs,
            last_update: dump.last_update,
            sources: dump.data_sources.clone(),
            archives,
        })
    }
}

// ==============================================================================
// serde helpers - json has no NaN
// ==============================================================================

pub(crate) mod unknown_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

mod rows_unknown_as_null {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(rows.len()))?;
        for row in rows {
            let row: Vec<Option<f64>> =
                row.iter().map(|v| if v.is_nan() { None } else { Some(*v) }).collect();
            seq.serialize_element(&row)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let rows = Vec::<Vec<Option<f64>>>::deserialize(d)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect())
    }
}
