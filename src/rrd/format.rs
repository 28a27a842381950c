//! ==============================================================================
//! format.rs - binary layout of a store file
//! ==============================================================================
//!
//! all integers and floats are little-endian.
//!
//! ```text
//!     header    magic "RRDM" | version u32 | step u64 | last_update i64
//!               | source count u32 | archive count u32
//!     sources   name len u8 | name | kind u8 | heartbeat u64 | min f64 | max f64
//!     archives  cf u8 | xff f64 | steps u32 | rows u32 | cur_row u32 | filled u32
//!               | per source: value f64 | known u32 | unknown u32
//!     data      per archive: rows * sources f64, row-major ring
//! ```
//!
//! floats are stored by bit pattern, so unknown markers and every value come
//! back exactly as written.
//!
//! ==============================================================================

use super::engine::{validate_layout, Accumulator, Archive, Database};
use super::{ArchiveDef, Consolidation, DataSource, SourceKind, StoreError, StoreResult};
use std::path::Path;

const MAGIC: &[u8; 4] = b"RRDM";
pub const FORMAT_VERSION: u32 = 1;

// ==============================================================================
// encoding
// ==============================================================================

pub fn encode(db: &Database) -> Vec<u8> {
    let width = db.sources.len();
    let data_len: usize = db.archives.iter().map(|a| a.data.len()).sum();
    let mut out = Vec::with_capacity(64 + width * 48 + data_len * 8);

    out.extend_from_slice(MAGIC);
    put_u32(&mut out, FORMAT_VERSION);
    put_u64(&mut out, db.step_secs);
    out.extend_from_slice(&db.last_update.to_le_bytes());
    put_u32(&mut out, width as u32);
    put_u32(&mut out, db.archives.len() as u32);

    for ds in &db.sources {
        // names are validated to at most 19 ascii chars
        out.push(ds.name.len() as u8);
        out.extend_from_slice(ds.name.as_bytes());
        out.push(match ds.kind {
            SourceKind::Gauge => 0,
        });
        put_u64(&mut out, ds.heartbeat_secs);
        put_f64(&mut out, ds.min);
        put_f64(&mut out, ds.max);
    }

    for archive in &db.archives {
        out.push(archive.def.cf.to_u8());
        put_f64(&mut out, archive.def.xff);
        put_u32(&mut out, archive.def.steps);
        put_u32(&mut out, archive.def.rows);
        put_u32(&mut out, archive.cur_row);
        put_u32(&mut out, archive.filled);
        for acc in &archive.accumulators {
            put_f64(&mut out, acc.value);
            put_u32(&mut out, acc.known);
            put_u32(&mut out, acc.unknown);
        }
    }

    for archive in &db.archives {
        for value in &archive.data {
            put_f64(&mut out, *value);
        }
    }
    out
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_bits().to_le_bytes());
}

// ==============================================================================
// decoding
// ==============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            format!("truncated at offset {} (needed {} more bytes)", self.pos, n)
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn i64(&mut self) -> Result<i64, String> {
        Ok(self.u64()? as i64)
    }

    fn f64(&mut self) -> Result<f64, String> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

struct Header {
    step_secs: u64,
    last_update: i64,
    sources: Vec<DataSource>,
    archive_count: u32,
}

fn read_header(r: &mut Reader<'_>) -> Result<Header, String> {
    if r.take(4)? != MAGIC {
        return Err("bad magic".into());
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", version));
    }
    let step_secs = r.u64()?;
    let last_update = r.i64()?;
    let source_count = r.u32()?;
    let archive_count = r.u32()?;

    let mut sources = Vec::with_capacity(source_count.min(1024) as usize);
    for _ in 0..source_count {
        let len = r.u8()? as usize;
        let name = std::str::from_utf8(r.take(len)?)
            .map_err(|_| "data source name is not utf-8".to_string())?
            .to_string();
        let kind = match r.u8()? {
            0 => SourceKind::Gauge,
            other => return Err(format!("unknown data source kind {}", other)),
        };
        sources.push(DataSource {
            name,
            kind,
            heartbeat_secs: r.u64()?,
            min: r.f64()?,
            max: r.f64()?,
        });
    }
    Ok(Header { step_secs, last_update, sources, archive_count })
}

/// only the column definitions, without touching the data section
pub fn decode_schema(path: &Path, bytes: &[u8]) -> StoreResult<Vec<DataSource>> {
    let mut r = Reader::new(bytes);
    read_header(&mut r).map(|h| h.sources).map_err(|reason| corrupt(path, reason))
}

pub fn decode(path: &Path, bytes: &[u8]) -> StoreResult<Database> {
    decode_inner(bytes).map_err(|reason| corrupt(path, reason))
}

fn decode_inner(bytes: &[u8]) -> Result<Database, String> {
    let mut r = Reader::new(bytes);
    let header = read_header(&mut r)?;
    let width = header.sources.len();

    let mut archives = Vec::with_capacity(header.archive_count.min(64) as usize);
    for index in 0..header.archive_count {
        let cf_tag = r.u8()?;
        let cf = Consolidation::from_u8(cf_tag)
            .ok_or_else(|| format!("archive {} has unknown consolidation {}", index, cf_tag))?;
        let def = ArchiveDef { cf, xff: r.f64()?, steps: r.u32()?, rows: r.u32()? };
        let cur_row = r.u32()?;
        let filled = r.u32()?;
        if def.rows == 0 || cur_row >= def.rows || filled > def.rows {
            return Err(format!("archive {} has an inconsistent ring position", index));
        }
        let mut accumulators = Vec::with_capacity(width);
        for _ in 0..width {
            accumulators.push(Accumulator { value: r.f64()?, known: r.u32()?, unknown: r.u32()? });
        }
        archives.push(Archive { def, cur_row, filled, accumulators, data: Vec::new() });
    }
    let defs: Vec<ArchiveDef> = archives.iter().map(|a| a.def.clone()).collect();
    validate_layout(header.step_secs, &header.sources, &defs).map_err(|e| e.to_string())?;

    let expected: usize = archives.iter().map(|a| a.def.rows as usize * width * 8).sum();
    if r.remaining() != expected {
        return Err(format!(
            "data section is {} bytes, expected {}",
            r.remaining(),
            expected
        ));
    }
    for archive in &mut archives {
        let count = archive.def.rows as usize * width;
        archive.data = (0..count).map(|_| r.f64()).collect::<Result<_, _>>()?;
    }

    Ok(Database {
        step_secs: header.step_secs,
        last_update: header.last_update,
        sources: header.sources,
        archives,
    })
}

fn corrupt(path: &Path, reason: String) -> StoreError {
    StoreError::Corrupt { path: path.to_path_buf(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rrd::{is_unknown, StoreSpec, DEFAULT_HEARTBEAT_SECS};

    fn db() -> Database {
        let spec = StoreSpec {
            step_secs: 300,
            start: 100,
            data_sources: vec![
                DataSource::gauge("mytemp1", DEFAULT_HEARTBEAT_SECS, -100.0, 100.0),
                DataSource::gauge("mytemp2", DEFAULT_HEARTBEAT_SECS, -100.0, 100.0),
            ],
            archives: vec![ArchiveDef { cf: Consolidation::Average, xff: 0.5, steps: 1, rows: 4 }],
        };
        let mut db = Database::new(&spec).unwrap();
        db.update(300, &[21.7, f64::NAN]).unwrap();
        db
    }

    #[test]
    fn test_encode_decode_preserves_everything() {
        let original = db();
        let bytes = encode(&original);
        let decoded = decode(Path::new("t.rrd"), &bytes).unwrap();
        assert_eq!(decoded.to_dump().data_sources, original.to_dump().data_sources);
        assert_eq!(decoded.last_update(), 300);
        let rows = &decoded.to_dump().archives[0].rows;
        assert_eq!(rows[0][0], 21.7);
        assert!(is_unknown(rows[0][1]));
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn test_decode_schema_reads_header_only() {
        let bytes = encode(&db());
        let names: Vec<String> = decode_schema(Path::new("t.rrd"), &bytes[..98])
            .unwrap()
            .into_iter()
            .map(|ds| ds.name)
            .collect();
        assert_eq!(names, vec!["mytemp1", "mytemp2"]);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = encode(&db());
        let err = decode(Path::new("t.rrd"), &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_impossible_layout_is_corrupt() {
        // header is 32 bytes, each source 33; the archive's steps follow
        // its cf tag and xff
        let steps_at = 32 + 2 * 33 + 1 + 8;
        let mut bytes = encode(&db());
        bytes[steps_at..steps_at + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode(Path::new("t.rrd"), &bytes),
            Err(StoreError::Corrupt { .. })
        ));

        let mut bytes = encode(&db());
        bytes[8..16].copy_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            decode(Path::new("t.rrd"), &bytes),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut bytes = encode(&db());
        bytes[0] = b'X';
        assert!(matches!(
            decode(Path::new("t.rrd"), &bytes),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
