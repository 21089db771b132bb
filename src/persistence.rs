//! On-disk form of immutable segments: a checksummed single-file layout,
//! written to a temporary file and renamed into place so a segment file is
//! either fully present or absent. Bitmap indexes are rebuilt on load;
//! dictionaries are stored sorted, so a loaded segment is query-identical to
//! the in-memory original.

use crate::column::{DimensionColumn, MetricColumn};
use crate::dictionary::SortedDictionary;
use crate::error::{Error, Result};
use crate::immutable::ImmutableSegment;
use crate::telemetry::core_metrics;
use crate::types::{DictId, Timestamp};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

const SEGMENT_MAGIC: &[u8; 8] = b"STRSEG01";
const SEGMENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SegmentFile {
    min_ts: Timestamp,
    max_ts: Timestamp,
    timestamps: Vec<Timestamp>,
    dimensions: BTreeMap<String, DimensionFile>,
    metrics: BTreeMap<String, MetricFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DimensionFile {
    /// Dictionary values in strict lexicographic order.
    values: Vec<String>,
    /// Per-row sorted dictionary ids.
    rows: Vec<Vec<DictId>>,
}

#[derive(Debug, Serialize, Deserialize)]
enum MetricFile {
    Long(Vec<i64>),
    Double(Vec<f64>),
}

/// Writes a segment file: magic, version, payload length, crc32, bincode
/// payload. The file appears atomically via tmp-file + rename.
pub fn write_segment(path: &Path, segment: &ImmutableSegment) -> Result<()> {
    let model = SegmentFile {
        min_ts: segment.interval().map_or(0, |i| i.start),
        max_ts: segment.interval().map_or(0, |i| i.end - 1),
        timestamps: segment.timestamps().to_vec(),
        dimensions: segment
            .dimension_columns()
            .iter()
            .map(|(name, dim)| {
                (
                    name.clone(),
                    DimensionFile {
                        values: dim
                            .dictionary()
                            .values()
                            .iter()
                            .map(|v| v.to_string())
                            .collect(),
                        rows: dim.rows().to_vec(),
                    },
                )
            })
            .collect(),
        metrics: segment
            .metric_columns()
            .iter()
            .map(|(name, column)| {
                let file = match column {
                    MetricColumn::Long(v) => MetricFile::Long(v.clone()),
                    MetricColumn::Double(v) => MetricFile::Double(v.clone()),
                };
                (name.clone(), file)
            })
            .collect(),
    };

    let payload = bincode::serialize(&model).map_err(|e| Error::Serialization(e.to_string()))?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let tmp_path = path.with_extension("seg.tmp");
    let mut w = BufWriter::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?,
    );
    w.write_all(SEGMENT_MAGIC)?;
    w.write_all(&SEGMENT_VERSION.to_le_bytes())?;
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    w.get_ref().sync_data()?;
    drop(w);

    fs::rename(&tmp_path, path)?;
    sync_parent_dir(path)?;

    core_metrics::increment(core_metrics::SEGMENT_FILES_WRITTEN, 1);
    Ok(())
}

/// Reads a segment file back, validating magic, version and checksum, then
/// reassembling the columns and rebuilding every bitmap index.
pub fn read_segment(path: &Path) -> Result<ImmutableSegment> {
    let mut f = File::open(path)?;

    let mut magic = [0u8; 8];
    f.read_exact(&mut magic)?;
    if &magic != SEGMENT_MAGIC {
        return Err(corruption(path, "bad segment magic"));
    }
    let version = read_u32(&mut f)?;
    if version != SEGMENT_VERSION {
        return Err(corruption(path, &format!("unsupported version {}", version)));
    }
    let len = read_u64(&mut f)? as usize;
    let crc = read_u32(&mut f)?;

    let mut payload = vec![0u8; len];
    f.read_exact(&mut payload)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    if hasher.finalize() != crc {
        return Err(corruption(path, "payload CRC mismatch"));
    }

    let model: SegmentFile =
        bincode::deserialize(&payload).map_err(|e| Error::Serialization(e.to_string()))?;
    let segment = reassemble(path, model)?;

    core_metrics::increment(core_metrics::SEGMENT_FILES_READ, 1);
    Ok(segment)
}

/// Shape validation happens here so that the in-memory invariant checks
/// never fire on well-formed reads of a damaged-but-checksummed file.
fn reassemble(path: &Path, model: SegmentFile) -> Result<ImmutableSegment> {
    let rows = model.timestamps.len();

    if rows > 0 {
        let min = *model.timestamps.iter().min().expect("non-empty");
        let max = *model.timestamps.iter().max().expect("non-empty");
        if min != model.min_ts || max != model.max_ts {
            return Err(corruption(path, "stored interval disagrees with timestamps"));
        }
    }

    let mut dimensions = BTreeMap::new();
    for (name, dim) in model.dimensions {
        if dim.rows.len() != rows {
            return Err(corruption(
                path,
                &format!("dimension '{}' row count mismatch", name),
            ));
        }
        if !dim.values.windows(2).all(|w| w[0] < w[1]) {
            return Err(corruption(
                path,
                &format!("dimension '{}' dictionary is not sorted", name),
            ));
        }
        let cardinality = dim.values.len();
        for ids in &dim.rows {
            if ids.iter().any(|&id| id as usize >= cardinality) {
                return Err(corruption(
                    path,
                    &format!("dimension '{}' id outside dictionary", name),
                ));
            }
        }
        let dict = SortedDictionary::from_sorted_values(
            dim.values.into_iter().map(Arc::from).collect(),
        );
        dimensions.insert(name, DimensionColumn::new(dict, dim.rows));
    }

    let mut metrics = BTreeMap::new();
    for (name, metric) in model.metrics {
        let column = match metric {
            MetricFile::Long(v) => MetricColumn::Long(v),
            MetricFile::Double(v) => MetricColumn::Double(v),
        };
        if column.len() != rows {
            return Err(corruption(
                path,
                &format!("metric '{}' row count mismatch", name),
            ));
        }
        metrics.insert(name, column);
    }

    Ok(ImmutableSegment::from_parts(
        model.min_ts,
        model.max_ts,
        model.timestamps,
        dimensions,
        metrics,
    ))
}

fn corruption(path: &Path, what: &str) -> Error {
    Error::Corruption {
        details: format!("{} in {:?}", what, path),
    }
}

fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_data()?;
    }
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutable::MutableSegment;
    use crate::types::Row;

    fn sample_segment() -> ImmutableSegment {
        let mutable = MutableSegment::new();
        let rows = [
            Row::new(100).dim("provider", "total").metric("index", 10i64),
            Row::new(200).dim("provider", "spot").metric("index", 20i64),
            Row::new(300)
                .dims("placementish", &["a", "preferred"])
                .metric("quality_score", 0.5f64),
        ];
        for row in &rows {
            mutable.add(row).unwrap();
        }
        ImmutableSegment::flush(&mutable)
    }

    #[test]
    fn round_trip_preserves_columns_and_bitmaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.seg");
        let original = sample_segment();

        write_segment(&path, &original).unwrap();
        let loaded = read_segment(&path).unwrap();

        assert_eq!(loaded.row_count(), original.row_count());
        assert_eq!(loaded.timestamps(), original.timestamps());
        assert_eq!(loaded.interval(), original.interval());

        let dim = loaded.dimension("provider").unwrap();
        assert_eq!(dim.dictionary().lookup_id("spot"), Some(0));
        assert_eq!(dim.dictionary().lookup_id("total"), Some(1));
        // Bitmaps are rebuilt, not stored; they must match the original's.
        let original_dim = original.dimension("provider").unwrap();
        for id in 0..dim.cardinality() as DictId {
            assert_eq!(dim.bitmap(id), original_dim.bitmap(id));
        }
        assert_eq!(loaded.metric("index").unwrap().long_at(1), 20);
        assert_eq!(loaded.metric("quality_score").unwrap().double_at(2), 0.5);
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.seg");
        write_segment(&path, &sample_segment()).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(read_segment(&path).is_err());
    }

    #[test]
    fn rejects_corrupted_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.seg");
        write_segment(&path, &sample_segment()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let err = read_segment(&path).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_segment.seg");
        fs::write(&path, b"NOTASEG0rest").unwrap();
        let err = read_segment(&path).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn empty_segment_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.seg");
        let empty = ImmutableSegment::flush(&MutableSegment::new());
        write_segment(&path, &empty).unwrap();
        let loaded = read_segment(&path).unwrap();
        assert_eq!(loaded.row_count(), 0);
        assert_eq!(loaded.interval(), None);
    }
}
