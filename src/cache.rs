use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use parquet::basic::{LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::types::Type;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::frame::{Cell, Frame};

const SNAPSHOT_EXT: &str = "parquet";

/// What a cache lookup found. `Stale` still carries the old snapshot so a
/// caller can fall back to it when a refetch yields nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Frame),
    Stale(Frame),
    Miss,
}

/// Directory of columnar snapshots, one file per key, aged by modification time.
#[derive(Debug, Clone)]
pub struct FrameCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FrameCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.cache_dir.clone(), config.cache_ttl)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dataset}_{scope}` with anything outside `[A-Za-z0-9_-]` replaced.
    pub fn key(dataset: &str, scope: &str) -> String {
        format!("{dataset}_{scope}")
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                    ch
                } else {
                    '-'
                }
            })
            .collect()
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SNAPSHOT_EXT}"))
    }

    pub fn lookup(&self, key: &str) -> CacheLookup {
        let path = self.path_for(key);
        let Ok(meta) = fs::metadata(&path) else {
            debug!("cache miss {}", key);
            return CacheLookup::Miss;
        };
        let frame = match read_snapshot(&path) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("cache entry {} unreadable, treating as miss: {:#}", key, err);
                return CacheLookup::Miss;
            }
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if age < self.ttl {
            debug!("cache hit {} ({} rows)", key, frame.len());
            CacheLookup::Hit(frame)
        } else {
            debug!("cache stale {} (age {}s)", key, age.as_secs());
            CacheLookup::Stale(frame)
        }
    }

    /// A frame without columns has no schema to persist; it is not stored and
    /// later reads as a miss.
    pub fn store(&self, key: &str, frame: &Frame) -> Result<()> {
        if frame.columns().is_empty() {
            debug!("not caching {}: frame has no columns", key);
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("parquet.tmp");
        write_snapshot(&tmp, frame)?;
        fs::rename(&tmp, &path).context("swap cache snapshot")?;
        debug!("cached {} ({} rows)", key, frame.len());
        Ok(())
    }
}

/// Serves `key` from the cache when fresh, otherwise calls `fetch` and stores
/// what it returns. `fetch` returning `None` means "no data"; an empty frame is
/// valid data and is cached like any other.
pub fn cached_or_fetch(
    cache: &FrameCache,
    key: &str,
    fetch: impl FnOnce() -> Option<Frame>,
) -> Result<Option<Frame>> {
    let stale = match cache.lookup(key) {
        CacheLookup::Hit(frame) => return Ok(Some(frame)),
        CacheLookup::Stale(frame) => Some(frame),
        CacheLookup::Miss => None,
    };

    match fetch() {
        Some(frame) => {
            cache.store(key, &frame)?;
            Ok(Some(frame))
        }
        None => {
            if stale.is_some() {
                info!("fetch for {} produced nothing; serving stale snapshot", key);
            }
            Ok(stale)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

fn infer_kind(frame: &Frame, idx: usize) -> ColumnKind {
    let (mut bools, mut ints, mut floats, mut texts) = (false, false, false, false);
    for row in frame.rows() {
        match &row[idx] {
            Cell::Null => {}
            Cell::Bool(_) => bools = true,
            Cell::Int(_) => ints = true,
            Cell::Float(_) => floats = true,
            Cell::Text(_) => texts = true,
        }
    }
    if texts || (bools && (ints || floats)) {
        ColumnKind::Text
    } else if floats {
        ColumnKind::Float
    } else if ints {
        ColumnKind::Int
    } else if bools {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}

fn column_values<T>(frame: &Frame, idx: usize, f: impl Fn(&Cell) -> Option<T>) -> (Vec<T>, Vec<i16>) {
    let mut values = Vec::with_capacity(frame.len());
    let mut defs = Vec::with_capacity(frame.len());
    for row in frame.rows() {
        match f(&row[idx]) {
            Some(v) => {
                values.push(v);
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    (values, defs)
}

fn write_snapshot(path: &Path, frame: &Frame) -> Result<()> {
    let kinds = (0..frame.columns().len())
        .map(|idx| infer_kind(frame, idx))
        .collect::<Vec<_>>();

    let mut fields = Vec::with_capacity(kinds.len());
    for (name, kind) in frame.columns().iter().zip(&kinds) {
        let builder = match kind {
            ColumnKind::Bool => Type::primitive_type_builder(name, PhysicalType::BOOLEAN),
            ColumnKind::Int => Type::primitive_type_builder(name, PhysicalType::INT64),
            ColumnKind::Float => Type::primitive_type_builder(name, PhysicalType::DOUBLE),
            ColumnKind::Text => Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
                .with_logical_type(Some(LogicalType::String)),
        };
        let field = builder
            .with_repetition(Repetition::OPTIONAL)
            .build()
            .with_context(|| format!("schema for column {name}"))?;
        fields.push(Arc::new(field));
    }
    let schema = Type::group_type_builder("frame")
        .with_fields(fields)
        .build()
        .context("build snapshot schema")?;

    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer = SerializedFileWriter::new(file, Arc::new(schema), props)
        .context("open snapshot writer")?;
    let mut row_group = writer.next_row_group().context("start row group")?;
    let mut idx = 0usize;
    while let Some(mut column) = row_group.next_column().context("next column")? {
        match kinds[idx] {
            ColumnKind::Bool => {
                let (values, defs) = column_values(frame, idx, |c| match c {
                    Cell::Bool(v) => Some(*v),
                    _ => None,
                });
                column
                    .typed::<BoolType>()
                    .write_batch(&values, Some(&defs), None)?;
            }
            ColumnKind::Int => {
                let (values, defs) = column_values(frame, idx, |c| match c {
                    Cell::Int(v) => Some(*v),
                    _ => None,
                });
                column
                    .typed::<Int64Type>()
                    .write_batch(&values, Some(&defs), None)?;
            }
            ColumnKind::Float => {
                let (values, defs) = column_values(frame, idx, |c| match c {
                    Cell::Int(v) => Some(*v as f64),
                    Cell::Float(v) => Some(*v),
                    _ => None,
                });
                column
                    .typed::<DoubleType>()
                    .write_batch(&values, Some(&defs), None)?;
            }
            ColumnKind::Text => {
                let (values, defs) = column_values(frame, idx, |c| {
                    (!c.is_null()).then(|| ByteArray::from(c.to_string().as_str()))
                });
                column
                    .typed::<ByteArrayType>()
                    .write_batch(&values, Some(&defs), None)?;
            }
        }
        column.close().context("close column")?;
        idx += 1;
    }
    row_group.close().context("close row group")?;
    writer.close().context("finish snapshot")?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Frame> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open snapshot reader")?;
    let columns = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>();

    let mut frame = Frame::new(columns);
    for row in reader.get_row_iter(None).context("iterate snapshot rows")? {
        let row = row.context("decode snapshot row")?;
        frame.push_row(row.get_column_iter().map(|(_, f)| cell_from_field(f)).collect());
    }
    Ok(frame)
}

fn cell_from_field(field: &Field) -> Cell {
    match field {
        Field::Null => Cell::Null,
        Field::Bool(v) => Cell::Bool(*v),
        Field::Byte(v) => Cell::Int(*v as i64),
        Field::Short(v) => Cell::Int(*v as i64),
        Field::Int(v) => Cell::Int(*v as i64),
        Field::Long(v) => Cell::Int(*v),
        Field::Float(v) => Cell::Float(*v as f64),
        Field::Double(v) => Cell::Float(*v),
        Field::Str(v) => Cell::Text(v.clone()),
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nba_forecast_cache_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample() -> Frame {
        let mut f = Frame::with_columns(&["GAME_ID", "TEAM_ID", "PTS", "IS_HOME", "NOTE"]);
        f.push_row(vec![
            Cell::Text("0022300001".into()),
            Cell::Int(1610612738),
            Cell::Float(101.5),
            Cell::Bool(true),
            Cell::Null,
        ]);
        f.push_row(vec![
            Cell::Text("0022300001".into()),
            Cell::Int(1610612747),
            Cell::Int(99),
            Cell::Bool(false),
            Cell::Text("late".into()),
        ]);
        f
    }

    #[test]
    fn key_is_filesystem_safe() {
        assert_eq!(FrameCache::key("team_stats", "2023-24"), "team_stats_2023-24");
        assert_eq!(FrameCache::key("games", "01/05/2024"), "games_01-05-2024");
    }

    #[test]
    fn cold_cache_is_miss_then_hit() {
        let cache = FrameCache::new(scratch("cold"), Duration::from_secs(3600));
        assert_eq!(cache.lookup("games_2024-01-05"), CacheLookup::Miss);

        cache.store("games_2024-01-05", &sample()).expect("store snapshot");
        let CacheLookup::Hit(frame) = cache.lookup("games_2024-01-05") else {
            panic!("expected a fresh entry");
        };
        assert_eq!(frame.columns(), sample().columns());
        assert_eq!(frame.value(0, "GAME_ID"), &Cell::Text("0022300001".into()));
        assert_eq!(frame.value(1, "PTS"), &Cell::Float(99.0));
        assert_eq!(frame.value(0, "IS_HOME"), &Cell::Bool(true));
        assert!(frame.value(0, "NOTE").is_null());
        let _ = fs::remove_dir_all(cache.dir());
    }

    #[test]
    fn zero_ttl_marks_entries_stale() {
        let cache = FrameCache::new(scratch("stale"), Duration::ZERO);
        cache.store("team_stats_2023-24", &sample()).expect("store snapshot");
        assert!(matches!(
            cache.lookup("team_stats_2023-24"),
            CacheLookup::Stale(f) if f.len() == 2
        ));
        let _ = fs::remove_dir_all(cache.dir());
    }

    #[test]
    fn empty_frame_is_cached_as_valid_data() {
        let cache = FrameCache::new(scratch("empty"), Duration::from_secs(3600));
        let empty = Frame::with_columns(&["GAME_ID", "TEAM_ID"]);
        let first = cached_or_fetch(&cache, "games_2024-07-01", || Some(empty.clone()))
            .expect("cache io");
        assert_eq!(first.as_ref().map(Frame::len), Some(0));

        let second = cached_or_fetch(&cache, "games_2024-07-01", || {
            panic!("fresh entry must not refetch")
        })
        .expect("cache io");
        assert_eq!(second.map(|f| f.columns().to_vec()), Some(empty.columns().to_vec()));
        let _ = fs::remove_dir_all(cache.dir());
    }

    #[test]
    fn no_data_is_not_cached() {
        let cache = FrameCache::new(scratch("nodata"), Duration::from_secs(3600));
        let out = cached_or_fetch(&cache, "games_2024-01-06", || None).expect("cache io");
        assert!(out.is_none());
        assert_eq!(cache.lookup("games_2024-01-06"), CacheLookup::Miss);
    }
}
