//! Per-(protocol, day, host) snapshot persistence (§4.7): atomic gzip-JSON
//! writes, a filename-derived watermark, and a generic read path that
//! preserves unknown keys for the merger.

pub mod error;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

pub use error::StoreError;

use crate::model::{DayKey, DayStats, Protocol, Value};

/// One snapshot loaded from disk, tagged with the provenance the merger
/// needs (`protocol`, `path`); readers ignore these extra tags (§6).
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub protocol: Protocol,
    pub host: String,
    pub path: PathBuf,
    pub stats: BTreeMap<String, Value>,
}

/// Reads and writes snapshots under a single stats directory for one local
/// host.
pub struct SnapshotStore {
    stats_dir: PathBuf,
    local_host: String,
}

impl SnapshotStore {
    pub fn new(stats_dir: impl Into<PathBuf>, local_host: impl Into<String>) -> Self {
        SnapshotStore {
            stats_dir: stats_dir.into(),
            local_host: local_host.into(),
        }
    }

    /// Write every day bucket, ascending `(protocol, date)` order, as an
    /// atomically-replaced gzip JSON file.
    pub fn write_all(&self, days: &BTreeMap<DayKey, DayStats>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.stats_dir)?;
        for (key, stats) in days {
            self.write_one(*key, stats)?;
        }
        Ok(())
    }

    fn write_one(&self, key: DayKey, stats: &DayStats) -> Result<(), StoreError> {
        let path = self.snapshot_path(key.protocol, key.date, &self.local_host);
        let json = serde_json::to_vec(stats).map_err(|source| StoreError::Serialize {
            path: path.display().to_string(),
            source,
        })?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let gz = encoder.finish()?;

        let tmp_path = path.with_extension("gz.tmp");
        fs::write(&tmp_path, gz)?;
        rename_atomic(&tmp_path, &path)?;
        Ok(())
    }

    /// Largest `YYYYMMDD` for which this host has a `protocol` snapshot, or
    /// 0 if none exists.
    pub fn watermark(&self, protocol: Protocol) -> Result<u32, StoreError> {
        let pattern = self
            .stats_dir
            .join(format!("{protocol}_*.{}.json.gz", self.local_host));
        let pattern = pattern.to_string_lossy().into_owned();
        let mut latest = 0u32;
        for entry in glob::glob(&pattern).map_err(|err| StoreError::Pattern {
            pattern: pattern.clone(),
            message: err.msg.to_string(),
        })? {
            let path = entry?;
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                if let Some((_, date, _)) = parse_filename(name) {
                    latest = latest.max(date);
                }
            }
        }
        Ok(latest)
    }

    /// Every snapshot for `date`, across every protocol and host present in
    /// the directory.
    pub fn load(&self, date: u32) -> Result<Vec<LoadedSnapshot>, StoreError> {
        let pattern = self.stats_dir.join(format!("*_{date:08}.*.json.gz"));
        let pattern = pattern.to_string_lossy().into_owned();
        let mut snapshots = Vec::new();
        for entry in glob::glob(&pattern).map_err(|err| StoreError::Pattern {
            pattern: pattern.clone(),
            message: err.msg.to_string(),
        })? {
            let path = entry?;
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| StoreError::BadFilename {
                    name: path.display().to_string(),
                })?;
            let (protocol, _, host) = parse_filename(name).ok_or_else(|| StoreError::BadFilename {
                name: name.to_string(),
            })?;

            let mut gz = String::new();
            MultiGzDecoder::new(File::open(&path)?).read_to_string(&mut gz)?;
            let stats: BTreeMap<String, Value> =
                serde_json::from_str(&gz).map_err(|source| StoreError::Deserialize {
                    path: path.display().to_string(),
                    source,
                })?;

            snapshots.push(LoadedSnapshot {
                protocol,
                host,
                path,
                stats,
            });
        }
        Ok(snapshots)
    }

    fn snapshot_path(&self, protocol: Protocol, date: u32, host: &str) -> PathBuf {
        self.stats_dir
            .join(format!("{protocol}_{date:08}.{host}.json.gz"))
    }
}

/// Rename `tmp_path` over `path`. On platforms/filesystems where renaming
/// over an existing file fails outright, fall back to removing the target
/// first and retrying once, rather than leaving the `.tmp` file orphaned.
fn rename_atomic(tmp_path: &Path, path: &Path) -> Result<(), StoreError> {
    if let Err(err) = fs::rename(tmp_path, path) {
        if path.exists() {
            fs::remove_file(path)?;
            fs::rename(tmp_path, path)?;
        } else {
            return Err(err.into());
        }
    }
    Ok(())
}

fn parse_filename(name: &str) -> Option<(Protocol, u32, String)> {
    let (protocol_str, rest) = name.split_once('_')?;
    let protocol = Protocol::from_str(protocol_str).ok()?;
    let rest = rest.strip_suffix(".json.gz")?;
    let (date_str, host) = rest.split_once('.')?;
    if date_str.len() != 8 {
        return None;
    }
    let date: u32 = date_str.parse().ok()?;
    Some((protocol, date, host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn sample_days() -> Map<DayKey, DayStats> {
        let mut days = Map::new();
        let mut stats = DayStats::default();
        stats.count.insert("web".to_string(), 3);
        days.insert(
            DayKey {
                protocol: Protocol::Web,
                date: 20250101,
            },
            stats,
        );
        days
    }

    #[test]
    fn write_then_load_round_trips_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "nodeA");
        store.write_all(&sample_days()).unwrap();

        let loaded = store.load(20250101).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].protocol, Protocol::Web);
        assert_eq!(loaded[0].host, "nodeA");
        let count = loaded[0].stats.get("count").unwrap().as_map().unwrap();
        assert_eq!(count.get("web").unwrap().as_number(), Some(3));
    }

    #[test]
    fn watermark_is_zero_with_no_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "nodeA");
        assert_eq!(store.watermark(Protocol::Web).unwrap(), 0);
    }

    #[test]
    fn watermark_tracks_the_largest_date_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "nodeA");
        store.write_all(&sample_days()).unwrap();

        let mut later = Map::new();
        later.insert(
            DayKey {
                protocol: Protocol::Web,
                date: 20250102,
            },
            DayStats::default(),
        );
        store.write_all(&later).unwrap();

        assert_eq!(store.watermark(Protocol::Web).unwrap(), 20250102);
    }

    #[test]
    fn watermark_ignores_other_hosts() {
        let dir = tempfile::tempdir().unwrap();
        SnapshotStore::new(dir.path(), "peer").write_all(&sample_days()).unwrap();
        let mine = SnapshotStore::new(dir.path(), "nodeA");
        assert_eq!(mine.watermark(Protocol::Web).unwrap(), 0);
    }

    #[test]
    fn load_spans_every_host_and_protocol_for_a_date() {
        let dir = tempfile::tempdir().unwrap();
        SnapshotStore::new(dir.path(), "nodeA").write_all(&sample_days()).unwrap();

        let mut gemini_days = Map::new();
        gemini_days.insert(
            DayKey {
                protocol: Protocol::Gemini,
                date: 20250101,
            },
            DayStats::default(),
        );
        SnapshotStore::new(dir.path(), "nodeB").write_all(&gemini_days).unwrap();

        let loaded = SnapshotStore::new(dir.path(), "nodeA").load(20250101).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
