//! Cross-host, cross-protocol daily merge (§4.8): sums counters, collapses
//! unique-IP sets into cardinalities, and normalizes `.gmi`/`.html` URL
//! variants onto one key before the union. Merge rules are polymorphic over
//! [`Value`] — numbers add, maps recurse, anything else is fatal schema
//! drift (§9 design note).

pub mod error;

use std::collections::BTreeMap;

use time::Date;

pub use error::MergerError;

use crate::model::{FeedCardinalities, MergedDay, PageCardinalities, Protocol, Value};
use crate::store::{LoadedSnapshot, SnapshotStore};

const WINDOW_DAYS: i64 = 31;

pub struct Merger {
    store: SnapshotStore,
}

impl Merger {
    pub fn new(store: SnapshotStore) -> Self {
        Merger { store }
    }

    /// Merge every loaded snapshot for `date` into one [`MergedDay`].
    pub fn merge_date(&self, date: u32) -> Result<MergedDay, MergerError> {
        let loaded = self.store.load(date)?;
        merge_loaded(&loaded)
    }

    /// Merge the rolling 31-day window ending at `today`, newest day first.
    /// A day with no snapshot on disk for any host or protocol is omitted
    /// entirely rather than reported as an all-zero `MergedDay`.
    pub fn merge_window(&self, today: Date) -> Result<BTreeMap<u32, MergedDay>, MergerError> {
        let mut days = BTreeMap::new();
        for offset in 0..WINDOW_DAYS {
            let Some(day) = today.checked_sub(time::Duration::days(offset)) else {
                continue;
            };
            let date = day.year() as u32 * 10_000 + u32::from(day.month() as u8) * 100 + day.day() as u32;
            let loaded = self.store.load(date)?;
            if loaded.is_empty() {
                continue;
            }
            days.insert(date, merge_loaded(&loaded)?);
        }
        Ok(days)
    }
}

fn merge_loaded(loaded: &[LoadedSnapshot]) -> Result<MergedDay, MergerError> {
    let count = merge_counters(loaded)?;
    let feed_ips = merge_feed_cardinalities(loaded)?;
    let page_ips = merge_page_cardinalities(loaded)?;
    Ok(MergedDay {
        count,
        feed_ips,
        page_ips,
    })
}

fn merge_counters(loaded: &[LoadedSnapshot]) -> Result<BTreeMap<String, u64>, MergerError> {
    let mut acc = Value::empty_map();
    for snapshot in loaded {
        if let Some(count) = snapshot.stats.get("count") {
            acc = acc.merge(count.clone())?;
        }
    }
    Ok(acc
        .into_map()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.as_number().map(|n| (key, n)))
        .collect())
}

fn merge_feed_cardinalities(loaded: &[LoadedSnapshot]) -> Result<FeedCardinalities, MergerError> {
    let gemini_gemfeed = merge_feed_bucket(loaded, Protocol::Gemini, "gemfeed")?;
    let gemini_atom = merge_feed_bucket(loaded, Protocol::Gemini, "atom_feed")?;
    let web_gemfeed = merge_feed_bucket(loaded, Protocol::Web, "gemfeed")?;
    let web_atom = merge_feed_bucket(loaded, Protocol::Web, "atom_feed")?;

    let total = gemini_gemfeed
        .clone()
        .merge(gemini_atom.clone())?
        .merge(web_gemfeed.clone())?
        .merge(web_atom.clone())?;

    Ok(FeedCardinalities {
        total: cardinality(&total),
        gemini_gemfeed: cardinality(&gemini_gemfeed),
        gemini_atom: cardinality(&gemini_atom),
        web_gemfeed: cardinality(&web_gemfeed),
        web_atom: cardinality(&web_atom),
    })
}

/// Merge one `feed_ips` sub-bucket (`atom_feed` or `gemfeed`) across every
/// snapshot of one protocol.
fn merge_feed_bucket(loaded: &[LoadedSnapshot], protocol: Protocol, bucket: &str) -> Result<Value, MergerError> {
    let mut acc = Value::empty_map();
    for snapshot in loaded.iter().filter(|snapshot| snapshot.protocol == protocol) {
        let Some(feed_ips) = snapshot.stats.get("feed_ips").and_then(Value::as_map) else {
            continue;
        };
        if let Some(value) = feed_ips.get(bucket) {
            acc = acc.merge(value.clone())?;
        }
    }
    Ok(acc)
}

fn merge_page_cardinalities(loaded: &[LoadedSnapshot]) -> Result<PageCardinalities, MergerError> {
    let mut hosts_acc = Value::empty_map();
    let mut urls_acc = Value::empty_map();

    for snapshot in loaded {
        let Some(page_ips) = snapshot.stats.get("page_ips").and_then(Value::as_map) else {
            continue;
        };
        if let Some(hosts) = page_ips.get("hosts") {
            hosts_acc = hosts_acc.merge(hosts.clone())?;
        }
        if let Some(urls) = page_ips.get("urls").and_then(Value::as_map) {
            for (key, value) in urls {
                let normalized = normalize_url_key(key);
                let mut single = BTreeMap::new();
                single.insert(normalized, value.clone());
                urls_acc = urls_acc.merge(Value::Map(single))?;
            }
        }
    }

    Ok(PageCardinalities {
        hosts: to_cardinalities(hosts_acc),
        urls: to_cardinalities(urls_acc),
    })
}

/// `.gmi` pages are the Gemini twin of the same `.html` page; collapsing
/// the key here means an ip_hash seen under both forms counts once (§4.8,
/// the URL normalization law in §8).
fn normalize_url_key(key: &str) -> String {
    match key.strip_suffix(".gmi") {
        Some(stem) => format!("{stem}.html"),
        None => key.to_string(),
    }
}

fn to_cardinalities(value: Value) -> BTreeMap<String, u64> {
    value
        .into_map()
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, cardinality(&value)))
        .collect()
}

fn cardinality(value: &Value) -> u64 {
    value.as_map().map(|map| map.len() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayKey, DayStats, Protocol as P};
    use std::collections::BTreeMap as Map;

    fn store(dir: &std::path::Path) -> SnapshotStore {
        SnapshotStore::new(dir, "unused")
    }

    fn write_day(dir: &std::path::Path, host: &str, protocol: P, date: u32, stats: DayStats) {
        let mut days = Map::new();
        days.insert(DayKey { protocol, date }, stats);
        SnapshotStore::new(dir, host).write_all(&days).unwrap();
    }

    #[test]
    fn merge_idempotence_for_a_single_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = DayStats::default();
        stats.count.insert("web".to_string(), 5);
        stats.page_ips.urls.insert(
            "example.org/a.html".to_string(),
            [("H1".to_string(), 1)].into_iter().collect(),
        );
        write_day(dir.path(), "nodeA", P::Web, 20250101, stats);

        let merger = Merger::new(store(dir.path()));
        let merged = merger.merge_date(20250101).unwrap();
        assert_eq!(merged.count.get("web"), Some(&5));
        assert_eq!(merged.page_ips.urls.get("example.org/a.html"), Some(&1));
    }

    #[test]
    fn scenario_d_url_normalization_across_protocols() {
        let dir = tempfile::tempdir().unwrap();

        let mut gemini_stats = DayStats::default();
        gemini_stats.page_ips.urls.insert(
            "example.org/post.gmi".to_string(),
            [("Hx".to_string(), 1)].into_iter().collect(),
        );
        write_day(dir.path(), "nodeA", P::Gemini, 20250201, gemini_stats);

        let mut web_stats = DayStats::default();
        web_stats.page_ips.urls.insert(
            "example.org/post.html".to_string(),
            [("Hx".to_string(), 1)].into_iter().collect(),
        );
        write_day(dir.path(), "nodeB", P::Web, 20250201, web_stats);

        let merger = Merger::new(store(dir.path()));
        let merged = merger.merge_date(20250201).unwrap();
        assert_eq!(merged.page_ips.urls.get("example.org/post.html"), Some(&1));
    }

    #[test]
    fn feed_cardinalities_split_by_protocol_with_fixed_total() {
        let dir = tempfile::tempdir().unwrap();

        let mut gemini_stats = DayStats::default();
        gemini_stats.feed_ips.gemfeed.insert("H1".to_string(), 1);
        write_day(dir.path(), "nodeA", P::Gemini, 20250301, gemini_stats);

        let mut web_stats = DayStats::default();
        web_stats.feed_ips.atom_feed.insert("H1".to_string(), 1);
        web_stats.feed_ips.atom_feed.insert("H2".to_string(), 1);
        write_day(dir.path(), "nodeB", P::Web, 20250301, web_stats);

        let merger = Merger::new(store(dir.path()));
        let merged = merger.merge_date(20250301).unwrap();
        assert_eq!(merged.feed_ips.gemini_gemfeed, 1);
        assert_eq!(merged.feed_ips.web_atom, 2);
        assert_eq!(merged.feed_ips.total, 3);
    }

    #[test]
    fn schema_drift_between_number_and_map_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();

        // One snapshot carries `count.web` as a number (the real schema);
        // inject a peer snapshot where it is a map, simulating drift.
        let mut stats = DayStats::default();
        stats.count.insert("web".to_string(), 1);
        write_day(dir.path(), "nodeA", P::Web, 20250401, stats);

        let drifted = r#"{"count":{"web":{"nested":1}},"feed_ips":{"atom_feed":{},"gemfeed":{}},"page_ips":{"hosts":{},"urls":{}}}"#;
        let path = dir.path().join("web_20250401.nodeB.json.gz");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, drifted.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let merger = Merger::new(store(dir.path()));
        let err = merger.merge_date(20250401).unwrap_err();
        assert!(matches!(err, MergerError::Incompatible(_)));
    }
}
