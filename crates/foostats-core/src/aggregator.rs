//! Day-bucketed statistics accumulator (§4.6). Consults the [`Filter`] for
//! each incoming Event, then applies feed/page accounting exclusively —
//! feed endpoints short-circuit page accounting entirely.

use std::collections::BTreeMap;

use crate::filter::{Filter, FilterError};
use crate::model::{DayKey, DayStats, Event, Protocol};

/// Owns the filter and the day-keyed statistics map for one ingest run.
pub struct Aggregator {
    filter: Filter,
    days: BTreeMap<DayKey, DayStats>,
}

impl Aggregator {
    pub fn new(filter: Filter) -> Self {
        Aggregator {
            filter,
            days: BTreeMap::new(),
        }
    }

    /// Consume one Event: filter it, then fold it into its day bucket.
    pub fn add(&mut self, event: Event) -> Result<(), FilterError> {
        let accepted = self.filter.accept(&event)?;
        let key = DayKey {
            protocol: event.protocol,
            date: event.date,
        };
        let day = self.days.entry(key).or_default();

        if !accepted {
            *day.count.entry("filtered".to_string()).or_insert(0) += 1;
            return Ok(());
        }

        *day.count.entry(event.protocol.as_str().to_string()).or_insert(0) += 1;
        *day.count.entry(event.ip_family.as_str().to_string()).or_insert(0) += 1;

        if is_atom_feed(&event.uri_path) {
            *day.feed_ips.atom_feed.entry(event.ip_hash.clone()).or_insert(0) += 1;
            return Ok(());
        }
        if is_gemfeed(&event.uri_path) {
            *day.feed_ips.gemfeed.entry(event.ip_hash.clone()).or_insert(0) += 1;
            return Ok(());
        }

        if is_page(&event.uri_path) {
            let url_key = format!("{}{}", event.host, event.uri_path);
            *day
                .page_ips
                .hosts
                .entry(event.host.clone())
                .or_default()
                .entry(event.ip_hash.clone())
                .or_insert(0) += 1;
            *day
                .page_ips
                .urls
                .entry(url_key)
                .or_default()
                .entry(event.ip_hash)
                .or_insert(0) += 1;
        }

        Ok(())
    }

    /// Every day bucket touched this run, in ascending `(protocol, date)` order.
    pub fn into_days(self) -> BTreeMap<DayKey, DayStats> {
        self.days
    }

    pub fn days(&self) -> &BTreeMap<DayKey, DayStats> {
        &self.days
    }
}

/// Strips a `?query` or `#fragment` suffix before matching a fixed path.
fn path_without_suffix(uri_path: &str) -> &str {
    let end = uri_path
        .find(['?', '#'])
        .unwrap_or(uri_path.len());
    &uri_path[..end]
}

fn is_atom_feed(uri_path: &str) -> bool {
    path_without_suffix(uri_path) == "/gemfeed/atom.xml"
}

fn is_gemfeed(uri_path: &str) -> bool {
    matches!(path_without_suffix(uri_path), "/gemfeed/" | "/gemfeed/index.gmi")
}

fn is_page(uri_path: &str) -> bool {
    let path = path_without_suffix(uri_path);
    path.ends_with(".html") || path.ends_with(".gmi")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IpFamily;
    use std::fs;

    fn filter(dir: &std::path::Path) -> Filter {
        let patterns = dir.join("patterns.txt");
        fs::write(&patterns, "").unwrap();
        Filter::open(&patterns, &dir.join("filter.log")).unwrap()
    }

    fn event(uri_path: &str, ip_hash: &str, time: &str) -> Event {
        Event {
            protocol: Protocol::Web,
            host: "example.org".to_string(),
            ip_hash: ip_hash.to_string(),
            ip_family: IpFamily::V4,
            date: 20250101,
            time: time.to_string(),
            uri_path: uri_path.to_string(),
            status: "200".to_string(),
        }
    }

    #[test]
    fn scenario_a_feed_short_circuits_page_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = Aggregator::new(filter(dir.path()));
        aggregator
            .add(event("/gemfeed/atom.xml", "H1", "120000"))
            .unwrap();

        let days = aggregator.into_days();
        let day = days
            .get(&DayKey {
                protocol: Protocol::Web,
                date: 20250101,
            })
            .unwrap();
        assert_eq!(day.count.get("filtered"), None);
        assert_eq!(day.count.get("web"), Some(&1));
        assert_eq!(day.count.get("v4"), Some(&1));
        assert_eq!(day.feed_ips.atom_feed.get("H1"), Some(&1));
        assert!(day.feed_ips.gemfeed.is_empty());
        assert!(day.page_ips.hosts.is_empty());
        assert!(day.page_ips.urls.is_empty());
    }

    #[test]
    fn page_accounting_applies_only_to_html_and_gmi_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = Aggregator::new(filter(dir.path()));
        aggregator.add(event("/index.html", "H1", "120000")).unwrap();
        aggregator.add(event("/robots.txt", "H1", "120001")).unwrap();

        let days = aggregator.into_days();
        let day = days
            .get(&DayKey {
                protocol: Protocol::Web,
                date: 20250101,
            })
            .unwrap();
        assert_eq!(day.page_ips.urls.len(), 1);
        assert_eq!(
            day.page_ips.urls.get("example.org/index.html").unwrap().get("H1"),
            Some(&1)
        );
    }

    #[test]
    fn filtered_event_increments_only_the_filtered_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = Aggregator::new(filter(dir.path()));
        aggregator.add(event("/index.html", "H2", "121212")).unwrap();
        aggregator.add(event("/index.html", "H2", "121212")).unwrap();

        let days = aggregator.into_days();
        let day = days
            .get(&DayKey {
                protocol: Protocol::Web,
                date: 20250101,
            })
            .unwrap();
        assert_eq!(day.count.get("filtered"), Some(&1));
        assert_eq!(day.count.get("web"), Some(&1));
    }

    #[test]
    fn day_buckets_are_created_lazily_per_protocol_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = Aggregator::new(filter(dir.path()));
        assert!(aggregator.days().is_empty());
    }
}
