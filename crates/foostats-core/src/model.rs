//! Shared data types for the pipeline: the normalized `Event`, the
//! per-day accumulator `DayStats`, the polymorphic `Value` used to merge
//! snapshots whose schema may have drifted, and the cross-host `MergedDay`
//! view produced by the merger.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two protocols this pipeline observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Web,
    Gemini,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Web => "web",
            Protocol::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Protocol::Web),
            "gemini" => Ok(Protocol::Gemini),
            _ => Err(()),
        }
    }
}

/// Address family, determined by the textual form of the source IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::V4 => "v4",
            IpFamily::V6 => "v6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized request record, produced by a parser and consumed by the
/// filter and aggregator. Never persisted.
#[derive(Debug, Clone)]
pub struct Event {
    pub protocol: Protocol,
    pub host: String,
    pub ip_hash: String,
    pub ip_family: IpFamily,
    /// `YYYYMMDD`, local time.
    pub date: u32,
    /// Wall-clock time, normalized to `HHMMSS` by every parser so the
    /// filter's rate gate can compare it for plain string equality.
    pub time: String,
    pub uri_path: String,
    pub status: String,
}

/// Two named IP-hash sets for feed endpoints (`atom_feed`, `gemfeed`).
/// Each maps `ip_hash -> hit count`; only the key set's cardinality is used
/// downstream, but counts are kept so merges across hosts stay additive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedIps {
    pub atom_feed: BTreeMap<String, u64>,
    pub gemfeed: BTreeMap<String, u64>,
}

/// Per-page IP-hash sets, keyed by host and by `host||uri_path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageIps {
    pub hosts: BTreeMap<String, BTreeMap<String, u64>>,
    pub urls: BTreeMap<String, BTreeMap<String, u64>>,
}

/// One `(protocol, date)` accumulator. Created lazily by the aggregator,
/// serialized once at the end of ingest, immutable thereafter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayStats {
    pub count: BTreeMap<String, u64>,
    pub feed_ips: FeedIps,
    pub page_ips: PageIps,
}

/// Fixed-width key naming a day bucket, e.g. `web_20250101`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey {
    pub protocol: Protocol,
    pub date: u32,
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:08}", self.protocol, self.date)
    }
}

/// A tagged sum type standing in for "number, mapping, or error" in the
/// source pipeline's polymorphic merge. `Number` merges by addition,
/// `Map` merges by recursing over shared keys; mixing the two is the one
/// fatal case (schema drift between node versions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(u64),
    Map(BTreeMap<String, Value>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("incompatible merge at key `{key}`: number meets mapping")]
    Incompatible { key: String },
}

impl Value {
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Merge two values of the same logical slot. Numbers add; maps
    /// recurse key by key, with missing keys treated as absent on one
    /// side. Mixing a number and a map is fatal.
    pub fn merge(self, other: Value) -> Result<Value, MergeError> {
        merge_at("$", self, other)
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            Value::Number(_) => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            Value::Number(_) => None,
        }
    }
}

fn merge_at(key: &str, a: Value, b: Value) -> Result<Value, MergeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
        (Value::Map(mut x), Value::Map(y)) => {
            for (k, v) in y {
                match x.remove(&k) {
                    Some(existing) => {
                        x.insert(k.clone(), merge_at(&k, existing, v)?);
                    }
                    None => {
                        x.insert(k, v);
                    }
                }
            }
            Ok(Value::Map(x))
        }
        _ => Err(MergeError::Incompatible {
            key: key.to_string(),
        }),
    }
}

/// Cross-host, cross-protocol view of one day, as produced by the merger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedDay {
    /// Sum of every loaded `count` map; unknown keys from schema drift are
    /// preserved verbatim rather than dropped.
    pub count: BTreeMap<String, u64>,
    pub feed_ips: FeedCardinalities,
    pub page_ips: PageCardinalities,
}

/// Fixed five-key feed visitor cardinalities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedCardinalities {
    #[serde(rename = "Total")]
    pub total: u64,
    #[serde(rename = "Gemini Gemfeed")]
    pub gemini_gemfeed: u64,
    #[serde(rename = "Gemini Atom")]
    pub gemini_atom: u64,
    #[serde(rename = "Web Gemfeed")]
    pub web_gemfeed: u64,
    #[serde(rename = "Web Atom")]
    pub web_atom: u64,
}

/// Per-host and per-url visitor cardinalities after union and `.gmi`/`.html`
/// normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageCardinalities {
    pub hosts: BTreeMap<String, u64>,
    pub urls: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_key_formats_as_protocol_underscore_date() {
        let key = DayKey {
            protocol: Protocol::Gemini,
            date: 20250101,
        };
        assert_eq!(key.to_string(), "gemini_20250101");
    }

    #[test]
    fn value_merge_adds_numbers() {
        let merged = Value::Number(3).merge(Value::Number(4)).unwrap();
        assert_eq!(merged, Value::Number(7));
    }

    #[test]
    fn value_merge_recurses_over_maps() {
        let mut a = BTreeMap::new();
        a.insert("h1".to_string(), Value::Number(1));
        a.insert("h2".to_string(), Value::Number(1));
        let mut b = BTreeMap::new();
        b.insert("h2".to_string(), Value::Number(2));
        b.insert("h3".to_string(), Value::Number(5));

        let merged = Value::Map(a).merge(Value::Map(b)).unwrap();
        let map = merged.into_map().unwrap();
        assert_eq!(map.get("h1"), Some(&Value::Number(1)));
        assert_eq!(map.get("h2"), Some(&Value::Number(3)));
        assert_eq!(map.get("h3"), Some(&Value::Number(5)));
    }

    #[test]
    fn value_merge_rejects_number_map_mismatch() {
        let err = Value::Number(1)
            .merge(Value::Map(BTreeMap::new()))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::Incompatible {
                key: "$".to_string()
            }
        );
    }
}
