//! foostats core library: a privacy-preserving analytics pipeline for a
//! site served over both HTTP(S) and Gemini.
//!
//! Three independently invocable phases sit on top of these modules:
//! *ingest* (`LogSource` → parsers → `Filter` → `Aggregator` →
//! `SnapshotStore`), *replicate* (`Replicator` → local filesystem), and
//! *merge* (`SnapshotStore` → `Merger`). Every textual IP is irreversibly
//! hashed by the [`anonymize`] module before it reaches any other
//! component; no raw IP is ever persisted.
//!
//! I/O is isolated in `source`, `store`, and `replicate`; `model`,
//! `filter`, `aggregator`, and `merge` are pure in-memory logic over
//! normalized `Event`/`DayStats`/`Value` types.

pub mod aggregator;
pub mod anonymize;
pub mod filter;
pub mod merge;
pub mod model;
pub mod parsers;
pub mod replicate;
pub mod source;
pub mod store;

pub use aggregator::Aggregator;
pub use filter::{Filter, FilterError};
pub use merge::{Merger, MergerError};
pub use model::{
    DayKey, DayStats, Event, FeedCardinalities, FeedIps, IpFamily, MergeError, MergedDay,
    PageCardinalities, PageIps, Protocol, Value,
};
pub use parsers::{GeminiParser, ParseOutcome, parse_web_line};
pub use replicate::{PlanItem, ReplicateError, ReplicationSummary, Replicator};
pub use source::{LineOutcome, LogSource, LogSourceError};
pub use store::{LoadedSnapshot, SnapshotStore, StoreError};
