//! keyscope - Redis key-space analyzer
//!
//! Reports the largest keys, aggregates memory by key prefix and builds
//! flame graph data, reading either snapshot exports or a live deployment.
//! Also lists keys by pattern and bulk-deletes them behind a typed
//! confirmation.
//!
//! # Features
//!
//! - **Streaming Analysis**: Records are folded into bounded accumulators one
//!   at a time, so snapshot size does not drive memory use.
//!
//! - **Multiple Snapshots**: Several exports can be ingested in sequence into
//!   the same accumulators.
//!
//! - **Cluster Aware**: Live deployments are detected as standalone or
//!   cluster; replicas are read by default.
//!
//! - **Guarded Deletes**: `delete` refuses match-all patterns and only
//!   connects once `DELETE` has been typed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐       ┌──────────────────────────────┐
//! │  JSON-lines exports  │       │       Live deployment        │
//! │  (JsonLinesSource)   │       │  SCAN + TYPE/MEMORY USAGE    │
//! └──────────┬───────────┘       │   (LiveRecordSource/node)    │
//!            │                   └──────────────┬───────────────┘
//!            └───────────────┬──────────────────┘
//!                            ▼
//!              ┌───────────────────────────┐
//!              │      FilterPipeline       │
//!              │  key regex, expiration    │
//!              └─────────────┬─────────────┘
//!                            ▼
//!   ┌──────────────┬─────────┴──────┬───────────────────┐
//!   ▼              ▼                ▼                   ▼
//! TopKSelector  PrefixTree   FlameAggregator   Memory CSV / export
//!   │              │                │                   │
//!   └──────────────┴───────┬────────┴───────────────────┘
//!                          ▼
//!             <data-dir>/keyscope-YYYYmmdd-HHMMSS/
//!     bigkey.csv  prefix.csv  flamegraph.json  *-memory.csv
//! ```
//!
//! # Example
//!
//! ```bash
//! # Largest 50 keys across two exports
//! keyscope bigkey dump-1.jsonl,dump-2.jsonl -n 50
//!
//! # Prefix sizes of a live cluster, two levels deep
//! keyscope prefix redis://10.0.0.1:7000 --max-depth 2
//!
//! # Delete temporary keys in batches of 500
//! keyscope delete redis://10.0.0.1:6379 --pattern 'temp:*' --batch-size 500
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod filter;
pub mod live;
pub mod progress;
pub mod record;
pub mod report;
pub mod source;

pub use analysis::{ingest, ingest_sources, Accumulator, IngestStats, KeySplitter, RunStats};
pub use error::{
    ConfigError, ConnectionError, DecodeError, MutationError, ScopeError, TopologyError,
};
pub use filter::FilterPipeline;
pub use record::{KeyRecord, KeyType, RecordSource};
