//! Accumulators over key records
//!
//! Each accumulator is a terminal sink for filtered records:
//!
//! - [`topk::TopKSelector`]: the N largest keys
//! - [`prefix::PrefixTree`]: size and key count per key prefix
//! - [`flame::FlameAggregator`]: hierarchical size breakdown for flame graphs
//!
//! [`ingest`] drives one record source through a [`FilterPipeline`] into any
//! number of accumulators. Accumulators are long-lived and passed by
//! reference, so several snapshots can be folded into the same state one
//! after the other.

pub mod flame;
pub mod prefix;
pub mod topk;

use crate::error::{ConfigError, DecodeError, ScopeError};
use crate::filter::FilterPipeline;
use crate::record::{KeyRecord, RecordSource};
use topk::TopKSelector;
use tracing::{debug, warn};

/// Default key segment separator
pub const DEFAULT_SEPARATOR: &str = ":";

/// A sink for filtered records
pub trait Accumulator {
    fn accept(&mut self, record: &KeyRecord);
}

impl Accumulator for TopKSelector<KeyRecord> {
    fn accept(&mut self, record: &KeyRecord) {
        self.add(record.clone());
    }
}

/// Splits keys into path segments
///
/// All configured separators are normalized to the first one before
/// splitting, so `temp_a:b` with separators `[":", "_"]` yields
/// `["temp", "a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySplitter {
    separators: Vec<String>,
}

impl Default for KeySplitter {
    fn default() -> Self {
        Self {
            separators: vec![DEFAULT_SEPARATOR.to_string()],
        }
    }
}

impl KeySplitter {
    /// An empty list falls back to `:`; an empty separator is rejected
    pub fn new(separators: Vec<String>) -> Result<Self, ConfigError> {
        if separators.is_empty() {
            return Ok(Self::default());
        }
        if let Some(empty) = separators.iter().find(|s| s.is_empty()) {
            return Err(ConfigError::InvalidSeparator {
                separator: empty.clone(),
            });
        }
        Ok(Self { separators })
    }

    /// The separator all others are normalized to
    pub fn primary(&self) -> &str {
        &self.separators[0]
    }

    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    pub fn split(&self, key: &str) -> Vec<String> {
        let primary = self.primary();
        let mut normalized = key.to_string();
        for sep in &self.separators[1..] {
            if normalized.contains(sep.as_str()) {
                normalized = normalized.replace(sep.as_str(), primary);
            }
        }
        normalized.split(primary).map(str::to_string).collect()
    }
}

/// Counters for one ingested source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub source: String,
    pub records: u64,
    pub bytes: u64,
}

/// Feed every record of `source` that passes `filters` into each accumulator
///
/// Stops at the first decode error. Records folded in before the error stay
/// in the accumulators.
pub fn ingest<S>(
    source: S,
    filters: &FilterPipeline,
    accumulators: &mut [&mut dyn Accumulator],
) -> Result<IngestStats, DecodeError>
where
    S: RecordSource,
{
    ingest_with(source, filters, accumulators, |_| {})
}

/// Like [`ingest`], calling `on_record` after each accepted record
pub fn ingest_with<S, F>(
    source: S,
    filters: &FilterPipeline,
    accumulators: &mut [&mut dyn Accumulator],
    mut on_record: F,
) -> Result<IngestStats, DecodeError>
where
    S: RecordSource,
    F: FnMut(&KeyRecord),
{
    let mut stats = IngestStats {
        source: source.name(),
        ..Default::default()
    };
    debug!(source = %stats.source, filters = ?filters.describe(), "Ingesting source");

    for record in filters.apply(source) {
        let record = record?;
        for acc in accumulators.iter_mut() {
            acc.accept(&record);
        }
        stats.records += 1;
        stats.bytes += record.size_bytes;
        on_record(&record);
    }

    debug!(
        source = %stats.source,
        records = stats.records,
        bytes = stats.bytes,
        "Source ingested"
    );
    Ok(stats)
}

/// Totals of a multi-source run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub sources: Vec<IngestStats>,
    /// Sources that failed and were skipped, with the error
    pub failed: Vec<(String, String)>,
}

impl RunStats {
    pub fn records(&self) -> u64 {
        self.sources.iter().map(|s| s.records).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.sources.iter().map(|s| s.bytes).sum()
    }
}

/// Run `ingest_one` over each source in order
///
/// With `keep_going`, a snapshot decode error (including one raised while
/// opening a source) is logged and the run continues with the next source.
/// Records already folded in stay. Any other error aborts, including a live
/// source losing its connection mid-scan.
pub fn ingest_sources<S, I, F>(
    sources: I,
    keep_going: bool,
    mut ingest_one: F,
) -> Result<RunStats, ScopeError>
where
    S: RecordSource,
    I: IntoIterator<Item = Result<S, DecodeError>>,
    F: FnMut(S) -> Result<IngestStats, ScopeError>,
{
    let mut run = RunStats::default();
    for opened in sources {
        match opened.map_err(ScopeError::from).and_then(&mut ingest_one) {
            Ok(stats) => run.sources.push(stats),
            Err(ScopeError::Decode(e)) if keep_going => {
                warn!(error = %e, "Source failed, continuing with the next one");
                run.failed.push((e.source_name(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(run)
}
