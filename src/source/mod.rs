//! Record sources
//!
//! - [`jsonl::JsonLinesSource`]: snapshot exports, one JSON record per line
//! - [`live::LiveRecordSource`]: SCAN plus per-key inspection on a live node

pub mod jsonl;
pub mod live;

pub use jsonl::JsonLinesSource;
pub use live::{open_live_sources, open_live_sources_with, LiveRecordSource};

use crate::config::{AnalysisConfig, SourceSpec};
use crate::error::{DecodeError, ScopeError};
use crate::live::resolve_topology;
use crate::record::RecordSource;

pub type BoxedSource = Box<dyn RecordSource>;

/// Sources of an analysis run, in ingestion order
///
/// Snapshot files are opened lazily, so an unreadable file surfaces as a
/// per-source decode error. Live nodes are all connected up front.
pub fn open_sources(
    config: &AnalysisConfig,
) -> Result<Box<dyn Iterator<Item = Result<BoxedSource, DecodeError>>>, ScopeError> {
    match &config.source {
        SourceSpec::Files(files) => {
            let files = files.clone();
            Ok(Box::new(files.into_iter().map(|path| {
                JsonLinesSource::open(&path).map(|s| Box::new(s) as BoxedSource)
            })))
        }
        SourceSpec::Live(url) => {
            let topology = resolve_topology(
                &url.addr(),
                &config.live.connect,
                config.live.force_standalone,
            )?;
            let sources = open_live_sources(&topology, config.role, &config.live.connect)?;
            Ok(Box::new(
                sources.into_iter().map(|s| Ok(Box::new(s) as BoxedSource)),
            ))
        }
    }
}
