//! Records read from a running server
//!
//! [`LiveRecordSource`] pages through one node with SCAN and inspects each
//! page in a pipeline. Keys that disappear between the two steps are skipped.

use crate::error::{ConnectionError, DecodeError, LiveResult, ScopeError};
use crate::live::{
    ConnectOptions, KeyInspector, KeySpace, NodeRole, RedisNode, ScanCursor, StandaloneEndpoint,
    Topology,
};
use crate::record::{KeyRecord, RecordSource};
use std::collections::VecDeque;
use tracing::info;

/// SCAN COUNT hint for live analysis
pub const LIVE_PAGE_HINT: usize = 100;

/// Lazy record stream over one live node
pub struct LiveRecordSource<E> {
    endpoint: E,
    pattern: String,
    page_hint: usize,
    cursor: Option<ScanCursor>,
    buffer: VecDeque<KeyRecord>,
    vanished: u64,
}

impl<E: KeySpace + KeyInspector> LiveRecordSource<E> {
    pub fn new(endpoint: E) -> Self {
        Self {
            endpoint,
            pattern: "*".to_string(),
            page_hint: LIVE_PAGE_HINT,
            cursor: Some(ScanCursor::start()),
            buffer: VecDeque::new(),
            vanished: 0,
        }
    }

    /// Limit the scan to keys matching a glob pattern
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }

    pub fn with_page_hint(mut self, page_hint: usize) -> Self {
        self.page_hint = page_hint.max(1);
        self
    }

    /// Keys seen by SCAN that were gone before they could be inspected
    pub fn vanished(&self) -> u64 {
        self.vanished
    }

    fn fetch_page(&mut self, cursor: ScanCursor) -> Result<(), ConnectionError> {
        let page = self.endpoint.scan(cursor, &self.pattern, self.page_hint)?;
        self.cursor = page.next;
        for record in self.endpoint.inspect(&page.keys)? {
            match record {
                Some(record) => self.buffer.push_back(record),
                None => self.vanished += 1,
            }
        }
        Ok(())
    }
}

impl<E: KeySpace + KeyInspector> Iterator for LiveRecordSource<E> {
    type Item = Result<KeyRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            let cursor = self.cursor?;
            if let Err(e) = self.fetch_page(cursor) {
                self.cursor = None;
                return Some(Err(DecodeError::Live {
                    addr: self.endpoint.name(),
                    error: e,
                }));
            }
        }
    }
}

impl<E: KeySpace + KeyInspector> RecordSource for LiveRecordSource<E> {
    fn name(&self) -> String {
        self.endpoint.name()
    }
}

/// One source per node of the requested role
///
/// Cluster replicas are switched to READONLY. A node that cannot be reached
/// is logged and skipped; authentication failures abort. If no node is left
/// the result is `NoEligibleNode`.
pub fn open_live_sources(
    topology: &Topology,
    role: NodeRole,
    options: &ConnectOptions,
) -> Result<Vec<LiveRecordSource<StandaloneEndpoint>>, ScopeError> {
    let readonly = topology.is_cluster() && role == NodeRole::Replica;
    open_live_sources_with(topology, role, |addr| {
        let mut node = RedisNode::connect(addr, options)?;
        if readonly {
            node.readonly()?;
        }
        Ok(StandaloneEndpoint::new(node))
    })
}

/// [`open_live_sources`] over any endpoint type
pub fn open_live_sources_with<E, C>(
    topology: &Topology,
    role: NodeRole,
    connect: C,
) -> Result<Vec<LiveRecordSource<E>>, ScopeError>
where
    E: KeySpace + KeyInspector,
    C: FnMut(&str) -> LiveResult<E>,
{
    let sources: Vec<_> = topology
        .connect_role(role, connect)?
        .into_iter()
        .map(LiveRecordSource::new)
        .collect();
    info!(nodes = sources.len(), role = %role, "Live sources ready");
    Ok(sources)
}
