//! Flame graph aggregation
//!
//! Keys are split into segments under one synthetic node per database. Every
//! node on a key's path accumulates the key's size, so while ingesting, a
//! node's value is at least the sum of its children. The root is left at zero
//! during ingestion and set to the sum of its children by [`FlameAggregator::finalize`].
//!
//! Large key-spaces produce trees too wide to render. [`FlameAggregator::trim`]
//! folds small leaves into one `others` child per parent, leaving the root
//! total unchanged.

use crate::analysis::{Accumulator, KeySplitter};
use crate::record::KeyRecord;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::debug;

/// Leaves smaller than this are folded into `others` when trimming
pub const DEFAULT_LEAF_THRESHOLD: u64 = 1024 * 1024;

/// Trimming only runs once at least this many records were ingested
pub const DEFAULT_TRIM_MIN_RECORDS: u64 = 1000;

/// Name of the synthetic node that collects trimmed leaves
pub const OTHERS: &str = "others";

/// Name of the root node
pub const ROOT: &str = "root";

/// One node of the flame graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlameNode {
    pub name: String,
    pub value: u64,
    #[serde(
        serialize_with = "children_as_list",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub children: BTreeMap<String, FlameNode>,
}

fn children_as_list<S: Serializer>(
    children: &BTreeMap<String, FlameNode>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(children.values())
}

impl FlameNode {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&FlameNode> {
        self.children.get(name)
    }

    /// Sum of the direct children's values
    pub fn children_value(&self) -> u64 {
        self.children.values().map(|c| c.value).sum()
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.values().map(FlameNode::node_count).sum::<usize>()
    }
}

/// Builds a flame graph tree from one ingestion pass
///
/// Single writer: feed it from one thread, one source after the other.
#[derive(Debug, Clone)]
pub struct FlameAggregator {
    root: FlameNode,
    splitter: KeySplitter,
    records: u64,
}

impl Default for FlameAggregator {
    fn default() -> Self {
        Self::new(KeySplitter::default())
    }
}

impl FlameAggregator {
    pub fn new(splitter: KeySplitter) -> Self {
        Self {
            root: FlameNode::named(ROOT),
            splitter,
            records: 0,
        }
    }

    /// Add one record along `db:<n>/<segments...>`
    pub fn add_record(&mut self, record: &KeyRecord) {
        self.records += 1;
        let size = record.size_bytes;
        let db_segment = format!("db:{}", record.database);
        let segments = self.splitter.split(&record.key);

        let mut node = &mut self.root;
        let path = std::iter::once(db_segment.as_str()).chain(segments.iter().map(String::as_str));
        for part in path {
            node = node
                .children
                .entry(part.to_string())
                .or_insert_with(|| FlameNode::named(part));
            node.value += size;
        }
    }

    /// Number of records ingested so far
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Set the root value to the sum of its children
    pub fn finalize(&mut self) {
        self.root.value = self.root.children_value();
    }

    /// Fold small leaves into `others`
    ///
    /// Does nothing unless at least `min_records` records were ingested.
    /// Returns the number of leaves removed.
    pub fn trim(&mut self, leaf_threshold: u64, min_records: u64) -> usize {
        if self.records < min_records {
            debug!(
                records = self.records,
                min_records, "Too few records, flame graph left untrimmed"
            );
            return 0;
        }
        let removed = trim_node(&mut self.root, leaf_threshold);
        debug!(removed, leaf_threshold, "Flame graph trimmed");
        removed
    }

    pub fn root(&self) -> &FlameNode {
        &self.root
    }

    /// Finalize, trim with the given thresholds and hand out the tree
    pub fn into_tree(mut self, leaf_threshold: u64, min_records: u64) -> FlameNode {
        self.finalize();
        self.trim(leaf_threshold, min_records);
        self.root
    }
}

fn trim_node(node: &mut FlameNode, leaf_threshold: u64) -> usize {
    let small: Vec<String> = node
        .children
        .iter()
        .filter(|(_, child)| child.is_leaf() && child.value < leaf_threshold)
        .map(|(name, _)| name.clone())
        .collect();

    let mut folded = 0u64;
    for name in &small {
        if let Some(child) = node.children.remove(name) {
            folded += child.value;
        }
    }

    let mut removed = small.len();
    for child in node.children.values_mut() {
        removed += trim_node(child, leaf_threshold);
    }

    if folded > 0 {
        let name = others_slot(node);
        node.children
            .entry(name.clone())
            .or_insert_with(|| FlameNode::named(&name))
            .value += folded;
    }
    removed
}

/// Child name for folded leaves
///
/// A real key segment named `others` that has children of its own is left
/// alone; the folded total goes to `others~` (or `others~~`, ...) instead.
fn others_slot(node: &FlameNode) -> String {
    let mut name = OTHERS.to_string();
    while node.children.get(&name).is_some_and(|child| !child.is_leaf()) {
        name.push('~');
    }
    name
}

impl Accumulator for FlameAggregator {
    fn accept(&mut self, record: &KeyRecord) {
        self.add_record(record);
    }
}
