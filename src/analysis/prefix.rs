//! Prefix aggregation tree
//!
//! Every key is split into segments and inserted under a synthetic root and a
//! per-database node. Each node on the path accumulates the key's size and
//! count, so a node's totals cover every key that starts with its prefix.
//!
//! ```text
//! root                      depth 1
//! └── db:0                  depth 2
//!     ├── user              depth 3   (level 1 below the database)
//!     │   ├── 1             depth 4
//!     │   └── 2
//!     └── order
//!         └── 1
//! ```

use crate::analysis::topk::{TopKSelector, Weighted};
use crate::analysis::{Accumulator, KeySplitter};
use crate::error::ConfigError;
use crate::record::KeyRecord;
use std::collections::BTreeMap;

/// Depth of the synthetic root
pub const ROOT_DEPTH: usize = 1;

/// Depth of the per-database nodes
pub const DATABASE_DEPTH: usize = 2;

/// A node of the prefix tree
#[derive(Debug, Clone, Default)]
pub struct PrefixNode {
    full_path: String,
    database: Option<u32>,
    prefix: String,
    aggregated_size: u64,
    key_count: u64,
    terminal_size: u64,
    terminal_count: u64,
    children: BTreeMap<String, PrefixNode>,
}

impl PrefixNode {
    fn child(
        parent_path: &str,
        parent_prefix: &str,
        parent_database: Option<u32>,
        segment: &str,
        database: u32,
        separator: &str,
    ) -> Self {
        let full_path = if parent_path.is_empty() {
            segment.to_string()
        } else {
            format!("{parent_path}/{segment}")
        };
        let prefix = match parent_database {
            None => String::new(),
            Some(_) if parent_prefix.is_empty() => segment.to_string(),
            Some(_) => format!("{parent_prefix}{separator}{segment}"),
        };
        Self {
            full_path,
            database: Some(database),
            prefix,
            ..Default::default()
        }
    }

    /// Slash-joined path from the root, e.g. `db:0/user`
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Database this node belongs to; `None` for the root
    pub fn database(&self) -> Option<u32> {
        self.database
    }

    /// Key prefix below the database node, joined with the primary separator
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Total size of all keys under this prefix
    pub fn aggregated_size(&self) -> u64 {
        self.aggregated_size
    }

    /// Number of keys under this prefix
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Size of keys whose path ends exactly here
    pub fn terminal_size(&self) -> u64 {
        self.terminal_size
    }

    /// Number of keys whose path ends exactly here
    pub fn terminal_count(&self) -> u64 {
        self.terminal_count
    }

    pub fn children(&self) -> impl Iterator<Item = &PrefixNode> {
        self.children.values()
    }

    pub fn child_by_segment(&self, segment: &str) -> Option<&PrefixNode> {
        self.children.get(segment)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One reported prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixEntry {
    pub database: u32,
    pub prefix: String,
    pub size: u64,
    pub key_count: u64,
}

impl Weighted for PrefixEntry {
    fn weight(&self) -> u64 {
        self.size
    }
}

/// Prefix tree over all ingested keys
#[derive(Debug, Clone)]
pub struct PrefixTree {
    root: PrefixNode,
    splitter: KeySplitter,
}

impl Default for PrefixTree {
    fn default() -> Self {
        Self::new(KeySplitter::default())
    }
}

impl PrefixTree {
    pub fn new(splitter: KeySplitter) -> Self {
        Self {
            root: PrefixNode::default(),
            splitter,
        }
    }

    pub fn root(&self) -> &PrefixNode {
        &self.root
    }

    /// Add one key; every node on its path is created on demand and updated
    pub fn insert(&mut self, database: u32, key: &str, size: u64) {
        let separator = self.splitter.primary().to_string();
        let segments = self.splitter.split(key);

        let mut node = &mut self.root;
        node.aggregated_size += size;
        node.key_count += 1;

        let db_segment = format!("db:{database}");
        let path = std::iter::once(db_segment.as_str()).chain(segments.iter().map(String::as_str));
        for segment in path {
            let PrefixNode {
                full_path,
                prefix,
                database: parent_database,
                children,
                ..
            } = node;
            node = children.entry(segment.to_string()).or_insert_with(|| {
                let parent_database = *parent_database;
                PrefixNode::child(full_path, prefix, parent_database, segment, database, &separator)
            });
            node.aggregated_size += size;
            node.key_count += 1;
        }
        node.terminal_size += size;
        node.terminal_count += 1;
    }

    /// Look up a node by database and key segments
    pub fn get(&self, database: u32, segments: &[&str]) -> Option<&PrefixNode> {
        let mut node = self.root.children.get(&format!("db:{database}"))?;
        for segment in segments {
            node = node.children.get(*segment)?;
        }
        Some(node)
    }

    /// Depth-first pre-order walk starting at the root (depth 1)
    ///
    /// `max_levels` counts levels below the per-database node; nodes deeper
    /// than that are neither visited nor descended into. `visit` returns
    /// whether to descend into the node's children.
    pub fn traverse<F>(&self, max_levels: Option<usize>, mut visit: F)
    where
        F: FnMut(&PrefixNode, usize) -> bool,
    {
        let max_depth = max_levels.map(|levels| levels.saturating_add(DATABASE_DEPTH));
        let mut stack: Vec<(&PrefixNode, usize)> = vec![(&self.root, ROOT_DEPTH)];
        while let Some((node, depth)) = stack.pop() {
            if max_depth.is_some_and(|max| depth > max) {
                continue;
            }
            if !visit(node, depth) {
                continue;
            }
            // Reverse so children pop in key order
            for child in node.children.values().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Reportable prefixes in pre-order: everything below the database nodes
    pub fn prefixes(&self, max_levels: Option<usize>) -> Vec<PrefixEntry> {
        let mut out = Vec::new();
        self.traverse(max_levels, |node, depth| {
            if depth > DATABASE_DEPTH {
                out.push(entry_for(node));
            }
            true
        });
        out
    }

    /// The `n` largest prefixes, heaviest first
    pub fn top_prefixes(
        &self,
        n: usize,
        max_levels: Option<usize>,
    ) -> Result<Vec<PrefixEntry>, ConfigError> {
        let mut top = TopKSelector::new(n)?;
        self.traverse(max_levels, |node, depth| {
            if depth > DATABASE_DEPTH {
                top.add(entry_for(node));
            }
            true
        });
        Ok(top.into_sorted_vec())
    }
}

fn entry_for(node: &PrefixNode) -> PrefixEntry {
    PrefixEntry {
        database: node.database.unwrap_or_default(),
        prefix: node.prefix.clone(),
        size: node.aggregated_size,
        key_count: node.key_count,
    }
}

impl Accumulator for PrefixTree {
    fn accept(&mut self, record: &KeyRecord) {
        self.insert(record.database, &record.key, record.size_bytes);
    }
}
