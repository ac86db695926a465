//! Scan, delete and inspect capabilities of a live endpoint
//!
//! Downstream code only sees the [`KeySpace`] and [`KeyInspector`] traits.
//! Two implementations are chosen once, after topology resolution:
//!
//! - [`StandaloneEndpoint`]: one node, plain pipelines
//! - [`ClusterEndpoint`]: scans every master in turn and deletes through a
//!   slot-routed cluster pipeline

use crate::error::{ConnectionError, LiveResult, ScopeError};
use crate::live::node::{classify_error, ConnectOptions, NodeRole, RedisNode};
use crate::live::topology::Topology;
use crate::record::{KeyRecord, KeyType};
use chrono::{Duration as ChronoDuration, Utc};
use redis::cluster::{ClusterClient, ClusterConnection};
use redis::Value;
use tracing::{debug, info};

/// Position within a possibly multi-node scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    /// Index of the node being scanned
    pub node: usize,
    /// Server-side SCAN cursor on that node
    pub position: u64,
}

impl ScanCursor {
    pub fn start() -> Self {
        Self::default()
    }
}

/// One page of scan results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    /// `None` once every node is exhausted
    pub next: Option<ScanCursor>,
}

/// Cursor-based enumeration and pipelined deletion
pub trait KeySpace {
    /// Description for logs, e.g. the seed address
    fn name(&self) -> String;

    /// Fetch one page; pages may be empty before the scan is exhausted
    fn scan(&mut self, cursor: ScanCursor, pattern: &str, page_hint: usize) -> LiveResult<ScanPage>;

    /// Delete keys in one pipeline; returns the deleted count per key
    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>>;
}

impl<K: KeySpace + ?Sized> KeySpace for &mut K {
    fn name(&self) -> String {
        (**self).name()
    }

    fn scan(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        page_hint: usize,
    ) -> LiveResult<ScanPage> {
        (**self).scan(cursor, pattern, page_hint)
    }

    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>> {
        (**self).delete(keys)
    }
}

/// Per-key metadata lookups
pub trait KeyInspector {
    /// Metadata in input order; `None` for keys that no longer exist
    fn inspect(&mut self, keys: &[String]) -> LiveResult<Vec<Option<KeyRecord>>>;
}

fn scan_node(
    node: &mut RedisNode,
    position: u64,
    pattern: &str,
    page_hint: usize,
) -> LiveResult<(u64, Vec<String>)> {
    node.command(
        "SCAN",
        redis::cmd("SCAN")
            .arg(position)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(page_hint),
    )
}

/// One node used directly
pub struct StandaloneEndpoint {
    node: RedisNode,
}

impl StandaloneEndpoint {
    pub fn new(node: RedisNode) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &RedisNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut RedisNode {
        &mut self.node
    }
}

impl KeySpace for StandaloneEndpoint {
    fn name(&self) -> String {
        format!("{}/{}", self.node.addr(), self.node.database())
    }

    fn scan(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        page_hint: usize,
    ) -> LiveResult<ScanPage> {
        let (position, keys) = scan_node(&mut self.node, cursor.position, pattern, page_hint)?;
        let next = (position != 0).then_some(ScanCursor { node: 0, position });
        Ok(ScanPage { keys, next })
    }

    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("DEL").arg(key);
        }
        let addr = self.node.addr().to_string();
        pipe.query(self.node.connection())
            .map_err(|e| classify_error(&addr, "DEL", &e))
    }
}

impl KeyInspector for StandaloneEndpoint {
    fn inspect(&mut self, keys: &[String]) -> LiveResult<Vec<Option<KeyRecord>>> {
        inspect_keys(&mut self.node, keys)
    }
}

const INSPECT_COMMANDS: usize = 4;

/// TYPE, MEMORY USAGE, OBJECT ENCODING and PTTL for every key, then the
/// type-specific length for keys that still exist
fn inspect_keys(node: &mut RedisNode, keys: &[String]) -> LiveResult<Vec<Option<KeyRecord>>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let addr = node.addr().to_string();
    let database = node.database();

    let mut pipe = redis::pipe();
    for key in keys {
        pipe.cmd("TYPE").arg(key);
        pipe.cmd("MEMORY").arg("USAGE").arg(key);
        pipe.cmd("OBJECT").arg("ENCODING").arg(key);
        pipe.cmd("PTTL").arg(key);
    }
    let replies: Vec<Value> = pipe
        .query(node.connection())
        .map_err(|e| classify_error(&addr, "INSPECT", &e))?;
    if replies.len() != keys.len() * INSPECT_COMMANDS {
        return Err(ConnectionError::Command {
            addr,
            operation: "INSPECT".into(),
            reason: format!(
                "expected {} replies, got {}",
                keys.len() * INSPECT_COMMANDS,
                replies.len()
            ),
        });
    }

    let now = Utc::now();
    let mut records = Vec::with_capacity(keys.len());
    for (key, reply) in keys.iter().zip(replies.chunks(INSPECT_COMMANDS)) {
        let decode = |e: redis::RedisError| classify_error(&addr, "INSPECT", &e);
        let type_name: String = redis::from_redis_value(&reply[0]).map_err(decode)?;
        if type_name == "none" {
            debug!(key, "Key vanished before inspection");
            records.push(None);
            continue;
        }
        let size: Option<u64> = redis::from_redis_value(&reply[1]).map_err(decode)?;
        let encoding: Option<String> = redis::from_redis_value(&reply[2]).map_err(decode)?;
        let ttl_ms: i64 = redis::from_redis_value(&reply[3]).map_err(decode)?;

        let mut record = KeyRecord::new(
            database,
            key.as_str(),
            KeyType::from_type_reply(&type_name),
            size.unwrap_or_default(),
        )
        .with_encoding(encoding.unwrap_or_default());
        if ttl_ms >= 0 {
            record = record.with_expiration(now + ChronoDuration::milliseconds(ttl_ms));
        }
        records.push(Some(record));
    }

    let lengths: Vec<(usize, &'static str)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.as_ref().and_then(|r| r.key_type.length_command()).map(|c| (i, c)))
        .collect();
    if !lengths.is_empty() {
        let mut pipe = redis::pipe();
        for (i, command) in &lengths {
            pipe.cmd(command).arg(&keys[*i]);
        }
        let counts: Vec<u64> = pipe
            .query(node.connection())
            .map_err(|e| classify_error(&addr, "LENGTH", &e))?;
        for ((i, _), count) in lengths.iter().zip(counts) {
            if let Some(record) = records[*i].as_mut() {
                record.element_count = count;
            }
        }
    }

    Ok(records)
}

/// Every master of a cluster, scanned one after the other
pub struct ClusterEndpoint {
    seed: String,
    masters: Vec<RedisNode>,
    cluster: ClusterConnection,
}

impl ClusterEndpoint {
    /// Connect to every reachable master plus a slot-aware cluster connection
    ///
    /// Unreachable masters are logged and left out of the scan.
    pub fn connect(topology: &Topology, options: &ConnectOptions) -> Result<Self, ScopeError> {
        let masters =
            topology.connect_role(NodeRole::Master, |addr| RedisNode::connect(addr, options))?;
        let seed = masters
            .first()
            .map(|node| node.addr().to_string())
            .unwrap_or_default();

        let urls: Vec<String> = masters
            .iter()
            .map(|node| format!("redis://{}", node.addr()))
            .collect();
        let mut builder = ClusterClient::builder(urls)
            .connection_timeout(options.timeout)
            .response_timeout(options.timeout);
        if let Some(password) = &options.password {
            builder = builder.password(password.clone());
        }
        let client = builder
            .build()
            .map_err(|e| classify_error(&seed, "CLUSTER CONNECT", &e))?;
        let cluster = client
            .get_connection()
            .map_err(|e| classify_error(&seed, "CLUSTER CONNECT", &e))?;

        info!(masters = masters.len(), "Cluster endpoint ready");
        Ok(Self {
            seed,
            masters,
            cluster,
        })
    }
}

impl KeySpace for ClusterEndpoint {
    fn name(&self) -> String {
        format!("cluster via {} ({} masters)", self.seed, self.masters.len())
    }

    fn scan(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        page_hint: usize,
    ) -> LiveResult<ScanPage> {
        let count = self.masters.len();
        let Some(node) = self.masters.get_mut(cursor.node) else {
            return Ok(ScanPage::default());
        };
        let (position, keys) = scan_node(node, cursor.position, pattern, page_hint)?;
        let next = if position != 0 {
            Some(ScanCursor {
                node: cursor.node,
                position,
            })
        } else if cursor.node + 1 < count {
            debug!(node = node.addr(), "Master exhausted");
            Some(ScanCursor {
                node: cursor.node + 1,
                position: 0,
            })
        } else {
            None
        };
        Ok(ScanPage { keys, next })
    }

    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::cluster::cluster_pipe();
        for key in keys {
            pipe.cmd("DEL").arg(key);
        }
        pipe.query(&mut self.cluster)
            .map_err(|e| classify_error(&self.seed, "DEL", &e))
    }
}

/// The capability chosen after topology resolution
pub enum Endpoint {
    Standalone(StandaloneEndpoint),
    Cluster(ClusterEndpoint),
}

impl Endpoint {
    /// Connect the endpoint matching the topology
    ///
    /// Standalone deployments and `--no-cluster` runs use the seed address.
    pub fn connect(
        seed: &str,
        topology: &Topology,
        options: &ConnectOptions,
    ) -> Result<Self, ScopeError> {
        if topology.uses_cluster_routing() {
            Ok(Endpoint::Cluster(ClusterEndpoint::connect(topology, options)?))
        } else {
            let node = RedisNode::connect(seed, options)?;
            Ok(Endpoint::Standalone(StandaloneEndpoint::new(node)))
        }
    }
}

impl KeySpace for Endpoint {
    fn name(&self) -> String {
        match self {
            Endpoint::Standalone(e) => e.name(),
            Endpoint::Cluster(e) => e.name(),
        }
    }

    fn scan(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        page_hint: usize,
    ) -> LiveResult<ScanPage> {
        match self {
            Endpoint::Standalone(e) => e.scan(cursor, pattern, page_hint),
            Endpoint::Cluster(e) => e.scan(cursor, pattern, page_hint),
        }
    }

    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>> {
        match self {
            Endpoint::Standalone(e) => e.delete(keys),
            Endpoint::Cluster(e) => e.delete(keys),
        }
    }
}
