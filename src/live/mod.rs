//! Live deployment access
//!
//! - [`node`]: one blocking connection, INFO parsing, error classification
//! - [`topology`]: standalone or cluster, masters and replicas
//! - [`endpoint`]: the scan/delete/inspect capability and its two implementations
//! - [`mutator`]: cursor scans and the guarded bulk delete

pub mod endpoint;
pub mod mutator;
pub mod node;
pub mod topology;

pub use endpoint::{
    ClusterEndpoint, Endpoint, KeyInspector, KeySpace, ScanCursor, ScanPage, StandaloneEndpoint,
};
pub use mutator::{
    confirm_deletion, guarded_delete, BatchMutator, BatchReport, DeleteOutcome, DeletePlan,
    DeleteSummary, ScanSummary,
};
pub use node::{ConnectOptions, DeploymentMode, NodeInfo, NodeRole, RedisNode};
pub use topology::{NodeIntrospection, Topology};

use crate::error::ScopeError;

/// Connect to the seed and resolve the deployment topology
pub fn resolve_topology(
    seed: &str,
    options: &ConnectOptions,
    force_standalone: bool,
) -> Result<Topology, ScopeError> {
    let mut node = RedisNode::connect(seed, options)?;
    Topology::resolve(&mut node, force_standalone)
}
