//! Deployment topology resolution
//!
//! A run resolves the topology once from a seed node:
//!
//! ```text
//! seed ── INFO ──► redis_mode
//!                    ├── standalone ──► {seed} classified by its role
//!                    └── cluster
//!                          ├── --no-cluster ──► {seed} classified by its role
//!                          └── CLUSTER NODES ──► every healthy member
//! ```
//!
//! The result is read-only afterwards. Unusable cluster members are logged
//! and skipped; asking for a role class that ended up empty is an error.

use crate::error::{LiveResult, ScopeError, TopologyError};
use crate::live::node::{DeploymentMode, NodeInfo, NodeRole};
use tracing::{debug, info, warn};

/// Metadata calls needed to resolve a topology
pub trait NodeIntrospection {
    /// `host:port` of the node
    fn addr(&self) -> &str;

    /// Raw INFO text
    fn info(&mut self) -> LiveResult<String>;

    /// Raw CLUSTER NODES text
    fn cluster_nodes(&mut self) -> LiveResult<String>;
}

/// Flags that make a cluster member unusable
const UNUSABLE_FLAGS: [&str; 3] = ["fail", "noaddr", "handshake"];

/// Masters and replicas of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    masters: Vec<String>,
    replicas: Vec<String>,
    is_cluster: bool,
    forced_standalone: bool,
}

impl Topology {
    /// Resolve from a connected seed node
    ///
    /// Authentication and connection failures surface from the seed's calls
    /// and are never retried here.
    pub fn resolve<N: NodeIntrospection>(
        seed: &mut N,
        force_standalone: bool,
    ) -> Result<Self, ScopeError> {
        let addr = seed.addr().to_string();
        let info_text = seed.info()?;
        let node = NodeInfo::from_info(&addr, &info_text)?;

        let topology = match node.mode {
            DeploymentMode::Standalone => {
                info!(addr = %addr, role = %node.role, "Standalone deployment");
                Self::singleton(&addr, node.role, false, false)
            }
            DeploymentMode::Cluster if force_standalone => {
                info!(addr = %addr, role = %node.role, "Cluster deployment, using seed node only");
                Self::singleton(&addr, node.role, true, true)
            }
            DeploymentMode::Cluster => {
                let nodes_text = seed.cluster_nodes()?;
                let topology = Self::from_cluster_nodes(&addr, &nodes_text);
                info!(
                    addr = %addr,
                    masters = topology.masters.len(),
                    replicas = topology.replicas.len(),
                    "Cluster deployment"
                );
                topology
            }
        };
        Ok(topology)
    }

    fn singleton(addr: &str, role: NodeRole, is_cluster: bool, forced_standalone: bool) -> Self {
        let mut topology = Self {
            masters: Vec::new(),
            replicas: Vec::new(),
            is_cluster,
            forced_standalone,
        };
        match role {
            NodeRole::Master => topology.masters.push(addr.to_string()),
            NodeRole::Replica => topology.replicas.push(addr.to_string()),
        }
        topology
    }

    /// Build from CLUSTER NODES output, skipping unusable members
    pub fn from_cluster_nodes(seed_addr: &str, text: &str) -> Self {
        let seed_host = seed_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(seed_addr);

        let mut topology = Self {
            masters: Vec::new(),
            replicas: Vec::new(),
            is_cluster: true,
            forced_standalone: false,
        };

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                warn!(
                    "{}",
                    TopologyError::PartialTopology {
                        member: line.to_string(),
                        reason: "truncated CLUSTER NODES entry".into(),
                    }
                );
                continue;
            }

            let flags: Vec<&str> = fields[2].split(',').collect();
            let mut addr = fields[1]
                .split('@')
                .next()
                .and_then(|a| a.split(',').next())
                .unwrap_or_default()
                .to_string();
            if addr.starts_with(':') && flags.contains(&"myself") {
                addr = format!("{seed_host}{addr}");
            }

            if let Some(flag) = flags.iter().find(|f| UNUSABLE_FLAGS.contains(*f)) {
                warn!(
                    "{}",
                    TopologyError::PartialTopology {
                        member: addr,
                        reason: format!("flagged {flag}"),
                    }
                );
                continue;
            }
            if fields[7] == "disconnected" {
                warn!(
                    "{}",
                    TopologyError::PartialTopology {
                        member: addr,
                        reason: "link disconnected".into(),
                    }
                );
                continue;
            }

            if flags.contains(&"master") {
                topology.masters.push(addr);
            } else if flags.contains(&"slave") {
                topology.replicas.push(addr);
            } else {
                debug!(member = %addr, flags = fields[2], "Member without role, skipped");
            }
        }
        topology
    }

    pub fn masters(&self) -> &[String] {
        &self.masters
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// True if the deployment is sharded, even when only the seed is used
    pub fn is_cluster(&self) -> bool {
        self.is_cluster
    }

    /// True if scans and deletes should route across the cluster
    pub fn uses_cluster_routing(&self) -> bool {
        self.is_cluster && !self.forced_standalone
    }

    /// Addresses of the given role class, or an error if there are none
    pub fn nodes_for(&self, role: NodeRole) -> Result<&[String], TopologyError> {
        let nodes = match role {
            NodeRole::Master => &self.masters,
            NodeRole::Replica => &self.replicas,
        };
        if nodes.is_empty() {
            return Err(TopologyError::NoEligibleNode {
                role: role.to_string(),
            });
        }
        Ok(nodes)
    }

    /// Connect every node of a role class
    ///
    /// A node that cannot be reached is logged and skipped; authentication
    /// failures abort. An empty role class, or one where nothing connected,
    /// is `NoEligibleNode`.
    pub fn connect_role<E, C>(&self, role: NodeRole, mut connect: C) -> Result<Vec<E>, ScopeError>
    where
        C: FnMut(&str) -> LiveResult<E>,
    {
        let addrs = self.nodes_for(role)?;
        let mut connected = Vec::with_capacity(addrs.len());

        for addr in addrs {
            match connect(addr) {
                Ok(node) => {
                    debug!(addr = %addr, role = %role, "Node connected");
                    connected.push(node);
                }
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) => warn!(
                    "{}",
                    TopologyError::PartialTopology {
                        member: addr.clone(),
                        reason: e.to_string(),
                    }
                ),
            }
        }

        if connected.is_empty() {
            return Err(TopologyError::NoEligibleNode {
                role: role.to_string(),
            }
            .into());
        }
        Ok(connected)
    }
}
