//! Single-node connections
//!
//! [`RedisNode`] is one blocking connection to one server with bounded
//! connect, read and write timeouts. Redis errors are mapped onto
//! [`ConnectionError`] so authentication problems and timeouts are told apart
//! from ordinary command failures.

use crate::error::{ConnectionError, LiveResult, TopologyError};
use crate::live::topology::NodeIntrospection;
use redis::{Client, Connection, ErrorKind, IntoConnectionInfo, RedisError};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for connect, read and write
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deployment mode reported by INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Standalone,
    Cluster,
}

/// Role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Master,
    Replica,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Replica => "replica",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse INFO output into `field -> value`
///
/// Section headers (`# Server`) and blank lines are ignored.
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Mode and role of one node, as read from INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub mode: DeploymentMode,
    pub role: NodeRole,
}

impl NodeInfo {
    pub fn from_info(addr: &str, text: &str) -> Result<Self, TopologyError> {
        let fields = parse_info(text);

        let mode = match fields.get("redis_mode").map(String::as_str) {
            Some("standalone") => DeploymentMode::Standalone,
            Some("cluster") => DeploymentMode::Cluster,
            other => {
                return Err(TopologyError::UnknownMode {
                    addr: addr.to_string(),
                    mode: other.unwrap_or_default().to_string(),
                })
            }
        };

        let role = match fields.get("role").map(String::as_str) {
            Some("master") => NodeRole::Master,
            Some("slave") | Some("replica") => NodeRole::Replica,
            other => {
                warn!(addr, role = ?other, "Unrecognized role, treating node as master");
                NodeRole::Master
            }
        };

        Ok(Self { mode, role })
    }
}

/// Connection settings shared by every node of a run
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub password: Option<String>,
    pub database: u32,
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            password: None,
            database: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Map a redis error onto the connection error taxonomy
pub fn classify_error(addr: &str, operation: &str, err: &RedisError) -> ConnectionError {
    let message = err.to_string();
    if err.code() == Some("NOAUTH") || message.contains("NOAUTH") {
        ConnectionError::AuthRequired {
            addr: addr.to_string(),
        }
    } else if err.kind() == ErrorKind::AuthenticationFailed
        || message.contains("WRONGPASS")
        || message.contains("invalid password")
    {
        ConnectionError::AuthFailed {
            addr: addr.to_string(),
        }
    } else if err.is_timeout() {
        ConnectionError::Timeout {
            addr: addr.to_string(),
            operation: operation.to_string(),
        }
    } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        ConnectionError::Unreachable {
            addr: addr.to_string(),
            reason: message,
        }
    } else {
        ConnectionError::Command {
            addr: addr.to_string(),
            operation: operation.to_string(),
            reason: message,
        }
    }
}

/// One blocking connection to one server
pub struct RedisNode {
    addr: String,
    database: u32,
    conn: Connection,
}

impl RedisNode {
    /// Connect to `host:port` and verify the credentials with PING
    pub fn connect(addr: &str, options: &ConnectOptions) -> LiveResult<Self> {
        let mut info = format!("redis://{addr}")
            .as_str()
            .into_connection_info()
            .map_err(|e| ConnectionError::Unreachable {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        info.redis.password = options.password.clone();
        info.redis.db = i64::from(options.database);

        let client = Client::open(info).map_err(|e| classify_error(addr, "CONNECT", &e))?;
        let conn = client
            .get_connection_with_timeout(options.timeout)
            .map_err(|e| classify_error(addr, "CONNECT", &e))?;
        conn.set_read_timeout(Some(options.timeout))
            .map_err(|e| classify_error(addr, "CONNECT", &e))?;
        conn.set_write_timeout(Some(options.timeout))
            .map_err(|e| classify_error(addr, "CONNECT", &e))?;

        let mut node = Self {
            addr: addr.to_string(),
            database: options.database,
            conn,
        };
        let _: String = node.command("PING", &redis::cmd("PING"))?;
        debug!(addr, database = options.database, "Connected");
        Ok(node)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn database(&self) -> u32 {
        self.database
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Run one command, classifying any failure
    pub fn command<T: redis::FromRedisValue>(
        &mut self,
        operation: &str,
        cmd: &redis::Cmd,
    ) -> LiveResult<T> {
        cmd.query(&mut self.conn)
            .map_err(|e| classify_error(&self.addr, operation, &e))
    }

    /// Allow reads on a cluster replica
    pub fn readonly(&mut self) -> LiveResult<()> {
        let _: String = self.command("READONLY", &redis::cmd("READONLY"))?;
        Ok(())
    }
}

impl NodeIntrospection for RedisNode {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn info(&mut self) -> LiveResult<String> {
        self.command("INFO", redis::cmd("INFO").arg("all"))
    }

    fn cluster_nodes(&mut self) -> LiveResult<String> {
        self.command("CLUSTER NODES", redis::cmd("CLUSTER").arg("NODES"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDALONE_INFO: &str = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\n\
                                   # Replication\r\nrole:master\r\nconnected_slaves:0\r\n";

    #[test]
    fn test_parse_info_fields() {
        let fields = parse_info(STANDALONE_INFO);
        assert_eq!(fields.get("redis_version").unwrap(), "7.2.4");
        assert_eq!(fields.get("role").unwrap(), "master");
        assert!(!fields.contains_key("# Server"));
    }

    #[test]
    fn test_node_info_modes() {
        let info = NodeInfo::from_info("a:1", STANDALONE_INFO).unwrap();
        assert_eq!(info.mode, DeploymentMode::Standalone);
        assert_eq!(info.role, NodeRole::Master);

        let replica = NodeInfo::from_info("a:1", "redis_mode:cluster\nrole:slave\n").unwrap();
        assert_eq!(replica.mode, DeploymentMode::Cluster);
        assert_eq!(replica.role, NodeRole::Replica);
    }

    #[test]
    fn test_unknown_mode_names_node() {
        let err = NodeInfo::from_info("10.0.0.5:26379", "redis_mode:sentinel\n").unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnknownMode {
                addr: "10.0.0.5:26379".into(),
                mode: "sentinel".into(),
            }
        );
    }

    #[test]
    fn test_classify_auth_errors() {
        let noauth = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "NOAUTH Authentication required.".to_string(),
        ));
        assert!(matches!(
            classify_error("a:1", "PING", &noauth),
            ConnectionError::AuthRequired { .. }
        ));

        let wrong = RedisError::from((
            ErrorKind::AuthenticationFailed,
            "Password authentication failed",
        ));
        assert!(matches!(
            classify_error("a:1", "CONNECT", &wrong),
            ConnectionError::AuthFailed { .. }
        ));
    }

    #[test]
    fn test_classify_timeout_is_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = classify_error("a:1", "SCAN", &RedisError::from(io));
        assert!(err.is_retryable());
    }
}
