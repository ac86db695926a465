//! Configuration types for keyscope
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Source and redis URL parsing

use crate::analysis::flame::{DEFAULT_LEAF_THRESHOLD, DEFAULT_TRIM_MIN_RECORDS};
use crate::error::ConfigError;
use crate::filter::{ExpirationMode, FilterPipeline, KeyPatternFilter};
use crate::live::mutator::{DEFAULT_BATCH_SIZE, DELETE_PAGE_HINT, SCAN_PAGE_HINT};
use crate::live::{ConnectOptions, NodeRole};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Default redis port when the URL has none
pub const DEFAULT_PORT: u16 = 6379;

/// Upper bound for `--timeout`
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Regex for parsing redis URLs
static REDIS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: redis://host, redis://host:port, redis://host:port/db
    Regex::new(r"^redis://([^:/\s\[\]]+|\[[0-9A-Fa-f:.]+\])(?::(\d+))?(?:/(\d*))?$")
        .expect("Invalid redis URL regex")
});

/// Size analysis for Redis snapshots and live deployments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keyscope",
    version,
    about = "Size and usage analysis for Redis snapshots and live deployments",
    long_about = "Finds the largest keys, aggregates sizes by key prefix and builds flame graphs\n\
                  from snapshot exports (JSON lines) or from a live deployment via SCAN.\n\n\
                  Live deployments are detected as standalone or cluster automatically.\n\
                  Replicas are analyzed by default; pass --use-master to read masters.",
    after_help = "EXAMPLES:\n    \
        keyscope bigkey dump-1.jsonl,dump-2.jsonl -n 50\n    \
        keyscope prefix redis://10.0.0.1:6379/0 --max-depth 2 -p secret\n    \
        keyscope flamegraph dump.jsonl --sep : --sep _\n    \
        keyscope memory dump.jsonl --regex '^session:' --expire volatile\n    \
        keyscope scan redis://10.0.0.1:6379 --pattern 'user:*' -n 20\n    \
        keyscope delete redis://10.0.0.1:7000 --pattern 'temp:*' --batch-size 500"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Connection options for live deployments
#[derive(Args, Debug, Clone, Default)]
pub struct LiveArgs {
    /// Password for the deployment
    #[arg(short = 'p', long, env = "KEYSCOPE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Treat a cluster seed as a standalone node
    #[arg(long)]
    pub no_cluster: bool,

    /// Connect, read and write timeout in seconds
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub timeout: u64,
}

/// Options shared by the analysis commands
#[derive(Args, Debug, Clone, Default)]
pub struct AnalysisArgs {
    /// Only keys matching this regular expression
    #[arg(long, value_name = "REGEX")]
    pub regex: Option<String>,

    /// Only keys in this expiration state: persistent, volatile, not-expired, expired
    #[arg(long, value_name = "MODE")]
    pub expire: Option<String>,

    /// Directory that receives the per-run work directory
    #[arg(long, default_value = "/tmp", value_name = "DIR")]
    pub data_dir: PathBuf,

    /// Read masters instead of replicas from a live deployment
    #[arg(long)]
    pub use_master: bool,

    /// Continue with the next snapshot after a decode error
    #[arg(long)]
    pub keep_going: bool,

    #[command(flatten)]
    pub live: LiveArgs,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Report the largest keys
    Bigkey {
        /// Snapshot files (comma-separated) or redis://host:port[/db]
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Number of keys to report
        #[arg(short = 'n', long, default_value = "100", allow_negative_numbers = true)]
        top: i64,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Write one CSV row per key
    Memory {
        /// Snapshot files (comma-separated) or redis://host:port[/db]
        #[arg(value_name = "SOURCE")]
        source: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Report the largest key prefixes
    Prefix {
        /// Snapshot files (comma-separated) or redis://host:port[/db]
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Number of prefixes to report
        #[arg(short = 'n', long, default_value = "100", allow_negative_numbers = true)]
        top: i64,

        /// Prefix levels below the database to report (unlimited if not set)
        #[arg(long, value_name = "NUM")]
        max_depth: Option<usize>,

        /// Key segment separator (can be repeated)
        #[arg(long = "sep", value_name = "SEP", action = clap::ArgAction::Append)]
        separators: Vec<String>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Build flame graph data (JSON and an HTML page)
    Flamegraph {
        /// Snapshot files (comma-separated) or redis://host:port[/db]
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Key segment separator (can be repeated)
        #[arg(long = "sep", value_name = "SEP", action = clap::ArgAction::Append)]
        separators: Vec<String>,

        /// Leaves smaller than this many bytes are grouped into "others"
        #[arg(long, default_value_t = DEFAULT_LEAF_THRESHOLD, value_name = "BYTES")]
        leaf_threshold: u64,

        /// Only group leaves when at least this many keys were read
        #[arg(long, default_value_t = DEFAULT_TRIM_MIN_RECORDS, value_name = "NUM")]
        trim_min_keys: u64,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Write filtered records as JSON lines
    Export {
        /// Snapshot files (comma-separated) or redis://host:port[/db]
        #[arg(value_name = "SOURCE")]
        source: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// List keys matching a pattern
    Scan {
        /// redis://host:port[/db]
        #[arg(value_name = "URL")]
        url: String,

        /// Glob pattern passed to SCAN MATCH
        #[arg(long, default_value = "*")]
        pattern: String,

        /// SCAN COUNT hint
        #[arg(long, default_value_t = SCAN_PAGE_HINT, value_name = "NUM")]
        page_size: usize,

        /// Stop after this many keys
        #[arg(short = 'n', long, value_name = "NUM")]
        limit: Option<usize>,

        #[command(flatten)]
        live: LiveArgs,
    },

    /// Delete keys matching a pattern after interactive confirmation
    Delete {
        /// redis://host:port[/db]
        #[arg(value_name = "URL")]
        url: String,

        /// Glob pattern of keys to delete; '*' is refused
        #[arg(long)]
        pattern: String,

        /// Keys per pipelined delete
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
        batch_size: usize,

        /// SCAN COUNT hint
        #[arg(long, default_value_t = DELETE_PAGE_HINT, value_name = "NUM")]
        page_size: usize,

        #[command(flatten)]
        live: LiveArgs,
    },
}

/// Check a `-n` value; it must be positive
pub fn validate_top(value: i64) -> Result<usize, ConfigError> {
    usize::try_from(value)
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ConfigError::InvalidTopN { value })
}

/// Parsed redis URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisUrl {
    pub host: String,
    pub port: u16,
    pub database: u32,
}

impl RedisUrl {
    /// Parse `redis://host[:port][/db]`
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let invalid = |reason: &str| ConfigError::InvalidSource {
            source_spec: url.to_string(),
            reason: reason.to_string(),
        };

        let caps = REDIS_URL_REGEX
            .captures(url)
            .ok_or_else(|| invalid("expected redis://host:port[/db]"))?;

        let host = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| invalid("missing host"))?;

        let port = match caps.get(2) {
            Some(m) => m
                .as_str()
                .parse::<u16>()
                .map_err(|_| invalid("port out of range"))?,
            None => DEFAULT_PORT,
        };

        let database = match caps.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(db) => db
                .parse::<u32>()
                .map_err(|_| invalid("database index out of range"))?,
            None => 0,
        };

        Ok(Self {
            host,
            port,
            database,
        })
    }

    /// `host:port` as used by the connection layer
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for RedisUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Where records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Snapshot export files, ingested in the given order
    Files(Vec<PathBuf>),
    /// A live deployment
    Live(RedisUrl),
}

impl SourceSpec {
    /// Parse a redis URL or a comma-separated list of existing files
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let spec = spec.trim();
        if spec.starts_with("redis://") {
            return RedisUrl::parse(spec).map(SourceSpec::Live);
        }

        let files: Vec<PathBuf> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if files.is_empty() {
            return Err(ConfigError::InvalidSource {
                source_spec: spec.to_string(),
                reason: "no snapshot files given".into(),
            });
        }
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(ConfigError::InvalidSource {
                source_spec: spec.to_string(),
                reason: format!("'{}' is not a file", missing.display()),
            });
        }
        Ok(SourceSpec::Files(files))
    }

    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Files(files) => files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            SourceSpec::Live(url) => url.to_string(),
        }
    }
}

/// Validated live connection settings
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub connect: ConnectOptions,
    pub force_standalone: bool,
}

impl LiveConfig {
    pub fn from_args(args: &LiveArgs, database: u32) -> Result<Self, ConfigError> {
        if args.timeout == 0 || args.timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidSource {
                source_spec: format!("--timeout {}", args.timeout),
                reason: format!("timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"),
            });
        }
        Ok(Self {
            connect: ConnectOptions {
                password: args.password.clone().filter(|p| !p.is_empty()),
                database,
                timeout: Duration::from_secs(args.timeout),
            },
            force_standalone: args.no_cluster,
        })
    }
}

/// Validated configuration of an analysis command
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub source: SourceSpec,
    pub key_pattern: Option<String>,
    pub expire: Option<ExpirationMode>,
    pub data_dir: PathBuf,
    pub live: LiveConfig,
    /// Role class read from a live deployment
    pub role: NodeRole,
    pub keep_going: bool,
    pub show_progress: bool,
}

impl AnalysisConfig {
    /// Create and validate configuration from CLI arguments
    ///
    /// Everything is checked here, before any file is read or any
    /// connection is made.
    pub fn from_args(source: &str, args: &AnalysisArgs, quiet: bool) -> Result<Self, ConfigError> {
        let source = SourceSpec::parse(source)?;

        // Compile once to reject a bad pattern up front
        if let Some(pattern) = &args.regex {
            KeyPatternFilter::new(pattern)?;
        }
        let expire = args
            .expire
            .as_deref()
            .map(str::parse::<ExpirationMode>)
            .transpose()?;

        if !args.data_dir.is_dir() {
            return Err(ConfigError::InvalidDataDir {
                path: args.data_dir.clone(),
                reason: "directory does not exist".into(),
            });
        }

        let database = match &source {
            SourceSpec::Live(url) => url.database,
            SourceSpec::Files(_) => 0,
        };
        let live = LiveConfig::from_args(&args.live, database)?;

        Ok(Self {
            source,
            key_pattern: args.regex.clone(),
            expire,
            data_dir: args.data_dir.clone(),
            live,
            role: if args.use_master {
                NodeRole::Master
            } else {
                NodeRole::Replica
            },
            keep_going: args.keep_going,
            show_progress: !quiet,
        })
    }

    /// Filter pipeline for this run
    pub fn filters(&self) -> Result<FilterPipeline, ConfigError> {
        FilterPipeline::from_options(self.key_pattern.as_deref(), self.expire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    fn analysis_args(data_dir: &TempDir) -> AnalysisArgs {
        AnalysisArgs {
            data_dir: data_dir.path().to_path_buf(),
            live: LiveArgs {
                timeout: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_redis_url() {
        let url = RedisUrl::parse("redis://10.0.0.1:7000/3").unwrap();
        assert_eq!(url.host, "10.0.0.1");
        assert_eq!(url.port, 7000);
        assert_eq!(url.database, 3);
        assert_eq!(url.addr(), "10.0.0.1:7000");
    }

    #[test]
    fn test_parse_redis_url_defaults() {
        let url = RedisUrl::parse("redis://cache.local").unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.database, 0);
        assert_eq!(RedisUrl::parse("redis://h:6380/").unwrap().database, 0);
    }

    #[test]
    fn test_parse_invalid_redis_url() {
        assert!(RedisUrl::parse("http://h:6379").is_err());
        assert!(RedisUrl::parse("redis://h:99999").is_err());
        assert!(RedisUrl::parse("redis://:6379").is_err());
    }

    #[test]
    fn test_source_spec_files() {
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();
        let spec = format!("{}, {}", a.path().display(), b.path().display());
        match SourceSpec::parse(&spec).unwrap() {
            SourceSpec::Files(files) => assert_eq!(files, vec![a.path(), b.path()]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            SourceSpec::parse("/nonexistent/dump.jsonl"),
            Err(ConfigError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_analysis_config_rejects_bad_regex_before_io() {
        let dir = TempDir::new().unwrap();
        let mut args = analysis_args(&dir);
        args.regex = Some("user:(".into());
        let err = AnalysisConfig::from_args("redis://10.0.0.1:6379", &args, true).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_analysis_config_rejects_bad_expire() {
        let dir = TempDir::new().unwrap();
        let mut args = analysis_args(&dir);
        args.expire = Some("soon".into());
        assert!(matches!(
            AnalysisConfig::from_args("redis://h:1", &args, true),
            Err(ConfigError::InvalidExpireMode { .. })
        ));
    }

    #[test]
    fn test_analysis_config_live_defaults() {
        let dir = TempDir::new().unwrap();
        let mut args = analysis_args(&dir);
        args.expire = Some("not-expired".into());
        args.live.password = Some("secret".into());
        let config = AnalysisConfig::from_args("redis://h:6379/2", &args, false).unwrap();
        assert_eq!(config.role, NodeRole::Replica);
        assert_eq!(config.live.connect.database, 2);
        assert_eq!(config.live.connect.password.as_deref(), Some("secret"));
        assert_eq!(config.expire, Some(ExpirationMode::NotExpired));
        assert_eq!(config.filters().unwrap().len(), 1);
        assert!(config.show_progress);
    }

    #[test]
    fn test_cli_parses_delete() {
        let args = CliArgs::try_parse_from([
            "keyscope",
            "delete",
            "redis://h:6379",
            "--pattern",
            "temp:*",
            "--batch-size",
            "3",
        ])
        .unwrap();
        match args.command {
            Command::Delete {
                pattern,
                batch_size,
                page_size,
                ..
            } => {
                assert_eq!(pattern, "temp:*");
                assert_eq!(batch_size, 3);
                assert_eq!(page_size, 100);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cli_accepts_negative_top_for_validation() {
        let args =
            CliArgs::try_parse_from(["keyscope", "bigkey", "dump.jsonl", "-n", "-1"]).unwrap();
        assert!(matches!(args.command, Command::Bigkey { top: -1, .. }));
        assert_eq!(validate_top(-1), Err(ConfigError::InvalidTopN { value: -1 }));
        assert_eq!(validate_top(0), Err(ConfigError::InvalidTopN { value: 0 }));
        assert_eq!(validate_top(25), Ok(25));
    }

    #[test]
    fn test_cli_repeated_separators() {
        let args = CliArgs::try_parse_from([
            "keyscope", "prefix", "dump.jsonl", "--sep", ":", "--sep", "_", "--max-depth", "2",
        ])
        .unwrap();
        match args.command {
            Command::Prefix {
                separators,
                max_depth,
                top,
                ..
            } => {
                assert_eq!(separators, vec![":", "_"]);
                assert_eq!(max_depth, Some(2));
                assert_eq!(top, 100);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
