//! Exporter configuration.
//!
//! Values are layered with the following precedence:
//!
//! 1. command-line flags,
//! 2. `FIBRE_*` environment variables,
//! 3. the YAML file given with `--config`,
//! 4. built-in defaults.
//!
//! `clap` resolves the first two layers; everything it leaves unset falls
//! through to the file and then to the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use relay::{CorrelationConfig, PeerLabelConfig, RelayConfig};

pub const DEFAULT_NODE_NAME: &str = "localhost";
pub const DEFAULT_METRICS_PORT: u16 = 9435;
pub const DEFAULT_HEALTH_PORT: u16 = 9436;
pub const DEFAULT_PROBE_LOADER: &str = "fibre-probe-loader";

/// Prometheus exporter for FIBRE block relay, driven by USDT probes in a
/// running bitcoind.
#[derive(Parser, Debug, Default)]
#[command(name = "fibre-exporter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to bitcoind binary
    #[arg(short, long, env = "FIBRE_BITCOIND_PATH")]
    pub bitcoind: Option<PathBuf>,

    /// PID of running bitcoind (auto-detected when omitted)
    #[arg(short, long, env = "FIBRE_PID")]
    pub pid: Option<u32>,

    /// Node name label
    #[arg(short, long, env = "FIBRE_NODE_NAME")]
    pub node_name: Option<String>,

    /// Prometheus metrics port
    #[arg(long, env = "FIBRE_METRICS_PORT")]
    pub port: Option<u16>,

    /// Health check port
    #[arg(long, env = "FIBRE_HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// Log every decoded event at info level
    #[arg(
        short,
        long,
        env = "FIBRE_VERBOSE",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub verbose: Option<bool>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "FIBRE_LOG_LEVEL", ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// Also write logs to this file
    #[arg(long, env = "FIBRE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Basic auth username for the /metrics endpoint
    #[arg(long, env = "FIBRE_METRICS_AUTH_USERNAME")]
    pub metrics_auth_username: Option<String>,

    /// Basic auth password for the /metrics endpoint
    #[arg(long, env = "FIBRE_METRICS_AUTH_PASSWORD")]
    pub metrics_auth_password: Option<String>,

    /// Probe loader executable
    #[arg(long, env = "FIBRE_PROBE_LOADER")]
    pub probe_loader: Option<PathBuf>,
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[value(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for `tracing_subscriber::EnvFilter`.
    pub const fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        <Self as ValueEnum>::from_str(raw, true)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {raw:?}")))
    }
}

/// On-disk configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    #[serde(alias = "bitcoind")]
    pub bitcoind_path: Option<PathBuf>,
    pub pid: Option<u32>,
    pub node_name: Option<String>,
    #[serde(alias = "port")]
    pub metrics_port: Option<u16>,
    pub health_port: Option<u16>,
    pub verbose: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub metrics_auth_username: Option<String>,
    pub metrics_auth_password: Option<String>,
    pub probe_loader: Option<PathBuf>,
    pub relay: RelaySection,
}

/// Tuning of the ingestion pipeline, file-only.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySection {
    pub race_window_secs: u64,
    pub max_pending_races: usize,
    pub poll_timeout_ms: u64,
    pub max_peer_labels: usize,
    pub max_peer_label_len: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            race_window_secs: 600,
            max_pending_races: 64,
            poll_timeout_ms: 1000,
            max_peer_labels: 256,
            max_peer_label_len: 48,
        }
    }
}

impl FileConfig {
    /// Reads and parses a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("bitcoind path is required: pass --bitcoind, set FIBRE_BITCOIND_PATH or use a config file")]
    MissingBitcoind,

    #[error("{0}")]
    Invalid(String),
}

/// Fully resolved exporter configuration.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    pub bitcoind_path: PathBuf,
    pub pid: Option<u32>,
    pub node_name: String,
    pub metrics_port: u16,
    pub health_port: u16,
    pub verbose: bool,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub metrics_auth_username: Option<String>,
    pub metrics_auth_password: Option<String>,
    pub probe_loader: PathBuf,
    pub relay: RelaySection,
}

impl ExporterConfig {
    /// Merges the command line (with its environment fallbacks) over the
    /// config file, if any, and the defaults.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let log_level = match (cli.log_level, file.log_level.as_deref()) {
            (Some(level), _) => level,
            (None, Some(raw)) => LogLevel::parse(raw)?,
            (None, None) => LogLevel::default(),
        };

        let bitcoind_path = cli
            .bitcoind
            .or(file.bitcoind_path)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingBitcoind)?;

        let config = Self {
            bitcoind_path,
            pid: cli.pid.or(file.pid),
            node_name: cli
                .node_name
                .or(file.node_name)
                .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            metrics_port: cli
                .port
                .or(file.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
            health_port: cli
                .health_port
                .or(file.health_port)
                .unwrap_or(DEFAULT_HEALTH_PORT),
            verbose: cli.verbose.or(file.verbose).unwrap_or(false),
            log_level,
            log_file: cli.log_file.or(file.log_file),
            metrics_auth_username: cli.metrics_auth_username.or(file.metrics_auth_username),
            metrics_auth_password: cli.metrics_auth_password.or(file.metrics_auth_password),
            probe_loader: cli
                .probe_loader
                .or(file.probe_loader)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROBE_LOADER)),
            relay: file.relay,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() {
            return Err(ConfigError::Invalid("node name must not be empty".into()));
        }
        if self.metrics_port == self.health_port {
            return Err(ConfigError::Invalid(format!(
                "metrics and health endpoints cannot share port {}",
                self.metrics_port
            )));
        }
        if self.relay.race_window_secs == 0 || self.relay.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "relay.race_window_secs and relay.poll_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Returns `true` if exactly one Basic auth credential is set.
    pub fn has_partial_metrics_auth(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.metrics_auth_username) != set(&self.metrics_auth_password)
    }

    /// Settings for the ingestion pipeline.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            node_name: self.node_name.clone(),
            correlation: CorrelationConfig {
                race_window: Duration::from_secs(self.relay.race_window_secs),
                max_pending: self.relay.max_pending_races,
            },
            poll_timeout: Duration::from_millis(self.relay.poll_timeout_ms),
            peer_labels: PeerLabelConfig {
                max_labels: self.relay.max_peer_labels,
                max_len: self.relay.max_peer_label_len,
            },
            verbose: self.verbose,
        }
    }
}
