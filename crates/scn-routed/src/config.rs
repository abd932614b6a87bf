//! Daemon configuration.
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! file (or no file at all) yields a working configuration.
//!
//! ```yaml
//! route:
//!   force_route: false
//!   idle_timeout: 0
//! balancing:
//!   period_secs: 15
//!   always_optimize: true
//! flow_bw:
//!   report_threshold: 1000000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Route store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteStoreConfig {
    /// Route by hop count instead of bandwidth (every edge costs 1).
    pub force_route: bool,
    /// Idle timeout stamped on installed entries, 0 for permanent.
    pub idle_timeout: u16,
    /// Hard timeout stamped on installed entries, 0 for permanent.
    pub hard_timeout: u16,
    pub flow_priority: u16,
    /// Capacity of the route event channel.
    pub event_capacity: usize,
}

impl Default for RouteStoreConfig {
    fn default() -> Self {
        Self {
            force_route: false,
            idle_timeout: 0,
            hard_timeout: 0,
            flow_priority: scn_openflow::OFP_DEFAULT_PRIORITY,
            event_capacity: 1024,
        }
    }
}

/// Traffic-engineering loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancingConfig {
    pub period_secs: u64,
    /// Run a cycle on every tick; otherwise only when optimization is
    /// requested.
    pub automatic_mode: bool,
    /// Rebalance every cycle, not only when a reservation is violated.
    pub always_optimize: bool,
    /// Flows below this rate (bytes/s) are never moved.
    pub min_significant_bw: f64,
    /// A move must lower the route's peak utilisation by at least this
    /// fraction of its current value.
    pub min_gain_ratio: f64,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self {
            period_secs: 15,
            automatic_mode: true,
            always_optimize: true,
            min_significant_bw: 1000.0,
            min_gain_ratio: 0.05,
        }
    }
}

impl BalancingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Telemetry aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowBwConfig {
    /// Flows faster than this (bytes/s) are traced at debug level.
    pub report_threshold: f64,
}

impl Default for FlowBwConfig {
    fn default() -> Self {
        Self {
            report_threshold: 1e6,
        }
    }
}

/// Daemon loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interval at which flow statistics are polled from every switch.
    pub stats_poll_interval_secs: u64,
    /// Capacity of the daemon command channel.
    pub command_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            stats_poll_interval_secs: 10,
            command_capacity: 256,
        }
    }
}

impl DaemonConfig {
    pub fn stats_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stats_poll_interval_secs)
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub route: RouteStoreConfig,
    pub balancing: BalancingConfig,
    pub flow_bw: FlowBwConfig,
    pub daemon: DaemonConfig,
}

impl RoutingConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: RoutingConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.balancing.period_secs == 0 {
            return Err(ConfigError::Invalid(
                "balancing.period_secs must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.balancing.min_gain_ratio) {
            return Err(ConfigError::Invalid(format!(
                "balancing.min_gain_ratio must be in [0, 1), got {}",
                self.balancing.min_gain_ratio
            )));
        }
        if self.balancing.min_significant_bw < 0.0 {
            return Err(ConfigError::Invalid(
                "balancing.min_significant_bw must not be negative".to_string(),
            ));
        }
        if self.daemon.stats_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "daemon.stats_poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.route.event_capacity == 0 || self.daemon.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
