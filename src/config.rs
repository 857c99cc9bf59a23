//! Quorumd Configuration
//!
//! TOML configuration for the cluster management daemon. Protocol timeouts
//! are expressed in logical ticks; only transmission cadence (announce and
//! cycle intervals) is wall clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::presence::{self, InterfaceAddr};

/// Main quorumd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster identity and network endpoints
    pub management: ManagementConfig,

    /// Protocol timing tunables
    #[serde(default)]
    pub timing: TimingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster identity and network endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// Cluster namespace; announcements from other clusters are ignored
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Multicast group presence announcements are sent to
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,

    /// Multicast port presence announcements are sent to
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,

    /// Port the node's publication channel is bound to
    #[serde(default = "default_cmd_port")]
    pub cmd_port: u16,

    /// Local interface addresses as `a.b.c.d/prefix` strings. The first
    /// entry names this node's identity.
    pub interfaces: Vec<String>,
}

/// Protocol timing tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Grace ticks after startup before this node may initiate elections
    #[serde(default = "default_settle_time")]
    pub settle_time: u64,

    /// Ticks between heartbeat broadcasts
    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period: u64,

    /// Silent ticks after which a peer is declared partitioned
    #[serde(default = "default_node_partition_threshold")]
    pub node_partition_threshold: u64,

    /// Ticks an election round stays open
    #[serde(default = "default_election_duration")]
    pub election_duration: u64,

    /// Minimum wall-clock milliseconds between presence announcements
    #[serde(default = "default_announce_period_ms")]
    pub announce_period_ms: u64,

    /// Wall-clock milliseconds between processing cycles
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_cluster_name() -> String {
    "default_cluster".to_string()
}

fn default_multicast_group() -> String {
    "224.0.0.1".to_string()
}

fn default_multicast_port() -> u16 {
    21001
}

fn default_cmd_port() -> u16 {
    21000
}

fn default_settle_time() -> u64 {
    10
}

fn default_heartbeat_period() -> u64 {
    10
}

fn default_node_partition_threshold() -> u64 {
    50
}

fn default_election_duration() -> u64 {
    10
}

fn default_announce_period_ms() -> u64 {
    1000
}

fn default_cycle_interval_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_time: default_settle_time(),
            heartbeat_period: default_heartbeat_period(),
            node_partition_threshold: default_node_partition_threshold(),
            election_duration: default_election_duration(),
            announce_period_ms: default_announce_period_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration for a single node without a file. Used by the
    /// in-process simulations and tests.
    pub fn for_node(cluster_name: &str, interface: &str, cmd_port: u16) -> Self {
        Self {
            management: ManagementConfig {
                cluster_name: cluster_name.to_string(),
                multicast_group: default_multicast_group(),
                multicast_port: default_multicast_port(),
                cmd_port,
                interfaces: vec![interface.to_string()],
            },
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.management.cluster_name.is_empty() {
            return Err(Error::Config("management.cluster_name cannot be empty".into()));
        }
        if self.management.interfaces.is_empty() {
            return Err(Error::Config(
                "management.interfaces must list at least one address".into(),
            ));
        }
        if self.timing.heartbeat_period == 0 {
            return Err(Error::Config("timing.heartbeat_period must be nonzero".into()));
        }
        if self.timing.node_partition_threshold <= self.timing.heartbeat_period {
            return Err(Error::Config(
                "timing.node_partition_threshold must exceed timing.heartbeat_period".into(),
            ));
        }
        // Parse eagerly so a bad interface spec fails at startup.
        self.interfaces()?;
        Ok(())
    }

    /// Parsed local interface addresses
    pub fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        presence::parse_interfaces(&self.management.interfaces)
    }

    /// This node's identity: first interface address plus the command port
    pub fn node_id(&self) -> Result<NodeId> {
        let interfaces = self.interfaces()?;
        let first = interfaces
            .first()
            .ok_or_else(|| Error::Config("no interfaces configured".into()))?;
        Ok(NodeId::new(first.address.to_string(), self.management.cmd_port))
    }

    /// Minimum wall-clock gap between presence announcements
    pub fn announce_period(&self) -> Duration {
        Duration::from_millis(self.timing.announce_period_ms)
    }

    /// Wall-clock gap between processing cycles
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.timing.cycle_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[management]
cluster_name = "prod"
cmd_port = 21000
interfaces = ["10.0.0.1/24"]

[timing]
settle_time = 10
node_partition_threshold = 50

[logging]
level = "debug"
"#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.management.cluster_name, "prod");
        assert_eq!(config.management.multicast_group, "224.0.0.1");
        assert_eq!(config.timing.heartbeat_period, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.node_id().unwrap(), NodeId::new("10.0.0.1", 21000));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quorumd.toml");
        std::fs::write(
            &path,
            "[management]\ncluster_name = \"prod\"\ninterfaces = [\"10.0.0.1/24\"]\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.management.cluster_name, "prod");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let toml = r#"
[management]
interfaces = ["10.0.0.1/24"]

[timing]
heartbeat_period = 10
node_partition_threshold = 10
"#;

        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_interface() {
        let toml = r#"
[management]
interfaces = ["not-an-address"]
"#;

        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_for_node_defaults() {
        let config = Config::for_node("test", "10.0.0.1/24", 11000);
        assert_eq!(config.timing.settle_time, 10);
        assert_eq!(config.timing.election_duration, 10);
        assert!(config.validate().is_ok());
    }
}
