//! Configuration types for the Chrome Debug MCP Server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Endpoint, Error};

/// Server configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Browser connection settings
    pub connection: ConnectionSettings,
    /// Browser launch settings
    pub launch: LaunchSettings,
    /// Extension cache settings
    pub extensions: ExtensionSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.reconcile_interval_ms == 0 {
            return Err(Error::Config(
                "server.reconcile_interval_ms must be > 0".to_string(),
            ));
        }

        if self.connection.default_host.trim().is_empty() {
            return Err(Error::Config(
                "connection.default_host cannot be empty".to_string(),
            ));
        }

        if self.connection.default_port == 0 || self.launch.debug_port == 0 {
            return Err(Error::Config("debugging ports must be > 0".to_string()));
        }

        if self.connection.connect_timeout_ms == 0 || self.connection.command_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be > 0".to_string()));
        }

        if self.connection.heartbeat_failure_threshold == 0 {
            return Err(Error::Config(
                "connection.heartbeat_failure_threshold must be > 0".to_string(),
            ));
        }

        self.connection.retry.validate()?;

        if self.launch.launch_timeout_ms == 0 {
            return Err(Error::Config(
                "launch.launch_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    pub log_level: String,
    /// Period of the session reconciliation tick in milliseconds
    pub reconcile_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            reconcile_interval_ms: 1000,
        }
    }
}

impl ServerSettings {
    /// Reconciliation period.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// Retry policy for attach handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between attempts
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based), doubling each time.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "connection.retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::Config(
                "connection.retry.initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Browser connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Host used by attach when none is given
    pub default_host: String,
    /// Port used by attach when none is given
    pub default_port: u16,
    /// Deadline for one connection attempt
    pub connect_timeout_ms: u64,
    /// Deadline for one protocol round-trip
    pub command_timeout_ms: u64,
    /// Period of the liveness probe (0 disables it)
    pub heartbeat_interval_ms: u64,
    /// Consecutive probe failures before the connection is reported unhealthy
    pub heartbeat_failure_threshold: u32,
    /// Re-attach automatically when an attached browser drops the connection
    pub auto_reconnect: bool,
    /// Retry policy for attach
    pub retry: RetryPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            default_host: "localhost".to_string(),
            default_port: 9222,
            connect_timeout_ms: 5000,
            command_timeout_ms: 10_000,
            heartbeat_interval_ms: 5000,
            heartbeat_failure_threshold: 3,
            auto_reconnect: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionSettings {
    /// Endpoint used when attach is called without arguments.
    pub fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(self.default_host.clone(), self.default_port)
    }

    /// Connection attempt deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Protocol round-trip deadline.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Browser executable (auto-detected when unset)
    pub executable: Option<PathBuf>,
    /// Launch headless unless the caller says otherwise
    pub headless: bool,
    /// Remote-debugging port unless the caller says otherwise
    pub debug_port: u16,
    /// Profile directory unless the caller says otherwise
    pub user_data_dir: Option<PathBuf>,
    /// Additional command-line switches
    pub extra_args: Vec<String>,
    /// How long to wait for the debugging endpoint of a launched browser
    pub launch_timeout_ms: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            debug_port: 9222,
            user_data_dir: None,
            extra_args: vec![],
            launch_timeout_ms: 20_000,
        }
    }
}

/// Extension cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// How long a live enumeration stays fresh
    pub cache_ttl_ms: u64,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.connection.default_host, "localhost");
        assert_eq!(config.connection.default_port, 9222);
        assert!(!config.launch.headless);
        assert_eq!(config.launch.debug_port, 9222);
        assert_eq!(config.extensions.cache_ttl_ms, 30_000);
    }

    #[test]
    fn test_config_validation() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_reconcile_interval() {
        let mut config = ServerConfig::default();
        config.server.reconcile_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_retry_policy() {
        let mut config = ServerConfig::default();
        config.connection.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.connection.retry.initial_backoff_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  log_level: debug
  reconcile_interval_ms: 250

connection:
  default_host: 127.0.0.1
  default_port: 9333
  auto_reconnect: false
  retry:
    max_attempts: 5
    initial_backoff_ms: 100
    max_backoff_ms: 1000

launch:
  headless: true
  user_data_dir: /tmp/chrome-debug-profile
  extra_args:
    - --lang=en-US

extensions:
  cache_ttl_ms: 5000
"#;

        let config = ServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.reconcile_interval_ms, 250);
        assert_eq!(
            config.connection.default_endpoint(),
            Endpoint::new("127.0.0.1", 9333)
        );
        assert!(!config.connection.auto_reconnect);
        assert_eq!(config.connection.retry.max_attempts, 5);
        // unspecified keys keep their defaults
        assert_eq!(config.connection.connect_timeout_ms, 5000);
        assert!(config.launch.headless);
        assert_eq!(config.launch.extra_args, vec!["--lang=en-US".to_string()]);
        assert_eq!(config.extensions.cache_ttl_ms, 5000);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let result = ServerConfig::from_yaml("server: [unclosed");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
