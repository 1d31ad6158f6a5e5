use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Upper bound for `max_read_bytes`; a ClientHello fits in one 16 KiB record.
pub const MAX_READ_BYTES_LIMIT: usize = 64 * 1024;

/// Sinkhole configuration loaded from YAML.
///
/// Every field has a default, so an empty document describes the standard
/// deployment: refusal listener on port 80, silent-close listener on port 443,
/// both on IPv4 and IPv6 loopback. Listen addresses are deliberately absent;
/// the sinkhole only ever binds `127.0.0.1` and `::1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port answered with the HTTP refusal response (default: 80)
    pub http_port: u16,
    /// Port whose connections are classified by TLS SNI and closed silently (default: 443)
    pub https_port: u16,
    /// Also attempt IPv6 loopback listeners (default: true)
    pub ipv6: bool,
    /// Listen backlog for every socket (default: 128)
    pub backlog: u32,
    /// Maximum number of bytes taken from the first read of a connection (default: 4096)
    pub max_read_bytes: usize,
    /// Timeout configuration
    pub timeouts: Timeouts,
    /// Prometheus metrics configuration
    pub metrics: Metrics,
    /// Seconds between periodic stats log lines; disabled when absent
    pub report_interval: Option<u64>,
}

/// Timeout settings for connection handling (all values in milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Maximum time to wait for the first bytes of a connection (default: 1000ms)
    pub read_ms: u64,
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Whether to serve metrics and stats over HTTP
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (e.g., "127.0.0.1:9090")
    pub address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            ipv6: true,
            backlog: 128,
            max_read_bytes: 4096,
            timeouts: Timeouts::default(),
            metrics: Metrics::default(),
            report_interval: None,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { read_ms: 1000 }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Reasons a configuration is rejected by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    DuplicatePort(u16),
    ZeroReadSize,
    ReadSizeTooLarge(usize),
    ZeroReadTimeout,
    InvalidMetricsAddress(String),
    ZeroReportInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicatePort(port) => {
                write!(f, "http_port and https_port are both {}", port)
            }
            ConfigError::ZeroReadSize => write!(f, "max_read_bytes must be greater than zero"),
            ConfigError::ReadSizeTooLarge(size) => write!(
                f,
                "max_read_bytes {} exceeds the limit of {}",
                size, MAX_READ_BYTES_LIMIT
            ),
            ConfigError::ZeroReadTimeout => write!(f, "timeouts.read_ms must be greater than zero"),
            ConfigError::InvalidMetricsAddress(addr) => {
                write!(f, "Invalid metrics address (loopback only): {}", addr)
            }
            ConfigError::ZeroReportInterval => {
                write!(f, "report_interval must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ifnoai_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::from_file(Path::new("sinkhole.yaml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses and validates configuration from a YAML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use ifnoai_config::Config;
    ///
    /// let yaml = r#"
    /// http_port: 8080
    /// https_port: 8443
    /// timeouts:
    ///   read_ms: 500
    /// "#;
    ///
    /// let config = Config::parse(yaml).unwrap();
    /// assert_eq!(config.http_port, 8080);
    /// assert_eq!(config.max_read_bytes, 4096);
    /// ```
    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == self.https_port && self.http_port != 0 {
            return Err(ConfigError::DuplicatePort(self.http_port));
        }
        if self.max_read_bytes == 0 {
            return Err(ConfigError::ZeroReadSize);
        }
        if self.max_read_bytes > MAX_READ_BYTES_LIMIT {
            return Err(ConfigError::ReadSizeTooLarge(self.max_read_bytes));
        }
        if self.timeouts.read_ms == 0 {
            return Err(ConfigError::ZeroReadTimeout);
        }
        let metrics_on_loopback = self
            .metrics
            .address
            .parse::<SocketAddr>()
            .is_ok_and(|addr| addr.ip().is_loopback());
        if self.metrics.enabled && !metrics_on_loopback {
            return Err(ConfigError::InvalidMetricsAddress(
                self.metrics.address.clone(),
            ));
        }
        if self.report_interval == Some(0) {
            return Err(ConfigError::ZeroReportInterval);
        }
        Ok(())
    }
}
