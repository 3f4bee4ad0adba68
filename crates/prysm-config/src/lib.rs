#![deny(unsafe_code)]

//! Configuration loading and validation for prysm.
//!
//! Loads TOML configuration files and validates them before any of their
//! values reach the generated daemon configuration. Provides the
//! [`AppConfig`] type as the central configuration structure.

use std::path::{Component, Path};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Supervisor process configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Anonymity-network daemon settings.
    #[serde(default)]
    pub tor: TorConfig,

    /// Working and hidden-service directory layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Hidden-service port mapping.
    #[serde(default)]
    pub hidden_service: HiddenServiceConfig,

    /// Bind and identity polling bounds.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the supervisor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the control façade listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Start the anonymity daemon as soon as the supervisor is up.
    #[serde(default)]
    pub autostart: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            autostart: false,
        }
    }
}

fn default_socket_path() -> String {
    "/tmp/prysm.sock".to_string()
}

/// Settings for the anonymity-network daemon itself.
///
/// ## TOML Example
///
/// ```toml
/// [tor]
/// binary = "/usr/bin/tor"
/// control_port = 9051
/// cookie_authentication = true
/// log = ["notice stdout"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorConfig {
    /// Daemon executable, resolved through `PATH` when not absolute.
    #[serde(default = "default_tor_binary")]
    pub binary: String,

    /// Control port written as `ControlPort`.
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Whether `CookieAuthentication` is enabled.
    #[serde(default = "default_cookie_authentication")]
    pub cookie_authentication: bool,

    /// One `Log` directive per entry, in order.
    #[serde(default = "default_tor_log")]
    pub log: Vec<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            binary: default_tor_binary(),
            control_port: default_control_port(),
            cookie_authentication: default_cookie_authentication(),
            log: default_tor_log(),
        }
    }
}

fn default_tor_binary() -> String {
    "tor".to_string()
}

fn default_control_port() -> u16 {
    9051
}

fn default_cookie_authentication() -> bool {
    true
}

fn default_tor_log() -> Vec<String> {
    vec!["notice stdout".to_string(), "debug stdout".to_string()]
}

/// Directory layout shared with the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Daemon data root. Relative paths are resolved against the current
    /// directory before they are written into the daemon config.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Name of the hidden-service directory inside `working_dir`.
    #[serde(default = "default_hidden_service_subdir")]
    pub hidden_service_subdir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            hidden_service_subdir: default_hidden_service_subdir(),
        }
    }
}

fn default_working_dir() -> String {
    "data/app_TorService".to_string()
}

fn default_hidden_service_subdir() -> String {
    "hidden_service".to_string()
}

/// Port mapping published by the hidden service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenServiceConfig {
    /// Port advertised on the onion address.
    #[serde(default = "default_service_port")]
    pub virtual_port: u16,

    /// Local host the daemon forwards to.
    #[serde(default = "default_target_host")]
    pub target_host: String,

    /// Local port the daemon forwards to.
    #[serde(default = "default_service_port")]
    pub target_port: u16,
}

impl Default for HiddenServiceConfig {
    fn default() -> Self {
        Self {
            virtual_port: default_service_port(),
            target_host: default_target_host(),
            target_port: default_service_port(),
        }
    }
}

fn default_service_port() -> u16 {
    12345
}

fn default_target_host() -> String {
    "127.0.0.1".to_string()
}

/// Bounds on the asynchronous parts of a start cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// How long identity polling may run before giving up.
    #[serde(default = "default_readiness_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between identity file reads.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long `start` waits for the daemon to report connected.
    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_readiness_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            bind_timeout_ms: default_bind_timeout_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }
}

fn default_readiness_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_bind_timeout_ms() -> u64 {
    60_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }

        // Tor settings
        if self.tor.binary.is_empty() {
            return Err(ConfigError::Validation(
                "tor.binary must not be empty".to_string(),
            ));
        }
        if self.tor.control_port == 0 {
            return Err(ConfigError::Validation(
                "tor.control_port must be non-zero".to_string(),
            ));
        }
        for (i, directive) in self.tor.log.iter().enumerate() {
            if directive.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tor.log[{i}] must not be empty"
                )));
            }
            reject_line_breaks(&format!("tor.log[{i}]"), directive)?;
        }

        // Paths
        if self.paths.working_dir.is_empty() {
            return Err(ConfigError::Validation(
                "paths.working_dir must not be empty".to_string(),
            ));
        }
        reject_line_breaks("paths.working_dir", &self.paths.working_dir)?;
        let mut components = Path::new(&self.paths.hidden_service_subdir).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_component {
            return Err(ConfigError::Validation(format!(
                "paths.hidden_service_subdir must be a single relative directory name, got {:?}",
                self.paths.hidden_service_subdir
            )));
        }
        reject_line_breaks(
            "paths.hidden_service_subdir",
            &self.paths.hidden_service_subdir,
        )?;

        // Hidden service mapping
        if self.hidden_service.virtual_port == 0 || self.hidden_service.target_port == 0 {
            return Err(ConfigError::Validation(
                "hidden_service ports must be non-zero".to_string(),
            ));
        }
        let host = &self.hidden_service.target_host;
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "hidden_service.target_host must be a non-empty host without whitespace, got {host:?}"
            )));
        }

        // Readiness bounds
        let readiness = &self.readiness;
        if readiness.timeout_ms == 0 || readiness.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "readiness.timeout_ms and readiness.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if readiness.poll_interval_ms > readiness.timeout_ms {
            return Err(ConfigError::Validation(format!(
                "readiness.poll_interval_ms ({}) must not exceed readiness.timeout_ms ({})",
                readiness.poll_interval_ms, readiness.timeout_ms
            )));
        }
        if readiness.bind_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "readiness.bind_timeout_ms must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Values copied into the daemon config are line-oriented; a newline would
/// smuggle in extra directives.
fn reject_line_breaks(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.contains(['\n', '\r']) {
        return Err(ConfigError::Validation(format!(
            "{field} must not contain line breaks"
        )));
    }
    Ok(())
}
