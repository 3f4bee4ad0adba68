//! Configuration builders for tests.

use std::path::Path;
use std::time::Duration;

use prysm_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .working_dir(tmp.path().join("app_Tor"))
///     .bind_timeout(Duration::from_secs(1))
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn working_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.paths.working_dir = path.as_ref().display().to_string();
        self
    }

    pub fn hidden_service_subdir(mut self, subdir: &str) -> Self {
        self.config.paths.hidden_service_subdir = subdir.to_string();
        self
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.socket_path = path.as_ref().display().to_string();
        self
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.config.daemon.autostart = autostart;
        self
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.config.readiness.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.readiness.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn bind_timeout(mut self, timeout: Duration) -> Self {
        self.config.readiness.bind_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
