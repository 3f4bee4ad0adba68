//! Supervisor test helpers.
//!
//! [`TestDaemon`] runs a [`Daemon`] on a [`FakeHost`] inside a temporary
//! directory that holds the working directory and the control socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use prysm_config::AppConfig;
use prysm_core::Daemon;
use prysm_core::daemon::DaemonError;
use prysm_core::ipc::IpcClient;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;
use crate::host::{ConnectMode, FakeHost};

/// A running supervisor with an owned temp directory.
///
/// The temp directory is deleted when this value is dropped, even on panic.
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    pub host: Arc<FakeHost>,
    pub socket_path: PathBuf,
    task: JoinHandle<Result<(), DaemonError>>,
    temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a supervisor with default settings and an immediately connecting host.
    pub async fn spawn() -> Self {
        Self::spawn_with(ConnectMode::Immediate, |builder| builder).await
    }

    /// Start a supervisor whose config is adjusted by `configure`. Working
    /// directory and socket path always point into the temp directory.
    pub async fn spawn_with(
        mode: ConnectMode,
        configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("prysm.sock");
        let config: AppConfig = configure(TestConfigBuilder::new())
            .working_dir(temp_dir.path().join("app_TorService"))
            .socket_path(&socket_path)
            .build();

        let host = Arc::new(FakeHost::new(mode));
        let daemon = Arc::new(
            Daemon::with_host(config, host.clone()).expect("failed to build supervisor"),
        );
        let runner = daemon.clone();
        let task = tokio::spawn(async move { runner.run().await });

        wait_for_socket(&socket_path).await;

        Self {
            daemon,
            host,
            socket_path,
            task,
            temp_dir,
        }
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::new(&self.socket_path)
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Publish an identity file the way the onion-routing daemon would.
    pub fn write_hostname(&self, contents: &str) {
        let dir = self.daemon.controller().paths().hidden_service_dir();
        std::fs::create_dir_all(dir).expect("failed to create hidden service dir");
        std::fs::write(dir.join("hostname"), contents).expect("failed to write hostname");
    }

    /// Signal shutdown and wait for the supervisor to exit.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("supervisor did not shut down")
            .expect("supervisor task panicked")
    }
}

async fn wait_for_socket(path: &Path) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "control socket {} never appeared",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
