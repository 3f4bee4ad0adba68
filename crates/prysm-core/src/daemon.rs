//! Supervisor process: owns the lifecycle controller, serves the control
//! socket, and releases the onion-routing daemon on shutdown.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use prysm_config::AppConfig;

use crate::controller::LifecycleController;
use crate::host::{ProcessHost, ServiceHost};
use crate::ipc::server::{self, IpcState};
use crate::storage::StorageError;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The prysm supervisor.
pub struct Daemon {
    config: AppConfig,
    controller: LifecycleController,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    /// Supervisor that runs the onion-routing daemon as a child process.
    pub fn new(config: AppConfig) -> Result<Self, DaemonError> {
        Self::with_host(config, Arc::new(ProcessHost::new()))
    }

    /// Supervisor on top of an arbitrary service host.
    pub fn with_host(config: AppConfig, host: Arc<dyn ServiceHost>) -> Result<Self, DaemonError> {
        let controller = LifecycleController::from_config(&config, host)?;
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            config,
            controller,
            shutdown_tx,
            _shutdown_rx,
        })
    }

    /// Serve the control socket until a shutdown signal or Ctrl-C, then stop
    /// the onion-routing daemon.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let socket_path = server::socket_path_from_config(&self.config);
        info!(
            socket = %socket_path.display(),
            working_dir = %self.controller.paths().working_dir().display(),
            autostart = self.config.daemon.autostart,
            "prysm supervisor starting"
        );

        let state = Arc::new(IpcState {
            controller: self.controller.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            started_at: Instant::now(),
        });
        let server_rx = self.shutdown_tx.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut server =
            tokio::spawn(async move { server::serve(&socket_path, state, server_rx).await });

        if self.config.daemon.autostart {
            let controller = self.controller.clone();
            tokio::spawn(async move {
                match controller.start().await {
                    Ok(handle) => info!(%handle, "Autostart complete"),
                    Err(e) => error!(error = %e, "Autostart failed"),
                }
            });
        }

        let early_exit = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping supervisor");
                None
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                let _ = self.shutdown_tx.send(ShutdownSignal);
                None
            }
            result = &mut server => Some(result),
        };

        let previous = self.controller.stop().await;
        info!(%previous, "Onion-routing daemon released");

        let served = match early_exit {
            Some(result) => result,
            None => server.await,
        };
        served.map_err(|e| DaemonError::Startup(format!("control socket task failed: {e}")))??;

        info!("Supervisor stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the supervisor.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Errors from the supervisor runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("supervisor startup failed: {0}")]
    Startup(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
