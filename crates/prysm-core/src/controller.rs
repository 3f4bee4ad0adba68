//! Lifecycle controller: the public `start` / `stop` / `identity` surface.
//!
//! The controller owns the [`LifecycleState`] and an epoch counter. Every
//! `start`, every `stop` and every unexpected disconnect moves to a new
//! epoch; notifications that belong to an older epoch are discarded when
//! they resolve. Identity polls follow a coarser counter that only a `stop`
//! or a disconnect advances, so a poll outlives the `start` that will
//! produce its address.
//!
//! ```text
//!  Stopped ──start──▶ Starting ──connected──▶ Bound
//!     ▲                  │                     │
//!     │           timeout / failure          stop
//!     │                  ▼                     ▼
//!     └────────────── Stopped ◀──unbound── Stopping
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use prysm_config::AppConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::binder::ServiceBinder;
use crate::host::{BindError, ServiceHandle, ServiceHost};
use crate::identity::OnionAddress;
use crate::readiness::{Cancellation, PollSettings, ReadinessError, ReadinessPoller};
use crate::storage::{ServicePaths, StorageError};

/// Where the daemon is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Bound,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Bound => "bound",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the daemon last reached `Stopped` from a running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopCause {
    /// A `stop` was issued.
    Requested,
    /// The host reported the daemon gone without a `stop`.
    Disconnected,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Errors from [`LifecycleController::start`].
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("daemon is already {state}; stop it before starting again")]
    AlreadyActive { state: LifecycleState },

    #[error(transparent)]
    Storage(StorageError),

    #[error("bind failed: {0}")]
    Bind(BindError),

    #[error("daemon did not connect within {timeout_ms} ms")]
    BindTimeout { timeout_ms: u64 },

    #[error("daemon went away before connecting")]
    BindFailed,

    #[error("start was superseded by a stop request")]
    Cancelled,
}

impl From<BindError> for LifecycleError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Storage(e) => Self::Storage(e),
            other => Self::Bind(other),
        }
    }
}

/// Timing knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Upper bound on the wait for the connected notification.
    pub bind_timeout: Duration,
    pub poll: PollSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_millis(60_000),
            poll: PollSettings::default(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bind_timeout: config.readiness.bind_timeout(),
            poll: PollSettings::from_config(&config.readiness),
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: LifecycleState,
    pub epoch: u64,
    pub pid: Option<u32>,
    pub last_stop_cause: Option<StopCause>,
    pub working_dir: PathBuf,
    pub hidden_service_dir: PathBuf,
}

struct ControllerState {
    lifecycle: LifecycleState,
    epoch: u64,
    last_stop_cause: Option<StopCause>,
}

struct Shared {
    binder: ServiceBinder,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    /// Bumped when a running cycle ends; identity polls cancel on it.
    cycles: watch::Sender<u64>,
    /// Serialises bind and unbind requests to the binder.
    ops: tokio::sync::Mutex<()>,
}

/// Owns the daemon lifecycle. Cloning yields another handle to the same
/// controller.
#[derive(Clone)]
pub struct LifecycleController {
    shared: Arc<Shared>,
}

impl LifecycleController {
    pub fn new(binder: ServiceBinder, settings: ControllerSettings) -> Self {
        let (cycles, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                binder,
                settings,
                state: Mutex::new(ControllerState {
                    lifecycle: LifecycleState::Stopped,
                    epoch: 0,
                    last_stop_cause: None,
                }),
                cycles,
                ops: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Build a controller for `config` on top of the given host.
    pub fn from_config(
        config: &AppConfig,
        host: Arc<dyn ServiceHost>,
    ) -> Result<Self, StorageError> {
        let paths = ServicePaths::from_config(config)?;
        let binder = ServiceBinder::from_config(config, host, paths);
        Ok(Self::new(binder, ControllerSettings::from_config(config)))
    }

    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    pub fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    pub fn last_stop_cause(&self) -> Option<StopCause> {
        self.lock_state().last_stop_cause
    }

    /// Handle of the connected daemon, if any.
    pub fn handle(&self) -> Option<ServiceHandle> {
        self.shared.binder.handle()
    }

    pub fn paths(&self) -> &ServicePaths {
        self.shared.binder.paths()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.shared.settings
    }

    pub fn status(&self) -> ControllerStatus {
        let (state, epoch, last_stop_cause) = {
            let state = self.lock_state();
            (state.lifecycle, state.epoch, state.last_stop_cause)
        };
        let paths = self.paths();
        ControllerStatus {
            state,
            epoch,
            pid: self.handle().and_then(|handle| handle.pid()),
            last_stop_cause,
            working_dir: paths.working_dir().to_path_buf(),
            hidden_service_dir: paths.hidden_service_dir().to_path_buf(),
        }
    }

    /// Start the daemon and wait until the host reports it connected.
    ///
    /// Only valid from `Stopped`. On any failure the controller is back in
    /// `Stopped` with the bind released.
    pub async fn start(&self) -> Result<ServiceHandle, LifecycleError> {
        let epoch = {
            let mut state = self.lock_state();
            if state.lifecycle != LifecycleState::Stopped {
                return Err(LifecycleError::AlreadyActive {
                    state: state.lifecycle,
                });
            }
            state.lifecycle = LifecycleState::Starting;
            self.advance_epoch(&mut state)
        };
        info!(epoch, host = self.shared.binder.host_name(), "Starting daemon");

        let pending = {
            let _op = self.shared.ops.lock().await;
            if !self.is_current(epoch) {
                return Err(LifecycleError::Cancelled);
            }
            match self.shared.binder.start().await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(epoch, error = %e, "Bind request failed");
                    self.settle(epoch, LifecycleState::Stopped);
                    return Err(e.into());
                }
            }
        };

        let (connected, disconnected) = pending.into_parts();
        let bind_timeout = self.shared.settings.bind_timeout;
        match tokio::time::timeout(bind_timeout, connected).await {
            Ok(Ok(handle)) => {
                if !self.settle(epoch, LifecycleState::Bound) {
                    debug!(epoch, %handle, "Ignoring connect for a superseded start");
                    return Err(LifecycleError::Cancelled);
                }
                info!(epoch, %handle, "Daemon bound");
                tokio::spawn(self.clone().watch_disconnect(epoch, disconnected));
                Ok(handle)
            }
            Ok(Err(_)) => {
                if !self.abandon(epoch).await {
                    return Err(LifecycleError::Cancelled);
                }
                warn!(epoch, "Daemon dropped before connecting");
                Err(LifecycleError::BindFailed)
            }
            Err(_) => {
                if !self.abandon(epoch).await {
                    return Err(LifecycleError::Cancelled);
                }
                let timeout_ms = bind_timeout.as_millis() as u64;
                warn!(epoch, timeout_ms, "Daemon did not connect in time");
                Err(LifecycleError::BindTimeout { timeout_ms })
            }
        }
    }

    /// Stop the daemon. Valid from any state and never fails; returns the
    /// state the controller was in when the stop was issued.
    pub async fn stop(&self) -> LifecycleState {
        let (previous, epoch) = {
            let mut state = self.lock_state();
            let previous = state.lifecycle;
            if previous == LifecycleState::Stopped {
                debug!(epoch = state.epoch, "Stop requested while already stopped");
                return previous;
            }
            state.lifecycle = LifecycleState::Stopping;
            state.last_stop_cause = Some(StopCause::Requested);
            let epoch = self.advance_epoch(&mut state);
            self.end_cycle();
            (previous, epoch)
        };
        info!(epoch, %previous, "Stopping daemon");

        {
            let _op = self.shared.ops.lock().await;
            if let Err(e) = self.shared.binder.stop().await {
                warn!(epoch, error = %e, "Releasing the bind reported an error");
            }
        }

        if self.settle(epoch, LifecycleState::Stopped) {
            info!(epoch, "Daemon stopped");
        }
        previous
    }

    /// Wait for the daemon to publish its onion address.
    ///
    /// Callable in any state. The poll runs on its own task and is cancelled
    /// only when a `stop` or a disconnect ends the current cycle.
    pub async fn identity(&self) -> Result<OnionAddress, ReadinessError> {
        let cancel = Cancellation::new(self.shared.cycles.subscribe());
        let poller = ReadinessPoller::new(self.paths().hidden_service_dir(), self.shared.settings.poll);
        debug!(cycle = cancel.epoch(), path = %poller.path().display(), "Polling for onion address");
        poller
            .spawn(cancel)
            .await
            .map_err(|e| ReadinessError::Task(e.to_string()))?
    }

    async fn watch_disconnect(self, epoch: u64, disconnected: oneshot::Receiver<()>) {
        // An error means the bind was released by `stop`.
        if disconnected.await.is_err() {
            return;
        }

        let released_epoch = {
            let mut state = self.lock_state();
            if state.epoch != epoch || state.lifecycle != LifecycleState::Bound {
                debug!(epoch, "Ignoring disconnect for a superseded bind");
                return;
            }
            state.lifecycle = LifecycleState::Stopped;
            state.last_stop_cause = Some(StopCause::Disconnected);
            let released = self.advance_epoch(&mut state);
            self.end_cycle();
            released
        };
        warn!(
            epoch,
            cause = %StopCause::Disconnected,
            "Daemon disconnected unexpectedly"
        );

        let _op = self.shared.ops.lock().await;
        if self.is_current(released_epoch) {
            if let Err(e) = self.shared.binder.stop().await {
                warn!(error = %e, "Releasing the dropped bind reported an error");
            }
        }
    }

    /// Release a bind that never connected. Returns whether `epoch` was
    /// still current, i.e. no `stop` took over.
    async fn abandon(&self, epoch: u64) -> bool {
        {
            let _op = self.shared.ops.lock().await;
            if !self.is_current(epoch) {
                return false;
            }
            if let Err(e) = self.shared.binder.stop().await {
                warn!(epoch, error = %e, "Releasing the failed bind reported an error");
            }
        }
        self.settle(epoch, LifecycleState::Stopped)
    }

    /// Move to `next` if `epoch` is still current.
    fn settle(&self, epoch: u64, next: LifecycleState) -> bool {
        let mut state = self.lock_state();
        if state.epoch != epoch {
            return false;
        }
        state.lifecycle = next;
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock_state().epoch == epoch
    }

    fn advance_epoch(&self, state: &mut ControllerState) -> u64 {
        state.epoch += 1;
        state.epoch
    }

    fn end_cycle(&self) {
        self.shared.cycles.send_modify(|cycle| *cycle += 1);
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
