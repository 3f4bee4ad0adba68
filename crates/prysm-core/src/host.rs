//! Host control surface for the anonymity daemon.
//!
//! A [`ServiceHost`] launches the daemon and reports connection changes on a
//! channel; the binder never talks to the daemon process directly. The
//! production host is [`ProcessHost`], which runs the daemon binary as a
//! child process.
//!
//! ```text
//!   ServiceBinder ──bind(descriptor, events)──▶ ServiceHost
//!        ▲                                          │
//!        └──── Connected(handle) / Disconnected ────┘
//! ```

pub mod process;

use std::fmt;
use std::io;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::BoxFuture;
use crate::storage::{ServicePaths, StorageError};

pub use process::ProcessHost;

/// Errors from binding to or releasing the daemon.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to launch daemon binary {binary:?}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("a daemon is already bound; stop it before binding again")]
    AlreadyBound,

    #[error("control port {port} is already in use by another process")]
    ControlPortInUse { port: u16 },

    #[error("service host error: {0}")]
    Host(String),
}

/// What the host needs to launch the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Daemon executable.
    pub binary: String,
    /// Config file the daemon is started with.
    pub torrc_path: PathBuf,
    /// Working directory for the daemon process.
    pub working_dir: PathBuf,
    /// Control port the host probes for liveness.
    pub control_port: u16,
}

impl ServiceDescriptor {
    pub fn new(binary: impl Into<String>, paths: &ServicePaths, control_port: u16) -> Self {
        Self {
            binary: binary.into(),
            torrc_path: paths.torrc_path(),
            working_dir: paths.working_dir().to_path_buf(),
            control_port,
        }
    }
}

/// Reference to a connected daemon, valid until the next disconnect or unbind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    id: u64,
    pid: Option<u32>,
}

impl ServiceHandle {
    pub fn new(id: u64, pid: Option<u32>) -> Self {
        Self { id, pid }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process id of the daemon, when the host knows it.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "handle#{} (pid {pid})", self.id),
            None => write!(f, "handle#{}", self.id),
        }
    }
}

/// Connection notifications delivered by a host after `bind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(ServiceHandle),
    Disconnected,
}

/// Channel a host reports [`ConnectionEvent`]s on.
pub type EventSender = mpsc::Sender<ConnectionEvent>;

/// Capacity of the per-bind event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Platform service-hosting surface.
///
/// Implementations launch the daemon described by a [`ServiceDescriptor`] and
/// report connection changes; they hold at most one bind at a time.
pub trait ServiceHost: Send + Sync {
    /// Human-readable name of this host (e.g. "process").
    fn name(&self) -> &str;

    /// Request the daemon be launched and bound. Returns as soon as the
    /// request is issued; the outcome arrives on `events`.
    fn bind(&self, descriptor: ServiceDescriptor, events: EventSender) -> Result<(), BindError>;

    /// Ask the daemon behind `handle` to stop.
    fn stop_service<'a>(&'a self, handle: &'a ServiceHandle) -> BoxFuture<'a, Result<(), BindError>>;

    /// Release the bind. Must be a no-op when nothing is bound.
    fn unbind(&self) -> BoxFuture<'_, Result<(), BindError>>;
}
