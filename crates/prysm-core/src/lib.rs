#![deny(unsafe_code)]

//! prysm core: supervises a local onion-routing daemon.
//!
//! The [`LifecycleController`] provisions the daemon's directories, writes
//! its config, binds to it through a [`ServiceHost`], and polls for the onion
//! address it publishes. The [`Daemon`] wraps a controller in a long-running
//! supervisor with a Unix-socket control API.

use std::future::Future;
use std::pin::Pin;

/// A boxed `Send` future, returned by the async methods of object-safe traits
/// such as [`ServiceHost`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Service binder: config write, bind request, handle tracking.
pub mod binder;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Lifecycle state machine and public start/stop/identity operations.
pub mod controller;
/// Long-running supervisor process.
pub mod daemon;
/// Host control surface and the child-process host.
pub mod host;
/// Onion address value type.
pub mod identity;
/// Control socket: HTTP/JSON over a Unix socket.
pub mod ipc;
/// Polling for the published onion address.
pub mod readiness;
/// Directory layout and provisioning.
pub mod storage;
/// Daemon config document.
pub mod torrc;

pub use binder::ServiceBinder;
pub use controller::{LifecycleController, LifecycleError, LifecycleState, StopCause};
pub use daemon::Daemon;
pub use host::{ProcessHost, ServiceHandle, ServiceHost};
pub use identity::OnionAddress;
pub use readiness::ReadinessError;
pub use storage::ServicePaths;
