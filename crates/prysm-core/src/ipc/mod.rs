//! Control socket: the request surface a host application uses to drive the
//! supervisor.
//!
//! The supervisor exposes an HTTP/JSON API over a Unix socket; the CLI and
//! other callers connect as clients.
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌──────────────┐
//! │   CLI    │───────────────────────────▶│  IPC Server  │
//! │   app    │  HTTP/1.1 + JSON           │  (axum)      │
//! └──────────┘                            └──────┬───────┘
//!                                                │
//!                                         ┌──────▼───────┐
//!                                         │  Lifecycle   │
//!                                         │  Controller  │
//!                                         └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError};
pub use server::{IpcState, socket_path_from_config};
pub use types::*;
