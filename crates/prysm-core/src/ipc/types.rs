//! Request/response bodies exchanged over the control socket.

use serde::{Deserialize, Serialize};

/// Error code: the onion address did not appear within the polling window.
pub const CODE_NO_ADDRESS: &str = "NO_ADDRESS";
/// Error code: the identity file holds something other than an onion address.
pub const CODE_INVALID_IDENTITY: &str = "INVALID_IDENTITY";
/// Error code: superseded by a stop or another lifecycle transition.
pub const CODE_CANCELLED: &str = "CANCELLED";
/// Error code: `start` issued while the daemon is not stopped.
pub const CODE_ALREADY_ACTIVE: &str = "ALREADY_ACTIVE";
/// Error code: directory or config write failure.
pub const CODE_STORAGE: &str = "STORAGE";
/// Error code: the daemon did not connect in time.
pub const CODE_BIND_TIMEOUT: &str = "BIND_TIMEOUT";
/// Error code: the daemon could not be launched or dropped before connecting.
pub const CODE_BIND_FAILED: &str = "BIND_FAILED";
/// Error code: an internal task failed.
pub const CODE_INTERNAL: &str = "INTERNAL";

/// Supervisor health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

/// Supervisor and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Lifecycle state (`stopped`, `starting`, `bound`, `stopping`).
    pub state: String,
    pub epoch: u64,
    /// Pid of the onion-routing daemon, when bound.
    pub daemon_pid: Option<u32>,
    pub last_stop_cause: Option<String>,
    pub working_dir: String,
    pub hidden_service_dir: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_secs: u64,
    /// Pid of the supervisor itself.
    pub pid: u32,
}

/// Result of a `start` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub started: bool,
    pub daemon_pid: Option<u32>,
}

/// Result of a `stop` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub previous_state: String,
}

/// The published onion address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub address: String,
}

/// Supervisor shutdown response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Named error with a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            error: error.into(),
        }
    }
}
