//! IPC client over the supervisor's Unix domain socket.
//!
//! Uses `hyper` for HTTP/1.1 over the socket; each call opens a fresh
//! connection.

use std::path::PathBuf;

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to supervisor socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("supervisor is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

/// Client for the supervisor's control socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Whether the socket file exists (the supervisor is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send an HTTP request over the Unix socket and return the response body.
    async fn request(&self, method: hyper::Method, path: &str) -> Result<Bytes, IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake::<
            _,
            http_body_util::Empty<Bytes>,
        >(TokioIo::new(stream))
        .await
        .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "IPC connection error");
            }
        });

        debug!(%method, path, "IPC request");

        let req = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost")
            .body(http_body_util::Empty::new())
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&body) {
                return Err(IpcClientError::Daemon {
                    code: err.code,
                    message: err.error,
                });
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(body)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: hyper::Method,
        path: &str,
    ) -> Result<T, IpcClientError> {
        let body = self.request(method, path).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{path}: {e}")))
    }

    // ── Typed API methods ──────────────────────────────────────────────

    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.call(hyper::Method::GET, "/health").await
    }

    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        self.call(hyper::Method::GET, "/status").await
    }

    /// Start the onion-routing daemon; resolves once it is bound.
    pub async fn start(&self) -> Result<StartResponse, IpcClientError> {
        self.call(hyper::Method::POST, "/start").await
    }

    /// Stop the onion-routing daemon.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        self.call(hyper::Method::POST, "/stop").await
    }

    /// Wait for the published onion address.
    pub async fn identity(&self) -> Result<IdentityResponse, IpcClientError> {
        self.call(hyper::Method::GET, "/identity").await
    }

    /// Ask the supervisor itself to exit.
    pub async fn shutdown(&self) -> Result<ShutdownResponse, IpcClientError> {
        self.call(hyper::Method::POST, "/shutdown").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new("/tmp/test-prysm-nonexistent.sock");
        assert!(!client.daemon_available());
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = IpcClient::new("/tmp/nonexistent-prysm.sock");
        let result = client.health().await;
        assert!(matches!(result, Err(IpcClientError::NotRunning(_))));
    }

    #[test]
    fn test_daemon_error_display_leads_with_code() {
        let err = IpcClientError::Daemon {
            code: CODE_NO_ADDRESS.to_string(),
            message: "onion address not available".to_string(),
        };
        assert_eq!(err.to_string(), "NO_ADDRESS: onion address not available");
    }
}
