//! IPC server: axum HTTP router over a Unix domain socket.
//!
//! Routes map one-to-one onto controller operations, plus health, status and
//! supervisor shutdown. Failures come back as an [`ErrorResponse`] carrying a
//! stable error code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use prysm_config::AppConfig;

use super::types::*;
use crate::controller::{LifecycleController, LifecycleError};
use crate::daemon::ShutdownSignal;
use crate::readiness::ReadinessError;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub controller: LifecycleController,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
    pub started_at: Instant,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .route("/identity", get(handle_identity))
        .route("/shutdown", post(handle_shutdown))
        .with_state(state)
}

/// Serve the IPC API on `socket_path` until a shutdown signal arrives.
///
/// A stale socket file is removed before binding and the socket is removed
/// again on exit.
pub async fn serve(
    socket_path: &Path,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.daemon.socket_path)
}

/// Status code and error code for a failed `start`.
pub fn lifecycle_error_code(err: &LifecycleError) -> (StatusCode, &'static str) {
    match err {
        LifecycleError::AlreadyActive { .. } => (StatusCode::CONFLICT, CODE_ALREADY_ACTIVE),
        LifecycleError::Cancelled => (StatusCode::CONFLICT, CODE_CANCELLED),
        LifecycleError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, CODE_STORAGE),
        LifecycleError::BindTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, CODE_BIND_TIMEOUT),
        LifecycleError::Bind(_) | LifecycleError::BindFailed => {
            (StatusCode::BAD_GATEWAY, CODE_BIND_FAILED)
        }
    }
}

/// Status code and error code for a failed identity lookup.
pub fn readiness_error_code(err: &ReadinessError) -> (StatusCode, &'static str) {
    match err {
        ReadinessError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, CODE_NO_ADDRESS),
        ReadinessError::InvalidIdentity { .. } => (StatusCode::BAD_GATEWAY, CODE_INVALID_IDENTITY),
        ReadinessError::Cancelled => (StatusCode::CONFLICT, CODE_CANCELLED),
        ReadinessError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL),
    }
}

fn api_error((status, code): (StatusCode, &'static str), message: String) -> ApiError {
    (status, Json(ErrorResponse::new(code, message)))
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
    })
}

async fn handle_status(State(state): State<Arc<IpcState>>) -> Json<StatusResponse> {
    let status = state.controller.status();
    Json(StatusResponse {
        state: status.state.to_string(),
        epoch: status.epoch,
        daemon_pid: status.pid,
        last_stop_cause: status.last_stop_cause.map(|cause| cause.to_string()),
        working_dir: status.working_dir.display().to_string(),
        hidden_service_dir: status.hidden_service_dir.display().to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pid: std::process::id(),
    })
}

async fn handle_start(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<StartResponse>, ApiError> {
    info!("Start requested via IPC");
    match state.controller.start().await {
        Ok(handle) => Ok(Json(StartResponse {
            started: true,
            daemon_pid: handle.pid(),
        })),
        Err(e) => {
            warn!(error = %e, "Start request failed");
            Err(api_error(lifecycle_error_code(&e), e.to_string()))
        }
    }
}

async fn handle_stop(State(state): State<Arc<IpcState>>) -> Json<StopResponse> {
    info!("Stop requested via IPC");
    let previous = state.controller.stop().await;
    Json(StopResponse {
        stopped: true,
        previous_state: previous.to_string(),
    })
}

async fn handle_identity(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<IdentityResponse>, ApiError> {
    match state.controller.identity().await {
        Ok(address) => Ok(Json(IdentityResponse {
            address: address.into_string(),
        })),
        Err(e) => {
            let code = readiness_error_code(&e);
            let message = match &e {
                ReadinessError::Timeout { .. } => format!("onion address not available: {e}"),
                _ => e.to_string(),
            };
            Err(api_error(code, message))
        }
    }
}

async fn handle_shutdown(State(state): State<Arc<IpcState>>) -> Json<ShutdownResponse> {
    info!("Shutdown requested via IPC");
    let _ = state.shutdown_tx.send(ShutdownSignal);
    Json(ShutdownResponse {
        acknowledged: true,
        message: "Shutdown initiated".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessHost;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(tmp: &TempDir) -> Arc<IpcState> {
        let mut config = AppConfig::default();
        config.paths.working_dir = tmp.path().join("app_Tor").display().to_string();
        config.readiness.timeout_ms = 1_000;
        let controller =
            LifecycleController::from_config(&config, Arc::new(ProcessHost::new())).unwrap();
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Arc::new(IpcState {
            controller,
            shutdown_tx,
            started_at: Instant::now(),
        })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let health: HealthResponse = body_json(resp).await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_status_endpoint_reports_stopped() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let req = Request::get("/status").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let status: StatusResponse = body_json(resp).await;
        assert_eq!(status.state, "stopped");
        assert_eq!(status.epoch, 0);
        assert_eq!(status.daemon_pid, None);
        assert!(status.hidden_service_dir.ends_with("hidden_service"));
    }

    #[tokio::test]
    async fn test_stop_endpoint_when_never_started() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let req = Request::post("/stop").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stop: StopResponse = body_json(resp).await;
        assert!(stop.stopped);
        assert_eq!(stop.previous_state, "stopped");
    }

    #[tokio::test]
    async fn test_identity_endpoint_returns_address() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let hs_dir = state.controller.paths().hidden_service_dir().to_path_buf();
        std::fs::create_dir_all(&hs_dir).unwrap();
        std::fs::write(hs_dir.join("hostname"), "abc123.onion\n").unwrap();

        let req = Request::get("/identity").body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let identity: IdentityResponse = body_json(resp).await;
        assert_eq!(identity.address, "abc123.onion");
    }

    #[tokio::test]
    async fn test_identity_endpoint_names_invalid_content() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let hs_dir = state.controller.paths().hidden_service_dir().to_path_buf();
        std::fs::create_dir_all(&hs_dir).unwrap();
        std::fs::write(hs_dir.join("hostname"), "not-an-onion").unwrap();

        let req = Request::get("/identity").body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let err: ErrorResponse = body_json(resp).await;
        assert_eq!(err.code, CODE_INVALID_IDENTITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_endpoint_times_out_with_no_address() {
        let tmp = TempDir::new().unwrap();
        let req = Request::get("/identity").body(Body::empty()).unwrap();
        let resp = router(test_state(&tmp)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

        let err: ErrorResponse = body_json(resp).await;
        assert_eq!(err.code, CODE_NO_ADDRESS);
        assert!(err.error.starts_with("onion address not available"));
    }

    #[tokio::test]
    async fn test_shutdown_endpoint_signals() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let mut rx = state.shutdown_tx.subscribe();
        let app = router(state);

        let req = Request::post("/shutdown").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let shutdown: ShutdownResponse = body_json(resp).await;
        assert!(shutdown.acknowledged);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            lifecycle_error_code(&LifecycleError::BindTimeout { timeout_ms: 1 }),
            (StatusCode::GATEWAY_TIMEOUT, CODE_BIND_TIMEOUT)
        );
        assert_eq!(
            lifecycle_error_code(&LifecycleError::BindFailed),
            (StatusCode::BAD_GATEWAY, CODE_BIND_FAILED)
        );
        assert_eq!(
            readiness_error_code(&ReadinessError::Cancelled),
            (StatusCode::CONFLICT, CODE_CANCELLED)
        );
    }
}
