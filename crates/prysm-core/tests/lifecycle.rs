//! Lifecycle controller scenarios against a scripted service host.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use prysm_core::controller::{LifecycleController, LifecycleError, LifecycleState, StopCause};
use prysm_core::host::BindError;
use prysm_core::readiness::ReadinessError;
use prysm_core::torrc::TorrcDocument;
use prysm_test_utils::{ConnectMode, FakeHost, TestConfigBuilder, init_test_tracing};
use tempfile::TempDir;
use tokio::time::Instant;

fn controller(tmp: &TempDir, host: &Arc<FakeHost>) -> LifecycleController {
    let config = TestConfigBuilder::new()
        .working_dir(tmp.path().join("app_Tor"))
        .bind_timeout(Duration::from_millis(1_000))
        .build();
    LifecycleController::from_config(&config, host.clone()).unwrap()
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Start / stop ────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_without_start_is_a_noop() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);

    assert_eq!(controller.stop().await, LifecycleState::Stopped);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(host.stop_count(), 0);
    assert_eq!(host.unbind_count(), 0);
}

#[test_log::test(tokio::test)]
async fn start_stop_start_runs_the_same_sequence() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);

    let first = controller.start().await.unwrap();
    assert_eq!(controller.state(), LifecycleState::Bound);
    assert_eq!(controller.handle(), Some(first.clone()));

    assert_eq!(controller.stop().await, LifecycleState::Bound);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(controller.handle().is_none());
    assert_eq!(host.stop_count(), 1);
    assert_eq!(host.unbind_count(), 1);

    let second = controller.start().await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(controller.state(), LifecycleState::Bound);
    assert_eq!(host.bind_count(), 2);
    assert_eq!(controller.epoch(), 3);

    controller.stop().await;
    assert_eq!(host.unbind_count(), 2);
}

#[tokio::test]
async fn config_is_written_before_bind() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);

    controller.start().await.unwrap();

    let binds = host.binds();
    assert_eq!(binds.len(), 1);
    assert!(binds[0].config_present);

    let written = std::fs::read_to_string(controller.paths().torrc_path()).unwrap();
    let doc = TorrcDocument::parse(&written).unwrap();
    let working_dir = tmp.path().join("app_Tor");
    assert_eq!(doc.get("DataDirectory"), Some(working_dir.to_str().unwrap()));
    assert_eq!(
        doc.get("HiddenServiceDir"),
        Some(working_dir.join("hidden_service").to_str().unwrap())
    );
}

#[tokio::test]
async fn second_start_while_starting_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::new(ConnectMode::Manual));
    let controller = controller(&tmp, &host);

    let starter = controller.clone();
    let pending = tokio::spawn(async move { starter.start().await });
    wait_until("bind request", || host.is_bound()).await;

    let err = controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::AlreadyActive {
            state: LifecycleState::Starting
        }
    ));

    host.connect().await.unwrap();
    pending.await.unwrap().unwrap();
    assert_eq!(controller.state(), LifecycleState::Bound);
    assert_eq!(host.bind_count(), 1);
}

#[tokio::test]
async fn stop_while_starting_cancels_the_start() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::new(ConnectMode::Manual));
    let controller = controller(&tmp, &host);

    let starter = controller.clone();
    let pending = tokio::spawn(async move { starter.start().await });
    wait_until("bind request", || host.is_bound()).await;

    assert_eq!(controller.stop().await, LifecycleState::Starting);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, LifecycleError::Cancelled));
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(controller.last_stop_cause(), Some(StopCause::Requested));

    // The released bind can no longer connect.
    assert!(host.connect().await.is_none());
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

// ── Bind failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn bind_without_connect_times_out_and_releases() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::new(ConnectMode::Manual));
    let controller = controller(&tmp, &host);
    let started = Instant::now();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::BindTimeout { timeout_ms: 1_000 }));
    assert!(started.elapsed() >= Duration::from_millis(1_000));
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(host.unbind_count(), 1);
    assert!(!host.is_bound());

    // A retry gets a fresh bind.
    host.set_mode(ConnectMode::Immediate);
    controller.start().await.unwrap();
    assert_eq!(host.bind_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn late_connect_after_timeout_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::new(ConnectMode::After(Duration::from_millis(1_500))));
    let controller = controller(&tmp, &host);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::BindTimeout { .. }));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(controller.handle().is_none());
}

#[tokio::test]
async fn disconnect_before_connect_fails_the_start() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::new(ConnectMode::Manual));
    let controller = controller(&tmp, &host);

    let starter = controller.clone();
    let pending = tokio::spawn(async move { starter.start().await });
    wait_until("bind request", || host.is_bound()).await;
    assert!(host.drop_connection().await);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, LifecycleError::BindFailed));
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(host.unbind_count(), 1);
}

#[tokio::test]
async fn host_refusal_surfaces_as_bind_error() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.fail_next_bind();
    let controller = controller(&tmp, &host);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Bind(BindError::Host(_))));
    assert_eq!(controller.state(), LifecycleState::Stopped);

    controller.start().await.unwrap();
}

// ── Unexpected disconnect ───────────────────────────────────────────────

#[tokio::test]
async fn unexpected_disconnect_collapses_to_stopped() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);

    controller.start().await.unwrap();
    assert!(host.drop_connection().await);

    wait_until("stopped", || controller.state() == LifecycleState::Stopped).await;
    assert_eq!(controller.last_stop_cause(), Some(StopCause::Disconnected));
    assert!(controller.handle().is_none());
    wait_until("bind release", || host.unbind_count() == 1).await;

    // Stopping afterwards is a no-op; starting again works.
    assert_eq!(controller.stop().await, LifecycleState::Stopped);
    controller.start().await.unwrap();
    assert_eq!(controller.state(), LifecycleState::Bound);
}

// ── Identity ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn identity_resolves_at_first_poll_after_publish() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    controller.start().await.unwrap();

    let hostname = controller.paths().hostname_path();
    let started = Instant::now();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        std::fs::write(hostname, "ready.onion\n").unwrap();
    });

    let address = controller.identity().await.unwrap();
    writer.await.unwrap();

    let elapsed = started.elapsed();
    assert_eq!(address.as_str(), "ready.onion");
    assert!(elapsed >= Duration::from_millis(2_000), "resolved at {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2_500), "resolved at {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn identity_without_file_times_out() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    controller.start().await.unwrap();
    let started = Instant::now();

    let err = controller.identity().await.unwrap_err();
    assert!(matches!(err, ReadinessError::Timeout { .. }));
    assert!(err.to_string().starts_with("identity not available within timeout"));
    assert!(started.elapsed() >= Duration::from_millis(30_000));
}

#[tokio::test(start_paused = true)]
async fn identity_requested_before_start_resolves() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    let hostname = controller.paths().hostname_path();
    let started = Instant::now();

    let poller = controller.clone();
    let pending = tokio::spawn(async move { poller.identity().await });
    controller.start().await.unwrap();
    assert_eq!(controller.state(), LifecycleState::Bound);

    tokio::time::sleep_until(started + Duration::from_millis(2_000)).await;
    std::fs::write(hostname, "ready.onion\n").unwrap();

    let address = pending.await.unwrap().unwrap();
    assert_eq!(address.as_str(), "ready.onion");
    assert!(started.elapsed() <= Duration::from_millis(2_500));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_identity() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    controller.start().await.unwrap();

    let poller = controller.clone();
    let pending = tokio::spawn(async move { poller.identity().await });
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(host.drop_connection().await);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ReadinessError::Cancelled));
    assert_eq!(controller.last_stop_cause(), Some(StopCause::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_identity() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    controller.start().await.unwrap();

    let poller = controller.clone();
    let pending = tokio::spawn(async move { poller.identity().await });
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    controller.stop().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ReadinessError::Cancelled));
}

#[tokio::test]
async fn identity_never_writes_into_hidden_service_dir() {
    let tmp = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let controller = controller(&tmp, &host);
    controller.start().await.unwrap();

    let hs_dir = controller.paths().hidden_service_dir().to_path_buf();
    std::fs::write(hs_dir.join("hostname"), "abc123.onion").unwrap();
    controller.identity().await.unwrap();

    let entries: Vec<_> = std::fs::read_dir(&hs_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("hostname")]);
}
