//! Service binder: prepares the daemon's filesystem state, asks the host to
//! launch it, and tracks the single live [`ServiceHandle`].
//!
//! Each `start` produces a [`PendingBind`] carrying two one-shot
//! notifications: the handle once the host reports connected, and a signal
//! when the connection later drops. Events from a bind that has since been
//! stopped are discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use prysm_config::AppConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::host::{
    BindError, ConnectionEvent, EVENT_CHANNEL_CAPACITY, ServiceDescriptor, ServiceHandle,
    ServiceHost,
};
use crate::storage::ServicePaths;
use crate::torrc::{self, TorrcSettings};

/// Outcome of a started bind, resolved by the host's notifications.
#[derive(Debug)]
pub struct PendingBind {
    generation: u64,
    connected: oneshot::Receiver<ServiceHandle>,
    disconnected: oneshot::Receiver<()>,
}

impl PendingBind {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Split into the connected notification and the disconnect notification.
    ///
    /// The connected receiver errors if the daemon drops before connecting or
    /// the bind is stopped. The disconnect receiver yields `Ok` when the host
    /// reported the drop and errors when the bind was released by `stop`.
    pub fn into_parts(
        self,
    ) -> (
        oneshot::Receiver<ServiceHandle>,
        oneshot::Receiver<()>,
    ) {
        (self.connected, self.disconnected)
    }
}

#[derive(Default)]
struct BindSlot {
    generation: u64,
    bound: bool,
    /// The host reported the daemon gone; the bind still awaits release.
    dropped: bool,
    handle: Option<ServiceHandle>,
    pump: Option<JoinHandle<()>>,
}

/// Owns the bind to the daemon. At most one bind is live at a time.
pub struct ServiceBinder {
    host: Arc<dyn ServiceHost>,
    paths: ServicePaths,
    settings: TorrcSettings,
    binary: String,
    slot: Arc<Mutex<BindSlot>>,
}

impl ServiceBinder {
    pub fn new(
        host: Arc<dyn ServiceHost>,
        paths: ServicePaths,
        settings: TorrcSettings,
        binary: impl Into<String>,
    ) -> Self {
        Self {
            host,
            paths,
            settings,
            binary: binary.into(),
            slot: Arc::new(Mutex::new(BindSlot::default())),
        }
    }

    pub fn from_config(config: &AppConfig, host: Arc<dyn ServiceHost>, paths: ServicePaths) -> Self {
        Self::new(
            host,
            paths,
            TorrcSettings::from_config(config),
            config.tor.binary.clone(),
        )
    }

    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    /// Handle of the connected daemon, if any.
    pub fn handle(&self) -> Option<ServiceHandle> {
        self.lock_slot().handle.clone()
    }

    /// Whether a bind has been requested and not yet released.
    pub fn is_bound(&self) -> bool {
        self.lock_slot().bound
    }

    /// Whether the bound daemon is still connected or connecting.
    pub fn is_live(&self) -> bool {
        let slot = self.lock_slot();
        slot.bound && !slot.dropped
    }

    /// Provision directories, write the daemon config, then request the bind.
    ///
    /// Returns as soon as the host accepted the request; the connection
    /// outcome arrives through the returned [`PendingBind`]. A bind whose
    /// daemon has dropped is released first.
    pub async fn start(&self) -> Result<PendingBind, BindError> {
        let stale = {
            let slot = self.lock_slot();
            if slot.bound && !slot.dropped {
                return Err(BindError::AlreadyBound);
            }
            slot.bound
        };
        if stale {
            debug!("Releasing bind left by a dropped daemon");
            self.stop().await?;
        }

        self.paths.provision().await?;
        torrc::write(&self.paths, &self.settings).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let descriptor =
            ServiceDescriptor::new(self.binary.clone(), &self.paths, self.settings.control_port);
        self.host.bind(descriptor, events_tx)?;

        let (connected_tx, connected) = oneshot::channel();
        let (disconnected_tx, disconnected) = oneshot::channel();

        let mut slot = self.lock_slot();
        slot.generation += 1;
        slot.bound = true;
        slot.dropped = false;
        slot.handle = None;
        let generation = slot.generation;
        slot.pump = Some(tokio::spawn(pump_events(
            events_rx,
            Arc::clone(&self.slot),
            generation,
            connected_tx,
            disconnected_tx,
        )));
        info!(host = self.host.name(), generation, "Bind requested");

        Ok(PendingBind {
            generation,
            connected,
            disconnected,
        })
    }

    /// Stop the daemon and release the bind. A no-op when nothing is bound.
    pub async fn stop(&self) -> Result<(), BindError> {
        let (handle, pump, was_bound) = {
            let mut slot = self.lock_slot();
            slot.generation += 1;
            let was_bound = std::mem::take(&mut slot.bound);
            slot.dropped = false;
            (slot.handle.take(), slot.pump.take(), was_bound)
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if !was_bound {
            debug!("Stop requested with nothing bound");
            return Ok(());
        }

        let stop_result = match &handle {
            Some(handle) => self.host.stop_service(handle).await,
            None => Ok(()),
        };
        if let Err(e) = &stop_result {
            warn!(error = %e, "Daemon did not acknowledge stop; releasing bind anyway");
        }
        self.host.unbind().await?;
        info!(handle = ?handle.as_ref().map(ToString::to_string), "Bind released");
        stop_result
    }

    fn lock_slot(&self) -> MutexGuard<'_, BindSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Translate host events for one bind generation into the pending
/// notifications, keeping the slot's handle in step.
async fn pump_events(
    mut events: mpsc::Receiver<ConnectionEvent>,
    slot: Arc<Mutex<BindSlot>>,
    generation: u64,
    connected_tx: oneshot::Sender<ServiceHandle>,
    disconnected_tx: oneshot::Sender<()>,
) {
    let mut connected_tx = Some(connected_tx);
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected(handle) => {
                {
                    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.generation != generation {
                        debug!(generation, "Ignoring connect from a released bind");
                        return;
                    }
                    slot.handle = Some(handle.clone());
                }
                match connected_tx.take() {
                    Some(tx) => {
                        info!(%handle, "Daemon connected");
                        let _ = tx.send(handle);
                    }
                    None => debug!(%handle, "Duplicate connect notification"),
                }
            }
            ConnectionEvent::Disconnected => break,
        }
    }

    {
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return;
        }
        slot.handle = None;
        slot.dropped = true;
        slot.pump = None;
    }
    info!(generation, "Daemon disconnected");
    let _ = disconnected_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Host that hands its event sender back to the test.
    #[derive(Default)]
    struct ScriptedHost {
        events: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
        stops: AtomicUsize,
        unbinds: AtomicUsize,
    }

    impl ScriptedHost {
        fn sender(&self) -> mpsc::Sender<ConnectionEvent> {
            self.events.lock().unwrap().clone().expect("not bound")
        }
    }

    impl ServiceHost for ScriptedHost {
        fn name(&self) -> &str {
            "scripted"
        }

        fn bind(&self, _: ServiceDescriptor, events: mpsc::Sender<ConnectionEvent>) -> Result<(), BindError> {
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn stop_service<'a>(&'a self, _: &'a ServiceHandle) -> BoxFuture<'a, Result<(), BindError>> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn unbind(&self) -> BoxFuture<'_, Result<(), BindError>> {
            self.unbinds.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().take();
            Box::pin(async { Ok(()) })
        }
    }

    fn binder(tmp: &TempDir) -> (Arc<ScriptedHost>, ServiceBinder) {
        let host = Arc::new(ScriptedHost::default());
        let paths = ServicePaths::new(tmp.path().join("app_Tor"), "hidden_service").unwrap();
        let binder = ServiceBinder::new(host.clone(), paths, TorrcSettings::default(), "tor");
        (host, binder)
    }

    #[tokio::test]
    async fn test_start_writes_config_before_bind() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        let _pending = binder.start().await.unwrap();

        assert!(binder.paths().hidden_service_dir().is_dir());
        assert!(binder.paths().torrc_path().is_file());
        assert!(host.events.lock().unwrap().is_some());
        assert!(binder.is_bound());
        assert!(binder.handle().is_none());
    }

    #[tokio::test]
    async fn test_connected_event_resolves_pending_bind() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        let (connected, _disconnected) = binder.start().await.unwrap().into_parts();
        host.sender()
            .send(ConnectionEvent::Connected(ServiceHandle::new(1, Some(99))))
            .await
            .unwrap();

        let handle = connected.await.unwrap();
        assert_eq!(handle.pid(), Some(99));
        assert_eq!(binder.handle(), Some(handle));
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_bound() {
        let tmp = TempDir::new().unwrap();
        let (_host, binder) = binder(&tmp);

        let _pending = binder.start().await.unwrap();
        assert!(matches!(binder.start().await, Err(BindError::AlreadyBound)));
    }

    #[tokio::test]
    async fn test_stop_without_bind_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        binder.stop().await.unwrap();
        assert_eq!(host.stops.load(Ordering::SeqCst), 0);
        assert_eq!(host.unbinds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_handle_and_allows_restart() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        let (connected, disconnected) = binder.start().await.unwrap().into_parts();
        host.sender()
            .send(ConnectionEvent::Connected(ServiceHandle::new(1, None)))
            .await
            .unwrap();
        connected.await.unwrap();

        binder.stop().await.unwrap();
        assert_eq!(host.stops.load(Ordering::SeqCst), 1);
        assert_eq!(host.unbinds.load(Ordering::SeqCst), 1);
        assert!(binder.handle().is_none());
        assert!(!binder.is_bound());
        // Released by stop, not reported by the host.
        assert!(disconnected.await.is_err());

        let _again = binder.start().await.unwrap();
        assert!(binder.is_bound());
    }

    #[tokio::test]
    async fn test_host_disconnect_clears_handle() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        let (connected, disconnected) = binder.start().await.unwrap().into_parts();
        let events = host.sender();
        events
            .send(ConnectionEvent::Connected(ServiceHandle::new(1, None)))
            .await
            .unwrap();
        connected.await.unwrap();
        events.send(ConnectionEvent::Disconnected).await.unwrap();

        assert!(disconnected.await.is_ok());
        assert!(binder.handle().is_none());
        assert!(binder.is_bound());
        assert!(!binder.is_live());

        // The dropped bind is released before the next one is requested.
        let _again = binder.start().await.unwrap();
        assert_eq!(host.unbinds.load(Ordering::SeqCst), 1);
        assert!(binder.is_live());
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_fails_pending_bind() {
        let tmp = TempDir::new().unwrap();
        let (host, binder) = binder(&tmp);

        let (connected, _disconnected) = binder.start().await.unwrap().into_parts();
        host.sender()
            .send(ConnectionEvent::Disconnected)
            .await
            .unwrap();

        assert!(connected.await.is_err());
    }

    #[tokio::test]
    async fn test_start_surfaces_storage_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("app_Tor"), "not a directory").unwrap();
        let (host, binder) = binder(&tmp);

        let err = binder.start().await.unwrap_err();
        assert!(matches!(err, BindError::Storage(_)));
        assert!(host.events.lock().unwrap().is_none());
    }
}
