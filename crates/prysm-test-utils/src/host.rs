//! Scriptable stand-in for the onion-routing daemon's host.
//!
//! [`FakeHost`] records every bind, stop and unbind, and delivers connection
//! events either on its own ([`ConnectMode`]) or when the test asks for them.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use prysm_core::BoxFuture;
use prysm_core::host::{
    BindError, ConnectionEvent, EventSender, ServiceDescriptor, ServiceHandle, ServiceHost,
};

/// When a bound fake daemon reports itself connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// During `bind`.
    Immediate,
    /// After the given delay, on a spawned task.
    After(Duration),
    /// Only when the test calls [`FakeHost::connect`].
    Manual,
}

/// One observed `bind` call.
#[derive(Debug, Clone)]
pub struct BindRecord {
    pub descriptor: ServiceDescriptor,
    /// Whether the daemon config file existed when the bind was requested.
    pub config_present: bool,
}

pub struct FakeHost {
    mode: Mutex<ConnectMode>,
    events: Mutex<Option<EventSender>>,
    binds: Mutex<Vec<BindRecord>>,
    next_id: AtomicU64,
    stops: AtomicUsize,
    unbinds: AtomicUsize,
    fail_next_bind: AtomicBool,
}

impl FakeHost {
    pub fn new(mode: ConnectMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            events: Mutex::new(None),
            binds: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stops: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            fail_next_bind: AtomicBool::new(false),
        }
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *lock(&self.mode) = mode;
    }

    /// Make the next `bind` fail as a launch error would.
    pub fn fail_next_bind(&self) {
        self.fail_next_bind.store(true, Ordering::SeqCst);
    }

    /// Report the current bind as connected. Returns `None` when nothing is bound.
    pub async fn connect(&self) -> Option<ServiceHandle> {
        let sender = self.sender()?;
        let handle = self.next_handle();
        sender
            .send(ConnectionEvent::Connected(handle.clone()))
            .await
            .ok()?;
        Some(handle)
    }

    /// Report the current bind's daemon as gone.
    pub async fn drop_connection(&self) -> bool {
        match self.sender() {
            Some(sender) => sender.send(ConnectionEvent::Disconnected).await.is_ok(),
            None => false,
        }
    }

    /// Event channel of the current bind, for replaying events after it was
    /// released.
    pub fn sender(&self) -> Option<EventSender> {
        lock(&self.events).clone()
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.events).is_some()
    }

    pub fn binds(&self) -> Vec<BindRecord> {
        lock(&self.binds).clone()
    }

    pub fn bind_count(&self) -> usize {
        lock(&self.binds).len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn unbind_count(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    fn next_handle(&self) -> ServiceHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        ServiceHandle::new(id, Some(40_000 + id as u32))
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new(ConnectMode::Immediate)
    }
}

impl ServiceHost for FakeHost {
    fn name(&self) -> &str {
        "fake"
    }

    fn bind(&self, descriptor: ServiceDescriptor, events: EventSender) -> Result<(), BindError> {
        if self.fail_next_bind.swap(false, Ordering::SeqCst) {
            return Err(BindError::Host("scripted bind failure".to_string()));
        }
        let mut current = lock(&self.events);
        if current.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Err(BindError::AlreadyBound);
        }

        let config_present = descriptor.torrc_path.is_file();
        lock(&self.binds).push(BindRecord {
            descriptor,
            config_present,
        });

        match *lock(&self.mode) {
            ConnectMode::Immediate => {
                events
                    .try_send(ConnectionEvent::Connected(self.next_handle()))
                    .map_err(|e| BindError::Host(e.to_string()))?;
            }
            ConnectMode::After(delay) => {
                let handle = self.next_handle();
                let delayed = events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = delayed.send(ConnectionEvent::Connected(handle)).await;
                });
            }
            ConnectMode::Manual => {}
        }
        *current = Some(events);
        Ok(())
    }

    fn stop_service<'a>(&'a self, _handle: &'a ServiceHandle) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn unbind(&self) -> BoxFuture<'_, Result<(), BindError>> {
        Box::pin(async move {
            if lock(&self.events).take().is_some() {
                self.unbinds.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
