//! Child-process service host.
//!
//! Runs the daemon as `<binary> -f <torrc>` and treats it as connected once
//! its control port accepts TCP connections. The port must be free when the
//! bind is requested, so a listener found later belongs to the child. The
//! process exiting, for any reason, is reported as a disconnect.
//!
//! | Event | Source |
//! |-------|--------|
//! | `Connected` | first successful TCP connect to `127.0.0.1:<control_port>` |
//! | `Disconnected` | child exit, `stop_service`, or `unbind` |

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::BoxFuture;

use super::{BindError, ConnectionEvent, EventSender, ServiceDescriptor, ServiceHandle, ServiceHost};

/// Default delay between control-port probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// The one daemon process this host may have running.
struct ActiveProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

/// Runs the daemon binary as a child of the supervisor.
pub struct ProcessHost {
    probe_interval: Duration,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveProcess>>,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self::with_probe_interval(DEFAULT_PROBE_INTERVAL)
    }

    pub fn with_probe_interval(probe_interval: Duration) -> Self {
        Self {
            probe_interval,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Pid of the running daemon, if one is live.
    pub fn pid(&self) -> Option<u32> {
        self.lock_active()
            .as_ref()
            .filter(|active| !active.monitor.is_finished())
            .and_then(|active| active.pid)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveProcess>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost for ProcessHost {
    fn name(&self) -> &str {
        "process"
    }

    fn bind(&self, descriptor: ServiceDescriptor, events: EventSender) -> Result<(), BindError> {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|process| !process.monitor.is_finished())
        {
            return Err(BindError::AlreadyBound);
        }
        ensure_port_free(descriptor.control_port)?;

        let mut child = Command::new(&descriptor.binary)
            .arg("-f")
            .arg(&descriptor.torrc_path)
            .current_dir(&descriptor.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BindError::Launch {
                binary: descriptor.binary.clone(),
                source,
            })?;

        let pid = child.id();
        info!(
            binary = %descriptor.binary,
            torrc = %descriptor.torrc_path.display(),
            pid = ?pid,
            "Launched daemon process"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let handle = ServiceHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed), pid);
        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            handle,
            descriptor.control_port,
            self.probe_interval,
            kill_rx,
            events,
        ));

        *active = Some(ActiveProcess {
            pid,
            kill_tx: Some(kill_tx),
            monitor,
        });
        Ok(())
    }

    fn stop_service<'a>(&'a self, handle: &'a ServiceHandle) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move {
            let kill_tx = self
                .lock_active()
                .as_mut()
                .and_then(|active| active.kill_tx.take());
            match kill_tx {
                Some(tx) => {
                    debug!(%handle, "Signalling daemon to stop");
                    let _ = tx.send(());
                }
                None => debug!(%handle, "Daemon already stopping"),
            }
            Ok(())
        })
    }

    fn unbind(&self) -> BoxFuture<'_, Result<(), BindError>> {
        Box::pin(async move {
            let Some(active) = self.lock_active().take() else {
                return Ok(());
            };
            // Dropping the kill sender also stops the child.
            drop(active.kill_tx);
            active
                .monitor
                .await
                .map_err(|e| BindError::Host(format!("daemon monitor task failed: {e}")))?;
            info!(pid = ?active.pid, "Daemon process released");
            Ok(())
        })
    }
}

/// Watch the child until it exits or is told to stop, reporting the first
/// successful control-port probe as `Connected`.
async fn monitor(
    mut child: Child,
    handle: ServiceHandle,
    control_port: u16,
    probe_interval: Duration,
    mut kill_rx: oneshot::Receiver<()>,
    events: EventSender,
) {
    let mut connected = false;
    loop {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => info!(%handle, %status, "Daemon process exited"),
                    Err(e) => warn!(%handle, error = %e, "Failed to wait on daemon process"),
                }
                break;
            }
            _ = &mut kill_rx => {
                if let Err(e) = child.kill().await {
                    warn!(%handle, error = %e, "Failed to kill daemon process");
                }
                break;
            }
            _ = tokio::time::sleep(probe_interval), if !connected => {
                if TcpStream::connect(("127.0.0.1", control_port)).await.is_ok() {
                    connected = true;
                    debug!(%handle, control_port, "Control port reachable");
                    if events.send(ConnectionEvent::Connected(handle.clone())).await.is_err() {
                        debug!(%handle, "Binder went away before connect was reported");
                    }
                }
            }
        }
    }
    let _ = events.send(ConnectionEvent::Disconnected).await;
}

/// Fail if something already listens on the control port.
fn ensure_port_free(port: u16) -> Result<(), BindError> {
    match std::net::TcpListener::bind(("127.0.0.1", port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(port, "Control port already taken, refusing to launch");
            Err(BindError::ControlPortInUse { port })
        }
        Err(e) => {
            debug!(port, error = %e, "Could not test control port, launching anyway");
            Ok(())
        }
    }
}

/// Relay daemon output into the log.
async fn forward_output<R>(stream: R, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "prysm::tor", stream = stream_name, "{line}");
    }
}
