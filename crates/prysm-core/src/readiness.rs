//! Identity readiness polling.
//!
//! After a start request the daemon eventually writes the onion address to
//! `<hidden_service_dir>/hostname`. The poller reads that file on a fixed
//! interval until it holds a valid address, holds garbage, or the timeout
//! elapses. Polling never writes into the hidden-service directory.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prysm_config::ReadinessConfig;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::identity::{IdentityError, OnionAddress};
use crate::storage::HOSTNAME_FILE_NAME;

/// Errors surfaced at the end of a polling window.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error(
        "identity not available within timeout ({timeout_ms} ms, {attempts} attempts at {path:?})"
    )]
    Timeout {
        path: PathBuf,
        timeout_ms: u64,
        attempts: u32,
        /// Last read failure other than "file missing", if any.
        last_read_error: Option<String>,
    },

    #[error("identity file {path:?} holds an invalid address: {source}")]
    InvalidIdentity {
        path: PathBuf,
        #[source]
        source: IdentityError,
    },

    #[error("identity polling was cancelled by a stop request")]
    Cancelled,

    #[error("identity polling task failed: {0}")]
    Task(String),
}

/// Polling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Measured from the first read attempt.
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            interval: Duration::from_millis(500),
        }
    }
}

impl PollSettings {
    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self {
            timeout: config.timeout(),
            interval: config.poll_interval(),
        }
    }
}

/// Resolves once the controller has moved past the epoch a poll was started in.
#[derive(Debug, Clone)]
pub struct Cancellation {
    epochs: watch::Receiver<u64>,
    epoch: u64,
}

impl Cancellation {
    /// Bind to the epoch currently published on `epochs`.
    pub fn new(epochs: watch::Receiver<u64>) -> Self {
        let epoch = *epochs.borrow();
        Self { epochs, epoch }
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(0);
        Self::new(rx)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        *self.epochs.borrow() != self.epoch
    }

    /// Wait until the epoch changes. Pends forever if the publisher is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            if self.epochs.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Largest identity file the poller will read.
pub const MAX_IDENTITY_FILE_LEN: u64 = 1024;

/// Outcome of a single read of the identity file.
#[derive(Debug)]
enum ReadAttempt {
    Missing,
    Unreadable(io::Error),
    Oversized,
    Present(String),
}

async fn read_identity_file(path: &Path) -> ReadAttempt {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return ReadAttempt::Missing,
        Err(error) => return ReadAttempt::Unreadable(error),
    };
    let mut content = String::new();
    match file
        .take(MAX_IDENTITY_FILE_LEN + 1)
        .read_to_string(&mut content)
        .await
    {
        Ok(read) if read as u64 > MAX_IDENTITY_FILE_LEN => ReadAttempt::Oversized,
        Ok(_) => ReadAttempt::Present(content),
        Err(error) => ReadAttempt::Unreadable(error),
    }
}

/// Polls one hidden-service directory for its published identity.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    path: PathBuf,
    settings: PollSettings,
}

impl ReadinessPoller {
    pub fn new(hidden_service_dir: &Path, settings: PollSettings) -> Self {
        Self {
            path: hidden_service_dir.join(HOSTNAME_FILE_NAME),
            settings,
        }
    }

    /// Path of the identity file being polled.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll until the identity is readable, invalid, cancelled, or timed out.
    ///
    /// A missing or unreadable file means "not ready yet". Invalid contents
    /// end the poll immediately instead of being retried.
    pub async fn await_identity(
        &self,
        mut cancel: Cancellation,
    ) -> Result<OnionAddress, ReadinessError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_read_error = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            attempts += 1;

            match read_identity_file(&self.path).await {
                ReadAttempt::Present(content) => {
                    return match OnionAddress::parse(&content) {
                        Ok(address) => {
                            info!(
                                address = %address,
                                attempts,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Onion address ready"
                            );
                            Ok(address)
                        }
                        Err(source) => {
                            warn!(path = %self.path.display(), error = %source, "Identity file is malformed");
                            Err(ReadinessError::InvalidIdentity {
                                path: self.path.clone(),
                                source,
                            })
                        }
                    };
                }
                ReadAttempt::Oversized => {
                    warn!(path = %self.path.display(), limit = MAX_IDENTITY_FILE_LEN, "Identity file is too large");
                    return Err(ReadinessError::InvalidIdentity {
                        path: self.path.clone(),
                        source: IdentityError::TooLarge {
                            limit: MAX_IDENTITY_FILE_LEN,
                        },
                    });
                }
                ReadAttempt::Missing => {
                    debug!(path = %self.path.display(), attempts, "Onion address not ready yet");
                }
                ReadAttempt::Unreadable(error) => {
                    warn!(path = %self.path.display(), error = %error, "Identity file unreadable, retrying");
                    last_read_error = Some(error.to_string());
                }
            }

            if started.elapsed() >= self.settings.timeout {
                return Err(ReadinessError::Timeout {
                    path: self.path.clone(),
                    timeout_ms: self.settings.timeout.as_millis() as u64,
                    attempts,
                    last_read_error,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            }
        }
    }

    /// Run [`await_identity`](Self::await_identity) on its own task.
    pub fn spawn(self, cancel: Cancellation) -> JoinHandle<Result<OnionAddress, ReadinessError>> {
        tokio::spawn(async move { self.await_identity(cancel).await })
    }
}
