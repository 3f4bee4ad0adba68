#![deny(unsafe_code)]

//! Shared test utilities for the prysm workspace.
//!
//! Provides a config builder, a scriptable [`ServiceHost`](prysm_core::ServiceHost)
//! that stands in for the onion-routing daemon, a running-supervisor fixture,
//! and tracing helpers so that individual crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! prysm-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod host;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use host::{ConnectMode, FakeHost};
pub use tracing_setup::init_test_tracing;
