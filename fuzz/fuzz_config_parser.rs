//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Any config that parses and validates must render back into a daemon
//! config without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = prysm_config::AppConfig::parse(s) {
            let settings = prysm_core::torrc::TorrcSettings::from_config(&config);
            if let Ok(paths) = prysm_core::storage::ServicePaths::from_config(&config) {
                let _ = prysm_core::torrc::TorrcDocument::build(&paths, &settings).render();
            }
        }
    }
});
