//! Build-time metadata embedded by the build script, reported by the
//! control socket's health and status routes.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("PRYSM_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("PRYSM_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("PRYSM_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string including git hash and profile, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
