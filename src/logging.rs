//! # Logging
//!
//! The runtime only emits `tracing` events: `trace` for every protocol
//! signal, `debug` for lifecycle transitions, `warn` for discarded or
//! anomalous signals. Packet listeners log under the `portflow::packets`
//! target. Installing a subscriber is up to the application;
//! [`init_tracing`] is a convenience for binaries and tests.

use tracing::Level;

/// Installs a `tracing-subscriber` formatter writing events at `level` and
/// above to standard error.
///
/// Returns `false` when a global subscriber was already installed (by an
/// earlier call or by the application), in which case nothing changes.
pub fn init_tracing(level: Level) -> bool {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(true)
    .with_writer(std::io::stderr)
    .try_init()
    .is_ok()
}
