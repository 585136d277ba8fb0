//! Tracing setup shared by the `dosewatch` commands and the sweep daemon.
//!
//! All log output goes to stderr. Stdout carries command results, and with
//! `--json` it has to parse as one document. Under the systemd unit the
//! daemon's stderr ends up in the journal, filtered by `RUST_LOG`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target of the best-effort real-time channel ([`crate::LogNotifier`])
pub const REALTIME_TARGET: &str = "dosewatch::realtime";

/// Start logging at `info`, or at whatever `RUST_LOG` asks for
pub fn init() {
    init_with_level("info")
}

/// Start logging with `default_level` unless `RUST_LOG` is set
///
/// Only the first call installs a subscriber; later calls are no-ops, so the
/// daemon and the one-shot commands can share the same entry path.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

/// Send log output through the test harness, shown only for failing tests
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_test();
        init_with_level("warn");
        init();
        tracing::info!(target: REALTIME_TARGET, "still logging");
    }
}
