//! `tracing-subscriber` wiring shared by the CLI entry point.

use tracing_subscriber::EnvFilter;

/// Maps a `-v` repeat count onto a default `tracing` level and installs a
/// global subscriber. `OBJSH_LOG` overrides the computed filter when set,
/// mirroring how the teacher's CLI lets an env var win over `-v`.
///
/// Safe to call more than once per process (tests call it repeatedly);
/// subsequent calls are no-ops if a subscriber is already installed.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("OBJSH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
