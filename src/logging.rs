//! Process-wide `tracing` subscriber setup.
//!
//! Diagnostics go to stderr so stdout stays free for command output (the
//! `simulate` command prints the event stream there).

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `nugget=debug`.
pub const LOG_ENV: &str = "NUGGET_LOG";

/// Filter used when `NUGGET_LOG` is unset or invalid.
pub fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level(verbose)))
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init(verbose: bool, json: bool) {
    let filter = build_filter(verbose);

    // try_init fails only when a subscriber is already installed
    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    }
}
