//! Logging initialization.
//!
//! Uses the `tracing` ecosystem with either human-readable or JSON output.
//! Logs go to stderr and `RUST_LOG` overrides the default level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Filter used when `RUST_LOG` is unset.
///
/// Verbose mode turns on request traces from `tower_http` and our own debug
/// lines (Gemini response previews), but keeps the HTTP client crates at
/// INFO so their connection chatter does not drown them out.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug,hyper=info,hyper_util=info,reqwest=info,h2=info"
    } else {
        "info"
    }
}

/// Initialize the global subscriber from the process configuration.
pub fn init_from_config(config: &Config) {
    init(config.verbose, config.json_logs());
}

pub fn init(verbose: bool, json_format: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
