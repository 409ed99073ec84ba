//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so a single run can
//! be made more verbose without editing the configuration file.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `fmt` subscriber.
///
/// Returns `false` when a subscriber was already installed (for example by a
/// host process embedding the library); the existing one is left in place.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.is_ok()
}

