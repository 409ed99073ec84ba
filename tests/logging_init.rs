//! Subscriber installation. Kept in its own binary: `logging::init` installs
//! the process-wide subscriber, which would swallow events that other tests
//! capture with `tracing-test`.

use serial_session::config::LoggingConfig;
use serial_session::logging;

#[test]
fn test_second_init_keeps_existing_subscriber() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json: false,
    };
    assert!(logging::init(&config));
    assert!(!logging::init(&LoggingConfig::default()));
    tracing::debug!("still routed to the first subscriber");
}
