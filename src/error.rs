//! Error types for serial sessions.
//!
//! `SessionError` is the single error type returned by [`DeviceSession`] and
//! [`SessionRegistry`]. It keeps the failure classes apart so Rust callers can
//! react to them, while the status boundary in [`crate::registry`] collapses
//! all of them to `false` / `0` for callers that only understand a count.
//!
//! ## Error Hierarchy
//!
//! - **`NotOpen`**: the session (or the registry slot) holds no device handle.
//! - **`InvalidBaudRate`**: `open` was asked for a zero baud rate.
//! - **`DeviceUnavailable`**: the host refused the exclusive handle (absent,
//!   busy, or permission denied).
//! - **`Configuration`**: the handle was acquired but reading or applying the
//!   line settings or the timeout policy failed. The handle has already been
//!   released when this is returned.
//! - **`Io`**: the driver reported an error for a submitted transfer.
//! - **`TimedOut`** / **`Cancelled`**: a pending transfer was abandoned
//!   because of the caller's [`Wait`] bound.
//! - **`Runtime`**: the per-session I/O reactor could not be created.
//!
//! [`DeviceSession`]: crate::session::DeviceSession
//! [`SessionRegistry`]: crate::registry::SessionRegistry
//! [`Wait`]: crate::session::Wait

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the session error type.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Step of the open sequence that failed after the handle was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStage {
    /// Reading the device's current line settings.
    ReadLineSettings,
    /// Applying baud rate, framing and parity.
    ApplyLineSettings,
    /// Applying the read/write timeout policy.
    ApplyTimeouts,
}

impl fmt::Display for ConfigStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ConfigStage::ReadLineSettings => "read line settings",
            ConfigStage::ApplyLineSettings => "apply line settings",
            ConfigStage::ApplyTimeouts => "apply timeouts",
        };
        f.write_str(stage)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Serial session is not open")]
    NotOpen,

    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("Failed to open serial device '{path}': {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Failed to {stage} on '{path}': {source}")]
    Configuration {
        path: String,
        stage: ConfigStage,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Serial transfer cancelled")]
    Cancelled,

    #[error("Failed to build session I/O reactor: {0}")]
    Runtime(#[source] std::io::Error),
}

impl SessionError {
    /// True when the transfer was abandoned by a timeout or cancellation
    /// rather than failing at the device.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SessionError::TimedOut(_) | SessionError::Cancelled)
    }
}
