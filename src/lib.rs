//! Exclusive serial device sessions.
//!
//! This library owns one serial device at a time and moves opaque byte
//! buffers over it. Transfers are submitted asynchronously to the OS and the
//! caller blocks on a per-direction completion signal, so every call looks
//! synchronous while the driver does the work.
//!
//! - [`session::DeviceSession`] - the handle, its two completion signals and
//!   the fixed line configuration (8 data bits, 1 stop bit, no parity).
//! - [`registry`] - the single-slot registry behind the status entry points
//!   `open_serial_port`, `close_serial_port`, `read_serial_port`,
//!   `write_serial_port`.
//! - [`ffi`] - the same entry points for C callers (feature `ffi`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serial_session::hardware::SystemOpener;
//! use serial_session::session::{DeviceSession, Wait};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut session = DeviceSession::new(Arc::new(SystemOpener))?;
//!     session.open("ttyUSB0", 9600)?;
//!     session.write(&[0x41, 0x42], &Wait::forever())?;
//!
//!     let mut buf = [0u8; 2];
//!     let n = session.read(&mut buf, &Wait::timeout(Duration::from_secs(1)))?;
//!     println!("read {:02x?}", &buf[..n]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod hardware;
pub mod logging;
pub mod registry;
pub mod session;

pub use config::{ConfigError, Settings};
pub use error::{SessionError, SessionResult};
pub use registry::{
    cancel_serial_transfers, close_serial_port, open_serial_port, read_serial_port,
    write_serial_port, SessionRegistry, SharedRegistry,
};
pub use session::{CancelToken, DeviceSession, Wait};
