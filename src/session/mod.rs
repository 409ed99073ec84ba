//! Device sessions
//!
//! [`DeviceSession`] owns one device handle and two completion signals and
//! turns asynchronous OS transfers into blocking calls bounded by a [`Wait`].

mod device_session;
mod signal;
mod transfer;
mod wait;

pub use device_session::DeviceSession;
pub use signal::CompletionSignal;
pub use wait::{CancelToken, Wait};
