//! Device seams
//!
//! A session talks to its device through two traits:
//!
//! - [`DeviceOpener`] acquires an exclusive handle for a resolved device path.
//! - [`SerialDevice`] is the open handle: an asynchronous byte stream plus the
//!   control-block operations the open sequence needs.
//!
//! The production implementation is [`SystemOpener`] (tokio-serial); tests use
//! [`mock::MockOpener`].

pub mod mock;
pub mod serial_device;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

pub use serial_device::SystemOpener;

/// Result of a driver-level operation.
pub type DeviceResult<T> = std::result::Result<T, tokio_serial::Error>;

/// Line (control-block) settings of a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate (e.g. 9600, 115200)
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Parity mode
    pub parity: Parity,
    /// Flow control mode
    pub flow_control: FlowControl,
}

impl LineSettings {
    /// Baseline framing: 8 data bits, 1 stop bit, no parity, no flow
    /// control, at the caller's baud rate.
    pub fn fixed(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }

    /// What `open` applies: the device's current control block with baud
    /// rate, data bits, stop bits and parity overwritten. Flow control is
    /// left as the driver reported it.
    pub fn overlay(current: &LineSettings, baud_rate: u32) -> Self {
        Self {
            flow_control: current.flow_control,
            ..Self::fixed(baud_rate)
        }
    }
}

/// Driver-level timeout policy applied once at open.
///
/// There is exactly one: a read completes as soon as at least one byte is
/// available, with no inter-byte or total timeout, and writes never time out.
/// Bounding a single transfer is done per call with [`crate::session::Wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutPolicy;

/// An open, exclusively owned serial device.
///
/// Reads must complete as soon as at least one byte is available; writes
/// report how many bytes the driver accepted.
pub trait SerialDevice: AsyncRead + AsyncWrite + Unpin + Send {
    /// Read the device's current control block.
    fn line_settings(&self) -> DeviceResult<LineSettings>;

    /// Apply a control block.
    fn apply_line_settings(&mut self, settings: &LineSettings) -> DeviceResult<()>;

    /// Put the driver into the first-available-byte read mode with no write
    /// timeout.
    fn apply_timeouts(&mut self, policy: &TimeoutPolicy) -> DeviceResult<()>;
}

/// Acquires exclusive device handles.
///
/// `open` is called from inside the session's I/O reactor context, so
/// implementations may register the handle with tokio.
pub trait DeviceOpener: Send + Sync {
    /// Open `path` with read/write access in asynchronous mode.
    fn open(&self, path: &str, baud_rate: u32) -> DeviceResult<Box<dyn SerialDevice>>;
}

/// Map a short device name to the host's unique device path.
///
/// Windows addresses serial devices through the `\\.\` namespace (required
/// for `COM10` and above); names already in that namespace are kept.
#[cfg(windows)]
pub fn resolve_device_path(name: &str) -> String {
    if name.starts_with(r"\\") {
        name.to_string()
    } else {
        format!(r"\\.\{}", name)
    }
}

/// Map a short device name to the host's unique device path.
///
/// Bare names such as `ttyUSB0` live under `/dev`; anything containing a
/// path separator is used as given.
#[cfg(not(windows))]
pub fn resolve_device_path(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_line_settings() {
        let line = LineSettings::fixed(9600);
        assert_eq!(line.baud_rate, 9600);
        assert_eq!(line.data_bits, DataBits::Eight);
        assert_eq!(line.stop_bits, StopBits::One);
        assert_eq!(line.parity, Parity::None);
    }

    #[test]
    fn test_overlay_replaces_framing() {
        let current = LineSettings {
            baud_rate: 1200,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
            flow_control: FlowControl::Hardware,
        };
        let line = LineSettings::overlay(&current, 115_200);
        assert_eq!(line.baud_rate, 115_200);
        assert_eq!(line.data_bits, DataBits::Eight);
        assert_eq!(line.stop_bits, StopBits::One);
        assert_eq!(line.parity, Parity::None);
        assert_eq!(line.flow_control, FlowControl::Hardware);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_resolve_unix_paths() {
        assert_eq!(resolve_device_path("ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(resolve_device_path("/dev/ttyACM1"), "/dev/ttyACM1");
        assert_eq!(resolve_device_path("./pty"), "./pty");
    }

    #[cfg(windows)]
    #[test]
    fn test_resolve_windows_paths() {
        assert_eq!(resolve_device_path("COM3"), r"\\.\COM3");
        assert_eq!(resolve_device_path(r"\\.\COM12"), r"\\.\COM12");
    }
}
