//! tokio-serial backed devices
//!
//! `SerialStream` is readiness driven: the fd (or overlapped handle on
//! Windows) is registered with the session's reactor and a read completes as
//! soon as the driver has any byte buffered. mio-serial programs the Windows
//! comm timeouts for that mode when the stream is opened, and a Unix fd has no
//! driver timeouts in non-blocking mode, so [`TimeoutPolicy`] needs no further
//! driver calls.

use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::{DeviceOpener, DeviceResult, LineSettings, SerialDevice, TimeoutPolicy};

/// Opens real serial devices through tokio-serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl DeviceOpener for SystemOpener {
    fn open(&self, path: &str, baud_rate: u32) -> DeviceResult<Box<dyn SerialDevice>> {
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(path, baud_rate).open_native_async()?;

        // TIOCEXCL: a second open of the same tty fails with EBUSY.
        #[cfg(unix)]
        stream.set_exclusive(true)?;

        debug!(path, baud_rate, "Serial device handle acquired");
        Ok(Box::new(stream))
    }
}

impl SerialDevice for SerialStream {
    fn line_settings(&self) -> DeviceResult<LineSettings> {
        Ok(LineSettings {
            baud_rate: self.baud_rate()?,
            data_bits: self.data_bits()?,
            stop_bits: self.stop_bits()?,
            parity: self.parity()?,
            flow_control: self.flow_control()?,
        })
    }

    fn apply_line_settings(&mut self, settings: &LineSettings) -> DeviceResult<()> {
        self.set_baud_rate(settings.baud_rate)?;
        self.set_data_bits(settings.data_bits)?;
        self.set_stop_bits(settings.stop_bits)?;
        self.set_parity(settings.parity)?;
        self.set_flow_control(settings.flow_control)?;
        Ok(())
    }

    fn apply_timeouts(&mut self, _policy: &TimeoutPolicy) -> DeviceResult<()> {
        Ok(())
    }
}
