//! C entry points
//!
//! ```c
//! int OpenSerialPort(const char* port_name, uint32_t baud_rate);
//! int CloseSerialPort(void);
//! int ReadSerialPort(uint8_t* buffer, uint32_t buffer_size);
//! int WriteSerialPort(const uint8_t* buffer, uint32_t buffer_size);
//! void CancelSerialPort(void);
//! ```
//!
//! Open/close return 1 on success and 0 on failure; read/write return the
//! number of bytes transferred, 0 on any failure. All of them operate on
//! [`SharedRegistry::global`].
#![allow(unsafe_code, non_snake_case)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::registry::SharedRegistry;

// A count must fit the c_int return value.
fn clamp_len(len: u32) -> usize {
    len.min(c_int::MAX as u32) as usize
}

fn count(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

/// Open `port_name` (e.g. `"COM3"`, `"ttyUSB0"`) at `baud_rate`, replacing
/// any session opened earlier. The earlier session is destroyed even when
/// `port_name` is null or not UTF-8.
///
/// # Safety
///
/// `port_name` must be null or point to a NUL-terminated string that stays
/// valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn OpenSerialPort(port_name: *const c_char, baud_rate: u32) -> c_int {
    open_on(SharedRegistry::global(), port_name, baud_rate)
}

unsafe fn open_on(registry: &SharedRegistry, port_name: *const c_char, baud_rate: u32) -> c_int {
    let name = if port_name.is_null() {
        None
    } else {
        CStr::from_ptr(port_name).to_str().ok()
    };
    match name {
        Some(name) => c_int::from(registry.open_serial_port(name, baud_rate)),
        None => {
            registry.discard();
            0
        }
    }
}

/// Close and destroy the current session.
#[no_mangle]
pub extern "C" fn CloseSerialPort() -> c_int {
    c_int::from(SharedRegistry::global().close_serial_port())
}

/// Read up to `buffer_size` bytes into `buffer`.
///
/// # Safety
///
/// `buffer` must be null or valid for writes of `buffer_size` bytes, and not
/// accessed by anything else for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn ReadSerialPort(buffer: *mut u8, buffer_size: u32) -> c_int {
    if buffer.is_null() || buffer_size == 0 {
        return 0;
    }
    let buf = std::slice::from_raw_parts_mut(buffer, clamp_len(buffer_size));
    count(SharedRegistry::global().read_serial_port(buf))
}

/// Write `buffer_size` bytes from `buffer`.
///
/// # Safety
///
/// `buffer` must be null or valid for reads of `buffer_size` bytes for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn WriteSerialPort(buffer: *const u8, buffer_size: u32) -> c_int {
    if buffer.is_null() || buffer_size == 0 {
        return 0;
    }
    let buf = std::slice::from_raw_parts(buffer, clamp_len(buffer_size));
    count(SharedRegistry::global().write_serial_port(buf))
}

/// Interrupt a read or write blocked in another thread.
#[no_mangle]
pub extern "C" fn CancelSerialPort() {
    SharedRegistry::global().cancel_pending();
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hardware::mock::MockOpener;
    use crate::registry::SessionRegistry;
    use std::ffi::CString;
    use std::sync::Arc;

    #[test]
    fn test_unusable_name_still_replaces_session() {
        let opener = Arc::new(MockOpener::loopback());
        let registry = SharedRegistry::new(SessionRegistry::new(opener.clone()));
        let name = CString::new("COM3").expect("name");
        let latin1 = CString::new(vec![b'C', 0xD6, b'M']).expect("latin-1 name");

        unsafe {
            assert_eq!(open_on(&registry, name.as_ptr(), 9600), 1);
            assert_eq!(opener.live_handles(), 1);

            assert_eq!(open_on(&registry, latin1.as_ptr(), 9600), 0);
            assert_eq!(opener.live_handles(), 0);
            assert!(!registry.is_open());

            assert_eq!(open_on(&registry, name.as_ptr(), 9600), 1);
            assert_eq!(open_on(&registry, std::ptr::null(), 9600), 0);
        }
        assert_eq!(opener.live_handles(), 0);
        assert_eq!(opener.opens().len(), 2);
    }

    #[test]
    fn test_count_saturates() {
        assert_eq!(count(12), 12);
        assert_eq!(count(usize::MAX), c_int::MAX);
        assert_eq!(clamp_len(u32::MAX), c_int::MAX as usize);
    }
}
