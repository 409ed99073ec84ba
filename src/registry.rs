//! Session registry and status entry points
//!
//! The registry lets callers that hold no session object (plain functions,
//! C callers) reach "the current session". It holds at most one
//! [`DeviceSession`]; opening replaces it, destroying the old session before
//! the new one is constructed so two sessions never hold resources at once.
//!
//! Two layers:
//!
//! - [`SessionRegistry`] - the single slot, with `Result` returns.
//! - [`SharedRegistry`] - a `SessionRegistry` behind a lock, exposing the
//!   status contract: `true`/`false` and byte counts, with every error and
//!   every panic collapsed to `false`/`0` at the boundary.
//!
//! [`SharedRegistry::global`] is the process-wide instance used by the free
//! functions below and by the C entry points.
//!
//! # Blocking and cancellation
//!
//! Transfers hold the lock while they block, so a concurrent `close` waits
//! for the transfer to finish. [`SharedRegistry::cancel_pending`] does not
//! take the lock and interrupts a blocked transfer from any thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::{Settings, TransferConfig};
use crate::error::{SessionError, SessionResult};
use crate::hardware::{DeviceOpener, SystemOpener};
use crate::session::{CancelToken, DeviceSession, Wait};

/// Single-slot owner of the current session.
pub struct SessionRegistry {
    slot: Option<DeviceSession>,
    opener: Arc<dyn DeviceOpener>,
    transfer: TransferConfig,
    cancel: CancelToken,
}

impl SessionRegistry {
    /// Empty registry opening devices through `opener`.
    pub fn new(opener: Arc<dyn DeviceOpener>) -> Self {
        Self {
            slot: None,
            opener,
            transfer: TransferConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Apply per-direction wait bounds to transfers issued through the
    /// registry.
    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Token that interrupts transfers issued through the registry.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Destroy the current session (if any), then construct and open a new
    /// one. The new session stays in the slot even when `open` fails.
    pub fn open(&mut self, name: &str, baud_rate: u32) -> SessionResult<()> {
        if let Some(previous) = self.slot.take() {
            debug!(path = ?previous.device_path(), "Replacing current serial session");
            drop(previous);
        }

        let session = self.slot.insert(DeviceSession::new(self.opener.clone())?);
        session.open(name, baud_rate)
    }

    /// Destroy the current session, open or not, leaving the slot empty.
    pub fn discard(&mut self) {
        if let Some(previous) = self.slot.take() {
            debug!(path = ?previous.device_path(), "Discarding current serial session");
        }
    }

    /// Close and destroy the current session.
    ///
    /// Fails with [`SessionError::NotOpen`] if the slot is empty or the
    /// session in it never opened; the slot is cleared either way.
    pub fn close(&mut self) -> SessionResult<()> {
        let mut session = self.slot.take().ok_or(SessionError::NotOpen)?;
        session.close()
    }

    /// Read from the current session under the configured read bound.
    pub fn read(&mut self, buf: &mut [u8]) -> SessionResult<usize> {
        let wait = self.bound(self.transfer.read_wait());
        self.current()?.read(buf, &wait)
    }

    /// Write to the current session under the configured write bound.
    pub fn write(&mut self, buf: &[u8]) -> SessionResult<usize> {
        let wait = self.bound(self.transfer.write_wait());
        self.current()?.write(buf, &wait)
    }

    /// The session in the slot, open or not.
    pub fn session(&self) -> Option<&DeviceSession> {
        self.slot.as_ref()
    }

    /// Whether the slot holds an open session.
    pub fn is_open(&self) -> bool {
        self.slot.as_ref().is_some_and(DeviceSession::is_open)
    }

    fn current(&mut self) -> SessionResult<&mut DeviceSession> {
        self.slot.as_mut().ok_or(SessionError::NotOpen)
    }

    // A cancel only targets transfers already blocked when it is issued.
    fn bound(&self, wait: Wait) -> Wait {
        self.cancel.rearm();
        wait.with_cancel(self.cancel.clone())
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("slot", &self.slot)
            .field("transfer", &self.transfer)
            .finish_non_exhaustive()
    }
}

static GLOBAL: Lazy<SharedRegistry> = Lazy::new(|| {
    let settings = Settings::load_or_default();
    SharedRegistry::new(
        SessionRegistry::new(Arc::new(SystemOpener)).with_transfer_config(settings.transfer),
    )
});

/// Lock-guarded registry exposing the status contract.
#[derive(Debug)]
pub struct SharedRegistry {
    inner: Mutex<SessionRegistry>,
    cancel: CancelToken,
}

impl SharedRegistry {
    /// Wrap `registry`.
    pub fn new(registry: SessionRegistry) -> Self {
        let cancel = registry.cancel_token();
        Self {
            inner: Mutex::new(registry),
            cancel,
        }
    }

    /// The process-wide registry, opening real devices. Transfer bounds come
    /// from [`Settings::load_or_default`] on first use.
    pub fn global() -> &'static SharedRegistry {
        &GLOBAL
    }

    /// Replace the current session with a new one opened on `name`.
    pub fn open_serial_port(&self, name: &str, baud_rate: u32) -> bool {
        boundary("open", false, || {
            self.inner.lock().open(name, baud_rate).map(|()| true)
        })
    }

    /// Destroy the current session without opening another. Used when an
    /// open request is rejected before a device name is available.
    pub fn discard(&self) {
        boundary("discard", (), || {
            self.inner.lock().discard();
            Ok(())
        });
    }

    /// Close and destroy the current session. `false` if nothing was open.
    pub fn close_serial_port(&self) -> bool {
        boundary("close", false, || self.inner.lock().close().map(|()| true))
    }

    /// Bytes read into `buf`; `0` when nothing is open or the read failed.
    pub fn read_serial_port(&self, buf: &mut [u8]) -> usize {
        boundary("read", 0, || self.inner.lock().read(buf))
    }

    /// Bytes written from `buf`; `0` when nothing is open or the write failed.
    pub fn write_serial_port(&self, buf: &[u8]) -> usize {
        boundary("write", 0, || self.inner.lock().write(buf))
    }

    /// Interrupt any transfer currently blocked in this registry.
    pub fn cancel_pending(&self) {
        debug!("Cancelling pending serial transfers");
        self.cancel.cancel();
    }

    /// Whether the slot holds an open session.
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_open()
    }
}

/// Run `op`, collapsing its error or panic into `fallback`.
fn boundary<T>(op: &'static str, fallback: T, f: impl FnOnce() -> SessionResult<T>) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            match e {
                SessionError::NotOpen => debug!(op, "Serial session not open"),
                ref other => warn!(op, error = %other, "Serial operation failed"),
            }
            fallback
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(op, panic = %detail, "Fault in serial entry point");
            fallback
        }
    }
}

/// Open `name` at `baud_rate` on the process-wide registry.
pub fn open_serial_port(name: &str, baud_rate: u32) -> bool {
    SharedRegistry::global().open_serial_port(name, baud_rate)
}

/// Close the process-wide session.
pub fn close_serial_port() -> bool {
    SharedRegistry::global().close_serial_port()
}

/// Read from the process-wide session.
pub fn read_serial_port(buf: &mut [u8]) -> usize {
    SharedRegistry::global().read_serial_port(buf)
}

/// Write to the process-wide session.
pub fn write_serial_port(buf: &[u8]) -> usize {
    SharedRegistry::global().write_serial_port(buf)
}

/// Interrupt a transfer blocked on the process-wide session.
pub fn cancel_serial_transfers() {
    SharedRegistry::global().cancel_pending();
}
