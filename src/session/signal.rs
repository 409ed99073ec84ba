//! Per-direction completion signals.
//!
//! A `CompletionSignal` is a manual-reset event: it stays signaled until
//! explicitly reset. Its [`Waker`] is handed to the I/O future when a
//! transfer is submitted, so the reactor (or an in-memory pipe) sets the
//! signal when the transfer can make progress.
//!
//! The signal only accepts wakes while a transfer is armed on it. A device can
//! keep an old waker after an abandoned transfer and fire it later; such a
//! wake lands on a disarmed signal and is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

use tokio::sync::Notify;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const SIGNALED: u8 = 2;

struct SignalState {
    state: AtomicU8,
    notify: Notify,
}

impl Wake for SignalState {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(ARMED, SIGNALED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_one();
        }
    }
}

/// Manual-reset completion signal owned by a session for its whole lifetime.
pub struct CompletionSignal {
    name: &'static str,
    state: Arc<SignalState>,
}

impl CompletionSignal {
    /// Create a signal in the reset state.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(SignalState {
                state: AtomicU8::new(IDLE),
                notify: Notify::new(),
            }),
        }
    }

    /// Which direction this signal serves.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return to the quiescent state. A transfer armed on the signal stays
    /// armed.
    pub fn reset(&self) {
        let _ = self.state.state.compare_exchange(
            SIGNALED,
            ARMED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Whether a completion has been reported since the last reset.
    pub fn is_signaled(&self) -> bool {
        self.state.state.load(Ordering::Acquire) == SIGNALED
    }

    /// Whether a transfer is currently armed on the signal.
    pub fn is_armed(&self) -> bool {
        self.state.state.load(Ordering::Acquire) != IDLE
    }

    /// Start accepting wakes, quiescent.
    pub(crate) fn arm(&self) {
        self.state.state.store(ARMED, Ordering::Release);
    }

    /// Stop accepting wakes and drop any completion not yet consumed.
    pub(crate) fn disarm(&self) {
        self.state.state.store(IDLE, Ordering::Release);
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker::from(self.state.clone())
    }

    /// Resolve once the signal is set.
    ///
    /// A wake that lands between the state check and the registration leaves a
    /// `Notify` permit behind, so it is never lost.
    pub(crate) async fn wait(&self) {
        while !self.is_signaled() {
            self.state.notify.notified().await;
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("name", &self.name)
            .field("armed", &self.is_armed())
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// Arms a signal for one transfer and disarms it when dropped, including
/// while unwinding out of the transfer.
pub(crate) struct Armed<'a>(&'a CompletionSignal);

impl<'a> Armed<'a> {
    pub(crate) fn new(signal: &'a CompletionSignal) -> Self {
        signal.arm();
        Self(signal)
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.0.disarm();
    }
}
