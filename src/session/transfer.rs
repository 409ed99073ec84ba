//! Submit-then-wait protocol shared by reads and writes.
//!
//! 1. Arm the direction's completion signal, quiescent.
//! 2. Submit: poll the I/O future once with a waker bound to the signal.
//!    `Ready` means the driver completed the transfer synchronously.
//! 3. Otherwise block on the signal inside the session's reactor, re-polling
//!    only after the signal fires, until the transfer completes or the
//!    [`Wait`] bound interrupts it.
//!
//! The signal is disarmed on every exit, unwinding included. Wakes from a
//! waker the device still holds after the call returns are dropped, so the
//! signal is never left set with nothing pending.

use std::future::Future;
use std::io;
use std::task::{Context, Poll};

use tokio::runtime::Runtime;
use tracing::trace;

use super::signal::{Armed, CompletionSignal};
use super::wait::Wait;
use crate::error::SessionResult;

pub(crate) fn complete<F, T>(
    runtime: &Runtime,
    signal: &CompletionSignal,
    wait: &Wait,
    op: F,
) -> SessionResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let _armed = Armed::new(signal);

    let _context = runtime.enter();
    let waker = signal.waker();
    let mut op = std::pin::pin!(op);

    let outcome = match op.as_mut().poll(&mut Context::from_waker(&waker)) {
        Poll::Ready(outcome) => {
            trace!(signal = signal.name(), "Transfer completed on submission");
            outcome
        }
        Poll::Pending => {
            trace!(signal = signal.name(), "Transfer pending");
            let completion = async {
                loop {
                    signal.wait().await;
                    signal.reset();
                    if let Poll::Ready(outcome) = op.as_mut().poll(&mut Context::from_waker(&waker))
                    {
                        break outcome;
                    }
                }
            };
            let outcome = runtime.block_on(wait.bound(completion))?;
            trace!(signal = signal.name(), "Pending transfer completed");
            outcome
        }
    };

    Ok(outcome?)
}
