//! Bounds on how long a pending transfer may block.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::SessionError;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation handle shared between the thread blocked in a
/// transfer and any thread that wants to abort it.
///
/// Once cancelled, every wait bound to the token is interrupted until
/// [`CancelToken::rearm`] is called.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt every transfer currently waiting on this token.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Whether [`CancelToken::cancel`] was called since the last rearm.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Clear a previous cancellation so the token can bound new transfers.
    pub fn rearm(&self) {
        self.state.cancelled.store(false, Ordering::Release);
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag; notify_waiters stores no permit.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// How long a submitted transfer may stay pending.
///
/// The default waits forever: a read on a quiet line blocks until a byte
/// arrives. A timeout or a cancel token turns an abandoned transfer into
/// [`SessionError::TimedOut`] / [`SessionError::Cancelled`] instead.
#[derive(Debug, Clone, Default)]
pub struct Wait {
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl Wait {
    /// Block until the transfer completes.
    pub fn forever() -> Self {
        Self::default()
    }

    /// Give up after `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Also give up when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The timeout, if any.
    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    /// The cancel token, if any.
    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// Run `pending` under this bound.
    pub(crate) async fn bound<F: Future>(&self, pending: F) -> Result<F::Output, SessionError> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let timed = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, pending)
                    .await
                    .map_err(|_| SessionError::TimedOut(limit)),
                None => Ok(pending.await),
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(SessionError::Cancelled),
            outcome = timed => outcome,
        }
    }
}
