//! Per-call cancellation context.
//!
//! A [`CallContext`] combines a [`CancellationToken`] with an optional
//! deadline. Every network operation in the crate takes one and aborts as
//! soon as the context is done, reporting the [`CancelReason`] instead of
//! whatever error the interrupted I/O would have produced.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Why a [`CallContext`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancellation token was triggered.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Cancellation signal and deadline for a single logical call.
///
/// Cloning is cheap and clones observe the same token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never done unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline relative to now. An earlier existing deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set an absolute deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// The underlying token, e.g. to cancel from another task.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `Some(reason)` once the context is done.
    pub fn err(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is done.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CancelReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    ///
    /// A transport error that surfaces after the context is done is replaced
    /// by [`Error::Cancelled`], since the cancellation is what the caller
    /// needs to see.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(reason) = self.err() {
            return Err(Error::Cancelled(reason));
        }

        tokio::select! {
            biased;
            reason = self.done() => Err(Error::Cancelled(reason)),
            result = fut => result.map_err(|err| match self.err() {
                Some(reason) if err.is_transport() => Error::Cancelled(reason),
                _ => err,
            }),
        }
    }
}

impl From<CancellationToken> for CallContext {
    fn from(token: CancellationToken) -> Self {
        Self::with_token(token)
    }
}
