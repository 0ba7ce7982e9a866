//! Cancellation tokens and the deadline timer that fires them.
//!
//! A [`CancellationToken`] makes exactly one transition out of
//! [`TokenState::Pending`]. Whichever of fire, disarm or cancel runs first
//! wins and every later attempt is a no-op.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::time::sleep;

/// Reason recorded when a timer reaches its deadline.
pub const DEADLINE_ELAPSED: &str = "deadline elapsed";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenState {
    Pending,
    /// The armed deadline elapsed.
    Fired,
    /// The timer was stopped before its deadline.
    Disarmed,
    /// Cancelled explicitly by the owner of the operation.
    Cancelled,
}

impl TokenState {
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::Fired | Self::Cancelled)
    }
}

struct Slot {
    state: TokenState,
    reason: Option<String>,
}

struct Inner {
    slot: Mutex<Slot>,
    settled: tokio_util::sync::CancellationToken,
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        f.debug_struct("CancellationToken")
            .field("state", &slot.state)
            .field("reason", &slot.reason)
            .finish()
    }
}

impl CancellationToken {
    /// Creates an unarmed token that only changes through [`Self::cancel`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    state: TokenState::Pending,
                    reason: None,
                }),
                settled: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    /// Cancels the token. Returns `false` if it had already settled.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.settle(TokenState::Cancelled, Some(reason.into()))
    }

    pub fn state(&self) -> TokenState {
        self.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Returns `true` if both handles share the same underlying token.
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Waits until the token leaves `Pending` and returns its final state.
    pub async fn settled(&self) -> TokenState {
        self.inner.settled.cancelled().await;
        self.state()
    }

    /// Waits until the token is fired or cancelled. Never resolves for a
    /// disarmed token.
    pub async fn cancelled(&self) {
        if !self.settled().await.is_cancelled() {
            std::future::pending::<()>().await;
        }
    }

    fn settle(&self, to: TokenState, reason: Option<String>) -> bool {
        {
            let mut slot = self.lock();
            if slot.state != TokenState::Pending {
                return false;
            }
            slot.state = to;
            slot.reason = reason;
        }
        self.inner.settled.cancel();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Arms tokens that fire after a deadline.
///
/// Requires a running tokio runtime: each armed token is driven by a small
/// spawned task that exits as soon as the token settles.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelableTimer;

impl CancelableTimer {
    pub fn new() -> Self {
        Self
    }

    pub fn arm(&self, duration: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let driver = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(duration) => {
                    driver.settle(TokenState::Fired, Some(DEADLINE_ELAPSED.to_owned()));
                }
                _ = driver.settled() => {}
            }
        });
        token
    }

    /// Stops the timer before it fires.
    ///
    /// Returns `true` if this call won the race. Calling it again, or after
    /// the deadline fired, does nothing and returns `false`.
    pub fn disarm(&self, token: &CancellationToken) -> bool {
        token.settle(TokenState::Disarmed, None)
    }
}
