//! Cancellation token for cooperative cancellation
//!
//! Loopers hand every action a token through its context. Shutdown cancels
//! the action-level token immediately and the loop-level token either
//! immediately or after a grace period (see [`CancellationToken::cancel_after`]).

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use crate::error::{LooperError, LooperResult};

/// Reference point for deadline timestamps
static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since [`EPOCH`], never zero (zero means "no deadline")
#[inline]
fn now_ns() -> u64 {
    (epoch().elapsed().as_nanos().min(u64::MAX as u128) as u64).max(1)
}

/// Token for checking and triggering cancellation
///
/// Cancellation is requested either explicitly via [`cancel`](Self::cancel)
/// or implicitly once a deadline armed with [`cancel_after`](Self::cancel_after)
/// passes. Checking is a couple of atomic loads, cheap enough for every tick.
/// Clones share state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    /// Cancellation flag
    cancelled: AtomicBool,

    /// Deadline in ns since EPOCH, 0 when unarmed
    deadline_ns: AtomicU64,
}

impl CancellationToken {
    /// Create a new independent cancellation token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline_ns: AtomicU64::new(0),
            }),
        }
    }

    /// Check if cancellation was requested
    ///
    /// An armed deadline that has passed latches the token into the
    /// cancelled state.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        let deadline = self.inner.deadline_ns.load(Ordering::Acquire);
        if deadline != 0 && now_ns() >= deadline {
            self.inner.cancelled.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Request cancellation now
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Request cancellation once `delay` has elapsed
    ///
    /// A zero delay cancels immediately. Arming again replaces the previous
    /// deadline.
    pub fn cancel_after(&self, delay: Duration) {
        if delay.is_zero() {
            self.cancel();
            return;
        }
        let deadline = now_ns().saturating_add(delay.as_nanos().min(u64::MAX as u128) as u64);
        self.inner.deadline_ns.store(deadline, Ordering::Release);
    }

    /// Check if cancelled and return error if so
    ///
    /// ```ignore
    /// looper.register(|ctx| {
    ///     ctx.cancellation_token().check()?;
    ///     Ok::<_, LooperError>(true)
    /// });
    /// ```
    #[inline]
    pub fn check(&self) -> LooperResult<()> {
        if self.is_cancelled() {
            Err(LooperError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cancellation() {
        let token = CancellationToken::new();

        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        token.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(LooperError::ShutDown)));
    }

    #[test]
    fn test_cancel_after_fires_later() {
        let token = CancellationToken::new();
        token.cancel_after(Duration::from_millis(30));

        assert!(!token.is_cancelled());

        std::thread::sleep(Duration::from_millis(60));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_after_zero_is_immediate() {
        let token = CancellationToken::new();
        token.cancel_after(Duration::ZERO);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_after_huge_delay_stays_armed() {
        let token = CancellationToken::new();
        token.cancel_after(Duration::MAX);
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
    }
}
