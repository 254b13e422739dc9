//! Per-frame context handed to every action

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tickloop_core::CancellationToken;

use crate::looper::LogicLooper;

/// What an action sees when it is invoked
///
/// Built once per frame by the looper. Actions with a frame-rate override
/// get their own copy carrying the action-local frame number and the time
/// since that action's previous invocation.
#[derive(Clone)]
pub struct ActionContext {
    looper: Arc<dyn LogicLooper>,
    frame: u64,
    begin: Instant,
    elapsed: Duration,
    token: CancellationToken,
}

impl ActionContext {
    pub(crate) fn new(
        looper: Arc<dyn LogicLooper>,
        frame: u64,
        begin: Instant,
        elapsed: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            looper,
            frame,
            begin,
            elapsed,
            token,
        }
    }

    /// Same context with a different frame number and elapsed time
    pub(crate) fn with_frame(&self, frame: u64, elapsed: Duration) -> Self {
        Self {
            looper: Arc::clone(&self.looper),
            frame,
            begin: self.begin,
            elapsed,
            token: self.token.clone(),
        }
    }

    /// Looper running this action
    #[inline]
    pub fn looper(&self) -> &Arc<dyn LogicLooper> {
        &self.looper
    }

    /// Frame number, starting at 0
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Time since the previous frame (or previous invocation, under an override)
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Start of the frame being processed
    #[inline]
    pub fn frame_begin(&self) -> Instant {
        self.begin
    }

    /// Cancelled when the looper starts shutting down
    #[inline]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    pub fn is_cancellation_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("looper", &self.looper.id())
            .field("frame", &self.frame)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}
