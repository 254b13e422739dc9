//! Manually ticked looper
//!
//! Same action table, hand-off, override pacing and coroutine machinery as
//! the threaded [`Looper`](crate::looper::Looper), but frames only happen
//! when the owner calls [`tick`](ManualLooper::tick). Time is virtual: frame
//! `n` begins at `origin + n * frame_time` and every frame reports exactly
//! one frame time as elapsed, so tests are deterministic.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tickloop_core::{
    kdebug, CancellationToken, Completion, LooperError, LooperId, LooperResult,
};

use crate::action::LooperAction;
use crate::config::{defaults, frame_time_of};
use crate::context::ActionContext;
use crate::dispatcher::Dispatcher;
use crate::looper::LogicLooper;
use crate::tls::CurrentLooperGuard;

/// Looper advanced by explicit `tick()` calls
pub struct ManualLooper {
    this: Weak<ManualLooper>,
    frame_time: Duration,
    origin: Instant,
    dispatcher: Dispatcher,
    action_token: CancellationToken,
}

impl ManualLooper {
    /// Create a manual looper with a virtual `target_frame_rate`
    pub fn new(target_frame_rate: f64) -> LooperResult<Arc<ManualLooper>> {
        if !target_frame_rate.is_finite() || target_frame_rate <= 0.0 {
            return Err(LooperError::InvalidFrameRate);
        }
        Ok(Arc::new_cyclic(|this| ManualLooper {
            this: this.clone(),
            frame_time: frame_time_of(target_frame_rate),
            origin: Instant::now(),
            dispatcher: Dispatcher::new(target_frame_rate, defaults::INITIAL_CAPACITY),
            action_token: CancellationToken::new(),
        }))
    }

    /// Virtual start of frame `frame`
    fn frame_begin(&self, frame: u64) -> Instant {
        let nanos = (frame as f64) * 1e9 / self.dispatcher.target_frame_rate();
        self.origin + Duration::from_nanos(nanos.round() as u64)
    }

    fn context(&self, looper: Arc<dyn LogicLooper>, frame: u64) -> ActionContext {
        ActionContext::new(
            looper,
            frame,
            self.frame_begin(frame),
            self.frame_time,
            self.action_token.clone(),
        )
    }

    /// Context of the next frame, without running it
    #[cfg(test)]
    pub(crate) fn frame_context(self: &Arc<Self>) -> ActionContext {
        let looper: Arc<dyn LogicLooper> = self.clone();
        self.context(looper, self.dispatcher.current_frame())
    }

    /// Run one frame
    ///
    /// Returns `true` while actions remain registered.
    pub fn tick(&self) -> bool {
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        let this: Arc<dyn LogicLooper> = this;

        let frame = self.dispatcher.next_frame();
        let ctx = self.context(Arc::clone(&this), frame);
        let _current = CurrentLooperGuard::enter(this);

        let begin = Instant::now();
        self.dispatcher.run_frame(&ctx);
        self.dispatcher.set_last_processing(begin.elapsed());

        self.dispatcher.running_actions() != 0
    }

    /// Run `frames` frames
    ///
    /// Returns `true` if actions remained after every one of them.
    pub fn tick_n(&self, frames: usize) -> bool {
        let mut result = true;
        for _ in 0..frames {
            result &= self.tick();
        }
        result
    }

    /// Run frames while `predicate` holds (checked before each frame)
    pub fn tick_while<P>(&self, mut predicate: P)
    where
        P: FnMut() -> bool,
    {
        while predicate() {
            self.tick();
        }
    }

    /// Period of one virtual frame
    #[inline]
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }
}

impl LogicLooper for ManualLooper {
    #[inline]
    fn id(&self) -> LooperId {
        LooperId::MANUAL
    }

    #[inline]
    fn target_frame_rate(&self) -> f64 {
        self.dispatcher.target_frame_rate()
    }

    #[inline]
    fn approximately_running_actions(&self) -> usize {
        self.dispatcher.running_actions()
    }

    #[inline]
    fn last_processing_duration(&self) -> Duration {
        self.dispatcher.last_processing()
    }

    #[inline]
    fn current_frame(&self) -> u64 {
        self.dispatcher.current_frame()
    }

    fn submit(&self, action: LooperAction) -> LooperResult<Completion<bool>> {
        self.dispatcher.submit(action)
    }

    /// Cancel the action token
    ///
    /// There is no loop to stop, so the handle is already resolved and
    /// further ticks keep running whatever is registered.
    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>> {
        kdebug!("manual looper shutdown requested (grace {:?})", grace);
        self.action_token.cancel();
        Ok(Completion::resolved(Ok(())))
    }
}

impl fmt::Debug for ManualLooper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualLooper")
            .field("frame_time", &self.frame_time)
            .field("frame", &self.current_frame())
            .field("running_actions", &self.approximately_running_actions())
            .finish()
    }
}
