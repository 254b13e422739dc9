//! Frame-stepped coroutines
//!
//! A coroutine is a sequence of steps that suspends for whole frames and
//! always resumes on the looper that started it. Each step receives a
//! [`CoroutineContext`] and returns what happens next:
//!
//! - `ctx.delay_frames(n, next)`: run `next` after `n` frames
//! - `ctx.delay_next_frame(next)`: run `next` on the next frame
//! - `ctx.delay(duration, next)`: run `next` after `duration`, converted to
//!   frames at the looper's target rate
//! - `ctx.done(value)`: finish with `value`
//! - `Err(e)` (or a panic): fault with `e`
//!
//! ```ignore
//! looper.register(|ctx: &ActionContext| {
//!     ctx.run_coroutine(|co: &CoroutineContext<u32>| {
//!         let start = co.current_frame();
//!         co.delay_frames(30, move |co| {
//!             co.done((co.current_frame() - start) as u32)
//!         })
//!     });
//!     false
//! })?;
//! ```
//!
//! The first step runs synchronously inside `run_coroutine`. If it suspends,
//! a driver action is registered on the same looper; every frame it counts
//! down the pending delay and, once it reaches zero, runs the stored
//! continuation outside the coroutine's lock.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tickloop_core::{
    kdebug, ActionError, ActionOptions, CoroutineStatus, LooperError, LooperId, LooperResult,
};

use crate::action::LooperAction;
use crate::context::ActionContext;

/// Continuation stored while a coroutine is suspended
pub type Continuation<T> = Box<dyn FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send>;

/// What a coroutine step returns
pub type CoroutineResult<T> = Result<Step<T>, ActionError>;

/// Outcome of one coroutine step
///
/// Built with [`CoroutineContext::done`] and the delay methods.
pub struct Step<T>(StepKind<T>);

enum StepKind<T> {
    Done(T),
    Suspend {
        /// Frames to wait, at least one
        frames: u32,
        next: Continuation<T>,
    },
}

impl<T> Step<T> {
    /// Finish the coroutine with `value`
    pub fn done(value: T) -> Self {
        Step(StepKind::Done(value))
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            StepKind::Done(_) => f.write_str("Step::Done"),
            StepKind::Suspend { frames, .. } => write!(f, "Step::Suspend({})", frames),
        }
    }
}

/// Context handed to each coroutine step
///
/// Dereferences to the [`ActionContext`] of the frame the step runs in.
pub struct CoroutineContext<T> {
    action: ActionContext,
    _result: PhantomData<fn() -> T>,
}

impl<T> CoroutineContext<T> {
    fn new(action: ActionContext) -> Self {
        Self {
            action,
            _result: PhantomData,
        }
    }

    /// Frame context of the current step
    #[inline]
    pub fn action_context(&self) -> &ActionContext {
        &self.action
    }

    /// Suspend for `frames` frames, then run `next`
    ///
    /// Zero frames is rejected with `InvalidDelayFrames`.
    pub fn delay_frames<F>(&self, frames: u32, next: F) -> CoroutineResult<T>
    where
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        if frames == 0 {
            return Err(LooperError::InvalidDelayFrames.into());
        }
        Ok(Step(StepKind::Suspend {
            frames,
            next: Box::new(next),
        }))
    }

    /// Suspend until the next frame, then run `next`
    pub fn delay_next_frame<F>(&self, next: F) -> CoroutineResult<T>
    where
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        self.delay_frames(1, next)
    }

    /// Suspend for about `duration`, then run `next`
    ///
    /// Converted to `target_frame_rate * seconds` frames, truncated. A
    /// duration shorter than one frame is rejected like `delay_frames(0)`.
    pub fn delay<F>(&self, duration: Duration, next: F) -> CoroutineResult<T>
    where
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        let frames = (self.action.looper().target_frame_rate() * duration.as_secs_f64()) as u32;
        self.delay_frames(frames, next)
    }

    /// Finish the coroutine with `value`
    #[inline]
    pub fn done(&self, value: T) -> CoroutineResult<T> {
        Ok(Step::done(value))
    }
}

impl<T> Deref for CoroutineContext<T> {
    type Target = ActionContext;

    fn deref(&self) -> &ActionContext {
        &self.action
    }
}

struct Pending<T> {
    /// Frames left before `next` runs
    wait: u32,
    next: Continuation<T>,
}

struct CoroutineState<T> {
    status: CoroutineStatus,
    next: Option<Pending<T>>,
    result: Option<T>,
    error: Option<ActionError>,
}

struct CoroutineShared<T> {
    looper: LooperId,
    state: Mutex<CoroutineState<T>>,
}

/// Handle to a running coroutine
///
/// Clones refer to the same coroutine.
pub struct Coroutine<T> {
    shared: Arc<CoroutineShared<T>>,
}

impl<T> Clone for Coroutine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Coroutine<T> {
    fn start<F>(ctx: &ActionContext, body: F) -> Self
    where
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        let coroutine = Coroutine {
            shared: Arc::new(CoroutineShared {
                looper: ctx.looper().id(),
                state: Mutex::new(CoroutineState {
                    status: CoroutineStatus::Created,
                    next: None,
                    result: None,
                    error: None,
                }),
            }),
        };

        let step = Self::run_step(ctx, body);
        coroutine.settle(step);
        if coroutine.is_completed() {
            return coroutine;
        }

        let driver = coroutine.clone();
        let submitted = ctx.looper().submit(LooperAction::new(
            move |ctx: &ActionContext| driver.update(ctx),
            ActionOptions::DEFAULT,
        ));
        if let Err(e) = submitted {
            kdebug!("coroutine could not be scheduled: {}", e);
            let mut state = coroutine.state();
            state.next = None;
            state.error = Some(e.into());
            state.status = CoroutineStatus::Faulted;
        }
        coroutine
    }

    fn run_step<F>(ctx: &ActionContext, step: F) -> CoroutineResult<T>
    where
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T>,
    {
        let co = CoroutineContext::new(ctx.clone());
        panic::catch_unwind(AssertUnwindSafe(|| step(&co)))
            .unwrap_or_else(|payload| Err(ActionError::from_panic(payload)))
    }

    /// Apply a step's outcome
    fn settle(&self, step: CoroutineResult<T>) {
        let mut state = self.state();
        match step {
            Ok(Step(StepKind::Done(value))) => {
                state.result = Some(value);
                state.status = CoroutineStatus::RanToCompletion;
            }
            Ok(Step(StepKind::Suspend { frames, next })) => {
                state.next = Some(Pending {
                    wait: frames - 1,
                    next,
                });
            }
            Err(e) => {
                state.next = None;
                state.error = Some(e);
                state.status = CoroutineStatus::Faulted;
            }
        }
    }

    /// Driver body, called once per frame on the owning looper
    fn update(&self, ctx: &ActionContext) -> Result<bool, ActionError> {
        let next = {
            let mut state = self.state();
            if state.status.is_terminated() {
                return Ok(false);
            }
            state.status = CoroutineStatus::Running;
            match state.next.take() {
                None => return Ok(false),
                Some(Pending { wait: 0, next }) => next,
                Some(Pending { wait, next }) => {
                    state.next = Some(Pending {
                        wait: wait - 1,
                        next,
                    });
                    return Ok(true);
                }
            }
        };

        let step = Self::run_step(ctx, next);
        self.settle(step);

        let state = self.state();
        match &state.error {
            Some(e) => Err(e.clone()),
            None => Ok(state.next.is_some()),
        }
    }
}

impl<T> Coroutine<T> {
    fn state(&self) -> MutexGuard<'_, CoroutineState<T>> {
        // Steps run outside the lock and under catch_unwind
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> CoroutineStatus {
        self.state().status
    }

    /// Finished, successfully or not
    pub fn is_completed(&self) -> bool {
        self.status().is_terminated()
    }

    pub fn is_completed_successfully(&self) -> bool {
        self.status().is_completed_successfully()
    }

    pub fn is_faulted(&self) -> bool {
        self.status().is_faulted()
    }

    /// Failure captured when the coroutine faulted
    pub fn error(&self) -> Option<ActionError> {
        self.state().error.clone()
    }

    /// Looper the coroutine runs on
    pub fn looper_id(&self) -> LooperId {
        self.shared.looper
    }

    /// Move the result out
    ///
    /// Fails with the captured error when faulted, `CoroutineNotCompleted`
    /// while still running, and `CoroutineAlreadyCompleted` once taken.
    pub fn take_result(&self) -> LooperResult<T> {
        let mut state = self.state();
        match state.status {
            CoroutineStatus::Faulted => Err(Self::fault(&state)),
            CoroutineStatus::RanToCompletion => state
                .result
                .take()
                .ok_or(LooperError::CoroutineAlreadyCompleted),
            _ => Err(LooperError::CoroutineNotCompleted),
        }
    }

    fn fault(state: &CoroutineState<T>) -> LooperError {
        state
            .error
            .clone()
            .map_or(LooperError::CoroutineNotCompleted, LooperError::ActionFailed)
    }
}

impl<T: Clone> Coroutine<T> {
    /// Copy of the result
    ///
    /// Fails with the captured error when faulted and with
    /// `CoroutineNotCompleted` while still running.
    pub fn result(&self) -> LooperResult<T> {
        let state = self.state();
        match state.status {
            CoroutineStatus::Faulted => Err(Self::fault(&state)),
            CoroutineStatus::RanToCompletion => state
                .result
                .clone()
                .ok_or(LooperError::CoroutineAlreadyCompleted),
            _ => Err(LooperError::CoroutineNotCompleted),
        }
    }
}

impl<T> fmt::Debug for Coroutine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("looper", &self.shared.looper)
            .field("status", &self.status())
            .finish()
    }
}

impl ActionContext {
    /// Start a coroutine on this context's looper
    ///
    /// `body` runs immediately, in the current frame. If it suspends, the
    /// rest runs on later frames of the same looper.
    pub fn run_coroutine<T, F>(&self, body: F) -> Coroutine<T>
    where
        T: Send + 'static,
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        Coroutine::start(self, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::{LogicLooper, LooperExt};
    use crate::manual::ManualLooper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Start a coroutine from inside the first tick and hand its handle back
    fn spawn_on<T, F>(looper: &Arc<ManualLooper>, body: F) -> Coroutine<T>
    where
        T: Send + 'static,
        F: FnOnce(&CoroutineContext<T>) -> CoroutineResult<T> + Send + 'static,
    {
        let slot: Arc<Mutex<Option<Coroutine<T>>>> = Arc::new(Mutex::new(None));
        let s = Arc::clone(&slot);
        let mut body = Some(body);
        looper
            .register(move |ctx: &ActionContext| {
                if let Some(body) = body.take() {
                    *s.lock().unwrap() = Some(ctx.run_coroutine(body));
                }
                false
            })
            .unwrap();
        looper.tick();
        let co = slot.lock().unwrap().take();
        co.unwrap()
    }

    #[test]
    fn test_delay_frames_advances_exactly() {
        let looper = ManualLooper::new(60.0).unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&frames);

        let co = spawn_on(&looper, move |co: &CoroutineContext<()>| {
            f.lock().unwrap().push(co.current_frame());
            co.delay_frames(30, move |co| {
                f.lock().unwrap().push(co.current_frame());
                co.delay_frames(30, move |co| {
                    f.lock().unwrap().push(co.current_frame());
                    co.done(())
                })
            })
        });

        assert_eq!(co.status(), CoroutineStatus::Created);
        looper.tick_n(29);
        assert_eq!(co.status(), CoroutineStatus::Running);
        assert_eq!(frames.lock().unwrap().len(), 1);
        looper.tick_n(31);
        assert!(co.is_completed_successfully());
        assert_eq!(*frames.lock().unwrap(), vec![0, 30, 60]);
        assert_eq!(looper.approximately_running_actions(), 0);
    }

    #[test]
    fn test_delay_next_frame() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<u64>| {
            let start = co.current_frame();
            co.delay_next_frame(move |co| co.done(co.current_frame() - start))
        });
        assert!(matches!(co.result(), Err(LooperError::CoroutineNotCompleted)));
        looper.tick();
        assert_eq!(co.result().unwrap(), 1);
    }

    #[test]
    fn test_delay_duration_uses_frame_rate() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<u64>| {
            let start = co.current_frame();
            co.delay(Duration::from_millis(500), move |co| {
                co.done(co.current_frame() - start)
            })
        });
        looper.tick_n(40);
        assert_eq!(co.result().unwrap(), 30);
    }

    #[test]
    fn test_completes_synchronously_without_driver() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<&'static str>| co.done("now"));
        assert!(co.is_completed_successfully());
        assert_eq!(co.result().unwrap(), "now");
        assert_eq!(looper.approximately_running_actions(), 0);
    }

    #[test]
    fn test_zero_frame_delay_faults() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<()>| co.delay_frames(0, |co| co.done(())));
        assert!(co.is_faulted());
        let e = co.error().unwrap();
        assert!(matches!(e.downcast_ref::<LooperError>(), Some(LooperError::InvalidDelayFrames)));
    }

    #[test]
    fn test_sub_frame_duration_delay_faults() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<u64>| {
            co.delay(Duration::from_millis(1), |co| co.done(co.current_frame()))
        });
        looper.tick_n(3);
        assert!(co.is_faulted());
        let e = co.error().unwrap();
        assert!(matches!(e.downcast_ref::<LooperError>(), Some(LooperError::InvalidDelayFrames)));
        assert!(matches!(co.result(), Err(LooperError::ActionFailed(_))));
    }

    #[test]
    fn test_fault_in_continuation() {
        let looper = ManualLooper::new(60.0).unwrap();
        let resumed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&resumed);

        let co = spawn_on(&looper, move |co: &CoroutineContext<u32>| {
            co.delay_frames(2, move |_co| -> CoroutineResult<u32> {
                r.fetch_add(1, Ordering::SeqCst);
                Err(ActionError::msg("lost connection"))
            })
        });

        looper.tick_n(5);
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert!(co.is_faulted());
        match co.result() {
            Err(LooperError::ActionFailed(e)) => assert_eq!(e.message(), "lost connection"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(looper.approximately_running_actions(), 0);
    }

    #[test]
    fn test_panic_in_continuation_faults() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<()>| {
            co.delay_next_frame(|_co| -> CoroutineResult<()> { panic!("bad step") })
        });
        looper.tick();
        assert!(co.is_faulted());
        assert!(co.error().unwrap().is_panic());
    }

    #[test]
    fn test_take_result_once() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<Vec<u8>>| co.done(vec![1, 2, 3]));
        assert_eq!(co.take_result().unwrap(), vec![1, 2, 3]);
        assert!(matches!(co.take_result(), Err(LooperError::CoroutineAlreadyCompleted)));
    }

    #[test]
    fn test_resumes_on_owning_looper() {
        let looper = ManualLooper::new(60.0).unwrap();
        let co = spawn_on(&looper, |co: &CoroutineContext<bool>| {
            let owner = co.looper().id();
            co.delay_frames(3, move |co| {
                let current = crate::looper::Looper::current().map(|l| l.id());
                co.done(current == Some(owner) && co.looper().id() == owner)
            })
        });
        looper.tick_n(3);
        assert!(co.result().unwrap());
        assert_eq!(co.looper_id(), LooperId::MANUAL);
    }
}
