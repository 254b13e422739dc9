//! Loopers
//!
//! [`LogicLooper`] is the object-safe surface shared by the threaded
//! [`Looper`], the deterministic [`ManualLooper`](crate::manual::ManualLooper)
//! and pooled handles. The generic registration methods live on
//! [`LooperExt`], implemented for every looper including trait objects.
//!
//! # Loop
//!
//! A threaded looper owns one OS thread. Each iteration:
//!
//! 1. checks the loop cancellation token and exits if it fired
//! 2. builds the frame context (frame number, time since the previous frame)
//! 3. runs every live action once, compacting finished ones away
//! 4. drains registrations that arrived during the frame
//! 5. sleeps for whatever is left of the frame budget
//!
//! An overrun frame is followed immediately by the next one; frames are
//! never replayed to catch up.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tickloop_core::kprint;
use tickloop_core::{
    kdebug, kerror, ktrace, kwarn, ActionOptions, CancellationToken, Completion, LooperError,
    LooperId, LooperResult,
};

use crate::action::{ActionOutcome, LooperAction};
use crate::config::{frame_time_of, LooperConfig};
use crate::context::ActionContext;
use crate::dispatcher::Dispatcher;
use crate::sleep::{new_sleeper, SleepMode};
use crate::tls;
use crate::tracker::{self, LooperStats};

/// A looper that runs registered actions once per frame
pub trait LogicLooper: Send + Sync + 'static {
    /// Process-unique id (0 for manual loopers)
    fn id(&self) -> LooperId;

    /// Target frames per second
    fn target_frame_rate(&self) -> f64;

    /// Live actions as of the end of the last frame or registration
    fn approximately_running_actions(&self) -> usize;

    /// Time spent running actions in the last frame
    fn last_processing_duration(&self) -> Duration;

    /// Frames processed so far
    fn current_frame(&self) -> u64;

    /// Schedule an action
    ///
    /// Fails synchronously when the action's frame-rate override is invalid
    /// or above this looper's rate, or when the looper has exited.
    fn submit(&self, action: LooperAction) -> LooperResult<Completion<bool>>;

    /// Request shutdown
    ///
    /// Actions see their cancellation token fire right away. The loop itself
    /// stops after `grace` (immediately when zero). The returned handle
    /// resolves once the loop has exited.
    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>>;

    /// Point-in-time statistics
    fn stats(&self) -> LooperStats {
        LooperStats {
            id: self.id(),
            target_frame_rate: self.target_frame_rate(),
            running_actions: self.approximately_running_actions(),
            last_processing_duration: self.last_processing_duration(),
            current_frame: self.current_frame(),
        }
    }
}

/// Registration helpers for every [`LogicLooper`]
///
/// ```ignore
/// let looper = Looper::new(60.0)?;
/// let mut hp = 100;
/// let done = looper.register(move |_ctx| {
///     hp -= 1;
///     hp > 0
/// })?;
/// done.wait()?;
/// ```
pub trait LooperExt: LogicLooper {
    /// Run `f` every frame until it returns `false` (or an error)
    fn register<F, R>(&self, f: F) -> LooperResult<Completion<bool>>
    where
        F: FnMut(&ActionContext) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.submit(LooperAction::new(f, ActionOptions::DEFAULT))
    }

    fn register_with_options<F, R>(&self, f: F, options: ActionOptions) -> LooperResult<Completion<bool>>
    where
        F: FnMut(&ActionContext) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.submit(LooperAction::new(f, options))
    }

    /// Run `f` every frame with exclusive access to `state`
    fn register_with_state<S, F, R>(&self, state: S, f: F) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.submit(LooperAction::with_state(state, f, ActionOptions::DEFAULT))
    }

    fn register_with_state_options<S, F, R>(
        &self,
        state: S,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.submit(LooperAction::with_state(state, f, options))
    }

    /// Poll the futures produced by `f`, one poll per frame
    fn register_async<F, Fut, R>(&self, f: F) -> LooperResult<Completion<bool>>
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.submit(LooperAction::from_async(f, ActionOptions::DEFAULT))
    }

    fn register_async_with_options<F, Fut, R>(
        &self,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.submit(LooperAction::from_async(f, options))
    }

    fn register_async_with_state<S, F, Fut, R>(&self, state: S, f: F) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(ActionContext, &mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.submit(LooperAction::from_async_with_state(state, f, ActionOptions::DEFAULT))
    }

    fn register_async_with_state_options<S, F, Fut, R>(
        &self,
        state: S,
        f: F,
        options: ActionOptions,
    ) -> LooperResult<Completion<bool>>
    where
        S: Send + 'static,
        F: FnMut(ActionContext, &mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        self.submit(LooperAction::from_async_with_state(state, f, options))
    }
}

impl<L: LogicLooper + ?Sized> LooperExt for L {}

/// Looper backed by a dedicated OS thread
pub struct Looper {
    id: LooperId,
    frame_time: Duration,
    dispatcher: Dispatcher,

    /// Handed to actions, cancelled as soon as shutdown is requested
    action_token: CancellationToken,
    /// Stops the loop, cancelled after the shutdown grace period
    loop_token: CancellationToken,
    shutdown_requested: AtomicBool,
    exited: Completion<()>,

    sleep_mode: SleepMode,
    warn_on_overrun: bool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Looper {
    /// Start a looper running at `target_frame_rate` frames per second
    ///
    /// Runs until shut down, see [`with_config`](Looper::with_config).
    pub fn new(target_frame_rate: f64) -> LooperResult<Arc<Looper>> {
        Self::with_config(&LooperConfig::new().target_frame_rate(target_frame_rate))
    }

    /// Start a looper with a target frame period
    pub fn with_frame_time(frame_time: Duration) -> LooperResult<Arc<Looper>> {
        Self::with_config(&LooperConfig::new().frame_time(frame_time))
    }

    /// Start a looper from a configuration
    ///
    /// The loop thread starts before this returns. It holds its own
    /// reference to the looper, so dropping every returned handle does not
    /// stop it: call [`shutdown`](LogicLooper::shutdown) (the looper stays
    /// reachable through [`tracker::loopers`] until then).
    pub fn with_config(config: &LooperConfig) -> LooperResult<Arc<Looper>> {
        let rate = config.target_frame_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(LooperError::InvalidFrameRate);
        }
        config.validate()?;

        let looper = Arc::new(Looper {
            id: LooperId::next(),
            frame_time: frame_time_of(rate),
            dispatcher: Dispatcher::new(rate, config.initial_capacity),
            action_token: CancellationToken::new(),
            loop_token: CancellationToken::new(),
            shutdown_requested: AtomicBool::new(false),
            exited: Completion::new(),
            sleep_mode: config.sleep_mode,
            warn_on_overrun: config.warn_on_overrun,
            thread: Mutex::new(None),
        });

        let runner = Arc::clone(&looper);
        let handle = thread::Builder::new()
            .name(format!("tickloop-looper-{}", looper.id))
            .spawn(move || runner.run())
            .map_err(|e| {
                kerror!("failed to spawn thread for looper {}: {}", looper.id, e);
                LooperError::SpawnFailed
            })?;
        *looper.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(looper)
    }

    /// Looper driving the calling thread, if any
    ///
    /// Set on a looper's own thread and, during `tick()`, on the thread
    /// driving a manual looper.
    pub fn current() -> Option<Arc<dyn LogicLooper>> {
        tls::current_looper()
    }

    /// Target period of one frame
    #[inline]
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Check whether the loop thread is still looping
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.exited.is_completed()
    }

    /// Request shutdown and block until the loop thread has finished
    ///
    /// Fails with `Unsupported` when called from this looper's own thread,
    /// which would otherwise wait on itself.
    pub fn shutdown_and_wait(&self, grace: Duration) -> LooperResult<()> {
        if tls::current_looper_id() == self.id {
            return Err(LooperError::Unsupported(
                "waiting for a looper from its own thread",
            ));
        }
        self.shutdown(grace)?.wait()?;

        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                kerror!("looper {} thread panicked", self.id);
            }
        }
        Ok(())
    }

    fn run(self: Arc<Self>) {
        let this: Arc<dyn LogicLooper> = self.clone();
        tls::set_current_looper(Some(Arc::clone(&this)));
        kprint::set_looper_tag(self.id.as_u32());
        tracker::register(&this);
        drop(this);
        kdebug!(
            "looper started: {} fps, frame time {:?}",
            self.dispatcher.target_frame_rate(),
            self.frame_time
        );

        // Settles the looper even if the loop unwinds
        let _exit = LoopExit { looper: &self };

        let sleeper = new_sleeper(self.sleep_mode);
        let mut last = Instant::now();

        while !self.loop_token.is_cancelled() {
            let begin = Instant::now();
            let elapsed = begin.saturating_duration_since(last);
            last = begin;

            let ctx = ActionContext::new(
                Arc::clone(&self) as Arc<dyn LogicLooper>,
                self.dispatcher.next_frame(),
                begin,
                elapsed,
                self.action_token.clone(),
            );
            self.dispatcher.run_frame(&ctx);

            let processing = begin.elapsed();
            self.dispatcher.set_last_processing(processing);
            #[cfg(feature = "debug-logging")]
            ktrace!(
                "frame {} processed in {:?} ({} actions)",
                ctx.current_frame(),
                processing,
                self.dispatcher.running_actions()
            );
            match self.frame_time.checked_sub(processing) {
                Some(remaining) if !remaining.is_zero() => sleeper.sleep(remaining),
                _ => self.report_overrun(ctx.current_frame(), processing),
            }
        }
    }

    fn report_overrun(&self, frame: u64, processing: Duration) {
        if self.warn_on_overrun {
            kwarn!(
                "frame {} overran its {:?} budget ({:?})",
                frame,
                self.frame_time,
                processing
            );
        } else {
            ktrace!("frame {} overran ({:?})", frame, processing);
        }
    }
}

/// Exit path of a loop thread, run on normal exit and on unwind
struct LoopExit<'a> {
    looper: &'a Looper,
}

impl Drop for LoopExit<'_> {
    fn drop(&mut self) {
        let looper = self.looper;
        if thread::panicking() {
            kerror!("looper {} loop panicked, abandoning its actions", looper.id);
        }
        let abandoned = looper.dispatcher.close();
        tracker::unregister(looper.id);
        kdebug!(
            "looper exited after {} frames ({} actions abandoned)",
            looper.dispatcher.current_frame(),
            abandoned
        );
        kprint::clear_looper_tag();
        tls::clear_current_looper();
        looper.exited.succeed(());
    }
}

impl LogicLooper for Looper {
    #[inline]
    fn id(&self) -> LooperId {
        self.id
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

    fn shutdown(&self, grace: Duration) -> LooperResult<Completion<()>> {
        if self
            .shutdown_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            kdebug!("looper {} shutdown requested (grace {:?})", self.id, grace);
            self.action_token.cancel();
            self.loop_token.cancel_after(grace);
        }
        Ok(self.exited.clone())
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("id", &self.id)
            .field("frame_time", &self.frame_time)
            .field("running_actions", &self.approximately_running_actions())
            .field("running", &self.is_running())
            .finish()
    }
}
