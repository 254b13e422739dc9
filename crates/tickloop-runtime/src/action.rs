//! Registered actions
//!
//! A [`LooperAction`] bundles a callback, the completion handle returned to
//! the registrant, the registration options and (under a frame-rate
//! override) the action's own pacing state. Callbacks come in two shapes:
//!
//! - sync: called once per due frame, returns an [`ActionOutcome`]
//! - async: returns a future that is polled once per due frame with a no-op
//!   waker; `Pending` keeps the action alive, `Ready` is handled like a sync
//!   return and the next due frame starts a fresh future
//!
//! Typed state is moved into the callback at registration, so both shapes
//! come with and without state while dispatch stays a two-way match.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::task::noop_waker_ref;

use tickloop_core::{kdebug, ActionError, ActionOptions, Completion, LooperError};

use crate::config::frame_time_of;
use crate::context::ActionContext;

/// Value a callback returns
///
/// `true` keeps the action registered, `false` completes it. An error fails
/// the action and completes its handle with that error.
pub trait ActionOutcome {
    fn into_outcome(self) -> Result<bool, ActionError>;
}

impl ActionOutcome for bool {
    #[inline]
    fn into_outcome(self) -> Result<bool, ActionError> {
        Ok(self)
    }
}

impl<E> ActionOutcome for Result<bool, E>
where
    E: Into<ActionError>,
{
    #[inline]
    fn into_outcome(self) -> Result<bool, ActionError> {
        self.map_err(Into::into)
    }
}

type SyncFn = Box<dyn FnMut(&ActionContext) -> Result<bool, ActionError> + Send>;
type OutcomeFuture = BoxFuture<'static, Result<bool, ActionError>>;
type AsyncFn = Box<dyn FnMut(ActionContext) -> OutcomeFuture + Send>;

enum Callback {
    Sync(SyncFn),
    Async {
        start: AsyncFn,
        running: Option<OutcomeFuture>,
    },
}

impl Callback {
    fn call(&mut self, ctx: &ActionContext) -> Result<bool, ActionError> {
        match self {
            Callback::Sync(f) => f(ctx),
            Callback::Async { start, running } => {
                let mut fut = match running.take() {
                    Some(fut) => fut,
                    None => start(ctx.clone()),
                };
                let mut cx = Context::from_waker(noop_waker_ref());
                match fut.poll_unpin(&mut cx) {
                    Poll::Pending => {
                        *running = Some(fut);
                        Ok(true)
                    }
                    Poll::Ready(outcome) => outcome,
                }
            }
        }
    }
}

/// Pacing state of an action running below its looper's frame rate
///
/// Owned by the loop thread.
struct OverridePacing {
    interval: Duration,
    next_scheduled: Option<Instant>,
    last_invoked: Option<Instant>,
    frame: u64,
}

/// A callback registered on a looper
pub struct LooperAction {
    callback: Callback,
    completion: Completion<bool>,
    options: ActionOptions,
    pacing: Option<OverridePacing>,
}

impl LooperAction {
    fn from_callback(callback: Callback, options: ActionOptions) -> Self {
        let pacing = options.target_frame_rate_override.map(|rate| OverridePacing {
            interval: frame_time_of(rate),
            next_scheduled: None,
            last_invoked: None,
            frame: 0,
        });
        Self {
            callback,
            completion: Completion::new(),
            options,
            pacing,
        }
    }

    /// Action invoking `f` every due frame
    pub fn new<F, R>(mut f: F, options: ActionOptions) -> Self
    where
        F: FnMut(&ActionContext) -> R + Send + 'static,
        R: ActionOutcome,
    {
        Self::from_callback(
            Callback::Sync(Box::new(move |ctx| f(ctx).into_outcome())),
            options,
        )
    }

    /// Action invoking `f` with exclusive access to `state`
    pub fn with_state<S, F, R>(mut state: S, mut f: F, options: ActionOptions) -> Self
    where
        S: Send + 'static,
        F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
        R: ActionOutcome,
    {
        Self::from_callback(
            Callback::Sync(Box::new(move |ctx| f(ctx, &mut state).into_outcome())),
            options,
        )
    }

    /// Action driving the futures returned by `f`
    pub fn from_async<F, Fut, R>(mut f: F, options: ActionOptions) -> Self
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        Self::from_callback(
            Callback::Async {
                start: Box::new(move |ctx| f(ctx).map(ActionOutcome::into_outcome).boxed()),
                running: None,
            },
            options,
        )
    }

    /// Async action whose future factory gets `&mut state`
    ///
    /// The returned future must be `'static`, so it cannot borrow the state;
    /// clone what it needs out of it.
    pub fn from_async_with_state<S, F, Fut, R>(mut state: S, mut f: F, options: ActionOptions) -> Self
    where
        S: Send + 'static,
        F: FnMut(ActionContext, &mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ActionOutcome + 'static,
    {
        Self::from_callback(
            Callback::Async {
                start: Box::new(move |ctx| {
                    f(ctx, &mut state).map(ActionOutcome::into_outcome).boxed()
                }),
                running: None,
            },
            options,
        )
    }

    /// Handle resolved when the action finishes
    pub fn completion(&self) -> Completion<bool> {
        self.completion.clone()
    }

    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    /// Run the action for one frame if it is due
    ///
    /// Returns `false` once the action is finished (completed or failed);
    /// its handle is resolved by then.
    pub(crate) fn run(&mut self, ctx: &ActionContext) -> bool {
        let local = match self.pacing.as_mut() {
            None => None,
            Some(p) => {
                let begin = ctx.frame_begin();
                if p.next_scheduled.is_some_and(|next| next > begin) {
                    return true;
                }
                let exceeded = p
                    .next_scheduled
                    .map_or(Duration::ZERO, |next| begin.saturating_duration_since(next));
                let elapsed = p
                    .last_invoked
                    .map_or(ctx.elapsed(), |last| begin.saturating_duration_since(last));
                let local = ctx.with_frame(p.frame, elapsed);
                p.frame += 1;
                p.last_invoked = Some(begin);
                p.next_scheduled = Some(begin + p.interval.saturating_sub(exceeded));
                Some(local)
            }
        };
        self.invoke(local.as_ref().unwrap_or(ctx))
    }

    fn invoke(&mut self, ctx: &ActionContext) -> bool {
        let callback = &mut self.callback;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.call(ctx)))
            .unwrap_or_else(|payload| Err(ActionError::from_panic(payload)));

        match outcome {
            Ok(true) => true,
            Ok(false) => {
                self.completion.succeed(true);
                false
            }
            Err(e) => {
                kdebug!("action failed at frame {}: {}", ctx.current_frame(), e);
                self.completion.fail(LooperError::ActionFailed(e));
                false
            }
        }
    }
}

impl Drop for LooperAction {
    fn drop(&mut self) {
        // Dropped while still registered: the looper went away first
        self.completion.succeed(false);
    }
}

impl fmt::Debug for LooperAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperAction")
            .field("options", &self.options)
            .field("completed", &self.completion.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::ManualLooper;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn context() -> ActionContext {
        ManualLooper::new(60.0).unwrap().frame_context()
    }

    #[test]
    fn test_outcome_conversion() {
        assert!(matches!(true.into_outcome(), Ok(true)));
        let r: Result<bool, std::io::Error> = Err(std::io::Error::new(std::io::ErrorKind::Other, "io"));
        assert_eq!(r.into_outcome().unwrap_err().message(), "io");
        let r: Result<bool, LooperError> = Ok(false);
        assert!(matches!(r.into_outcome(), Ok(false)));
    }

    #[test]
    fn test_completes_with_true() {
        let ctx = context();
        let mut calls = 0;
        let mut action = LooperAction::new(
            move |_: &ActionContext| {
                calls += 1;
                calls < 3
            },
            ActionOptions::DEFAULT,
        );
        let handle = action.completion();

        assert!(action.run(&ctx));
        assert!(action.run(&ctx));
        assert!(!handle.is_completed());
        assert!(!action.run(&ctx));
        assert!(matches!(handle.try_result(), Some(Ok(true))));
    }

    #[test]
    fn test_panic_is_captured() {
        let ctx = context();
        let mut action = LooperAction::new(
            |_: &ActionContext| -> bool { panic!("exploded") },
            ActionOptions::DEFAULT,
        );
        let handle = action.completion();

        assert!(!action.run(&ctx));
        match handle.try_result() {
            Some(Err(LooperError::ActionFailed(e))) => {
                assert!(e.is_panic());
                assert_eq!(e.message(), "exploded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_is_owned_by_action() {
        let ctx = context();
        let mut action = LooperAction::with_state(
            Vec::new(),
            |ctx: &ActionContext, seen: &mut Vec<u64>| {
                seen.push(ctx.current_frame());
                seen.len() < 2
            },
            ActionOptions::DEFAULT,
        );
        assert!(action.run(&ctx));
        assert!(!action.run(&ctx));
    }

    #[test]
    fn test_async_pending_keeps_action_alive() {
        let ctx = context();
        let started = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&started);
        let mut polls_left = 2;

        let mut action = LooperAction::from_async(
            move |_ctx| {
                s.fetch_add(1, Ordering::SeqCst);
                let mut remaining = polls_left;
                polls_left = 0;
                futures_util::future::poll_fn(move |_cx| {
                    if remaining == 0 {
                        Poll::Ready(false)
                    } else {
                        remaining -= 1;
                        Poll::Pending
                    }
                })
            },
            ActionOptions::DEFAULT,
        );
        let handle = action.completion();

        assert!(action.run(&ctx));
        assert!(action.run(&ctx));
        assert!(!action.run(&ctx));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(matches!(handle.try_result(), Some(Ok(true))));
    }

    #[test]
    fn test_dropping_unfinished_action_resolves_false() {
        let action = LooperAction::new(|_: &ActionContext| true, ActionOptions::DEFAULT);
        let handle = action.completion();
        drop(action);
        assert!(matches!(handle.try_result(), Some(Ok(false))));
    }
}
