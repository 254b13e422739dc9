//! One-shot completion handles
//!
//! Every registration returns a [`Completion`] that the looper resolves
//! exactly once: with the action's outcome, with its captured failure, or
//! (when the looper exits first) with `Ok(false)`. Shutdown returns a
//! `Completion<()>` resolved once the loop thread has left its loop.
//!
//! Handles can be waited on from any thread (`wait`, `wait_timeout`) or
//! awaited as a `Future` from any executor.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::{LooperError, LooperResult};

type Callback<T> = Box<dyn FnOnce(&LooperResult<T>) + Send>;

/// Clonable one-shot result cell
///
/// All clones observe the same resolution. `T: Clone` because every clone
/// (and every waiter) receives its own copy of the value.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

struct State<T> {
    result: Option<LooperResult<T>>,
    wakers: Vec<Waker>,
    callbacks: Vec<Callback<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Create an unresolved handle
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    result: None,
                    wakers: Vec::new(),
                    callbacks: Vec::new(),
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Create a handle already resolved with `result`
    pub fn resolved(result: LooperResult<T>) -> Self {
        let completion = Self::new();
        completion.complete(result);
        completion
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under this lock, so poisoning only means a
        // waiter panicked; the state itself is still consistent.
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the handle
    ///
    /// Returns `false` (and leaves the first result in place) if the handle
    /// was already resolved.
    pub fn complete(&self, result: LooperResult<T>) -> bool {
        let (wakers, callbacks) = {
            let mut state = self.state();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            (
                std::mem::take(&mut state.wakers),
                std::mem::take(&mut state.callbacks),
            )
        };

        self.shared.condvar.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            // A panicking callback must not unwind into the resolver (often a loop thread)
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                crate::kerror!("completion callback panicked");
            }
        }
        true
    }

    /// Resolve successfully
    #[inline]
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Resolve with a failure
    #[inline]
    pub fn fail(&self, error: LooperError) -> bool {
        self.complete(Err(error))
    }

    /// Check whether the handle has been resolved
    pub fn is_completed(&self) -> bool {
        self.state().result.is_some()
    }

    /// Non-blocking read of the result
    pub fn try_result(&self) -> Option<LooperResult<T>> {
        self.state().result.clone()
    }

    /// Block the calling thread until resolved
    ///
    /// Never call this from a looper callback for a handle that the same
    /// looper resolves: the tick would wait on itself.
    pub fn wait(&self) -> LooperResult<T> {
        let mut state = self.state();
        loop {
            if let Some(result) = state.result.as_ref() {
                return result.clone();
            }
            state = self
                .shared
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until resolved or until `timeout` elapses
    ///
    /// Returns `Err(LooperError::Timeout)` when the deadline passes first.
    pub fn wait_timeout(&self, timeout: Duration) -> LooperResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let Some(result) = state.result.as_ref() {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LooperError::Timeout);
            }
            let (guard, _) = self
                .shared
                .condvar
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Run `f` once the handle resolves (immediately if it already has)
    ///
    /// `f` runs on whichever thread resolves the handle. A panic in a
    /// deferred `f` is caught and logged there.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&LooperResult<T>) + Send + 'static,
    {
        let ready = {
            let mut state = self.state();
            match state.result.as_ref() {
                Some(result) => Some(result.clone()),
                None => {
                    state.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        if let Some(result) = ready {
            f(&result);
        }
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// Completion that resolves once every handle in `handles` resolves
    ///
    /// Succeeds with `()` when all succeed; otherwise fails with the first
    /// failure observed. An empty set resolves immediately.
    pub fn when_all(handles: Vec<Completion<T>>) -> Completion<()> {
        let all = Completion::new();
        if handles.is_empty() {
            all.succeed(());
            return all;
        }

        let remaining = Arc::new(AtomicUsize::new(handles.len()));
        let first_error: Arc<Mutex<Option<LooperError>>> = Arc::new(Mutex::new(None));

        for handle in handles {
            let all = all.clone();
            let remaining = Arc::clone(&remaining);
            let first_error = Arc::clone(&first_error);
            handle.on_complete(move |result| {
                if let Err(e) = result {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(e.clone());
                    }
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let error = first_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    match error {
                        Some(e) => all.fail(e),
                        None => all.succeed(()),
                    };
                }
            });
        }
        all
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = LooperResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state();
        match state.result.as_ref() {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use std::thread;

    #[test]
    fn test_resolves_once() {
        let c = Completion::new();
        assert!(!c.is_completed());
        assert!(c.succeed(true));
        assert!(!c.succeed(false));
        assert!(!c.fail(LooperError::ShutDown));
        assert!(matches!(c.try_result(), Some(Ok(true))));
    }

    #[test]
    fn test_wait_across_threads() {
        let c: Completion<u32> = Completion::new();
        let c2 = c.clone();
        let h = thread::spawn(move || c2.wait());
        thread::sleep(Duration::from_millis(20));
        c.succeed(7);
        assert!(matches!(h.join().unwrap(), Ok(7)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let c: Completion<()> = Completion::new();
        let start = Instant::now();
        assert!(matches!(
            c.wait_timeout(Duration::from_millis(30)),
            Err(LooperError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_failure_is_shared_by_clones() {
        let c: Completion<bool> = Completion::new();
        let c2 = c.clone();
        c.fail(ActionError::msg("broken").into());
        match c2.wait() {
            Err(LooperError::ActionFailed(e)) => assert_eq!(e.message(), "broken"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_on_complete_runs_late_and_early() {
        let hits = Arc::new(AtomicUsize::new(0));
        let c: Completion<()> = Completion::new();

        let h = Arc::clone(&hits);
        c.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        c.succeed(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = Arc::clone(&hits);
        c.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_when_all() {
        let a: Completion<()> = Completion::new();
        let b: Completion<()> = Completion::new();
        let all = Completion::when_all(vec![a.clone(), b.clone()]);

        a.succeed(());
        assert!(!all.is_completed());
        b.succeed(());
        assert!(matches!(all.try_result(), Some(Ok(()))));

        assert!(Completion::<()>::when_all(Vec::new()).is_completed());
    }

    #[test]
    fn test_when_all_reports_failure() {
        let a: Completion<()> = Completion::new();
        let b: Completion<()> = Completion::new();
        let all = Completion::when_all(vec![a.clone(), b.clone()]);

        a.fail(LooperError::SpawnFailed);
        b.succeed(());
        assert!(matches!(all.wait(), Err(LooperError::SpawnFailed)));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let c: Completion<u32> = Completion::new();
        let hits = Arc::new(AtomicUsize::new(0));
        c.on_complete(|_| panic!("callback exploded"));
        let h = Arc::clone(&hits);
        c.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(c.succeed(7));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(c.wait(), Ok(7)));
    }
}
