//! Thread-local storage for the current looper
//!
//! Set by a loop thread for its whole lifetime, and by a manual looper for
//! the duration of each `tick()`.

use std::cell::RefCell;
use std::sync::Arc;

use tickloop_core::LooperId;

use crate::looper::LogicLooper;

thread_local! {
    /// Looper driving this OS thread, if any
    static CURRENT_LOOPER: RefCell<Option<Arc<dyn LogicLooper>>> = const { RefCell::new(None) };
}

/// Set the current looper, returning the previous one
#[inline]
pub fn set_current_looper(looper: Option<Arc<dyn LogicLooper>>) -> Option<Arc<dyn LogicLooper>> {
    CURRENT_LOOPER.with(|cell| cell.replace(looper))
}

/// Clear the current looper (loop thread exiting)
#[inline]
pub fn clear_current_looper() {
    CURRENT_LOOPER.with(|cell| cell.borrow_mut().take());
}

/// Get the looper driving this thread
#[inline]
pub fn current_looper() -> Option<Arc<dyn LogicLooper>> {
    CURRENT_LOOPER.with(|cell| cell.borrow().clone())
}

/// Id of the looper driving this thread, `LooperId::NONE` otherwise
#[inline]
pub fn current_looper_id() -> LooperId {
    CURRENT_LOOPER.with(|cell| cell.borrow().as_ref().map_or(LooperId::NONE, |l| l.id()))
}

/// Check if we're running on a looper thread
#[inline]
pub fn is_in_looper() -> bool {
    CURRENT_LOOPER.with(|cell| cell.borrow().is_some())
}

/// Restores the previous current looper on drop
pub(crate) struct CurrentLooperGuard {
    previous: Option<Arc<dyn LogicLooper>>,
}

impl CurrentLooperGuard {
    pub(crate) fn enter(looper: Arc<dyn LogicLooper>) -> Self {
        Self {
            previous: set_current_looper(Some(looper)),
        }
    }
}

impl Drop for CurrentLooperGuard {
    fn drop(&mut self) {
        set_current_looper(self.previous.take());
    }
}
