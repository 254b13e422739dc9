//! Registration hand-off
//!
//! The action table is locked by the ticking thread for a whole frame.
//! Registrations that arrive while a frame is running go onto a short
//! spin-locked queue instead of waiting for the table; the queue is drained
//! into the table after the frame's scan, so a mid-frame registration never
//! runs before the next frame. Registrations between frames append straight
//! into the table.
//!
//! Once the owning loop exits the dispatcher is closed: queued and live
//! actions are dropped (resolving their handles with `false`) and new
//! registrations fail with `ShutDown`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tickloop_core::{kwarn, Completion, LooperError, LooperResult, SpinLock};

use crate::action::LooperAction;
use crate::context::ActionContext;
use crate::table::ActionTable;

struct HandOff {
    /// A frame is being processed
    running: bool,
    pending: VecDeque<LooperAction>,
}

pub(crate) struct Dispatcher {
    table: Mutex<ActionTable>,
    handoff: SpinLock<HandOff>,
    closed: AtomicBool,
    target_frame_rate: f64,

    running_actions: AtomicUsize,
    frame: AtomicU64,
    last_processing_ns: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(target_frame_rate: f64, initial_capacity: usize) -> Self {
        Self {
            table: Mutex::new(ActionTable::new(initial_capacity)),
            handoff: SpinLock::new(HandOff {
                running: false,
                pending: VecDeque::new(),
            }),
            closed: AtomicBool::new(false),
            target_frame_rate,
            running_actions: AtomicUsize::new(0),
            frame: AtomicU64::new(0),
            last_processing_ns: AtomicU64::new(0),
        }
    }

    fn table(&self) -> MutexGuard<'_, ActionTable> {
        // Actions run under catch_unwind, so a poisoned table is still intact
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and schedule an action
    pub(crate) fn submit(&self, action: LooperAction) -> LooperResult<Completion<bool>> {
        if let Err(e) = action.options().validate(self.target_frame_rate) {
            kwarn!("rejected action registration: {}", e);
            return Err(e);
        }
        let completion = action.completion();

        {
            let mut handoff = self.handoff.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(LooperError::ShutDown);
            }
            if handoff.running {
                handoff.pending.push_back(action);
                return Ok(completion);
            }
        }

        let mut table = self.table();
        // The loop may have closed while we waited for the table
        if self.closed.load(Ordering::Acquire) {
            return Err(LooperError::ShutDown);
        }
        table.push(action);
        self.running_actions.store(table.len(), Ordering::Relaxed);
        Ok(completion)
    }

    /// Take the next frame number
    #[inline]
    pub(crate) fn next_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one frame: scan the table, then drain mid-frame registrations
    pub(crate) fn run_frame(&self, ctx: &ActionContext) {
        let mut table = self.table();
        self.handoff.lock().running = true;

        table.run_frame(ctx);

        let pending = {
            let mut handoff = self.handoff.lock();
            handoff.running = false;
            std::mem::take(&mut handoff.pending)
        };
        for action in pending {
            table.push(action);
        }
        self.running_actions.store(table.len(), Ordering::Relaxed);
    }

    /// Refuse further registrations and drop everything still scheduled
    ///
    /// Returns the number of abandoned actions.
    pub(crate) fn close(&self) -> usize {
        let mut table = self.table();
        let pending = {
            let mut handoff = self.handoff.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut handoff.pending)
        };
        let abandoned = table.abandon_all() + pending.len();
        drop(pending);
        self.running_actions.store(0, Ordering::Relaxed);
        abandoned
    }

    #[inline]
    pub(crate) fn target_frame_rate(&self) -> f64 {
        self.target_frame_rate
    }

    #[inline]
    pub(crate) fn running_actions(&self) -> usize {
        self.running_actions.load(Ordering::Relaxed)
    }

    /// Frames processed so far
    #[inline]
    pub(crate) fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_last_processing(&self, d: Duration) {
        let ns = d.as_nanos().min(u64::MAX as u128) as u64;
        self.last_processing_ns.store(ns, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_processing(&self) -> Duration {
        Duration::from_nanos(self.last_processing_ns.load(Ordering::Relaxed))
    }
}
