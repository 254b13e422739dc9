//! Action table
//!
//! Densely packed slots owned by one looper. Live actions occupy `[0, tail)`
//! between frames. A frame scans forward from slot 0; whenever an action
//! finishes it leaves a hole, which is immediately filled by running
//! candidates from the back (`j`, walking down from `tail`). A candidate that
//! survives its own invocation moves into the hole; one that finishes is
//! dropped and the walk continues. When the walk meets the forward cursor
//! nothing live is left beyond it and the scan ends.
//!
//! Every live action runs exactly once per frame: slots below `i` were
//! handled by the forward scan, slots at or above `j` by the backward walk,
//! and the two cursors never cross.

use crate::action::LooperAction;
use crate::context::ActionContext;

pub(crate) struct ActionTable {
    slots: Vec<Option<LooperAction>>,
    tail: usize,
}

impl ActionTable {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);
        Self { slots, tail: 0 }
    }

    /// Number of live actions
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.tail
    }

    /// Append an action, doubling the slot array when full
    pub(crate) fn push(&mut self, action: LooperAction) {
        if self.tail == self.slots.len() {
            let grown = (self.slots.len() * 2).max(1);
            self.slots.resize_with(grown, || None);
        }
        self.slots[self.tail] = Some(action);
        self.tail += 1;
    }

    /// Run one frame over every live action and compact finished ones away
    pub(crate) fn run_frame(&mut self, ctx: &ActionContext) {
        let mut i = 0;
        let mut j = self.tail;

        while i < j {
            if self.run_slot(i, ctx) {
                i += 1;
                continue;
            }

            // Hole at i: pull the next survivor down from the back
            let mut filled = false;
            while j > i + 1 {
                j -= 1;
                if self.run_slot(j, ctx) {
                    self.slots[i] = self.slots[j].take();
                    filled = true;
                    break;
                }
            }

            if !filled {
                self.tail = i;
                return;
            }
            i += 1;
        }

        self.tail = j;
    }

    /// Run the action in slot `idx`; clears the slot and returns `false` when
    /// the action finished (or the slot was already empty)
    #[inline]
    fn run_slot(&mut self, idx: usize, ctx: &ActionContext) -> bool {
        let keep = match self.slots[idx].as_mut() {
            Some(action) => action.run(ctx),
            None => false,
        };
        if !keep {
            self.slots[idx] = None;
        }
        keep
    }

    /// Drop every live action; their handles resolve with `false`
    pub(crate) fn abandon_all(&mut self) -> usize {
        let abandoned = self.tail;
        for slot in &mut self.slots[..self.tail] {
            slot.take();
        }
        self.tail = 0;
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::ManualLooper;
    use std::sync::{Arc, Mutex};
    use tickloop_core::ActionOptions;

    /// Action that records its tag and finishes after `runs` invocations
    fn tagged(log: &Arc<Mutex<Vec<u32>>>, tag: u32, runs: usize) -> LooperAction {
        let log = Arc::clone(log);
        let mut left = runs;
        LooperAction::new(
            move |_: &ActionContext| {
                log.lock().unwrap().push(tag);
                left -= 1;
                left > 0
            },
            ActionOptions::DEFAULT,
        )
    }

    fn frame(table: &mut ActionTable, log: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
        let ctx = ManualLooper::new(60.0).unwrap().frame_context();
        log.lock().unwrap().clear();
        table.run_frame(&ctx);
        let mut seen = log.lock().unwrap().clone();
        seen.sort_unstable();
        seen
    }

    #[test]
    fn test_push_grows_by_doubling() {
        let mut table = ActionTable::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        table.push(tagged(&log, 0, 1));
        assert_eq!(table.slots.len(), 1);
        table.push(tagged(&log, 1, 1));
        assert_eq!(table.slots.len(), 2);
        table.push(tagged(&log, 2, 1));
        assert_eq!(table.slots.len(), 4);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_each_action_runs_once_per_frame() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::new(4);
        // 1 and 3 finish on their first run and trigger relocation
        for (tag, runs) in [(0, 5), (1, 1), (2, 5), (3, 1), (4, 5), (5, 5)] {
            table.push(tagged(&log, tag, runs));
        }

        assert_eq!(frame(&mut table, &log), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(table.len(), 4);
        assert_eq!(frame(&mut table, &log), vec![0, 2, 4, 5]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_out_of_order_completion_compacts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::new(8);
        // Middle ones finish first, then the first one
        for (tag, runs) in [(0, 2), (1, 1), (2, 1), (3, 3), (4, 1), (5, 3)] {
            table.push(tagged(&log, tag, runs));
        }

        assert_eq!(frame(&mut table, &log), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(table.len(), 3);
        assert_eq!(frame(&mut table, &log), vec![0, 3, 5]);
        assert_eq!(table.len(), 2);

        table.push(tagged(&log, 6, 10));
        assert_eq!(frame(&mut table, &log), vec![3, 5, 6]);
        assert_eq!(table.len(), 1);
        assert_eq!(frame(&mut table, &log), vec![6]);
        assert!(table.slots[..table.len()].iter().all(Option::is_some));
        assert!(table.slots[table.len()..].iter().all(Option::is_none));
    }

    #[test]
    fn test_everything_finishing_empties_table() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::new(2);
        for tag in 0..5 {
            table.push(tagged(&log, tag, 1));
        }
        assert_eq!(frame(&mut table, &log), vec![0, 1, 2, 3, 4]);
        assert_eq!(table.len(), 0);
        assert!(frame(&mut table, &log).is_empty());
    }

    #[test]
    fn test_abandon_resolves_false() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::new(2);
        let action = tagged(&log, 0, 10);
        let handle = action.completion();
        table.push(action);

        assert_eq!(table.abandon_all(), 1);
        assert_eq!(table.len(), 0);
        assert!(matches!(handle.try_result(), Some(Ok(false))));
    }
}
