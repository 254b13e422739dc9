//! Registry of running loopers and pull-based statistics
//!
//! Threaded loopers register themselves when their thread starts and
//! remove themselves when it exits. Nothing here exports metrics; callers
//! sample [`snapshot`] or a pool's stats whenever they like.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tickloop_core::LooperId;

use crate::looper::LogicLooper;

/// Point-in-time view of one looper
#[derive(Debug, Clone, PartialEq)]
pub struct LooperStats {
    pub id: LooperId,
    pub target_frame_rate: f64,
    pub running_actions: usize,
    pub last_processing_duration: Duration,
    pub current_frame: u64,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoolStats {
    pub loopers: Vec<LooperStats>,
    pub total_running_actions: usize,
    pub max_processing_duration: Duration,
}

impl PoolStats {
    pub fn from_loopers(loopers: Vec<LooperStats>) -> Self {
        let total_running_actions = loopers.iter().map(|s| s.running_actions).sum();
        let max_processing_duration = loopers
            .iter()
            .map(|s| s.last_processing_duration)
            .max()
            .unwrap_or_default();
        Self {
            loopers,
            total_running_actions,
            max_processing_duration,
        }
    }
}

type Registry = Mutex<Vec<(LooperId, Weak<dyn LogicLooper>)>>;

static RUNNING: OnceLock<Registry> = OnceLock::new();

fn registry() -> MutexGuard<'static, Vec<(LooperId, Weak<dyn LogicLooper>)>> {
    RUNNING
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn register(looper: &Arc<dyn LogicLooper>) {
    registry().push((looper.id(), Arc::downgrade(looper)));
}

pub(crate) fn unregister(id: LooperId) {
    registry().retain(|(registered, _)| *registered != id);
}

/// Number of threaded loopers currently looping
pub fn running_count() -> usize {
    registry().len()
}

/// Running threaded loopers
pub fn loopers() -> Vec<Arc<dyn LogicLooper>> {
    registry().iter().filter_map(|(_, l)| l.upgrade()).collect()
}

/// Statistics of every running threaded looper
pub fn snapshot() -> Vec<LooperStats> {
    loopers().iter().map(|l| l.stats()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::Looper;

    #[test]
    fn test_looper_registers_while_running() {
        let looper = Looper::new(100.0).unwrap();
        let id = looper.id();

        let mut seen = false;
        for _ in 0..200 {
            if snapshot().iter().any(|s| s.id == id) {
                seen = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen);
        assert!(running_count() >= 1);

        looper.shutdown_and_wait(Duration::ZERO).unwrap();
        assert!(!snapshot().iter().any(|s| s.id == id));
    }

    #[test]
    fn test_pool_stats_totals() {
        let stats = |id, actions, ms| LooperStats {
            id: LooperId::new(id),
            target_frame_rate: 60.0,
            running_actions: actions,
            last_processing_duration: Duration::from_millis(ms),
            current_frame: 0,
        };
        let pool = PoolStats::from_loopers(vec![stats(1, 3, 2), stats(2, 4, 7)]);
        assert_eq!(pool.total_running_actions, 7);
        assert_eq!(pool.max_processing_duration, Duration::from_millis(7));
        assert_eq!(PoolStats::from_loopers(Vec::new()), PoolStats::default());
    }
}
