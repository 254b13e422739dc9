//! Looper selection for pools

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::looper::LogicLooper;

/// Picks the looper a pooled registration goes to
pub trait LooperPoolBalancer: Send + Sync {
    /// Select one looper; `None` only for an empty slice
    fn select<'a>(&self, loopers: &'a [Arc<dyn LogicLooper>]) -> Option<&'a Arc<dyn LogicLooper>>;
}

/// Cycles through the loopers in order
///
/// Safe to share between threads; concurrent callers each get the next
/// index.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    next: AtomicUsize,
}

static SHARED: OnceLock<Arc<RoundRobinBalancer>> = OnceLock::new();

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    /// Process-wide instance
    pub fn shared() -> Arc<RoundRobinBalancer> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(RoundRobinBalancer::new())))
    }
}

impl LooperPoolBalancer for RoundRobinBalancer {
    fn select<'a>(&self, loopers: &'a [Arc<dyn LogicLooper>]) -> Option<&'a Arc<dyn LogicLooper>> {
        if loopers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % loopers.len();
        loopers.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::ManualLooper;
    use std::thread;

    fn three() -> Vec<Arc<dyn LogicLooper>> {
        (0..3)
            .map(|_| ManualLooper::new(60.0).unwrap() as Arc<dyn LogicLooper>)
            .collect()
    }

    #[test]
    fn test_round_robin_order() {
        let loopers = three();
        let balancer = RoundRobinBalancer::new();
        let picked: Vec<usize> = (0..4)
            .map(|_| {
                let chosen = balancer.select(&loopers).unwrap();
                loopers.iter().position(|l| Arc::ptr_eq(l, chosen)).unwrap()
            })
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_empty_selects_nothing() {
        assert!(RoundRobinBalancer::new().select(&[]).is_none());
    }

    #[test]
    fn test_concurrent_selection_is_even() {
        let loopers = Arc::new(three());
        let balancer = Arc::new(RoundRobinBalancer::new());
        let counts: Vec<[usize; 3]> = (0..4)
            .map(|_| {
                let loopers = Arc::clone(&loopers);
                let balancer = Arc::clone(&balancer);
                thread::spawn(move || {
                    let mut counts = [0usize; 3];
                    for _ in 0..300 {
                        let chosen = balancer.select(&loopers).unwrap();
                        let i = loopers.iter().position(|l| Arc::ptr_eq(l, chosen)).unwrap();
                        counts[i] += 1;
                    }
                    counts
                })
            })
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        let mut total = [0usize; 3];
        for c in counts {
            for i in 0..3 {
                total[i] += c[i];
            }
        }
        assert_eq!(total, [400, 400, 400]);
    }

    #[test]
    fn test_shared_is_singleton() {
        assert!(Arc::ptr_eq(&RoundRobinBalancer::shared(), &RoundRobinBalancer::shared()));
    }
}
