//! Library defaults for [`LooperConfig`](super::LooperConfig)
//!
//! Environment variables override these at runtime (see
//! [`LooperConfig::from_env`](super::LooperConfig::from_env)).

/// Target frames per second for a looper
pub const TARGET_FRAME_RATE: f64 = 60.0;

/// Action slots allocated up front by each looper
pub const INITIAL_CAPACITY: usize = 16;

/// Upper bound on loopers in one pool
pub const MAX_POOL_SIZE: usize = 1024;

/// Report frame overruns at warn level instead of trace
pub const WARN_ON_OVERRUN: bool = false;

/// Default sleep mode name (`precise` or `thread`)
pub const SLEEP_MODE: &str = "precise";

/// Loopers in a default pool: available parallelism minus one, at least one
pub fn pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}
