//! # tickloop - Fixed-Tick Action Scheduler
//!
//! Runs many small repeating actions at a fixed frame rate on a few
//! dedicated looper threads.
//!
//! ## Features
//!
//! - **Loopers**: one OS thread per looper, ticking at a target frame rate
//! - **Actions**: sync or async callbacks invoked once per frame until they return `false`
//! - **Per-action pacing**: an action may run at a lower rate than its looper
//! - **Coroutines**: multi-frame sequences with frame and duration delays
//! - **Pools**: N loopers behind a balancer, plus a process-wide shared pool
//! - **Manual loopers**: deterministic ticking for tests
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use tickloop::prelude::*;
//!
//! fn main() -> LooperResult<()> {
//!     let looper = Looper::new(60.0)?;
//!
//!     // Runs once per frame until it returns false
//!     let done = looper.register_with_state(0u32, |ctx: &ActionContext, n: &mut u32| {
//!         *n += 1;
//!         println!("frame {} ({:?} since last)", ctx.current_frame(), ctx.elapsed());
//!         *n < 10
//!     })?;
//!
//!     assert!(done.wait()?);
//!     looper.shutdown_and_wait(Duration::ZERO)
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        register(), run_coroutine(), Completion::wait()      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LooperPool + Balancer                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Looper   │      │  Looper   │      │  Looper   │
//!    │  Thread   │      │  Thread   │      │  Thread   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │
//!          ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │   Dispatcher: pending queue  →  action table (compact)  │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Re-export core types
pub use tickloop_core::{
    ActionError,
    ActionOptions,
    BoxError,
    CancellationToken,
    Completion,
    CoroutineStatus,
    LooperError,
    LooperId,
    LooperResult,
};

// Re-export kprint macros for debug logging
pub use tickloop_core::{kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use tickloop_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use tickloop_core::{env_get, env_get_bool, env_get_opt, env_get_str};

// Re-export runtime types
pub use tickloop_runtime::{
    ActionContext,
    ActionOutcome,
    ConfigError,
    Continuation,
    Coroutine,
    CoroutineContext,
    CoroutineResult,
    DefaultLooperFactory,
    LogicLooper,
    LogicLooperPool,
    Looper,
    LooperAction,
    LooperConfig,
    LooperExt,
    LooperFactory,
    LooperPool,
    LooperPoolBalancer,
    LooperPoolExt,
    LooperStats,
    ManualLooper,
    ManualLooperPool,
    PoolStats,
    PooledLooper,
    RoundRobinBalancer,
    SleepMode,
    Step,
};
pub use tickloop_runtime::tracker;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::{
        ActionContext, ActionOptions, Completion, Coroutine, CoroutineContext, CoroutineResult,
        LogicLooper, LogicLooperPool, Looper, LooperError, LooperExt, LooperPool, LooperPoolExt,
        LooperResult, ManualLooper, Step,
    };
}

/// Initialize the shared pool from the environment
///
/// Reads `TICKLOOP_*` variables through [`LooperConfig::from_env`] and
/// starts `pool_size` loopers at `target_frame_rate`.
pub fn init() -> LooperResult<&'static LooperPool> {
    init_logging();
    let config = LooperConfig::from_env();
    config.validate()?;
    LooperPool::initialize_shared(config.target_frame_rate, config.pool_size, None, None)
}

/// Initialize the shared pool with an explicit rate and looper count
///
/// `count == 0` means available parallelism minus one.
pub fn initialize_shared(target_frame_rate: f64, count: usize) -> LooperResult<&'static LooperPool> {
    LooperPool::initialize_shared(target_frame_rate, count, None, None)
}

/// The shared pool, or `NotInitialized`
#[inline]
pub fn shared_pool() -> LooperResult<&'static LooperPool> {
    LooperPool::shared()
}

/// Register an action on the shared pool
///
/// # Example
///
/// ```ignore
/// tickloop::init()?;
/// let done = tickloop::register(|ctx: &tickloop::ActionContext| ctx.current_frame() < 60)?;
/// done.wait()?;
/// ```
pub fn register<F, R>(f: F) -> LooperResult<Completion<bool>>
where
    F: FnMut(&ActionContext) -> R + Send + 'static,
    R: ActionOutcome,
{
    shared_pool()?.register(f)
}

/// Register a stateful action on the shared pool
pub fn register_with_state<S, F, R>(state: S, f: F) -> LooperResult<Completion<bool>>
where
    S: Send + 'static,
    F: FnMut(&ActionContext, &mut S) -> R + Send + 'static,
    R: ActionOutcome,
{
    shared_pool()?.register_with_state(state, f)
}

/// Register an async action on the shared pool
pub fn register_async<F, Fut, R>(f: F) -> LooperResult<Completion<bool>>
where
    F: FnMut(ActionContext) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: ActionOutcome + 'static,
{
    shared_pool()?.register_async(f)
}

/// Shut the shared pool down and wait for every looper to exit
pub fn shutdown_shared(grace: Duration) -> LooperResult<()> {
    shared_pool()?.shutdown_and_wait(grace)
}

/// Looper running the current thread's tick, if any
#[inline]
pub fn current_looper() -> Option<Arc<dyn LogicLooper>> {
    tickloop_runtime::current_looper()
}

/// Id of the looper running the current tick
///
/// Returns `LooperId::NONE` outside a tick.
#[inline]
pub fn current_looper_id() -> LooperId {
    tickloop_runtime::current_looper_id()
}

/// Check if currently executing inside a looper tick
#[inline]
pub fn is_in_looper() -> bool {
    tickloop_runtime::is_in_looper()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_pool_entry_points() {
        assert!(matches!(register(|_: &ActionContext| false), Err(LooperError::NotInitialized)));

        initialize_shared(60.0, 1).unwrap();
        assert!(matches!(initialize_shared(60.0, 1), Err(LooperError::AlreadyInitialized)));
        assert!(matches!(init(), Err(LooperError::AlreadyInitialized)));

        let done = register_with_state(0u32, |ctx: &ActionContext, n: &mut u32| {
            assert!(is_in_looper());
            assert_eq!(current_looper_id(), ctx.looper().id());
            *n += 1;
            *n < 3
        })
        .unwrap();
        assert!(matches!(done.wait_timeout(Duration::from_secs(30)), Ok(true)));
        assert!(!is_in_looper());
        assert_eq!(current_looper_id(), LooperId::NONE);

        shutdown_shared(Duration::ZERO).unwrap();
        assert!(matches!(register(|_: &ActionContext| false), Err(LooperError::ShutDown)));
    }
}
