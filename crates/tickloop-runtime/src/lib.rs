//! # tickloop-runtime
//!
//! Threaded runtime for the tickloop fixed-tick scheduler.
//!
//! This crate provides:
//! - Looper threads that run registered actions once per frame
//! - Manually ticked loopers for deterministic tests
//! - Frame coroutines driven by a looper
//! - Looper pools with pluggable balancing
//! - Precise frame sleeping (clock_nanosleep on Linux)

pub mod config;
pub mod sleep;
pub mod tls;
pub mod context;
pub mod action;
mod table;
mod dispatcher;
pub mod looper;
pub mod manual;
pub mod coroutine;
pub mod balancer;
pub mod tracker;
pub mod pool;

// Re-exports
pub use config::{ConfigError, LooperConfig};
pub use sleep::{new_sleeper, PreciseSleep, SleepMode};
pub use tls::{current_looper, current_looper_id, is_in_looper};
pub use context::ActionContext;
pub use action::{ActionOutcome, LooperAction};
pub use looper::{LogicLooper, Looper, LooperExt};
pub use manual::ManualLooper;
pub use coroutine::{Continuation, Coroutine, CoroutineContext, CoroutineResult, Step};
pub use balancer::{LooperPoolBalancer, RoundRobinBalancer};
pub use tracker::{LooperStats, PoolStats};
pub use pool::{
    DefaultLooperFactory, LogicLooperPool, LooperFactory, LooperPool, LooperPoolExt,
    ManualLooperPool, PooledLooper,
};
