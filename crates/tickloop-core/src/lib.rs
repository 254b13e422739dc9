//! # tickloop-core
//!
//! Core types for the tickloop fixed-tick scheduler.
//!
//! This crate is platform-agnostic and has no dependencies outside std.
//! Threads, action tables and pools live in `tickloop-runtime`.
//!
//! ## Modules
//!
//! - `id` - Looper identifier type
//! - `state` - Coroutine status
//! - `options` - Per-registration options
//! - `completion` - One-shot completion handles
//! - `cancel` - Cancellation token for cooperative shutdown
//! - `error` - Error types
//! - `spinlock` - Internal spinlock primitive
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod options;
pub mod completion;
pub mod cancel;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

pub use id::LooperId;
pub use state::CoroutineStatus;
pub use options::ActionOptions;
pub use completion::Completion;
pub use cancel::CancellationToken;
pub use error::{ActionError, BoxError, LooperError, LooperResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
