//! Frame-budget sleeping
//!
//! The loop thread sleeps for whatever is left of the frame after running
//! its actions. Platform-specific implementations use the most accurate
//! primitive available; `std::thread::sleep` is the portable fallback.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sleep primitive used between frames
pub trait PreciseSleep: Send + Sync {
    /// Block the calling thread for about `duration`
    ///
    /// A zero duration returns immediately.
    fn sleep(&self, duration: Duration);
}

/// Which sleeper a looper uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepMode {
    /// Most accurate primitive available on this platform
    #[default]
    Precise,
    /// `std::thread::sleep`
    Thread,
}

impl FromStr for SleepMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "precise" => Ok(SleepMode::Precise),
            "thread" | "std" => Ok(SleepMode::Thread),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SleepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepMode::Precise => f.write_str("precise"),
            SleepMode::Thread => f.write_str("thread"),
        }
    }
}

mod fallback;
pub use fallback::ThreadSleep;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod nanosleep_linux;
        pub use nanosleep_linux::NanoSleep as PlatformSleep;
    } else {
        pub use fallback::ThreadSleep as PlatformSleep;
    }
}

/// Create a sleeper for `mode`
pub fn new_sleeper(mode: SleepMode) -> Box<dyn PreciseSleep> {
    match mode {
        SleepMode::Precise => Box::new(PlatformSleep::new()),
        SleepMode::Thread => Box::new(ThreadSleep::new()),
    }
}
