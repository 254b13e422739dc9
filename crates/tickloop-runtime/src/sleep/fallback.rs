//! Portable sleep over `std::thread::sleep`

use super::PreciseSleep;
use std::time::Duration;

/// `std::thread::sleep` based sleeper
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl ThreadSleep {
    pub fn new() -> Self {
        Self
    }
}

impl PreciseSleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
