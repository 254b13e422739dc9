//! Linux absolute-deadline sleep
//!
//! Reads CLOCK_MONOTONIC once, computes the wake-up deadline and sleeps with
//! `clock_nanosleep(TIMER_ABSTIME)`. A signal interrupting the sleep restarts
//! it against the same deadline, so interruptions never stretch the frame.

use super::PreciseSleep;
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// `clock_nanosleep` based sleeper
#[derive(Debug, Default, Clone, Copy)]
pub struct NanoSleep;

impl NanoSleep {
    pub fn new() -> Self {
        Self
    }
}

fn monotonic_now() -> Option<libc::timespec> {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `now` is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    if rc == 0 {
        Some(now)
    } else {
        None
    }
}

fn deadline_after(now: libc::timespec, duration: Duration) -> libc::timespec {
    let mut sec = now.tv_sec as i64 + duration.as_secs() as i64;
    let mut nsec = now.tv_nsec as i64 + duration.subsec_nanos() as i64;
    if nsec >= NANOS_PER_SEC {
        sec += 1;
        nsec -= NANOS_PER_SEC;
    }
    libc::timespec {
        tv_sec: sec as libc::time_t,
        tv_nsec: nsec as libc::c_long,
    }
}

impl PreciseSleep for NanoSleep {
    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }

        let Some(now) = monotonic_now() else {
            std::thread::sleep(duration);
            return;
        };
        let deadline = deadline_after(now, duration);

        loop {
            // SAFETY: `deadline` outlives the call; remaining time is unused
            // with TIMER_ABSTIME so a null pointer is allowed.
            let rc = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &deadline,
                    std::ptr::null_mut(),
                )
            };
            // Returns the error number directly rather than setting errno
            if rc != libc::EINTR {
                break;
            }
        }
    }
}
