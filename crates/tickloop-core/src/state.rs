//! Coroutine status

use core::fmt;

/// Status of a frame-stepped coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineStatus {
    /// Created, body not run yet
    Created = 0,

    /// Body started; may be suspended waiting for frames
    Running = 1,

    /// Finished successfully
    RanToCompletion = 2,

    /// Body or a continuation failed
    Faulted = 3,
}

impl CoroutineStatus {
    /// Check if the coroutine reached a terminal state
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, CoroutineStatus::RanToCompletion | CoroutineStatus::Faulted)
    }

    #[inline]
    pub const fn is_completed_successfully(&self) -> bool {
        matches!(self, CoroutineStatus::RanToCompletion)
    }

    #[inline]
    pub const fn is_faulted(&self) -> bool {
        matches!(self, CoroutineStatus::Faulted)
    }
}

impl From<u8> for CoroutineStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => CoroutineStatus::Running,
            2 => CoroutineStatus::RanToCompletion,
            3 => CoroutineStatus::Faulted,
            _ => CoroutineStatus::Created,
        }
    }
}

impl From<CoroutineStatus> for u8 {
    fn from(status: CoroutineStatus) -> u8 {
        status as u8
    }
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoroutineStatus::Created => "created",
            CoroutineStatus::Running => "running",
            CoroutineStatus::RanToCompletion => "ran-to-completion",
            CoroutineStatus::Faulted => "faulted",
        };
        f.write_str(s)
    }
}
