//! Looper identifier type

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Process-wide sequence for threaded looper ids (first id handed out is 1)
static LOOPER_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Unique identifier for a looper
///
/// Threaded loopers draw their id from a monotonic process-wide counter
/// starting at 1. Id 0 is reserved for manually ticked loopers and
/// `u32::MAX` is the "no looper" sentinel used by thread-local context.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct LooperId(u32);

impl LooperId {
    /// Sentinel value indicating no looper
    pub const NONE: LooperId = LooperId(u32::MAX);

    /// Id shared by every manually ticked looper
    pub const MANUAL: LooperId = LooperId(0);

    /// Allocate the next id from the process-wide sequence
    #[inline]
    pub fn next() -> Self {
        LooperId(LOOPER_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Create a LooperId from a raw value
    #[inline]
    pub const fn new(id: u32) -> Self {
        LooperId(id)
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<LooperId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for LooperId {
    #[inline]
    fn from(id: u32) -> Self {
        LooperId(id)
    }
}

impl From<LooperId> for u32 {
    #[inline]
    fn from(id: LooperId) -> Self {
        id.0
    }
}

impl fmt::Debug for LooperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "LooperId(NONE)")
        } else {
            write!(f, "LooperId({})", self.0)
        }
    }
}

impl fmt::Display for LooperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for LooperId {
    fn default() -> Self {
        LooperId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_monotonic_and_nonzero() {
        let a = LooperId::next();
        let b = LooperId::next();
        assert!(a.as_u32() >= 1);
        assert!(b > a);
        assert_ne!(a, LooperId::MANUAL);
    }

    #[test]
    fn test_none_sentinel() {
        assert!(LooperId::NONE.is_none());
        assert_eq!(LooperId::NONE.to_option(), None);
        assert_eq!(LooperId::MANUAL.to_option(), Some(LooperId::MANUAL));
        assert_eq!(LooperId::default(), LooperId::NONE);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LooperId::new(7)), "7");
        assert_eq!(format!("{}", LooperId::NONE), "none");
        assert_eq!(format!("{:?}", LooperId::new(3)), "LooperId(3)");
    }
}
