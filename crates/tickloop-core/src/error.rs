//! Error types for the tickloop scheduler
//!
//! Two families live here:
//!
//! - [`LooperError`]: configuration and misuse errors returned synchronously,
//!   plus the `ActionFailed` wrapper used when a failure is delivered through
//!   a completion handle.
//! - [`ActionError`]: a captured failure raised by a callback or coroutine
//!   continuation. Cheap to clone so a single failure can be observed by every
//!   clone of a completion handle.

use core::fmt;
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error accepted from callbacks
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for looper operations
pub type LooperResult<T> = Result<T, LooperError>;

/// Errors that can occur in looper operations
#[derive(Debug, Clone)]
pub enum LooperError {
    /// Target frame rate or frame time is zero, negative or not finite
    InvalidFrameRate,

    /// Action asked for a frame-rate override above the looper's own rate
    FrameRateOverrideTooHigh {
        /// Override requested by the action
        requested: f64,
        /// Target frame rate of the looper
        limit: f64,
    },

    /// Frame-rate override is zero, negative or not finite
    InvalidFrameRateOverride,

    /// Pool created with zero loopers
    InvalidLooperCount,

    /// Coroutine asked to wait for zero frames
    InvalidDelayFrames,

    /// Looper thread has already left its loop
    ShutDown,

    /// A registered callback failed (returned an error or panicked)
    ActionFailed(ActionError),

    /// Coroutine result read before the coroutine finished
    CoroutineNotCompleted,

    /// Coroutine resumed or completed after reaching a terminal state
    CoroutineAlreadyCompleted,

    /// Operation not supported by this looper handle
    Unsupported(&'static str),

    /// Shared pool used before initialization
    NotInitialized,

    /// Shared pool initialized twice
    AlreadyInitialized,

    /// Failed to spawn the looper thread
    SpawnFailed,

    /// Waiting on a completion handle timed out
    Timeout,

    /// Configuration rejected by validation
    InvalidConfig(&'static str),
}

impl fmt::Display for LooperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LooperError::InvalidFrameRate => write!(f, "target frame rate must be positive and finite"),
            LooperError::FrameRateOverrideTooHigh { requested, limit } => write!(
                f,
                "frame rate override {} exceeds looper target frame rate {}",
                requested, limit
            ),
            LooperError::InvalidFrameRateOverride => {
                write!(f, "frame rate override must be positive and finite")
            }
            LooperError::InvalidLooperCount => write!(f, "looper count must be more than zero"),
            LooperError::InvalidDelayFrames => write!(f, "delay must be at least one frame"),
            LooperError::ShutDown => write!(f, "looper has shut down"),
            LooperError::ActionFailed(e) => write!(f, "action failed: {}", e),
            LooperError::CoroutineNotCompleted => write!(f, "coroutine is not completed yet"),
            LooperError::CoroutineAlreadyCompleted => write!(f, "coroutine has already been completed"),
            LooperError::Unsupported(what) => write!(f, "unsupported operation: {}", what),
            LooperError::NotInitialized => write!(f, "shared looper pool is not initialized"),
            LooperError::AlreadyInitialized => write!(f, "shared looper pool is already initialized"),
            LooperError::SpawnFailed => write!(f, "failed to spawn looper thread"),
            LooperError::Timeout => write!(f, "operation timed out"),
            LooperError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl StdError for LooperError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            LooperError::ActionFailed(e) => e.source_error().map(|e| e as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}

impl From<ActionError> for LooperError {
    fn from(e: ActionError) -> Self {
        LooperError::ActionFailed(e)
    }
}

/// A failure captured from a callback
///
/// Built from any `std::error::Error`, from a plain message, or from a caught
/// panic payload. Deliberately does not implement `std::error::Error` itself
/// so the blanket `From` conversion stays coherent; wrap it in
/// [`LooperError::ActionFailed`] when an `Error` is needed.
#[derive(Clone)]
pub struct ActionError {
    inner: ActionErrorInner,
}

#[derive(Clone)]
enum ActionErrorInner {
    /// Error value returned by the callback
    Error(Arc<dyn StdError + Send + Sync + 'static>),
    /// Panic caught at the invocation boundary
    Panic(Arc<str>),
}

impl ActionError {
    /// Create an error from a message
    pub fn msg<M: fmt::Display>(message: M) -> Self {
        Self::from_boxed(message.to_string().into())
    }

    /// Create an error from an already boxed error
    pub fn from_boxed(error: BoxError) -> Self {
        Self {
            inner: ActionErrorInner::Error(Arc::from(error)),
        }
    }

    /// Create an error from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("callback panicked")
        };
        Self {
            inner: ActionErrorInner::Panic(message),
        }
    }

    /// Check whether this failure came from a panic
    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self.inner, ActionErrorInner::Panic(_))
    }

    /// Human readable message (panic message or error display)
    pub fn message(&self) -> String {
        match &self.inner {
            ActionErrorInner::Error(e) => e.to_string(),
            ActionErrorInner::Panic(msg) => msg.to_string(),
        }
    }

    /// Underlying error value, if the failure was not a panic
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match &self.inner {
            ActionErrorInner::Error(e) => Some(e.as_ref()),
            ActionErrorInner::Panic(_) => None,
        }
    }

    /// Attempt to downcast the underlying error to a concrete type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source_error().and_then(|e| e.downcast_ref::<E>())
    }
}

impl<E> From<E> for ActionError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::from_boxed(Box::new(error))
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ActionErrorInner::Error(e) => write!(f, "{}", e),
            ActionErrorInner::Panic(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

impl fmt::Debug for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ActionErrorInner::Error(e) => f.debug_tuple("ActionError").field(e).finish(),
            ActionErrorInner::Panic(msg) => f.debug_tuple("ActionError::Panic").field(msg).finish(),
        }
    }
}
