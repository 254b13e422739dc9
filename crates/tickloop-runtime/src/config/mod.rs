//! Looper configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use tickloop_runtime::config::LooperConfig;
//!
//! // Defaults with env overrides
//! let config = LooperConfig::from_env();
//!
//! // Or customize programmatically
//! let config = LooperConfig::new()
//!     .target_frame_rate(30.0)
//!     .pool_size(4);
//! ```

pub mod defaults;

use std::time::Duration;

use tickloop_core::env::{env_get, env_get_bool, env_get_str};
use tickloop_core::{kwarn, LooperError};

use crate::sleep::SleepMode;

/// Looper and pool configuration with builder pattern
#[derive(Debug, Clone)]
pub struct LooperConfig {
    /// Target frames per second
    pub target_frame_rate: f64,
    /// Action slots allocated when a looper starts
    pub initial_capacity: usize,
    /// Loopers created by [`LooperPool::from_config`](crate::pool::LooperPool::from_config)
    pub pool_size: usize,
    /// How the loop thread waits out the rest of a frame
    pub sleep_mode: SleepMode,
    /// Log frame overruns at warn level
    pub warn_on_overrun: bool,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LooperConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `TICKLOOP_TARGET_FPS` - Target frames per second
    /// - `TICKLOOP_INITIAL_CAPACITY` - Initial action slots per looper
    /// - `TICKLOOP_POOL_SIZE` - Loopers per pool
    /// - `TICKLOOP_SLEEP` - `precise` or `thread`
    /// - `TICKLOOP_WARN_OVERRUN` - Warn when a frame overruns its budget (0/1)
    pub fn from_env() -> Self {
        let sleep_name = env_get_str("TICKLOOP_SLEEP", defaults::SLEEP_MODE);
        let sleep_mode = sleep_name.parse().unwrap_or_else(|_| {
            kwarn!("unknown TICKLOOP_SLEEP value {:?}, using precise", sleep_name);
            SleepMode::Precise
        });

        Self {
            target_frame_rate: env_get("TICKLOOP_TARGET_FPS", defaults::TARGET_FRAME_RATE),
            initial_capacity: env_get("TICKLOOP_INITIAL_CAPACITY", defaults::INITIAL_CAPACITY),
            pool_size: env_get("TICKLOOP_POOL_SIZE", defaults::pool_size()),
            sleep_mode,
            warn_on_overrun: env_get_bool("TICKLOOP_WARN_OVERRUN", defaults::WARN_ON_OVERRUN),
        }
    }

    /// Create config with library defaults only (no env override)
    pub fn new() -> Self {
        Self {
            target_frame_rate: defaults::TARGET_FRAME_RATE,
            initial_capacity: defaults::INITIAL_CAPACITY,
            pool_size: defaults::pool_size(),
            sleep_mode: SleepMode::Precise,
            warn_on_overrun: defaults::WARN_ON_OVERRUN,
        }
    }

    // Builder methods

    pub fn target_frame_rate(mut self, fps: f64) -> Self {
        self.target_frame_rate = fps;
        self
    }

    /// Set the frame rate from a frame period
    pub fn frame_time(mut self, period: Duration) -> Self {
        self.target_frame_rate = if period.is_zero() {
            0.0
        } else {
            1.0 / period.as_secs_f64()
        };
        self
    }

    pub fn initial_capacity(mut self, cap: usize) -> Self {
        self.initial_capacity = cap;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn sleep_mode(mut self, mode: SleepMode) -> Self {
        self.sleep_mode = mode;
        self
    }

    pub fn warn_on_overrun(mut self, enable: bool) -> Self {
        self.warn_on_overrun = enable;
        self
    }

    /// Target period of one frame
    ///
    /// Only meaningful for a validated config.
    pub fn target_frame_time(&self) -> Duration {
        frame_time_of(self.target_frame_rate)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_frame_rate.is_finite() || self.target_frame_rate <= 0.0 {
            return Err(ConfigError::InvalidValue("target_frame_rate must be positive and finite"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue("pool_size must be > 0"));
        }
        if self.pool_size > defaults::MAX_POOL_SIZE {
            return Err(ConfigError::InvalidValue("pool_size must be <= 1024"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("tickloop configuration:");
        eprintln!("  target_frame_rate:  {}", self.target_frame_rate);
        eprintln!("  target_frame_time:  {:?}", self.target_frame_time());
        eprintln!("  initial_capacity:   {}", self.initial_capacity);
        eprintln!("  pool_size:          {}", self.pool_size);
        eprintln!("  sleep_mode:         {}", self.sleep_mode);
        eprintln!("  warn_on_overrun:    {}", self.warn_on_overrun);
    }
}

/// Frame period for a positive, finite frame rate
pub(crate) fn frame_time_of(rate: f64) -> Duration {
    Duration::from_nanos((1e9 / rate).round() as u64)
}

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for LooperError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => LooperError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = LooperConfig::new();
        assert_eq!(config.target_frame_rate, 60.0);
        assert_eq!(config.initial_capacity, 16);
        assert!(config.pool_size >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LooperConfig::new()
            .frame_time(Duration::from_millis(20))
            .pool_size(3)
            .sleep_mode(SleepMode::Thread)
            .warn_on_overrun(true);

        assert!((config.target_frame_rate - 50.0).abs() < 1e-9);
        assert_eq!(config.target_frame_time(), Duration::from_millis(20));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.sleep_mode, SleepMode::Thread);
        assert!(config.warn_on_overrun);
    }

    #[test]
    fn test_validation() {
        assert!(LooperConfig::new().target_frame_rate(0.0).validate().is_err());
        assert!(LooperConfig::new().target_frame_rate(f64::INFINITY).validate().is_err());
        assert!(LooperConfig::new().pool_size(0).validate().is_err());

        let e: LooperError = LooperConfig::new().pool_size(0).validate().unwrap_err().into();
        assert!(matches!(e, LooperError::InvalidConfig("pool_size must be > 0")));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TICKLOOP_TARGET_FPS", "30");
        std::env::set_var("TICKLOOP_SLEEP", "thread");
        let config = LooperConfig::from_env();
        std::env::remove_var("TICKLOOP_TARGET_FPS");
        std::env::remove_var("TICKLOOP_SLEEP");

        assert_eq!(config.target_frame_rate, 30.0);
        assert_eq!(config.sleep_mode, SleepMode::Thread);
    }

    #[test]
    fn test_frame_time_rounding() {
        assert_eq!(frame_time_of(60.0), Duration::from_nanos(16_666_667));
        assert_eq!(frame_time_of(10.0), Duration::from_millis(100));
    }
}
