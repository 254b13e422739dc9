//! Per-registration options

use crate::error::{LooperError, LooperResult};

/// Options fixed at registration time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionOptions {
    /// Invoke the action at this rate instead of every frame
    ///
    /// Must be positive and no higher than the looper's own target frame
    /// rate.
    pub target_frame_rate_override: Option<f64>,
}

impl ActionOptions {
    /// No override: invoked every frame
    pub const DEFAULT: ActionOptions = ActionOptions {
        target_frame_rate_override: None,
    };

    /// Options with a frame-rate override
    pub const fn with_frame_rate(rate: f64) -> Self {
        Self {
            target_frame_rate_override: Some(rate),
        }
    }

    /// Check the options against a looper running at `looper_rate`
    pub fn validate(&self, looper_rate: f64) -> LooperResult<()> {
        if let Some(rate) = self.target_frame_rate_override {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(LooperError::InvalidFrameRateOverride);
            }
            if rate > looper_rate {
                return Err(LooperError::FrameRateOverrideTooHigh {
                    requested: rate,
                    limit: looper_rate,
                });
            }
        }
        Ok(())
    }
}
