//! Frequency throttle with hysteresis
//!
//! Once the temperature rises above the threshold the frequency ceiling is
//! capped at the warm frequency. The cap is lifted only after the temperature
//! drops below `threshold - hysteresis_margin`, so readings inside the dead
//! band keep whatever state the throttle was in.

use serde::{Deserialize, Serialize};

use crate::constants::throttle as throttle_const;
use crate::topology::Temperature;

/// Ceiling imposed on every core's frequency policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyCap {
    /// No thermal ceiling, the hardware maximum applies
    Unrestricted,
    /// Ceiling in kHz
    Limited(u32),
}

impl FrequencyCap {
    pub fn is_limited(self) -> bool {
        matches!(self, FrequencyCap::Limited(_))
    }

    /// Cap value in kHz, `None` when unrestricted
    pub fn khz(self) -> Option<u32> {
        match self {
            FrequencyCap::Limited(khz) => Some(khz),
            FrequencyCap::Unrestricted => None,
        }
    }

    /// Clamp a requested ceiling to this cap
    pub fn clamp(self, requested_khz: u32) -> u32 {
        match self {
            FrequencyCap::Limited(khz) => requested_khz.min(khz),
            FrequencyCap::Unrestricted => requested_khz,
        }
    }
}

impl Default for FrequencyCap {
    fn default() -> Self {
        FrequencyCap::Unrestricted
    }
}

/// What the frequency port has to do after an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAction {
    ApplyCap(u32),
    LiftCap,
    NoChange,
}

/// Throttle state carried across ticks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleState {
    current_cap: FrequencyCap,
    throttling: bool,
    threshold: Temperature,
    hysteresis_margin: Temperature,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self::new(
            throttle_const::DEFAULT_THRESHOLD,
            throttle_const::DEFAULT_HYSTERESIS_MARGIN,
        )
    }
}

impl ThrottleState {
    pub fn new(threshold: Temperature, hysteresis_margin: Temperature) -> Self {
        Self {
            current_cap: FrequencyCap::Unrestricted,
            throttling: false,
            threshold,
            hysteresis_margin: hysteresis_margin.max(0),
        }
    }

    pub fn current_cap(&self) -> FrequencyCap {
        self.current_cap
    }

    pub fn is_throttling(&self) -> bool {
        self.throttling
    }

    pub fn threshold(&self) -> Temperature {
        self.threshold
    }

    pub fn hysteresis_margin(&self) -> Temperature {
        self.hysteresis_margin
    }

    /// Threshold changes take effect on the next evaluation
    pub fn set_threshold(&mut self, threshold: Temperature) {
        self.threshold = threshold;
    }

    /// Temperature below which an active cap is lifted
    pub fn release_point(&self) -> Temperature {
        self.threshold - self.hysteresis_margin
    }

    /// Compute the next throttle flag and action without committing them
    pub fn evaluate(&self, temp: Temperature, warm_freq_khz: u32) -> (bool, ThrottleAction) {
        if self.throttling && temp < self.release_point() {
            return (false, ThrottleAction::LiftCap);
        }

        if temp > self.threshold {
            let action = if self.current_cap == FrequencyCap::Limited(warm_freq_khz) {
                ThrottleAction::NoChange
            } else {
                ThrottleAction::ApplyCap(warm_freq_khz)
            };
            return (true, action);
        }

        (self.throttling, ThrottleAction::NoChange)
    }

    /// Evaluate and commit the result
    pub fn update(&mut self, temp: Temperature, warm_freq_khz: u32) -> ThrottleAction {
        let (throttling, action) = self.evaluate(temp, warm_freq_khz);
        self.throttling = throttling;
        match action {
            ThrottleAction::ApplyCap(khz) => self.current_cap = FrequencyCap::Limited(khz),
            ThrottleAction::LiftCap => self.current_cap = FrequencyCap::Unrestricted,
            ThrottleAction::NoChange => {}
        }
        action
    }
}
