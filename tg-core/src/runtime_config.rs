//! Operator-facing parameter surface
//!
//! Every getter and setter the daemon exposes over IPC lands here. Setters
//! validate before committing, so a rejected value always leaves the prior
//! one in place. Changes reach the governor on its next tick.

use std::sync::Arc;

use crate::error::{GovernorError, Result};
use crate::ports::CoreControl;
use crate::state::GovernorState;
use crate::topology::{CoreIndex, Temperature, Topology};

/// Result of a hotplug toggle store
#[derive(Debug)]
pub enum HotplugTransition {
    /// Requested value equals the current one, nothing done
    Unchanged,
    Enabled,
    /// Hotplug decisions stopped and every core was asked to come online
    Disabled { failures: Vec<(CoreIndex, GovernorError)> },
}

/// Parse an operator toggle (`1`/`0`, `on`/`off`, `true`/`false`)
///
/// Any non-zero integer counts as on.
pub fn parse_toggle(input: &str) -> Result<bool> {
    let value = input.trim();
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => return Ok(true),
        "off" | "false" | "no" => return Ok(false),
        _ => {}
    }
    value
        .parse::<i64>()
        .map(|n| n != 0)
        .map_err(|_| GovernorError::validation("hotplug_enabled", format!("not a toggle: '{}'", value)))
}

pub struct RuntimeConfig {
    topology: Topology,
    state: Arc<GovernorState>,
    cores: Arc<dyn CoreControl>,
    warm_freq_khz: u32,
}

impl RuntimeConfig {
    pub fn new(
        topology: Topology,
        state: Arc<GovernorState>,
        cores: Arc<dyn CoreControl>,
        warm_freq_khz: u32,
    ) -> Self {
        Self {
            topology,
            state,
            cores,
            warm_freq_khz,
        }
    }

    pub fn hotplug_enabled(&self) -> bool {
        self.state.snapshot().hotplug_enabled
    }

    /// Switch hotplug decisions on or off
    ///
    /// Switching off brings every core online exactly once, from the caller's
    /// context, while holding the hotplug section so no governor tick can
    /// interleave with the sweep.
    pub fn set_hotplug_enabled(&self, enabled: bool) -> HotplugTransition {
        let _section = self.state.hotplug_section();

        let previous = self.state.update(|t| t.hotplug_enabled = enabled);
        if previous.hotplug_enabled == enabled {
            return HotplugTransition::Unchanged;
        }

        if enabled {
            tracing::info!("Hotplug decisions enabled");
            return HotplugTransition::Enabled;
        }

        let failures = self.cores.bring_all_online(self.topology);
        for (core, error) in &failures {
            tracing::warn!(core, error = %error, "Core did not come back online");
        }
        tracing::info!(failed = failures.len(), "Hotplug decisions disabled, all cores brought online");
        HotplugTransition::Disabled { failures }
    }

    pub fn threshold(&self) -> Temperature {
        self.state.snapshot().threshold
    }

    pub fn set_threshold(&self, celsius: Temperature) -> Result<()> {
        tg_protocol::validate_threshold(celsius)
            .map_err(|reason| GovernorError::validation("threshold", reason))?;
        let previous = self.state.update(|t| t.threshold = celsius);
        if previous.threshold != celsius {
            tracing::info!(from = previous.threshold, to = celsius, "Throttle threshold changed");
        }
        Ok(())
    }

    pub fn warm_frequency(&self) -> u32 {
        self.warm_freq_khz
    }

    /// The warm frequency is fixed at startup; every write is rejected
    pub fn set_warm_frequency(&self, khz: u32) -> Result<()> {
        tracing::debug!(requested = khz, current = self.warm_freq_khz, "Rejected warm frequency write");
        Err(GovernorError::WarmFrequencyLocked)
    }

    pub fn core0_permission(&self) -> u8 {
        u8::from(self.state.snapshot().core0_permission)
    }

    pub fn set_core0_permission(&self, value: u8) -> Result<()> {
        tg_protocol::validate_core0_permission(value)
            .map_err(|reason| GovernorError::validation("core0_permission", reason))?;
        let granted = value == 1;
        let previous = self.state.update(|t| t.core0_permission = granted);
        if previous.core0_permission != granted {
            tracing::info!(granted, "Core 0 offline permission changed");
        }
        Ok(())
    }
}
