//! Persisted daemon settings
//!
//! Stored as pretty JSON at `/etc/thermgov/settings.json`. Every field has a
//! serde default, so a missing file or a partial one still yields a usable
//! configuration. Writes are atomic (temp file + rename).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{paths, throttle, timing};
use crate::error::{GovernorError, Result};
use crate::state::Tunables;
use crate::topology::{Temperature, Topology};

/// SoC family, selects the default warm frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocProfile {
    #[default]
    Generic,
    Msm8916,
}

impl SocProfile {
    pub fn default_warm_freq_khz(self) -> u32 {
        match self {
            SocProfile::Generic => throttle::DEFAULT_WARM_FREQ_KHZ,
            SocProfile::Msm8916 => throttle::MSM8916_WARM_FREQ_KHZ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Thermal zone the governor follows; required at startup
    #[serde(default)]
    pub sensor_id: Option<u32>,

    /// Override for the detected topology
    #[serde(default)]
    pub topology: Option<Topology>,

    #[serde(default)]
    pub soc: SocProfile,

    /// Override for the SoC default warm frequency (kHz)
    #[serde(default)]
    pub warm_frequency_khz: Option<u32>,

    #[serde(default = "default_threshold")]
    pub threshold: Temperature,

    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: Temperature,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// None falls back to the topology default
    #[serde(default)]
    pub hotplug_enabled: Option<bool>,

    #[serde(default)]
    pub core0_permission: bool,

    /// Alternative sysfs root for chroots and tests
    #[serde(default)]
    pub sysfs_root: Option<PathBuf>,
}

fn default_threshold() -> Temperature { throttle::DEFAULT_THRESHOLD }
fn default_hysteresis_margin() -> Temperature { throttle::DEFAULT_HYSTERESIS_MARGIN }
fn default_poll_interval() -> u64 { timing::DEFAULT_POLL_INTERVAL_MS }

impl Default for Settings {
    fn default() -> Self {
        Self {
            sensor_id: None,
            topology: None,
            soc: SocProfile::default(),
            warm_frequency_khz: None,
            threshold: default_threshold(),
            hysteresis_margin: default_hysteresis_margin(),
            poll_interval_ms: default_poll_interval(),
            hotplug_enabled: None,
            core0_permission: false,
            sysfs_root: None,
        }
    }
}

impl Settings {
    /// Warm frequency in effect for this run
    pub fn warm_freq_khz(&self) -> u32 {
        self.warm_frequency_khz
            .unwrap_or_else(|| self.soc.default_warm_freq_khz())
    }

    pub fn sysfs_root(&self) -> PathBuf {
        self.sysfs_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(paths::SYSFS_ROOT))
    }

    /// Initial tunables once the topology is known
    pub fn initial_tunables(&self, topology: Topology) -> Tunables {
        Tunables {
            hotplug_enabled: self
                .hotplug_enabled
                .unwrap_or_else(|| topology.default_hotplug_enabled()),
            core0_permission: self.core0_permission,
            threshold: self.threshold,
        }
    }

    /// Check every numeric field
    ///
    /// Out-of-range values are startup errors; nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        tg_protocol::validate_threshold(self.threshold)
            .map_err(|reason| GovernorError::binding(format!("settings threshold {}: {}", self.threshold, reason)))?;

        if self.hysteresis_margin < 0 || self.hysteresis_margin >= self.threshold {
            return Err(GovernorError::binding(format!(
                "settings hysteresis_margin {} must be in [0, threshold)",
                self.hysteresis_margin
            )));
        }

        if !(timing::MIN_POLL_INTERVAL_MS..=timing::MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(GovernorError::binding(format!(
                "settings poll_interval_ms {} outside [{}, {}]",
                self.poll_interval_ms,
                timing::MIN_POLL_INTERVAL_MS,
                timing::MAX_POLL_INTERVAL_MS
            )));
        }

        if self.warm_frequency_khz == Some(0) {
            return Err(GovernorError::binding("settings warm_frequency_khz must be positive"));
        }

        Ok(())
    }
}

/// Load settings, returning defaults when the file does not exist
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| GovernorError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|e| {
        GovernorError::config(format!("Failed to parse {}: {}", path.display(), e))
    })
}
