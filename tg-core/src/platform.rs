//! Startup platform binding
//!
//! Resolves which sensor the governor follows and which topology it runs on.
//! Any failure here is fatal: the daemon refuses to start rather than govern
//! an unknown machine.

use std::path::{Path, PathBuf};

use crate::constants::paths;
use crate::error::{GovernorError, Result};
use crate::hw::{sysfs, SysfsCoreControl, SysfsFrequencyControl, ThermalZoneSensor};
use crate::ports::TemperatureSensor;
use crate::settings::Settings;
use crate::topology::Topology;

/// Resolved startup parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformBinding {
    pub sensor_id: u32,
    pub topology: Topology,
    pub sysfs_root: PathBuf,
}

impl PlatformBinding {
    /// Bind to the platform described by `settings`
    ///
    /// `sensor_override` (from the command line) wins over the settings file.
    pub fn resolve(settings: &Settings, sensor_override: Option<u32>) -> Result<Self> {
        let sysfs_root = settings.sysfs_root();

        let sensor_id = sensor_override
            .or(settings.sensor_id)
            .ok_or_else(|| GovernorError::binding("no sensor id configured"))?;

        let sensor = ThermalZoneSensor::new(&sysfs_root, sensor_id);
        let first_reading = sensor.read_temperature().map_err(|e| {
            GovernorError::binding(format!("sensor {} unusable: {}", sensor_id, e))
        })?;

        let topology = match settings.topology {
            Some(topology) => topology,
            None => detect_topology(&sysfs_root)?,
        };

        tracing::info!(
            sensor_id,
            temp = first_reading,
            topology = %topology,
            sysfs = %sysfs_root.display(),
            "Platform bound"
        );

        Ok(Self {
            sensor_id,
            topology,
            sysfs_root,
        })
    }

    pub fn sensor(&self) -> ThermalZoneSensor {
        ThermalZoneSensor::new(&self.sysfs_root, self.sensor_id)
    }

    pub fn core_control(&self) -> SysfsCoreControl {
        SysfsCoreControl::new(&self.sysfs_root)
    }

    pub fn frequency_control(&self) -> SysfsFrequencyControl {
        SysfsFrequencyControl::new(&self.sysfs_root, self.topology)
    }
}

/// Topology from the number of possible CPUs
pub fn detect_topology(sysfs_root: &Path) -> Result<Topology> {
    let possible = sysfs_root.join(paths::CPU_DIR).join(paths::CPU_POSSIBLE_FILE);
    let list = sysfs::read_attr(&possible)
        .map_err(|e| GovernorError::binding(format!("cannot read CPU list: {}", e)))?;
    let cpus = sysfs::parse_cpu_list(&list)
        .map_err(|e| GovernorError::binding(format!("cannot parse CPU list: {}", e)))?;

    Topology::from_core_count(cpus.len()).ok_or_else(|| {
        GovernorError::binding(format!(
            "unsupported topology: {} possible CPUs ({})",
            cpus.len(),
            list
        ))
    })
}
