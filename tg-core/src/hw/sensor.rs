//! Thermal zone temperature sensor
//!
//! Thermal zones report either whole degrees or millidegrees Celsius
//! depending on the driver. Readings above 1000 are treated as millidegrees.

use std::path::{Path, PathBuf};

use crate::constants::{paths, sysfs as attr};
use crate::error::{GovernorError, Result};
use crate::hw::sysfs;
use crate::ports::TemperatureSensor;
use crate::topology::Temperature;

/// Sensor backed by `<sysfs>/class/thermal/thermal_zone<id>/temp`
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    sensor_id: u32,
    temp_path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(sysfs_root: &Path, sensor_id: u32) -> Self {
        let temp_path = sysfs_root
            .join(paths::THERMAL_DIR)
            .join(format!("thermal_zone{}", sensor_id))
            .join(attr::ZONE_TEMP);
        Self { sensor_id, temp_path }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

/// Normalize a raw zone reading to whole degrees
pub fn normalize_reading(raw: i64) -> Temperature {
    let celsius = if raw.abs() > attr::MILLIDEGREE_CUTOFF {
        raw / 1000
    } else {
        raw
    };
    celsius.clamp(i64::from(Temperature::MIN), i64::from(Temperature::MAX)) as Temperature
}

impl TemperatureSensor for ThermalZoneSensor {
    fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    fn read_temperature(&self) -> Result<Temperature> {
        let raw = sysfs::read_int(&self.temp_path)
            .map_err(|e| GovernorError::sensor(self.sensor_id, e.to_string()))?;
        Ok(normalize_reading(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn zone(root: &Path, id: u32, content: &str) {
        let dir = root.join(paths::THERMAL_DIR).join(format!("thermal_zone{}", id));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(attr::ZONE_TEMP), content).unwrap();
    }

    #[test]
    fn test_reads_millidegrees() {
        let root = tempdir().unwrap();
        zone(root.path(), 5, "61500\n");
        let sensor = ThermalZoneSensor::new(root.path(), 5);
        assert_eq!(sensor.read_temperature().unwrap(), 61);
        assert_eq!(sensor.sensor_id(), 5);
    }

    #[test]
    fn test_reads_whole_degrees() {
        let root = tempdir().unwrap();
        zone(root.path(), 0, "47\n");
        assert_eq!(ThermalZoneSensor::new(root.path(), 0).read_temperature().unwrap(), 47);
    }

    #[test]
    fn test_missing_zone_is_sensor_error() {
        let root = tempdir().unwrap();
        match ThermalZoneSensor::new(root.path(), 9).read_temperature() {
            Err(GovernorError::Sensor { sensor_id, .. }) => assert_eq!(sensor_id, 9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_normalize_reading() {
        assert_eq!(normalize_reading(1000), 1000);
        assert_eq!(normalize_reading(1001), 1);
        assert_eq!(normalize_reading(-5000), -5);
        assert_eq!(normalize_reading(85), 85);
    }
}
