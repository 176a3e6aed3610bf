//! Hardware interaction modules
//!
//! Sysfs-backed implementations of the governor ports.

pub mod cpu;
mod cpufreq;
mod sensor;
pub mod sysfs;

pub use cpu::SysfsCoreControl;
pub use cpufreq::SysfsFrequencyControl;
pub use sensor::{normalize_reading, ThermalZoneSensor};
