//! Frequency ceilings through cpufreq `scaling_max_freq`
//!
//! Each online core's policy ceiling is recomputed as
//! `min(cpuinfo_max_freq, cap)`. Other agents on the system may rewrite
//! `scaling_max_freq` at any time; [`FrequencyControl::enforce`] pulls such
//! policies back under the installed constraint.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::{paths, sysfs as attr};
use crate::error::{GovernorError, Result};
use crate::hw::{cpu, sysfs};
use crate::ports::{CapConstraint, FrequencyControl};
use crate::topology::{CoreIndex, Topology};

/// Frequency control backed by `<sysfs>/devices/system/cpu/cpuN/cpufreq`
#[derive(Debug)]
pub struct SysfsFrequencyControl {
    cpu_dir: PathBuf,
    cores: Vec<CoreIndex>,
    constraint: RwLock<Option<Arc<CapConstraint>>>,
}

impl SysfsFrequencyControl {
    pub fn new(sysfs_root: &Path, topology: Topology) -> Self {
        Self {
            cpu_dir: sysfs_root.join(paths::CPU_DIR),
            cores: topology.cores().collect(),
            constraint: RwLock::new(None),
        }
    }

    fn policy_attr(&self, core: CoreIndex, name: &str) -> PathBuf {
        cpu::core_dir(&self.cpu_dir, core)
            .join(attr::CPUFREQ_DIR)
            .join(name)
    }

    fn clamp(&self, requested_khz: u32) -> u32 {
        match self.constraint.read().as_ref() {
            Some(constraint) => constraint.clamp(requested_khz),
            None => requested_khz,
        }
    }

    fn online_cores(&self) -> impl Iterator<Item = CoreIndex> + '_ {
        self.cores
            .iter()
            .copied()
            .filter(|&core| cpu::read_online(&self.cpu_dir, core).unwrap_or(false))
    }

    /// Recompute a single core's ceiling against the constraint
    pub fn recompute_policy(&self, core: CoreIndex) -> Result<u32> {
        let hw_max = sysfs::read_khz(&self.policy_attr(core, attr::CPUINFO_MAX_FREQ))
            .map_err(|e| GovernorError::frequency(core, e.to_string()))?;
        let ceiling = self.clamp(hw_max);
        sysfs::write_attr(&self.policy_attr(core, attr::SCALING_MAX_FREQ), ceiling)
            .map_err(|e| GovernorError::frequency(core, e.to_string()))?;
        Ok(ceiling)
    }
}

impl FrequencyControl for SysfsFrequencyControl {
    fn hardware_max_khz(&self) -> Result<u32> {
        self.cores
            .iter()
            .filter_map(|&core| sysfs::read_khz(&self.policy_attr(core, attr::CPUINFO_MAX_FREQ)).ok())
            .max()
            .ok_or_else(|| GovernorError::frequency(0, "no readable cpuinfo_max_freq"))
    }

    fn install_constraint(&self, constraint: Arc<CapConstraint>) {
        *self.constraint.write() = Some(constraint);
    }

    fn recompute_policies(&self) -> Result<()> {
        let mut first_error = None;
        for core in self.online_cores() {
            match self.recompute_policy(core) {
                Ok(ceiling) => tracing::debug!(core, ceiling, "Policy ceiling updated"),
                Err(e) => {
                    tracing::warn!(core, error = %e, "Policy update failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn enforce(&self) -> Result<usize> {
        let mut corrected = 0;
        for core in self.online_cores() {
            let path = self.policy_attr(core, attr::SCALING_MAX_FREQ);
            let current = match sysfs::read_khz(&path) {
                Ok(khz) => khz,
                Err(_) => continue,
            };
            let limit = self.clamp(current);
            if limit < current {
                sysfs::write_attr(&path, limit)
                    .map_err(|e| GovernorError::frequency(core, e.to_string()))?;
                tracing::info!(core, from = current, to = limit, "Pulled policy back under cap");
                corrected += 1;
            }
        }
        Ok(corrected)
    }
}
