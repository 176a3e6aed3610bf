//! CPU hotplug through `cpuN/online`

use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::constants::{paths, sysfs as attr};
use crate::error::{GovernorError, Result};
use crate::hw::sysfs;
use crate::ports::CoreControl;
use crate::topology::CoreIndex;

/// Serializes every hotplug transition made by this process
static HOTPLUG_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Directory of a single core
pub fn core_dir(cpu_dir: &Path, core: CoreIndex) -> PathBuf {
    cpu_dir.join(format!("cpu{}", core))
}

/// Online state read straight from sysfs
///
/// Cores without an `online` attribute cannot be hotplugged and are always up.
pub fn read_online(cpu_dir: &Path, core: CoreIndex) -> Result<bool> {
    let dir = core_dir(cpu_dir, core);
    let online = dir.join(attr::ONLINE);
    if !online.exists() {
        if dir.exists() {
            return Ok(true);
        }
        return Err(GovernorError::hotplug(core, "no such core"));
    }

    match sysfs::read_attr(&online)?.as_str() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(GovernorError::hotplug(
            core,
            format!("unexpected online state '{}'", other),
        )),
    }
}

/// Core control backed by `<sysfs>/devices/system/cpu`
#[derive(Debug, Clone)]
pub struct SysfsCoreControl {
    cpu_dir: PathBuf,
}

impl SysfsCoreControl {
    pub fn new(sysfs_root: &Path) -> Self {
        Self {
            cpu_dir: sysfs_root.join(paths::CPU_DIR),
        }
    }

    pub fn cpu_dir(&self) -> &Path {
        &self.cpu_dir
    }
}

impl CoreControl for SysfsCoreControl {
    fn is_online(&self, core: CoreIndex) -> Result<bool> {
        read_online(&self.cpu_dir, core)
    }

    fn set_online(&self, core: CoreIndex, online: bool) -> Result<()> {
        let _guard = HOTPLUG_LOCK.lock();

        if read_online(&self.cpu_dir, core)? == online {
            return Ok(());
        }

        let path = core_dir(&self.cpu_dir, core).join(attr::ONLINE);
        if !path.exists() {
            return Err(GovernorError::hotplug(core, "core is not hotpluggable"));
        }

        sysfs::write_attr(&path, u8::from(online))
            .map_err(|e| GovernorError::hotplug(core, e.to_string()))?;
        tracing::debug!(core, online, "Core state changed");
        Ok(())
    }
}
