//! Hardware ports used by the governor
//!
//! The governor never touches sysfs directly. It talks to a temperature
//! sensor, a core control port and a frequency control port; the sysfs
//! implementations live in [`crate::hw`] and in-memory ones in
//! `crate::testing`.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::engine::FrequencyCap;
use crate::error::{GovernorError, Result};
use crate::topology::{CoreIndex, Temperature, Topology};

/// Source of temperature readings for the bound sensor
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSensor: Send {
    fn sensor_id(&self) -> u32;

    /// Current reading in whole °C
    fn read_temperature(&self) -> Result<Temperature>;
}

/// Per-core online/offline control
///
/// Implementations must serialize their own transitions against any other
/// hotplug activity on the system.
#[cfg_attr(test, mockall::automock)]
pub trait CoreControl: Send + Sync {
    fn is_online(&self, core: CoreIndex) -> Result<bool>;

    /// Move `core` to the requested state; a no-op when already there
    fn set_online(&self, core: CoreIndex, online: bool) -> Result<()>;

    /// Bring every core of the topology online, returning the failures
    fn bring_all_online(&self, topology: Topology) -> Vec<(CoreIndex, GovernorError)> {
        topology
            .cores()
            .filter_map(|core| self.set_online(core, true).err().map(|e| (core, e)))
            .collect()
    }
}

/// Frequency ceiling control for every core policy
#[cfg_attr(test, mockall::automock)]
pub trait FrequencyControl: Send + Sync {
    /// Highest frequency the hardware supports, in kHz
    fn hardware_max_khz(&self) -> Result<u32>;

    /// Register the standing constraint every policy recompute must honour
    fn install_constraint(&self, constraint: Arc<CapConstraint>);

    /// Recompute the ceiling of every online core against the constraint
    fn recompute_policies(&self) -> Result<()>;

    /// Pull any policy that drifted above the constraint back under it,
    /// returning how many cores were corrected
    fn enforce(&self) -> Result<usize>;
}

/// Standing frequency constraint shared between the governor and the
/// frequency port
///
/// Any policy recompute, whether triggered by the governor or by something
/// else on the system, clamps its ceiling through [`CapConstraint::clamp`].
#[derive(Debug, Default)]
pub struct CapConstraint {
    cap: RwLock<FrequencyCap>,
}

impl CapConstraint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> FrequencyCap {
        *self.cap.read()
    }

    /// Replace the cap, returning whether it changed
    pub fn set(&self, cap: FrequencyCap) -> bool {
        let mut current = self.cap.write();
        if *current == cap {
            return false;
        }
        *current = cap;
        true
    }

    pub fn clamp(&self, requested_khz: u32) -> u32 {
        self.cap.read().clamp(requested_khz)
    }
}
