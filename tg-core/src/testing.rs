//! In-memory port implementations
//!
//! Used by unit tests and, through the `testing` feature, by the workspace
//! integration tests. They behave like the sysfs ports without touching the
//! filesystem and record every actuation for later inspection.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::engine::CoreAction;
use crate::error::{GovernorError, Result};
use crate::ports::{CapConstraint, CoreControl, FrequencyControl, TemperatureSensor};
use crate::topology::{CoreIndex, Temperature, Topology};

/// Sensor that replays scripted readings, then repeats the last value
pub struct FakeSensor {
    sensor_id: u32,
    script: Mutex<VecDeque<Option<Temperature>>>,
    last: Mutex<Option<Temperature>>,
}

impl FakeSensor {
    pub fn new(sensor_id: u32) -> Self {
        Self {
            sensor_id,
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
        }
    }

    /// Queue readings; `None` makes that read fail
    pub fn with_readings<I>(self, readings: I) -> Self
    where
        I: IntoIterator<Item = Option<Temperature>>,
    {
        self.script.lock().extend(readings);
        self
    }

    pub fn push(&self, reading: Option<Temperature>) {
        self.script.lock().push_back(reading);
    }
}

impl TemperatureSensor for FakeSensor {
    fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    fn read_temperature(&self) -> Result<Temperature> {
        let next = self.script.lock().pop_front();
        let reading = match next {
            Some(reading) => {
                *self.last.lock() = reading;
                reading
            }
            None => *self.last.lock(),
        };
        reading.ok_or_else(|| GovernorError::sensor(self.sensor_id, "scripted failure"))
    }
}

/// Cores kept in memory, all online at creation
pub struct FakeCores {
    online: Mutex<Vec<bool>>,
    failing: Mutex<HashSet<CoreIndex>>,
    transitions: Mutex<Vec<CoreAction>>,
}

impl FakeCores {
    pub fn new(topology: Topology) -> Self {
        Self {
            online: Mutex::new(vec![true; topology.core_count()]),
            failing: Mutex::new(HashSet::new()),
            transitions: Mutex::new(Vec::new()),
        }
    }

    /// Make every request for `core` fail
    pub fn fail_core(&self, core: CoreIndex) {
        self.failing.lock().insert(core);
    }

    pub fn heal_core(&self, core: CoreIndex) {
        self.failing.lock().remove(&core);
    }

    /// Change a core behind the governor's back
    pub fn force(&self, core: CoreIndex, online: bool) {
        if let Some(state) = self.online.lock().get_mut(core) {
            *state = online;
        }
    }

    pub fn online_cores(&self) -> Vec<CoreIndex> {
        self.online
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(core, &online)| online.then_some(core))
            .collect()
    }

    /// Every real transition made through the port, in order
    pub fn transitions(&self) -> Vec<CoreAction> {
        self.transitions.lock().clone()
    }

    pub fn clear_transitions(&self) {
        self.transitions.lock().clear();
    }
}

impl CoreControl for FakeCores {
    fn is_online(&self, core: CoreIndex) -> Result<bool> {
        self.online
            .lock()
            .get(core)
            .copied()
            .ok_or_else(|| GovernorError::hotplug(core, "no such core"))
    }

    fn set_online(&self, core: CoreIndex, online: bool) -> Result<()> {
        if self.failing.lock().contains(&core) {
            return Err(GovernorError::hotplug(core, "injected failure"));
        }
        let mut cores = self.online.lock();
        let state = cores
            .get_mut(core)
            .ok_or_else(|| GovernorError::hotplug(core, "no such core"))?;
        if *state != online {
            *state = online;
            self.transitions.lock().push(CoreAction { core, online });
        }
        Ok(())
    }
}

/// Per-core policy ceilings kept in memory
pub struct FakeFrequency {
    hw_max_khz: u32,
    cores: Arc<FakeCores>,
    policies: Mutex<Vec<u32>>,
    constraint: Mutex<Option<Arc<CapConstraint>>>,
    recomputes: Mutex<usize>,
}

impl FakeFrequency {
    pub fn new(topology: Topology, hw_max_khz: u32, cores: Arc<FakeCores>) -> Self {
        Self {
            hw_max_khz,
            cores,
            policies: Mutex::new(vec![hw_max_khz; topology.core_count()]),
            constraint: Mutex::new(None),
            recomputes: Mutex::new(0),
        }
    }

    fn clamp(&self, khz: u32) -> u32 {
        match self.constraint.lock().as_ref() {
            Some(constraint) => constraint.clamp(khz),
            None => khz,
        }
    }

    pub fn policy(&self, core: CoreIndex) -> Option<u32> {
        self.policies.lock().get(core).copied()
    }

    /// How many times the governor asked for a recompute
    pub fn recompute_count(&self) -> usize {
        *self.recomputes.lock()
    }

    /// A recompute triggered by some other agent, still subject to the constraint
    pub fn external_recompute(&self, core: CoreIndex, requested_khz: u32) {
        let ceiling = self.clamp(requested_khz);
        if let Some(policy) = self.policies.lock().get_mut(core) {
            *policy = ceiling;
        }
    }

    /// A raw write that bypasses the constraint, as a misbehaving agent would
    pub fn raw_write(&self, core: CoreIndex, khz: u32) {
        if let Some(policy) = self.policies.lock().get_mut(core) {
            *policy = khz;
        }
    }
}

impl FrequencyControl for FakeFrequency {
    fn hardware_max_khz(&self) -> Result<u32> {
        Ok(self.hw_max_khz)
    }

    fn install_constraint(&self, constraint: Arc<CapConstraint>) {
        *self.constraint.lock() = Some(constraint);
    }

    fn recompute_policies(&self) -> Result<()> {
        *self.recomputes.lock() += 1;
        let ceiling = self.clamp(self.hw_max_khz);
        let online = self.cores.online_cores();
        let mut policies = self.policies.lock();
        for core in online {
            if let Some(policy) = policies.get_mut(core) {
                *policy = ceiling;
            }
        }
        Ok(())
    }

    fn enforce(&self) -> Result<usize> {
        let online = self.cores.online_cores();
        let mut corrected = 0;
        for core in online {
            let current = match self.policy(core) {
                Some(khz) => khz,
                None => continue,
            };
            let limit = self.clamp(current);
            if limit < current {
                self.raw_write(core, limit);
                corrected += 1;
            }
        }
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FrequencyCap;

    #[test]
    fn test_fake_sensor_script() {
        let sensor = FakeSensor::new(1).with_readings([Some(50), None, Some(61)]);
        assert_eq!(sensor.read_temperature().unwrap(), 50);
        assert!(sensor.read_temperature().is_err());
        assert_eq!(sensor.read_temperature().unwrap(), 61);
        assert_eq!(sensor.read_temperature().unwrap(), 61);
    }

    #[test]
    fn test_fake_frequency_honours_constraint() {
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let freq = FakeFrequency::new(Topology::Quad, 1_200_000, Arc::clone(&cores));
        let constraint = Arc::new(CapConstraint::new());
        freq.install_constraint(Arc::clone(&constraint));

        constraint.set(FrequencyCap::Limited(800_000));
        freq.external_recompute(2, 1_200_000);
        assert_eq!(freq.policy(2), Some(800_000));

        freq.raw_write(1, 1_200_000);
        assert_eq!(freq.enforce().unwrap(), 1);
        assert_eq!(freq.policy(1), Some(800_000));
    }
}
