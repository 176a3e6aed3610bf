//! The governor tick
//!
//! One tick reads the sensor, evaluates the hotplug bands (when enabled) and
//! then the throttle, applying the resulting actions through the ports.
//! Ticks never overlap; the daemon drives them from a single task.
//!
//! Nothing that happens during a tick is fatal. Sensor failures skip the
//! tick, per-core failures are collected in the [`TickReport`] and the
//! remaining cores are still processed.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tg_protocol::GovernorStatus;

use crate::engine::{hotplug, CoreAction, FrequencyCap, OnlineSnapshot, ThrottleAction, ThrottleState};
use crate::error::GovernorError;
use crate::ports::{CapConstraint, CoreControl, FrequencyControl, TemperatureSensor};
use crate::state::{GovernorState, Tunables};
use crate::topology::{CoreIndex, Temperature, Topology};

/// Parameters fixed for the lifetime of a governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleParams {
    pub warm_freq_khz: u32,
    pub hysteresis_margin: Temperature,
}

/// Outcome of a single tick
#[derive(Debug)]
pub struct TickReport {
    /// `None` when the sensor could not be read and the tick was skipped
    pub temperature: Option<Temperature>,
    /// Hotplug transitions that were applied
    pub hotplug_actions: Vec<CoreAction>,
    pub throttle_action: ThrottleAction,
    pub errors: Vec<GovernorError>,
}

impl TickReport {
    fn new() -> Self {
        Self {
            temperature: None,
            hotplug_actions: Vec::new(),
            throttle_action: ThrottleAction::NoChange,
            errors: Vec::new(),
        }
    }

    pub fn skipped(&self) -> bool {
        self.temperature.is_none()
    }
}

pub struct Governor {
    topology: Topology,
    sensor: Box<dyn TemperatureSensor>,
    cores: Arc<dyn CoreControl>,
    frequency: Arc<dyn FrequencyControl>,
    state: Arc<GovernorState>,
    constraint: Arc<CapConstraint>,
    throttle: ThrottleState,
    warm_freq_khz: u32,
    tick_count: u64,
    consecutive_sensor_failures: u32,
    last_temperature: Option<Temperature>,
    /// Cores seen online at the end of the previous tick
    last_online: Vec<CoreIndex>,
}

impl Governor {
    /// Create a governor and register its cap constraint with the frequency port
    pub fn new(
        topology: Topology,
        sensor: Box<dyn TemperatureSensor>,
        cores: Arc<dyn CoreControl>,
        frequency: Arc<dyn FrequencyControl>,
        state: Arc<GovernorState>,
        params: ThrottleParams,
    ) -> Self {
        let constraint = Arc::new(CapConstraint::new());
        frequency.install_constraint(Arc::clone(&constraint));
        let throttle = ThrottleState::new(state.snapshot().threshold, params.hysteresis_margin);

        let mut governor = Self {
            topology,
            sensor,
            cores,
            frequency,
            state,
            constraint,
            throttle,
            warm_freq_khz: params.warm_freq_khz,
            tick_count: 0,
            consecutive_sensor_failures: 0,
            last_temperature: None,
            last_online: Vec::new(),
        };
        governor.last_online = governor.read_snapshot().online_cores();
        governor
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn throttle(&self) -> &ThrottleState {
        &self.throttle
    }

    pub fn constraint(&self) -> Arc<CapConstraint> {
        Arc::clone(&self.constraint)
    }

    pub fn consecutive_sensor_failures(&self) -> u32 {
        self.consecutive_sensor_failures
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Run one governor iteration
    pub fn tick(&mut self) -> TickReport {
        self.tick_count += 1;
        let mut report = TickReport::new();

        // Held through the hotplug phase so a concurrent disable sweep
        // either precedes this snapshot or follows our actuation
        let hotplug_section = self.state.hotplug_section();
        let tunables = self.state.snapshot();

        let temp = match self.sensor.read_temperature() {
            Ok(temp) => temp,
            Err(e) => {
                drop(hotplug_section);
                self.consecutive_sensor_failures = self.consecutive_sensor_failures.saturating_add(1);
                report.errors.push(e);
                let snapshot = self.read_snapshot();
                self.publish(&tunables, &snapshot);
                return report;
            }
        };
        self.consecutive_sensor_failures = 0;
        self.last_temperature = Some(temp);
        report.temperature = Some(temp);

        let mut snapshot = self.read_snapshot();
        if tunables.hotplug_enabled {
            let planned =
                hotplug::evaluate(self.topology, temp, tunables.core0_permission, &snapshot);
            for action in planned {
                match self.cores.set_online(action.core, action.online) {
                    Ok(()) => {
                        snapshot.record(action);
                        report.hotplug_actions.push(action);
                    }
                    Err(e) => {
                        tracing::warn!(core = action.core, online = action.online, error = %e, "Hotplug request failed");
                        report.errors.push(e);
                    }
                }
            }
            if !report.hotplug_actions.is_empty() {
                tracing::debug!(temp, actions = ?report.hotplug_actions, "Hotplug band applied");
            }
        }
        drop(hotplug_section);

        self.throttle.set_threshold(tunables.threshold);
        let action = self.throttle.update(temp, self.warm_freq_khz);
        report.throttle_action = action;

        // Cores that came online since the last tick, by our hand or not,
        // still carry whatever ceiling they had when they went down
        let online = snapshot.online_cores();
        let cores_came_up = online.iter().any(|core| !self.last_online.contains(core));
        self.last_online = online;

        let recompute = match action {
            ThrottleAction::ApplyCap(khz) => {
                tracing::info!(temp, cap_khz = khz, threshold = tunables.threshold, "Throttling engaged");
                self.constraint.set(FrequencyCap::Limited(khz));
                true
            }
            ThrottleAction::LiftCap => {
                tracing::info!(temp, release = self.throttle.release_point(), "Throttling released");
                self.constraint.set(FrequencyCap::Unrestricted);
                true
            }
            ThrottleAction::NoChange => cores_came_up,
        };
        if recompute {
            if let Err(e) = self.frequency.recompute_policies() {
                report.errors.push(e);
            }
        }

        self.publish(&tunables, &snapshot);
        report
    }

    fn read_snapshot(&self) -> OnlineSnapshot {
        OnlineSnapshot::new(
            self.topology
                .cores()
                .map(|core| self.cores.is_online(core).ok())
                .collect(),
        )
    }

    fn publish(&self, tunables: &Tunables, snapshot: &OnlineSnapshot) {
        let last_tick_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);

        self.state.publish(GovernorStatus {
            topology: self.topology.name().to_string(),
            sensor_id: self.sensor.sensor_id(),
            temperature: self.last_temperature,
            last_tick_ms,
            hotplug_enabled: tunables.hotplug_enabled,
            core0_permission: tunables.core0_permission,
            threshold: tunables.threshold,
            hysteresis_margin: self.throttle.hysteresis_margin(),
            warm_frequency_khz: self.warm_freq_khz,
            current_cap_khz: self.constraint.get().khz(),
            throttling: self.throttle.is_throttling(),
            online_cores: snapshot.online_cores(),
            tick_count: self.tick_count,
            consecutive_sensor_failures: self.consecutive_sensor_failures,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MockCoreControl, MockFrequencyControl, MockTemperatureSensor};
    use mockall::{predicate::eq, Sequence};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const WARM: u32 = 864_000;

    fn tunables(hotplug_enabled: bool) -> Tunables {
        Tunables {
            hotplug_enabled,
            core0_permission: false,
            threshold: 60,
        }
    }

    fn sensor(readings: Vec<Result<Temperature, GovernorError>>) -> Box<MockTemperatureSensor> {
        let queue = Mutex::new(VecDeque::from(readings));
        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_sensor_id().return_const(3u32);
        sensor.expect_read_temperature().returning(move || {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GovernorError::sensor(3, "exhausted")))
        });
        Box::new(sensor)
    }

    fn all_online_cores() -> MockCoreControl {
        let mut cores = MockCoreControl::new();
        cores.expect_is_online().returning(|_| Ok(true));
        cores
    }

    fn frequency(recomputes: usize) -> MockFrequencyControl {
        let mut frequency = MockFrequencyControl::new();
        frequency.expect_install_constraint().times(1).return_const(());
        frequency
            .expect_recompute_policies()
            .times(recomputes)
            .returning(|| Ok(()));
        frequency
    }

    fn governor(
        topology: Topology,
        readings: Vec<Result<Temperature, GovernorError>>,
        cores: MockCoreControl,
        frequency: MockFrequencyControl,
        state: Arc<GovernorState>,
    ) -> Governor {
        Governor::new(
            topology,
            sensor(readings),
            Arc::new(cores),
            Arc::new(frequency),
            state,
            ThrottleParams {
                warm_freq_khz: WARM,
                hysteresis_margin: 5,
            },
        )
    }

    #[test]
    fn test_sensor_failure_skips_tick() {
        let mut cores = all_online_cores();
        cores.expect_set_online().never();
        let state = Arc::new(GovernorState::new(tunables(true)));
        let mut gov = governor(
            Topology::Hexa,
            vec![Err(GovernorError::sensor(3, "io")), Err(GovernorError::sensor(3, "io")), Ok(45)],
            cores,
            frequency(0),
            Arc::clone(&state),
        );

        let report = gov.tick();
        assert!(report.skipped());
        assert_eq!(report.errors.len(), 1);
        gov.tick();
        assert_eq!(state.status().consecutive_sensor_failures, 2);

        let report = gov.tick();
        assert_eq!(report.temperature, Some(45));
        assert_eq!(gov.consecutive_sensor_failures(), 0);
        assert_eq!(state.status().tick_count, 3);
    }

    #[test]
    fn test_throttle_engages_once_and_releases() {
        let state = Arc::new(GovernorState::new(tunables(false)));
        let mut gov = governor(
            Topology::Quad,
            vec![Ok(58), Ok(61), Ok(63), Ok(56), Ok(54)],
            all_online_cores(),
            frequency(2),
            Arc::clone(&state),
        );

        assert_eq!(gov.tick().throttle_action, ThrottleAction::NoChange);
        assert_eq!(gov.tick().throttle_action, ThrottleAction::ApplyCap(WARM));
        assert_eq!(gov.constraint().get(), FrequencyCap::Limited(WARM));
        assert_eq!(gov.tick().throttle_action, ThrottleAction::NoChange);
        assert_eq!(gov.tick().throttle_action, ThrottleAction::NoChange);
        assert!(state.status().throttling);
        assert_eq!(state.status().current_cap_khz, Some(WARM));

        assert_eq!(gov.tick().throttle_action, ThrottleAction::LiftCap);
        assert_eq!(gov.constraint().get(), FrequencyCap::Unrestricted);
        assert_eq!(state.status().current_cap_khz, None);
    }

    #[test]
    fn test_disabled_hotplug_leaves_cores_alone() {
        let mut cores = all_online_cores();
        cores.expect_set_online().never();
        let state = Arc::new(GovernorState::new(tunables(false)));
        let mut gov = governor(Topology::Octa, vec![Ok(90)], cores, frequency(1), state);

        let report = gov.tick();
        assert!(report.hotplug_actions.is_empty());
        assert_eq!(report.throttle_action, ThrottleAction::ApplyCap(WARM));
    }

    #[test]
    fn test_hexa_hot_band_applies_in_table_order() {
        let mut cores = all_online_cores();
        let mut seq = Sequence::new();
        for core in [1, 5, 4] {
            cores
                .expect_set_online()
                .with(eq(core), eq(false))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }
        let state = Arc::new(GovernorState::new(tunables(true)));
        let mut gov = governor(Topology::Hexa, vec![Ok(82)], cores, frequency(1), Arc::clone(&state));

        let report = gov.tick();
        assert_eq!(
            report.hotplug_actions,
            vec![CoreAction::down(1), CoreAction::down(5), CoreAction::down(4)]
        );
        assert_eq!(state.status().online_cores, vec![0, 2, 3]);
    }

    #[test]
    fn test_core_failure_does_not_stop_the_tick() {
        let mut cores = all_online_cores();
        cores.expect_set_online().returning(|core, _| {
            if core == 3 {
                Err(GovernorError::hotplug(core, "device busy"))
            } else {
                Ok(())
            }
        });
        let state = Arc::new(GovernorState::new(tunables(true)));
        let mut gov = governor(Topology::Quad, vec![Ok(85)], cores, frequency(1), state);

        let report = gov.tick();
        assert_eq!(report.hotplug_actions, vec![CoreAction::down(2), CoreAction::down(1)]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.throttle_action, ThrottleAction::ApplyCap(WARM));
    }

    #[test]
    fn test_threshold_change_is_picked_up_next_tick() {
        let state = Arc::new(GovernorState::new(tunables(false)));
        let mut gov = governor(
            Topology::Quad,
            vec![Ok(65), Ok(65)],
            all_online_cores(),
            frequency(1),
            Arc::clone(&state),
        );

        state.update(|t| t.threshold = 70);
        assert_eq!(gov.tick().throttle_action, ThrottleAction::NoChange);
        state.update(|t| t.threshold = 60);
        assert_eq!(gov.tick().throttle_action, ThrottleAction::ApplyCap(WARM));
    }
}
