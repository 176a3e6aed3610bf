//! Hotplug decision engine
//!
//! Maps a temperature to a desired core configuration by walking the
//! topology's band table, then filters that configuration against the cores'
//! current state so only real transitions reach the core control port.
//!
//! Evaluation is pure: it reads nothing but its arguments and never fails.

use crate::topology::{CoreIndex, Step, Temperature, Topology, CORE0};

/// A desired state for one core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreAction {
    pub core: CoreIndex,
    pub online: bool,
}

impl CoreAction {
    pub fn up(core: CoreIndex) -> Self {
        Self { core, online: true }
    }

    pub fn down(core: CoreIndex) -> Self {
        Self { core, online: false }
    }
}

/// Online state of each core as observed before actuation
///
/// `None` means the state could not be read; such cores always receive their
/// action and the port decides whether anything changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineSnapshot {
    cores: Vec<Option<bool>>,
}

impl OnlineSnapshot {
    pub fn new(cores: Vec<Option<bool>>) -> Self {
        Self { cores }
    }

    /// Every core in the topology reported online
    pub fn all_online(topology: Topology) -> Self {
        Self::new(topology.cores().map(|_| Some(true)).collect())
    }

    pub fn get(&self, core: CoreIndex) -> Option<bool> {
        self.cores.get(core).copied().flatten()
    }

    /// Cores known to be online, ascending
    pub fn online_cores(&self) -> Vec<CoreIndex> {
        self.cores
            .iter()
            .enumerate()
            .filter_map(|(core, state)| (*state == Some(true)).then_some(core))
            .collect()
    }

    /// Record the outcome of a successful actuation
    pub fn record(&mut self, action: CoreAction) {
        if action.core >= self.cores.len() {
            self.cores.resize(action.core + 1, None);
        }
        self.cores[action.core] = Some(action.online);
    }
}

/// Index of the first band containing `temp`, if any
pub fn matching_band(topology: Topology, temp: Temperature) -> Option<usize> {
    topology.bands().iter().position(|band| band.range.contains(temp))
}

/// Desired core states for `temp`, in table order
///
/// Returns an empty list when the temperature falls between bands.
pub fn decide(topology: Topology, temp: Temperature, core0_permission: bool) -> Vec<CoreAction> {
    let Some(index) = matching_band(topology, temp) else {
        return Vec::new();
    };

    let mut actions = Vec::with_capacity(topology.core_count());
    for step in topology.bands()[index].steps {
        match *step {
            Step::Up(core) => actions.push(CoreAction::up(core)),
            Step::Down(core) => actions.push(CoreAction::down(core)),
            Step::Core0 => actions.push(CoreAction { core: CORE0, online: !core0_permission }),
            Step::AllUp => actions.extend(topology.cores().map(CoreAction::up)),
        }
    }

    // Core 0 stays up without operator permission, whatever the table says
    if !core0_permission {
        for action in actions.iter_mut().filter(|a| a.core == CORE0) {
            action.online = true;
        }
    }

    actions
}

/// Drop actions whose core is already in the desired state
pub fn plan(actions: &[CoreAction], snapshot: &OnlineSnapshot) -> Vec<CoreAction> {
    actions
        .iter()
        .copied()
        .filter(|action| snapshot.get(action.core) != Some(action.online))
        .collect()
}

/// Decide and plan in one step
pub fn evaluate(
    topology: Topology,
    temp: Temperature,
    core0_permission: bool,
    snapshot: &OnlineSnapshot,
) -> Vec<CoreAction> {
    plan(&decide(topology, temp, core0_permission), snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ups(actions: &[CoreAction]) -> Vec<CoreIndex> {
        actions.iter().filter(|a| a.online).map(|a| a.core).collect()
    }

    fn downs(actions: &[CoreAction]) -> Vec<CoreIndex> {
        actions.iter().filter(|a| !a.online).map(|a| a.core).collect()
    }

    /// Apply a plan to a snapshot the way a well-behaved port would
    fn apply(snapshot: &mut OnlineSnapshot, actions: &[CoreAction]) {
        for action in actions {
            snapshot.record(*action);
        }
    }

    #[test]
    fn test_quad_bands() {
        let hot = decide(Topology::Quad, 85, false);
        assert_eq!(downs(&hot), vec![3, 2, 1]);
        assert!(ups(&hot).is_empty());

        let warm = decide(Topology::Quad, 75, false);
        assert_eq!(ups(&warm), vec![1]);
        assert_eq!(downs(&warm), vec![3, 2]);

        let mild = decide(Topology::Quad, 61, false);
        assert_eq!(ups(&mild), vec![2]);
        assert_eq!(downs(&mild), vec![3]);

        assert_eq!(ups(&decide(Topology::Quad, 55, false)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_quad_gaps_do_nothing() {
        for t in [80, 76, 70, 66, 60, 56, 54, 20] {
            assert!(decide(Topology::Quad, t, false).is_empty(), "t={}", t);
        }
    }

    /// Where each topology is allowed to act, written out independently of the tables
    fn acts_at(topology: Topology, t: Temperature) -> bool {
        match topology {
            Topology::Quad => t > 80 || (70 < t && t <= 75) || (60 < t && t <= 65) || t == 55,
            Topology::Hexa => t > 80 || (55 < t && t <= 65) || t == 50,
            Topology::Octa => t > 80 || (55 < t && t <= 65) || (45 < t && t <= 50) || t == 40,
        }
    }

    #[test]
    fn test_gaps_are_silent_for_every_topology() {
        for topology in Topology::ALL {
            for permission in [false, true] {
                for t in -40..=150 {
                    let actions = decide(topology, t, permission);
                    assert_eq!(
                        !actions.is_empty(),
                        acts_at(topology, t),
                        "{} t={} permission={}",
                        topology,
                        t,
                        permission
                    );
                    assert!(actions.iter().all(|a| a.core < topology.core_count()));
                }
            }
        }
    }

    #[test]
    fn test_hexa_hot_band_respects_core0_gate() {
        let gated = decide(Topology::Hexa, 82, false);
        assert_eq!(ups(&gated), vec![2, 3, 0]);
        assert_eq!(downs(&gated), vec![1, 5, 4]);

        let permitted = decide(Topology::Hexa, 82, true);
        assert_eq!(ups(&permitted), vec![2, 3]);
        assert_eq!(downs(&permitted), vec![1, 0, 5, 4]);
    }

    #[test]
    fn test_octa_cool_band_brings_core0_up_even_with_permission() {
        let actions = decide(Topology::Octa, 48, true);
        assert_eq!(ups(&actions), vec![0, 1]);
        assert_eq!(downs(&actions), vec![3, 2]);
    }

    #[test]
    fn test_online_all_edges_are_exact() {
        assert_eq!(ups(&decide(Topology::Hexa, 50, true)).len(), 6);
        assert!(decide(Topology::Hexa, 49, true).is_empty());
        assert!(decide(Topology::Hexa, 51, true).is_empty());
        assert_eq!(ups(&decide(Topology::Octa, 40, true)).len(), 8);
        assert!(decide(Topology::Octa, 41, true).is_empty());
    }

    #[test]
    fn test_core0_never_offline_without_permission() {
        for topology in Topology::ALL {
            for t in -40..=150 {
                let actions = decide(topology, t, false);
                assert!(
                    !actions.contains(&CoreAction::down(CORE0)),
                    "{} offlines core 0 at {}",
                    topology,
                    t
                );
            }
        }
    }

    #[test]
    fn test_decide_stays_inside_topology() {
        for topology in Topology::ALL {
            for t in -40..=150 {
                for permission in [false, true] {
                    for action in decide(topology, t, permission) {
                        assert!(topology.contains(action.core));
                    }
                }
            }
        }
    }

    #[test]
    fn test_plan_is_idempotent() {
        for topology in Topology::ALL {
            for t in -40..=150 {
                let mut snapshot = OnlineSnapshot::all_online(topology);
                let first = evaluate(topology, t, true, &snapshot);
                apply(&mut snapshot, &first);
                assert!(
                    evaluate(topology, t, true, &snapshot).is_empty(),
                    "{} not idempotent at {}",
                    topology,
                    t
                );
            }
        }
    }

    #[test]
    fn test_plan_keeps_unknown_cores() {
        let snapshot = OnlineSnapshot::new(vec![Some(true), None, Some(true), Some(false)]);
        let planned = plan(&decide(Topology::Quad, 85, false), &snapshot);
        assert_eq!(downs(&planned), vec![2, 1]);
    }

    #[test]
    fn test_hexa_heating_and_cooling_sequence() {
        let mut snapshot = OnlineSnapshot::all_online(Topology::Hexa);

        assert!(evaluate(Topology::Hexa, 50, false, &snapshot).is_empty());

        let at_60 = evaluate(Topology::Hexa, 60, false, &snapshot);
        assert_eq!(at_60, vec![CoreAction::down(1)]);
        apply(&mut snapshot, &at_60);

        let at_82 = evaluate(Topology::Hexa, 82, false, &snapshot);
        assert_eq!(at_82, vec![CoreAction::down(5), CoreAction::down(4)]);
        apply(&mut snapshot, &at_82);
        assert_eq!(snapshot.online_cores(), vec![0, 2, 3]);

        let back_60 = evaluate(Topology::Hexa, 60, false, &snapshot);
        assert_eq!(back_60, vec![CoreAction::up(4), CoreAction::up(5)]);
        apply(&mut snapshot, &back_60);

        let back_50 = evaluate(Topology::Hexa, 50, false, &snapshot);
        assert_eq!(back_50, vec![CoreAction::up(1)]);
        apply(&mut snapshot, &back_50);
        assert_eq!(snapshot.online_cores(), vec![0, 1, 2, 3, 4, 5]);
    }
}
