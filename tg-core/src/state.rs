//! State shared between the governor loop and the runtime config surface
//!
//! Tunables are read once per tick as a consistent snapshot. The hotplug
//! section serializes the governor's hotplug phase against the sweep that
//! runs when hotplug decisions are switched off.

use parking_lot::{Mutex, MutexGuard, RwLock};
use tg_protocol::GovernorStatus;

use crate::topology::Temperature;

/// Operator-adjustable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    pub hotplug_enabled: bool,
    pub core0_permission: bool,
    pub threshold: Temperature,
}

#[derive(Debug)]
pub struct GovernorState {
    tunables: RwLock<Tunables>,
    status: RwLock<GovernorStatus>,
    hotplug: Mutex<()>,
}

impl GovernorState {
    pub fn new(tunables: Tunables) -> Self {
        Self {
            tunables: RwLock::new(tunables),
            status: RwLock::new(GovernorStatus::default()),
            hotplug: Mutex::new(()),
        }
    }

    /// Consistent copy of every tunable
    pub fn snapshot(&self) -> Tunables {
        *self.tunables.read()
    }

    /// Mutate the tunables under the write lock, returning the previous values
    pub fn update<F>(&self, f: F) -> Tunables
    where
        F: FnOnce(&mut Tunables),
    {
        let mut tunables = self.tunables.write();
        let previous = *tunables;
        f(&mut tunables);
        previous
    }

    /// Enter the hotplug critical section
    pub fn hotplug_section(&self) -> MutexGuard<'_, ()> {
        self.hotplug.lock()
    }

    /// Last status published by the governor, with live tunables overlaid
    pub fn status(&self) -> GovernorStatus {
        let mut status = self.status.read().clone();
        let tunables = self.snapshot();
        status.hotplug_enabled = tunables.hotplug_enabled;
        status.core0_permission = tunables.core0_permission;
        status.threshold = tunables.threshold;
        status
    }

    pub fn publish(&self, status: GovernorStatus) {
        *self.status.write() = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> Tunables {
        Tunables {
            hotplug_enabled: true,
            core0_permission: false,
            threshold: 60,
        }
    }

    #[test]
    fn test_update_returns_previous() {
        let state = GovernorState::new(tunables());
        let previous = state.update(|t| t.threshold = 70);
        assert_eq!(previous.threshold, 60);
        assert_eq!(state.snapshot().threshold, 70);
    }

    #[test]
    fn test_status_reflects_live_tunables() {
        let state = GovernorState::new(tunables());
        state.publish(GovernorStatus {
            tick_count: 4,
            threshold: 60,
            ..GovernorStatus::default()
        });
        state.update(|t| {
            t.threshold = 75;
            t.core0_permission = true;
        });
        let status = state.status();
        assert_eq!(status.tick_count, 4);
        assert_eq!(status.threshold, 75);
        assert!(status.core0_permission);
    }
}
