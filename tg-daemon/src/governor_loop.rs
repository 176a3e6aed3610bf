//! Periodic governor task
//!
//! Runs one governor tick at a time on the blocking pool. The next tick is
//! scheduled relative to the completion of the previous one, so ticks can
//! never overlap. Shutdown suppresses the pending tick; a tick already in
//! flight runs to completion.
//!
//! A panicking tick takes the whole daemon down through [`Shutdown`], so the
//! init system can restart it with fresh hardware state.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use tg_core::constants::timing;
use tg_core::{CapConstraint, FrequencyCap, FrequencyControl, Governor, ThrottleAction, TickReport};

use crate::shutdown::Shutdown;

/// Drive `governor` until shutdown
pub async fn run_governor_loop(
    mut governor: Governor,
    poll_interval: Duration,
    shutdown: Arc<Shutdown>,
) {
    info!(
        topology = %governor.topology(),
        poll_ms = poll_interval.as_millis() as u64,
        "Governor loop starting"
    );

    tokio::select! {
        _ = tokio::time::sleep(timing::INITIAL_DELAY) => {}
        _ = shutdown.wait() => {
            info!("Governor loop cancelled before first tick");
            return;
        }
    }

    let mut consecutive_errors: u32 = 0;

    loop {
        if shutdown.is_triggered() {
            break;
        }

        // The governor moves onto the blocking pool and comes back with the report
        let result = tokio::task::spawn_blocking(move || {
            let report = governor.tick();
            (governor, report)
        })
        .await;

        let report = match result {
            Ok((returned, report)) => {
                governor = returned;
                report
            }
            Err(e) => {
                error!("Governor tick panicked: {} - shutting the daemon down", e);
                shutdown.trigger();
                return;
            }
        };

        log_report(&report, &mut consecutive_errors);

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.wait() => {}
        }
    }

    info!("Governor loop stopped");
}

/// Log a tick report; repeated failures are logged on the first and every Nth occurrence
pub fn log_report(report: &TickReport, consecutive_errors: &mut u32) {
    if report.errors.is_empty() {
        if *consecutive_errors > 0 {
            debug!("Governor recovered after {} failed ticks", consecutive_errors);
            *consecutive_errors = 0;
        }
    } else {
        *consecutive_errors = consecutive_errors.saturating_add(1);
        if should_log_failure(*consecutive_errors) {
            for e in &report.errors {
                if report.skipped() {
                    error!("Tick skipped (failure count: {}): {}", consecutive_errors, e);
                } else {
                    warn!("Tick error (failure count: {}): {}", consecutive_errors, e);
                }
            }
        }
    }

    if let Some(temp) = report.temperature {
        for action in &report.hotplug_actions {
            info!(temp, core = action.core, online = action.online, "Core {}", if action.online { "onlined" } else { "offlined" });
        }
        // Cap changes are logged by the governor itself
        if report.throttle_action == ThrottleAction::NoChange {
            debug!(temp, "Tick complete");
        }
    }
}

/// Drop the standing cap and let every online policy return to its hardware ceiling
///
/// Called once the governor and policy watch have stopped, so a daemon that
/// exits while throttling does not leave the warm ceiling behind.
pub fn release_cap(constraint: &CapConstraint, frequency: &dyn FrequencyControl) {
    let previous = constraint.get();
    if !constraint.set(FrequencyCap::Unrestricted) {
        return;
    }
    match frequency.recompute_policies() {
        Ok(()) => info!(cap_khz = ?previous.khz(), "SHUTDOWN: Frequency cap released"),
        Err(e) => warn!("SHUTDOWN: Could not release frequency cap on every core: {}", e),
    }
}

fn should_log_failure(count: u32) -> bool {
    count == 1 || count % timing::FAILURE_LOG_EVERY == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::testing::{FakeCores, FakeFrequency, FakeSensor};
    use tg_core::{GovernorState, ThrottleParams, Topology, Tunables};

    fn governor(sensor: FakeSensor, cores: Arc<FakeCores>, state: Arc<GovernorState>) -> Governor {
        let frequency = Arc::new(FakeFrequency::new(Topology::Quad, 1_200_000, Arc::clone(&cores)));
        governor_with(sensor, cores, frequency, state)
    }

    fn governor_with(
        sensor: FakeSensor,
        cores: Arc<FakeCores>,
        frequency: Arc<FakeFrequency>,
        state: Arc<GovernorState>,
    ) -> Governor {
        Governor::new(
            Topology::Quad,
            Box::new(sensor),
            cores,
            frequency,
            state,
            ThrottleParams {
                warm_freq_khz: 864_000,
                hysteresis_margin: 5,
            },
        )
    }

    fn state() -> Arc<GovernorState> {
        Arc::new(GovernorState::new(Tunables {
            hotplug_enabled: true,
            core0_permission: false,
            threshold: 60,
        }))
    }

    #[test]
    fn test_failure_logging_cadence() {
        assert!(should_log_failure(1));
        assert!(!should_log_failure(2));
        assert!(should_log_failure(10));
        assert!(should_log_failure(20));
    }

    #[tokio::test]
    async fn test_loop_ticks_until_shutdown() {
        let state = state();
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let sensor = FakeSensor::new(0).with_readings([Some(85)]);
        let shutdown = Arc::new(Shutdown::new());

        let handle = tokio::spawn(run_governor_loop(
            governor(sensor, Arc::clone(&cores), Arc::clone(&state)),
            Duration::from_millis(10),
            Arc::clone(&shutdown),
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits after shutdown")
            .unwrap();

        let status = state.status();
        assert!(status.tick_count >= 2);
        assert!(status.throttling);
        assert_eq!(cores.online_cores(), vec![0]);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let state = state();
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let shutdown = Arc::new(Shutdown::new());
        shutdown.trigger();

        run_governor_loop(
            governor(FakeSensor::new(0).with_readings([Some(85)]), Arc::clone(&cores), Arc::clone(&state)),
            Duration::from_millis(10),
            shutdown,
        )
        .await;

        assert_eq!(state.status().tick_count, 0);
        assert!(cores.transitions().is_empty());
    }

    #[tokio::test]
    async fn test_cap_released_after_loop_stops() {
        let state = state();
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let frequency = Arc::new(FakeFrequency::new(Topology::Quad, 1_200_000, Arc::clone(&cores)));
        let governor = governor_with(
            FakeSensor::new(0).with_readings([Some(70)]),
            Arc::clone(&cores),
            Arc::clone(&frequency),
            Arc::clone(&state),
        );
        let constraint = governor.constraint();
        let shutdown = Arc::new(Shutdown::new());

        let handle = tokio::spawn(run_governor_loop(governor, Duration::from_millis(10), Arc::clone(&shutdown)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.trigger();
        handle.await.unwrap();
        assert_eq!(frequency.policy(0), Some(864_000));

        release_cap(&constraint, frequency.as_ref());
        assert_eq!(constraint.get(), FrequencyCap::Unrestricted);
        for core in cores.online_cores() {
            assert_eq!(frequency.policy(core), Some(1_200_000));
        }

        // Nothing left to release
        let recomputes = frequency.recompute_count();
        release_cap(&constraint, frequency.as_ref());
        assert_eq!(frequency.recompute_count(), recomputes);
    }

    #[tokio::test]
    async fn test_panicking_tick_triggers_shutdown() {
        struct PanickingSensor;

        impl tg_core::TemperatureSensor for PanickingSensor {
            fn sensor_id(&self) -> u32 {
                0
            }

            fn read_temperature(&self) -> tg_core::Result<i32> {
                panic!("sensor driver exploded");
            }
        }

        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let frequency = Arc::new(FakeFrequency::new(Topology::Quad, 1_200_000, Arc::clone(&cores)));
        let governor = Governor::new(
            Topology::Quad,
            Box::new(PanickingSensor),
            cores,
            frequency,
            state(),
            ThrottleParams {
                warm_freq_khz: 864_000,
                hysteresis_margin: 5,
            },
        );
        let shutdown = Arc::new(Shutdown::new());

        tokio::time::timeout(
            Duration::from_secs(2),
            run_governor_loop(governor, Duration::from_millis(10), Arc::clone(&shutdown)),
        )
        .await
        .expect("loop returns after the panic");
        assert!(shutdown.is_triggered());
    }
}
