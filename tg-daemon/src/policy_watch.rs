//! Cap enforcement watcher
//!
//! Other agents (thermal HALs, vendor daemons, a stray `echo`) can rewrite a
//! policy ceiling without going through the cpufreq notifier. This task
//! re-asserts the standing constraint on a short period so such writes never
//! outlive one enforcement interval.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use tg_core::constants::timing;
use tg_core::FrequencyControl;

use crate::shutdown::Shutdown;

/// Re-assert the frequency constraint every `interval` until shutdown
pub async fn run_policy_watch(
    frequency: Arc<dyn FrequencyControl>,
    interval: Duration,
    shutdown: Arc<Shutdown>,
) {
    debug!(interval_ms = interval.as_millis() as u64, "Policy watch starting");

    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait() => break,
        }

        let frequency = Arc::clone(&frequency);
        let result = tokio::task::spawn_blocking(move || frequency.enforce()).await;

        match result {
            Ok(Ok(0)) => {
                if consecutive_errors > 0 {
                    debug!("Policy watch recovered after {} failures", consecutive_errors);
                    consecutive_errors = 0;
                }
            }
            Ok(Ok(corrected)) => {
                consecutive_errors = 0;
                info!(corrected, "Re-applied frequency cap to drifted policies");
            }
            Ok(Err(e)) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors == 1 || consecutive_errors % timing::FAILURE_LOG_EVERY == 0 {
                    warn!("Cap enforcement failed (failure count: {}): {}", consecutive_errors, e);
                }
            }
            Err(e) => {
                error!("Cap enforcement panicked: {} - policy watch stopping", e);
                return;
            }
        }
    }

    debug!("Policy watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::testing::{FakeCores, FakeFrequency};
    use tg_core::{CapConstraint, FrequencyCap, Topology};

    #[tokio::test]
    async fn test_drifted_policy_is_clamped() {
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let frequency = Arc::new(FakeFrequency::new(Topology::Quad, 1_200_000, cores));
        let constraint = Arc::new(CapConstraint::new());
        frequency.install_constraint(Arc::clone(&constraint));
        constraint.set(FrequencyCap::Limited(800_000));

        let shutdown = Arc::new(Shutdown::new());
        let handle = tokio::spawn(run_policy_watch(
            Arc::clone(&frequency) as Arc<dyn FrequencyControl>,
            Duration::from_millis(5),
            Arc::clone(&shutdown),
        ));

        frequency.raw_write(3, 1_200_000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frequency.policy(3), Some(800_000));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watch exits after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrestricted_leaves_policies_alone() {
        let cores = Arc::new(FakeCores::new(Topology::Quad));
        let frequency = Arc::new(FakeFrequency::new(Topology::Quad, 1_200_000, cores));
        frequency.install_constraint(Arc::new(CapConstraint::new()));
        frequency.raw_write(1, 960_000);

        let shutdown = Arc::new(Shutdown::new());
        let handle = tokio::spawn(run_policy_watch(
            Arc::clone(&frequency) as Arc<dyn FrequencyControl>,
            Duration::from_millis(5),
            Arc::clone(&shutdown),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(frequency.policy(1), Some(960_000));
    }
}
