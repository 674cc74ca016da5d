//! Waiting for remote state.
//!
//! Every "poll until the cluster looks right" loop in the rollout shares
//! this implementation: a probe, a completion predicate, a cadence, and
//! progress output. Probe errors (missing JSON fields, unrecognised mode
//! strings surfacing as decode failures, a node that is still booting) are
//! treated as "not yet" and retried on the next tick; there is no retry
//! cap, the operator is the timeout.

use crate::error::UpgradeResult;
use crate::logging::Logger;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Cadence for the short waits (HA mode, cluster offline count, reboot-up).
pub const POLL_FAST: Duration = Duration::from_secs(1);

/// Cadence for the long waits (guest drain, task idle).
pub const POLL_SLOW: Duration = Duration::from_secs(5);

/// Polls `probe` every `period` until `done` accepts the observed value.
///
/// Returns the first accepted value. If the very first probe already
/// satisfies `done`, no sleep happens at all. At verbosity 0 each pending
/// tick emits a progress dot; at higher verbosity the observed value is
/// logged instead.
pub async fn wait_until<T, P, Fut, D>(
    logger: &Logger,
    what: &str,
    period: Duration,
    mut probe: P,
    mut done: D,
) -> UpgradeResult<T>
where
    T: Display,
    P: FnMut() -> Fut,
    Fut: Future<Output = UpgradeResult<T>>,
    D: FnMut(&T) -> bool,
{
    logger.debug(format!("waiting for {what}"));
    loop {
        match probe().await {
            Ok(value) if done(&value) => {
                logger.progress_done();
                logger.verbose(format!("{what}: {value}"));
                return Ok(value);
            }
            Ok(value) => {
                logger.verbose(format!("{what}: {value}"));
            }
            Err(err) => {
                logger.debug(format!("{what}: probe failed, retrying: {err}"));
            }
        }
        logger.progress_dot();
        tokio::time::sleep(period).await;
    }
}
