//! Parallel execution of one operation across many nodes.
//!
//! Probes never short-circuit: a failing node must not cancel the probes of
//! the others, because the operator needs the complete list of offenders.
//! Results are collected in completion order; callers that care about the
//! original ordering re-index by host name.

use crate::error::{UpgradeError, UpgradeResult};
use crate::logging::Logger;
use futures::future::join_all;
use std::future::Future;

/// Runs `op` once per node on its own task and waits for every result.
///
/// Each task gets a child logger prefixed with the node name so interleaved
/// output stays parseable; at verbosity >= 4 a stable task index is added.
pub async fn for_each_node<T, F, Fut>(
    logger: &Logger,
    nodes: &[String],
    op: F,
) -> Vec<(String, UpgradeResult<T>)>
where
    T: Send + 'static,
    F: Fn(String, Logger) -> Fut,
    Fut: Future<Output = UpgradeResult<T>> + Send + 'static,
{
    let handles: Vec<_> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let mut task_logger = logger.with_prefix(node.as_str());
            if logger.verbosity() >= 4 {
                task_logger = task_logger.with_prefix(format!("task-{index}"));
            }
            let node = node.clone();
            let future = op(node.clone(), task_logger);
            tokio::spawn(async move { (node, future.await) })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(entry) => entry,
            Err(err) => (
                "<unknown>".to_string(),
                Err(UpgradeError::Unexpected(format!("probe task died: {err}"))),
            ),
        })
        .collect()
}

/// Aggregates fan-out results: logs every failure with its node name and
/// fails iff at least one job failed, reporting the failure count.
pub fn require_all<T>(
    logger: &Logger,
    check: &str,
    results: Vec<(String, UpgradeResult<T>)>,
) -> UpgradeResult<Vec<(String, T)>> {
    let total = results.len();
    let mut succeeded = Vec::with_capacity(total);
    let mut failed = 0;
    for (node, result) in results {
        match result {
            Ok(value) => succeeded.push((node, value)),
            Err(err) => {
                failed += 1;
                logger.error(format!("{node}: {err}"));
            }
        }
    }
    if failed > 0 {
        return Err(UpgradeError::FanOut {
            check: check.to_string(),
            failed,
            total,
        });
    }
    Ok(succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fake::capture_logger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_nodes_probed_despite_failures() {
        let (logger, _) = capture_logger(0);
        let probed = Arc::new(AtomicUsize::new(0));
        let nodes = hosts(&["pve1", "pve2", "pve3", "pve4"]);

        let counter = probed.clone();
        let results = for_each_node(&logger, &nodes, move |node, _log| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if node == "pve2" || node == "pve4" {
                    Err(UpgradeError::Unreachable { node })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(probed.load(Ordering::SeqCst), 4);
        assert_eq!(results.len(), 4);
        let failures = results.iter().filter(|(_, r)| r.is_err()).count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_require_all_reports_failure_count() {
        let (logger, buf) = capture_logger(0);
        let results = vec![
            ("pve1".to_string(), Ok(())),
            (
                "pve2".to_string(),
                Err(UpgradeError::Unreachable {
                    node: "pve2".to_string(),
                }),
            ),
            ("pve3".to_string(), Ok(())),
        ];
        let err = require_all(&logger, "reachability check", results).unwrap_err();
        match err {
            UpgradeError::FanOut {
                check,
                failed,
                total,
            } => {
                assert_eq!(check, "reachability check");
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(buf.contents().contains("pve2"));
    }

    #[tokio::test]
    async fn test_require_all_passes_through_successes() {
        let (logger, _) = capture_logger(0);
        let results = vec![
            ("pve1".to_string(), Ok(true)),
            ("pve2".to_string(), Ok(false)),
        ];
        let ok = require_all(&logger, "update check", results).unwrap();
        assert_eq!(ok.len(), 2);
    }
}
