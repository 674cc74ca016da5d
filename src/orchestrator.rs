//! Top-level flow: preconditions, plan, serial node rollout.

use crate::cluster::ClusterInspector;
use crate::config::RunConfig;
use crate::error::UpgradeResult;
use crate::exec::RemoteExec;
use crate::logging::Logger;
use crate::rollout::NodeStateMachine;
use std::sync::Arc;

pub struct Orchestrator {
    exec: Arc<dyn RemoteExec>,
    cfg: Arc<RunConfig>,
    logger: Logger,
}

impl Orchestrator {
    pub fn new(exec: Arc<dyn RemoteExec>, cfg: Arc<RunConfig>, logger: Logger) -> Self {
        Self { exec, cfg, logger }
    }

    /// Runs the full rollout. Returns an error, leaving the cluster as it
    /// is, the moment any precondition or node step fails; before the plan
    /// is built this means nothing has been mutated at all. A node that
    /// fails mid-upgrade may be left in maintenance mode for the operator
    /// to handle.
    pub async fn run(&self) -> UpgradeResult<()> {
        if self.cfg.dry_run {
            self.logger
                .warn("DRY-RUN: mutating commands are logged as NO-OP and not executed");
        }

        let inspector =
            ClusterInspector::new(self.exec.clone(), self.cfg.clone(), self.logger.clone());
        let mut view = inspector.resolve_members().await?;
        inspector.check_preconditions(&mut view).await?;
        let plan = inspector.build_plan(&mut view).await?;

        if plan.nodes.is_empty() && !self.cfg.force_upgrade {
            self.logger.info("No nodes need updates. Exiting.");
            return Ok(());
        }

        self.logger
            .info(format!("upgrade plan: {}", plan.nodes.join(", ")));
        for host in &plan.nodes {
            let mut machine = NodeStateMachine::new(
                self.exec.clone(),
                self.cfg.clone(),
                host.clone(),
                self.logger.with_prefix(host.as_str()),
            );
            machine.run().await?;
        }

        self.logger
            .success(format!("All {} node(s) upgraded.", plan.nodes.len()));
        Ok(())
    }
}
