//! Cluster discovery, global preconditions, and candidate selection.

use crate::config::{RunConfig, SeedMode};
use crate::error::{UpgradeError, UpgradeResult};
use crate::exec::RemoteExec;
use crate::fanout::{for_each_node, require_all};
use crate::logging::Logger;
use crate::proxmox::{ClusterStatusEntry, ProxmoxClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for per-node liveness probes.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Connect timeout for the initial seed-node probe.
pub const SEED_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One cluster member as observed during the precondition pass.
#[derive(Debug, Clone)]
pub struct Node {
    pub host: String,
    pub reachable: bool,
    pub is_proxmox: bool,
    pub has_updates: bool,
}

impl Node {
    fn new(host: String) -> Self {
        Self {
            host,
            reachable: false,
            is_proxmox: false,
            has_updates: false,
        }
    }
}

/// The set of nodes this run operates on. Membership is fixed once built;
/// rediscovery is not attempted after start.
#[derive(Debug, Clone)]
pub struct ClusterView {
    /// The node used for cluster-wide queries.
    pub seed: String,
    pub nodes: Vec<Node>,
}

impl ClusterView {
    pub fn hosts(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.host.clone()).collect()
    }
}

/// The ordered sequence of nodes to upgrade. Every entry was observed
/// reachable and Proxmox at plan time; order is the order provided or
/// discovered.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub nodes: Vec<String>,
}

/// Projects the host list out of `cluster/status`: only `node` entries
/// count, and `use_ip` selects `.ip` over `.name`.
pub(crate) fn project_members(
    entries: &[ClusterStatusEntry],
    use_ip: bool,
) -> UpgradeResult<Vec<String>> {
    entries
        .iter()
        .filter(|entry| entry.is_node())
        .map(|entry| {
            if use_ip {
                entry.ip.clone().ok_or_else(|| {
                    UpgradeError::Unexpected(format!(
                        "cluster/status entry '{}' has no ip field",
                        entry.name
                    ))
                })
            } else {
                Ok(entry.name.clone())
            }
        })
        .collect()
}

/// Discovers members and runs the cluster-wide checks that gate the rollout.
pub struct ClusterInspector {
    exec: Arc<dyn RemoteExec>,
    cfg: Arc<RunConfig>,
    logger: Logger,
}

impl ClusterInspector {
    pub fn new(exec: Arc<dyn RemoteExec>, cfg: Arc<RunConfig>, logger: Logger) -> Self {
        Self { exec, cfg, logger }
    }

    fn client(&self, host: &str, logger: Logger) -> ProxmoxClient {
        ProxmoxClient::new(self.exec.clone(), host, self.cfg.dry_run, logger)
    }

    /// Resolves the member list per the configured seed mode.
    pub async fn resolve_members(&self) -> UpgradeResult<ClusterView> {
        let hosts = match self.cfg.seed_mode() {
            SeedMode::ExplicitList(nodes) => {
                self.logger
                    .verbose(format!("using explicit node list: {}", nodes.join(", ")));
                nodes.to_vec()
            }
            SeedMode::FromClusterNode(seed) => {
                let client = self.client(seed, self.logger.with_prefix(seed));
                if !client.whoami(SEED_PROBE_TIMEOUT).await? {
                    return Err(UpgradeError::Unreachable {
                        node: seed.to_string(),
                    });
                }
                if !client.has_pvesh().await? {
                    return Err(UpgradeError::NotProxmox {
                        node: seed.to_string(),
                    });
                }
                let entries = client.cluster_status().await?;
                let members = project_members(&entries, self.cfg.cluster_node_use_ip)?;
                self.logger.info(format!(
                    "discovered {} cluster member(s): {}",
                    members.len(),
                    members.join(", ")
                ));
                members
            }
        };
        if hosts.is_empty() {
            return Err(UpgradeError::Config("no nodes to operate on".to_string()));
        }
        let seed = hosts[0].clone();
        Ok(ClusterView {
            seed,
            nodes: hosts.into_iter().map(Node::new).collect(),
        })
    }

    /// All global preconditions. Any failure aborts the run before a single
    /// mutating command has been issued.
    pub async fn check_preconditions(&self, view: &mut ClusterView) -> UpgradeResult<()> {
        let hosts = view.hosts();

        self.logger.verbose("checking node reachability");
        let exec = self.exec.clone();
        let dry_run = self.cfg.dry_run;
        let results = for_each_node(&self.logger, &hosts, move |host, log| {
            let exec = exec.clone();
            async move {
                let client = ProxmoxClient::new(exec, host.clone(), dry_run, log);
                if client.whoami(LIVENESS_TIMEOUT).await? {
                    Ok(())
                } else {
                    Err(UpgradeError::Unreachable { node: host })
                }
            }
        })
        .await;
        require_all(&self.logger, "reachability check", results)?;
        for node in &mut view.nodes {
            node.reachable = true;
        }

        self.logger.verbose("checking for the PVE stack");
        let exec = self.exec.clone();
        let results = for_each_node(&self.logger, &hosts, move |host, log| {
            let exec = exec.clone();
            async move {
                let client = ProxmoxClient::new(exec, host.clone(), dry_run, log);
                if client.has_pvesh().await? {
                    Ok(())
                } else {
                    Err(UpgradeError::NotProxmox { node: host })
                }
            }
        })
        .await;
        require_all(&self.logger, "Proxmox detection", results)?;
        for node in &mut view.nodes {
            node.is_proxmox = true;
        }

        self.logger.verbose("checking ha-manager for offline nodes");
        let seed_client = self.client(&view.seed, self.logger.with_prefix(view.seed.as_str()));
        let offline = seed_client.ha_status().await?.offline_count();
        if offline > 0 {
            return Err(UpgradeError::ClusterNotHealthy(format!(
                "{offline} node(s) offline according to ha-manager"
            )));
        }

        if !self.cfg.allow_running_tasks {
            self.logger.verbose("checking for active cluster tasks");
            let exec = self.exec.clone();
            let results = for_each_node(&self.logger, &hosts, move |host, log| {
                let exec = exec.clone();
                async move {
                    let client = ProxmoxClient::new(exec, host, dry_run, log);
                    Ok(!client.active_tasks().await?.is_empty())
                }
            })
            .await;
            let tasks = require_all(&self.logger, "task check", results)?;
            let busy: Vec<String> = tasks
                .into_iter()
                .filter(|(_, tasks_present)| *tasks_present)
                .map(|(host, _)| host)
                .collect();
            if !busy.is_empty() {
                return Err(UpgradeError::ClusterNotHealthy(format!(
                    "active tasks running on: {}",
                    busy.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Refreshes the package indexes everywhere, then selects the nodes
    /// that actually have something to upgrade (all of them under
    /// `--force-upgrade`). Plan order follows the view's order regardless
    /// of fan-out completion order.
    pub async fn build_plan(&self, view: &mut ClusterView) -> UpgradeResult<UpgradePlan> {
        let hosts = view.hosts();

        self.logger.info("refreshing package indexes on all nodes");
        let exec = self.exec.clone();
        let dry_run = self.cfg.dry_run;
        let results = for_each_node(&self.logger, &hosts, move |host, log| {
            let exec = exec.clone();
            async move {
                ProxmoxClient::new(exec, host, dry_run, log).apt_update().await
            }
        })
        .await;
        require_all(&self.logger, "apt-get update", results)?;

        if self.cfg.force_upgrade {
            self.logger
                .info("--force-upgrade: including every node in the plan");
            for node in &mut view.nodes {
                node.has_updates = true;
            }
            return Ok(UpgradePlan { nodes: hosts });
        }

        self.logger.verbose("probing nodes for pending updates");
        let exec = self.exec.clone();
        let results = for_each_node(&self.logger, &hosts, move |host, log| {
            let exec = exec.clone();
            async move {
                ProxmoxClient::new(exec, host, dry_run, log)
                    .apt_has_updates()
                    .await
            }
        })
        .await;
        let updates: HashMap<String, bool> = require_all(&self.logger, "update check", results)?
            .into_iter()
            .collect();

        let mut plan = Vec::new();
        for node in &mut view.nodes {
            node.has_updates = updates.get(&node.host).copied().unwrap_or(false);
            if node.has_updates {
                plan.push(node.host.clone());
            } else {
                self.logger
                    .info(format!("{}: no pending updates, skipping", node.host));
            }
        }
        Ok(UpgradePlan { nodes: plan })
    }
}
