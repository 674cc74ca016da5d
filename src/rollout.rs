//! The per-node upgrade state machine.
//!
//! One node at a time walks through: cluster-settled gate, maintenance
//! entry, task/guest drain, dist-upgrade, conditional reboot, cleanup,
//! maintenance exit. Steps are skipped according to the run configuration;
//! the mutating commands within each step go through the client's dry-run
//! gate.

use crate::cluster::LIVENESS_TIMEOUT;
use crate::config::RunConfig;
use crate::error::UpgradeResult;
use crate::exec::RemoteExec;
use crate::logging::Logger;
use crate::poll::{wait_until, POLL_FAST, POLL_SLOW};
use crate::proxmox::ProxmoxClient;
use std::sync::Arc;
use std::time::Duration;

/// The visible countdown before an actual reboot, so the operator can still
/// interrupt the run.
const REBOOT_WARNING: Duration = Duration::from_secs(5);

const MODE_MAINTENANCE: &str = "maintenance";
const MODE_ONLINE: &str = "online";

/// Drives one node from `ready` to `done`.
pub struct NodeStateMachine {
    client: ProxmoxClient,
    cfg: Arc<RunConfig>,
    logger: Logger,
    /// The node's own hostname: the key ha-manager uses in its node status
    /// map, which may differ from the operator-supplied address.
    ha_name: String,
}

impl NodeStateMachine {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        cfg: Arc<RunConfig>,
        host: impl Into<String>,
        logger: Logger,
    ) -> Self {
        let host = host.into();
        let client = ProxmoxClient::new(exec, host, cfg.dry_run, logger.clone());
        Self {
            client,
            cfg,
            logger,
            ha_name: String::new(),
        }
    }

    /// Runs every step in order. The first failing step terminates the run;
    /// a node that already entered maintenance stays there for the operator
    /// to handle.
    pub async fn run(&mut self) -> UpgradeResult<()> {
        self.logger.info("starting upgrade");
        self.ha_name = self.client.remote_hostname().await?;
        self.logger.debug(format!("ha-manager node name: {}", self.ha_name));

        self.wait_cluster_settled().await?;

        if self.cfg.use_maintenance_mode {
            self.logger.info("entering maintenance mode");
            self.client.enter_maintenance().await?;
            if !self.cfg.dry_run {
                self.wait_node_mode(MODE_MAINTENANCE).await?;
            }
        }

        if !self.cfg.allow_running_tasks {
            self.wait_tasks_idle().await?;
        }

        if !self.cfg.allow_running_guests && !self.cfg.dry_run {
            self.wait_guests_drained().await?;
        }

        self.logger.info("running dist-upgrade");
        self.client.apt_dist_upgrade().await?;

        self.maybe_reboot().await?;
        self.post_upgrade().await?;

        if self.cfg.use_maintenance_mode {
            self.leave_maintenance().await?;
        }

        self.logger.success("upgrade finished");
        Ok(())
    }

    /// No node starts its upgrade while ha-manager sees any member offline.
    async fn wait_cluster_settled(&self) -> UpgradeResult<()> {
        let client = &self.client;
        wait_until(
            &self.logger,
            "cluster offline count to reach 0",
            POLL_FAST,
            || async { Ok(client.ha_status().await?.offline_count()) },
            |count| *count == 0,
        )
        .await?;
        Ok(())
    }

    /// Polls the HA node status map until this node reports `target`.
    /// Unrecognised or missing modes simply mean "not yet".
    async fn wait_node_mode(&self, target: &str) -> UpgradeResult<()> {
        let client = &self.client;
        let ha_name = &self.ha_name;
        wait_until(
            &self.logger,
            &format!("node mode '{target}'"),
            POLL_FAST,
            || async { Ok(client.ha_status().await?.node_mode(ha_name).to_string()) },
            |mode| mode == target,
        )
        .await?;
        Ok(())
    }

    async fn wait_tasks_idle(&self) -> UpgradeResult<()> {
        let client = &self.client;
        wait_until(
            &self.logger,
            "active task count to reach 0",
            POLL_SLOW,
            || async { Ok(client.active_tasks().await?.len()) },
            |count| *count == 0,
        )
        .await?;
        Ok(())
    }

    /// Waits until the HA manager has migrated every guest away.
    async fn wait_guests_drained(&self) -> UpgradeResult<()> {
        let client = &self.client;
        wait_until(
            &self.logger,
            "running guest count to reach 0",
            POLL_SLOW,
            || async {
                let lxc = client.running_lxc().await?.len();
                let qemu = client.running_qemu().await?.len();
                Ok(lxc + qemu)
            },
            |count| *count == 0,
        )
        .await?;
        Ok(())
    }

    /// Reboots iff forced or the bootloader would load a different kernel
    /// than the one running. Under dry-run the decision is logged but the
    /// reboot is suppressed.
    async fn maybe_reboot(&self) -> UpgradeResult<()> {
        let reboot = if self.cfg.force_reboot {
            self.logger.info("--force-reboot: rebooting regardless of kernel state");
            true
        } else {
            let needed = self.client.needs_reboot().await?;
            if needed {
                self.logger.info("kernel mismatch: reboot required");
            } else {
                self.logger.info("booted kernel is current, no reboot needed");
            }
            needed
        };
        if !reboot {
            return Ok(());
        }
        if self.cfg.dry_run {
            self.client.reboot().await;
            return Ok(());
        }

        self.logger.warn(format!(
            "rebooting in {} seconds (Ctrl-C to abort)",
            REBOOT_WARNING.as_secs()
        ));
        tokio::time::sleep(REBOOT_WARNING).await;
        self.client.reboot().await;
        // Holds until the connection dies with the node; output is
        // best-effort and failure means nothing here.
        self.client.tail_dmesg().await;
        self.wait_node_up().await?;
        Ok(())
    }

    async fn wait_node_up(&self) -> UpgradeResult<()> {
        let client = &self.client;
        wait_until(
            &self.logger,
            "node to answer ssh again",
            POLL_FAST,
            || async { client.whoami(LIVENESS_TIMEOUT).await },
            |up| *up,
        )
        .await?;
        self.logger.info("node is back up");
        Ok(())
    }

    async fn post_upgrade(&self) -> UpgradeResult<()> {
        if !self.cfg.pkgs_reinstall.is_empty() {
            self.logger.info(format!(
                "reinstalling: {}",
                self.cfg.pkgs_reinstall.join(", ")
            ));
            self.client.apt_reinstall(&self.cfg.pkgs_reinstall).await?;
        }
        // A second pass removes packages orphaned by the first.
        self.client.apt_autoremove().await?;
        self.client.apt_autoremove().await?;
        Ok(())
    }

    async fn leave_maintenance(&self) -> UpgradeResult<()> {
        // The LRM must be back before maintenance can be lifted cleanly.
        let client = &self.client;
        wait_until(
            &self.logger,
            "pve-ha-lrm to be active",
            POLL_FAST,
            || async {
                Ok(if client.service_active("pve-ha-lrm").await? {
                    "active".to_string()
                } else {
                    "inactive".to_string()
                })
            },
            |state| state == "active",
        )
        .await?;

        self.logger.info("leaving maintenance mode");
        self.client.exit_maintenance().await?;
        if !self.cfg.dry_run {
            self.wait_node_mode(MODE_ONLINE).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::tests::fake::{capture_logger, ha_progression, healthy_node, FakeExec};
    use clap::Parser;

    fn machine(exec: &Arc<FakeExec>, args: &[&str], host: &str) -> NodeStateMachine {
        let mut full = vec!["pve-upgrade"];
        full.extend_from_slice(args);
        let cfg = Arc::new(RunConfig::try_parse_from(full).unwrap());
        let (logger, _) = capture_logger(0);
        NodeStateMachine::new(exec.clone(), cfg, host, logger)
    }

    fn mutating_commands(exec: &FakeExec) -> Vec<String> {
        exec.calls()
            .into_iter()
            .map(|call| call.command)
            .filter(|command| {
                command.contains("dist-upgrade")
                    || command.contains("reinstall")
                    || command.contains("autoremove")
                    || command.contains("ha-manager")
                    || command == "reboot"
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_ordering_with_reboot() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        // Online at the settled gate, maintenance once entered, online
        // again after the exit.
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.8-1-pve\n"));
        // The node disappears once, then answers again.
        exec.on_seq(
            "whoami",
            vec![
                CommandOutput::failed(255, "connection refused"),
                CommandOutput::ok("root\n"),
            ],
        );

        machine(&exec, &["-n", "pve2"], "pve2").run().await.unwrap();

        assert_eq!(
            mutating_commands(&exec),
            vec![
                "ha-manager crm-command node-maintenance enable $(hostname)",
                "DEBIAN_FRONTEND=noninteractive apt-get dist-upgrade -y",
                "reboot",
                "DEBIAN_FRONTEND=noninteractive apt-get autoremove -y",
                "DEBIAN_FRONTEND=noninteractive apt-get autoremove -y",
                "ha-manager crm-command node-maintenance disable $(hostname)",
            ]
        );
        // dmesg tail is issued between reboot and the liveness poll.
        assert!(exec.was_run("dmesg -W"));
    }

    #[tokio::test]
    async fn test_no_reboot_when_kernels_match() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.12-1-pve\n"));

        machine(&exec, &["-n", "pve2"], "pve2").run().await.unwrap();

        assert!(!exec.was_run("reboot"));
        assert!(!exec.was_run("dmesg -W"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reboot_skips_kernel_probe() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);

        machine(&exec, &["-n", "pve2", "--force-reboot"], "pve2")
            .run()
            .await
            .unwrap();

        assert!(exec.was_run("reboot"));
        assert!(!exec.was_run("grep vmlinuz"));
    }

    #[tokio::test]
    async fn test_reinstall_between_upgrade_and_autoremove() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.12-1-pve\n"));

        machine(
            &exec,
            &["-n", "pve2", "--reinstall", "proxmox-truenas"],
            "pve2",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(
            mutating_commands(&exec),
            vec![
                "ha-manager crm-command node-maintenance enable $(hostname)",
                "DEBIAN_FRONTEND=noninteractive apt-get dist-upgrade -y",
                "DEBIAN_FRONTEND=noninteractive apt-get reinstall proxmox-truenas",
                "DEBIAN_FRONTEND=noninteractive apt-get autoremove -y",
                "DEBIAN_FRONTEND=noninteractive apt-get autoremove -y",
                "ha-manager crm-command node-maintenance disable $(hostname)",
            ]
        );
    }

    #[tokio::test]
    async fn test_maintenance_disabled_skips_ha_entirely() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.12-1-pve\n"));

        machine(&exec, &["-n", "pve2", "--no-maintenance-mode"], "pve2")
            .run()
            .await
            .unwrap();

        let commands: Vec<String> = exec.calls().into_iter().map(|c| c.command).collect();
        assert!(!commands.iter().any(|c| c.contains("ha-manager")));
        assert!(!commands.iter().any(|c| c.contains("systemctl")));
        // The guest-drain probes still run.
        assert!(exec.was_run("nodes/$(hostname)/lxc"));
        assert!(exec.was_run("nodes/$(hostname)/qemu"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_drain_waits_for_zero() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on_host_seq(
            "pve2",
            "nodes/$(hostname)/qemu",
            vec![
                CommandOutput::ok(r#"[{"status":"running","vmid":100,"name":"vm"}]"#),
                CommandOutput::ok(r#"[{"status":"running","vmid":100,"name":"vm"}]"#),
                CommandOutput::ok(r#"[{"status":"stopped","vmid":100,"name":"vm"}]"#),
            ],
        );

        machine(&exec, &["-n", "pve2"], "pve2").run().await.unwrap();

        let qemu_probes = exec
            .calls()
            .iter()
            .filter(|call| call.command.contains("/qemu"))
            .count();
        assert_eq!(qemu_probes, 3);
    }

    #[tokio::test]
    async fn test_allow_running_guests_skips_the_drain() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on_host(
            "pve2",
            "nodes/$(hostname)/qemu",
            CommandOutput::ok(r#"[{"status":"running","vmid":100}]"#),
        );

        machine(&exec, &["-n", "pve2", "--allow-running-guests"], "pve2")
            .run()
            .await
            .unwrap();

        assert!(!exec.was_run("nodes/$(hostname)/qemu"));
        assert!(!exec.was_run("nodes/$(hostname)/lxc"));
    }

    #[tokio::test]
    async fn test_dry_run_logs_reboot_decision_without_rebooting() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        exec.on("grep vmlinuz", CommandOutput::ok("6.8.12-1-pve\n"));
        exec.on("uname -r", CommandOutput::ok("6.8.8-1-pve\n"));

        let cfg = Arc::new(
            RunConfig::try_parse_from(["pve-upgrade", "-n", "pve2", "--dry-run"]).unwrap(),
        );
        let (logger, buf) = capture_logger(0);
        NodeStateMachine::new(exec.clone(), cfg, "pve2", logger)
            .run()
            .await
            .unwrap();

        assert!(!exec.was_run("reboot"));
        let log = buf.contents();
        assert!(log.contains("reboot required"));
        assert!(log.contains("NO-OP (dry-run): reboot"));
    }

    #[tokio::test]
    async fn test_failed_upgrade_stops_before_maintenance_exit() {
        let exec = FakeExec::new();
        healthy_node(&exec, "pve2");
        ha_progression(&exec, "pve2", &["online", "maintenance", "online"]);
        exec.on(
            "dist-upgrade",
            CommandOutput::failed(100, "E: unable to fetch archives"),
        );

        let err = machine(&exec, &["-n", "pve2"], "pve2").run().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::UpgradeError::CommandFailure { .. }
        ));
        // The node stays in maintenance: no disable was issued.
        assert!(exec.was_run("node-maintenance enable"));
        assert!(!exec.was_run("node-maintenance disable"));
    }
}
