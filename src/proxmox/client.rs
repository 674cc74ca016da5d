//! Typed remote operations against one Proxmox node.
//!
//! Every call shells out over the [`RemoteExec`] transport; JSON-returning
//! calls go through `pvesh get ... --output-form=json` and are parsed
//! in-process. `$(hostname)` in command strings is expanded by the remote
//! shell, never locally.

use crate::error::{UpgradeError, UpgradeResult};
use crate::exec::{CommandOutput, ExecOpts, RemoteExec};
use crate::logging::Logger;
use crate::proxmox::model::{ClusterStatusEntry, GuestEntry, HaManagerStatus, TaskEntry};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const APT: &str = "DEBIAN_FRONTEND=noninteractive apt-get";

/// The GRUB parse Proxmox installs expect: first `vmlinuz` entry, stripped
/// of the `/boot/vmlinuz-` and `/ROOT/pve-1@` prefixes.
const EXPECTED_KERNEL_PROBE: &str = "grep vmlinuz /boot/grub/grub.cfg | head -1 | awk '{ print $2 }' | sed -e 's%/boot/vmlinuz-%%;s%/ROOT/pve-1@%%'";

/// A client bound to a single node.
///
/// Mutating calls (the apt/ha-manager/reboot set) are routed through one
/// dry-run gate: with `dry_run` set they are logged with a `NO-OP` marker
/// and skipped. Read-only queries always execute.
pub struct ProxmoxClient {
    exec: Arc<dyn RemoteExec>,
    host: String,
    dry_run: bool,
    logger: Logger,
}

impl ProxmoxClient {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        host: impl Into<String>,
        dry_run: bool,
        logger: Logger,
    ) -> Self {
        Self {
            exec,
            host: host.into(),
            dry_run,
            logger,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str, opts: &ExecOpts) -> UpgradeResult<CommandOutput> {
        self.exec.run(&self.host, command, opts).await
    }

    /// Runs a command that must succeed; non-zero exit is an error.
    async fn run_ok(&self, command: &str) -> UpgradeResult<CommandOutput> {
        let output = self.run(command, &ExecOpts::default()).await?;
        if !output.success() {
            return Err(UpgradeError::CommandFailure {
                node: self.host.clone(),
                command: command.to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// The single dry-run gate for mutating commands.
    async fn mutate(&self, command: &str) -> UpgradeResult<()> {
        if self.dry_run {
            self.logger.info(format!("NO-OP (dry-run): {command}"));
            return Ok(());
        }
        self.run_ok(command).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_args: &str) -> UpgradeResult<T> {
        let command = format!("pvesh get {path_and_args} --output-form=json");
        let output = self.run_ok(&command).await?;
        serde_json::from_str(output.stdout.trim()).map_err(|source| UpgradeError::Json {
            node: self.host.clone(),
            command,
            source,
        })
    }

    /// True iff an SSH login succeeds within `timeout`.
    pub async fn whoami(&self, timeout: Duration) -> UpgradeResult<bool> {
        let opts = ExecOpts::with_connect_timeout(timeout);
        Ok(self.run("whoami", &opts).await?.success())
    }

    /// True iff the node carries the PVE stack.
    pub async fn has_pvesh(&self) -> UpgradeResult<bool> {
        Ok(self.run("hash pvesh", &ExecOpts::default()).await?.success())
    }

    /// The node's own hostname, which is what ha-manager keys its node
    /// status map by (the operator-supplied name may be an IP).
    pub async fn remote_hostname(&self) -> UpgradeResult<String> {
        let output = self.run_ok("hostname").await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn cluster_status(&self) -> UpgradeResult<Vec<ClusterStatusEntry>> {
        self.get_json("cluster/status").await
    }

    pub async fn ha_status(&self) -> UpgradeResult<HaManagerStatus> {
        self.get_json("cluster/ha/status/manager_status").await
    }

    /// LXC guests on this node that are not stopped.
    pub async fn running_lxc(&self) -> UpgradeResult<Vec<GuestEntry>> {
        let guests: Vec<GuestEntry> = self.get_json("nodes/$(hostname)/lxc").await?;
        Ok(guests.into_iter().filter(GuestEntry::is_active).collect())
    }

    /// QEMU guests on this node that are not stopped.
    pub async fn running_qemu(&self) -> UpgradeResult<Vec<GuestEntry>> {
        let guests: Vec<GuestEntry> = self.get_json("nodes/$(hostname)/qemu").await?;
        Ok(guests.into_iter().filter(GuestEntry::is_active).collect())
    }

    pub async fn active_tasks(&self) -> UpgradeResult<Vec<TaskEntry>> {
        self.get_json("nodes/$(hostname)/tasks --source=active").await
    }

    /// Refreshes the package indexes. Runs even under dry-run: the
    /// candidate-selection probe needs a current cache to be meaningful.
    pub async fn apt_update(&self) -> UpgradeResult<()> {
        self.run_ok(&format!("{APT} update")).await?;
        Ok(())
    }

    /// True iff the node has pending updates. `apt-get -qq -s upgrade`
    /// prints nothing at all when there is nothing to do.
    pub async fn apt_has_updates(&self) -> UpgradeResult<bool> {
        let output = self.run_ok(&format!("{APT} -qq -s upgrade")).await?;
        Ok(!output.stdout.trim().is_empty())
    }

    pub async fn apt_dist_upgrade(&self) -> UpgradeResult<()> {
        self.mutate(&format!("{APT} dist-upgrade -y")).await
    }

    pub async fn apt_reinstall(&self, pkgs: &[String]) -> UpgradeResult<()> {
        self.mutate(&format!("{APT} reinstall {}", pkgs.join(" "))).await
    }

    pub async fn apt_autoremove(&self) -> UpgradeResult<()> {
        self.mutate(&format!("{APT} autoremove -y")).await
    }

    pub async fn enter_maintenance(&self) -> UpgradeResult<()> {
        self.mutate("ha-manager crm-command node-maintenance enable $(hostname)")
            .await
    }

    pub async fn exit_maintenance(&self) -> UpgradeResult<()> {
        self.mutate("ha-manager crm-command node-maintenance disable $(hostname)")
            .await
    }

    /// The kernel the bootloader would load next.
    pub async fn expected_kernel(&self) -> UpgradeResult<String> {
        let output = self.run_ok(EXPECTED_KERNEL_PROBE).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// The kernel currently booted.
    pub async fn booted_kernel(&self) -> UpgradeResult<String> {
        let output = self.run_ok("uname -r").await?;
        Ok(output.stdout.trim().to_string())
    }

    /// A kernel mismatch is the canonical signal that a reboot is required.
    pub async fn needs_reboot(&self) -> UpgradeResult<bool> {
        let expected = self.expected_kernel().await?;
        let booted = self.booted_kernel().await?;
        self.logger
            .verbose(format!("kernel expected={expected} booted={booted}"));
        Ok(expected != booted)
    }

    /// Issues `reboot`. The connection dies while the command runs, so the
    /// outcome is not meaningful and is deliberately ignored; the post-reboot
    /// liveness probe is the authoritative signal.
    pub async fn reboot(&self) {
        if self.dry_run {
            self.logger.info("NO-OP (dry-run): reboot");
            return;
        }
        let _ = self.run("reboot", &ExecOpts::default()).await;
    }

    /// Tails the kernel log until the connection dies. Best-effort output
    /// during shutdown; never treated as a failure.
    pub async fn tail_dmesg(&self) {
        let _ = self.run("dmesg -W", &ExecOpts::default()).await;
    }

    pub async fn service_active(&self, name: &str) -> UpgradeResult<bool> {
        // `systemctl is-active` exits non-zero for inactive units; only the
        // printed state matters here.
        let output = self
            .run(&format!("systemctl is-active {name}"), &ExecOpts::default())
            .await?;
        Ok(output.stdout.trim() == "active")
    }
}
