//! Run configuration.
//!
//! All options are parsed once at startup into an immutable [`RunConfig`]
//! that is threaded through the orchestrator. Exactly one of
//! `--cluster-node` / `--node ...` must be given; clap enforces the
//! exclusivity before any remote contact happens.

use clap::{ArgAction, ArgGroup, Parser};

/// How the set of nodes to operate on is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode<'a> {
    /// Discover the member list from this cluster node.
    FromClusterNode(&'a str),
    /// Operate on exactly the listed nodes.
    ExplicitList(&'a [String]),
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "pve-upgrade",
    version,
    about = "Rolling upgrade orchestrator for Proxmox VE clusters",
    long_about = "Upgrades the nodes of a Proxmox VE cluster one at a time: \
                  pre-checks, HA maintenance mode, dist-upgrade, conditional \
                  reboot, cleanup, maintenance exit. The rest of the cluster \
                  keeps serving guests throughout."
)]
#[command(group(
    ArgGroup::new("targets").required(true).args(["cluster_node", "nodes"])
))]
pub struct RunConfig {
    /// Discover cluster members from this node
    #[arg(short = 'c', long = "cluster-node", value_name = "HOST")]
    pub cluster_node: Option<String>,

    /// Upgrade exactly this node (repeatable)
    #[arg(short = 'n', long = "node", value_name = "HOST")]
    pub nodes: Vec<String>,

    /// Use the nodes' IP addresses instead of their names at discovery
    #[arg(long = "use-ip")]
    pub cluster_node_use_ip: bool,

    /// SSH login user
    #[arg(
        long = "ssh-user",
        value_name = "USER",
        env = "PVE_UPGRADE_SSH_USER",
        default_value = "root"
    )]
    pub ssh_user: String,

    /// Extra ssh -o option (repeatable)
    #[arg(short = 'o', long = "ssh-option", value_name = "OPT")]
    pub ssh_options: Vec<String>,

    /// Refuse password prompts (forces PasswordAuthentication=no)
    #[arg(long = "ssh-key-auth-only")]
    pub ssh_key_auth_only: bool,

    /// Log mutating commands as NO-OP instead of executing them
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Package to reinstall after the upgrade (repeatable)
    #[arg(long = "reinstall", value_name = "PKG")]
    pub pkgs_reinstall: Vec<String>,

    /// Upgrade nodes even when they report no pending updates
    #[arg(long = "force-upgrade")]
    pub force_upgrade: bool,

    /// Reboot every node even without a kernel mismatch
    #[arg(long = "force-reboot")]
    pub force_reboot: bool,

    /// Skip the HA maintenance transitions and the LRM gate entirely
    #[arg(
        long = "no-maintenance-mode",
        action = ArgAction::SetFalse,
        default_value_t = true
    )]
    pub use_maintenance_mode: bool,

    /// Do not wait for guests to drain off a node before upgrading it
    #[arg(long = "allow-running-guests")]
    pub allow_running_guests: bool,

    /// Ignore active cluster tasks before and during the rollout
    #[arg(long = "allow-running-tasks")]
    pub allow_running_tasks: bool,

    /// Compatibility no-op; JSON is parsed in-process
    #[arg(long = "jq-bin", value_name = "PATH")]
    pub jq_path: Option<String>,

    /// Disable coloured output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Increase verbosity (up to -vvvvvvv; 5+ also makes ssh verbose)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl RunConfig {
    pub fn seed_mode(&self) -> SeedMode<'_> {
        match &self.cluster_node {
            Some(seed) => SeedMode::FromClusterNode(seed),
            None => SeedMode::ExplicitList(&self.nodes),
        }
    }

    /// Verbosity clamped to the defined 0..=7 range.
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(7)
    }
}
