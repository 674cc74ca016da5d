//! Rolling upgrade orchestrator for Proxmox VE clusters.
//!
//! Drives each node of a PVE cluster through a controlled sequence
//! (pre-checks, cluster-wide preconditions, HA maintenance entry, package
//! upgrade, conditional reboot, cleanup, maintenance exit), one node at a
//! time, while the rest of the cluster keeps serving guests.
//!
//! Everything talks to the nodes through the [`exec::RemoteExec`] seam
//! (SSH in production), so the whole rollout is testable against scripted
//! transports. Nothing is mutated before every global precondition has
//! passed:
//!
//! - every node answers SSH and carries the PVE stack,
//! - ha-manager reports no offline member,
//! - no node is running an active task (unless explicitly allowed).
//!
//! # Example
//!
//! ```no_run
//! use clap::Parser;
//! use pve_upgrade::exec::ssh::SshExec;
//! use pve_upgrade::{Logger, Orchestrator, RunConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pve_upgrade::UpgradeResult<()> {
//!     let cfg = Arc::new(RunConfig::parse_from(["pve-upgrade", "-c", "pve1"]));
//!     let logger = Logger::new(cfg.verbosity(), cfg.no_color);
//!     let exec = Arc::new(SshExec::new(&cfg, logger.clone()));
//!     Orchestrator::new(exec, cfg, logger).run().await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod logging;
pub mod orchestrator;
pub mod poll;
pub mod proxmox;
pub mod rollout;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{RunConfig, SeedMode};
pub use error::{UpgradeError, UpgradeResult};
pub use logging::Logger;
pub use orchestrator::Orchestrator;
