//! Typed surface over the Proxmox VE tooling reachable on a node.

mod client;
mod model;

pub use client::ProxmoxClient;
pub use model::{ClusterStatusEntry, GuestEntry, HaManagerStatus, TaskEntry};
