//! Domain models for the `pvesh` JSON surface.
//!
//! These structures mirror what `pvesh get ... --output-form=json` prints on
//! a PVE node. Responses carry more fields than we consume; everything not
//! needed by the orchestrator is either optional or ignored so that minor
//! Proxmox releases do not break parsing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of `cluster/status`.
///
/// The list mixes a `cluster` summary entry with one `node` entry per
/// member; only `node` entries describe hosts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterStatusEntry {
    /// Entry type (`cluster`, `node`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Cluster-unique name of the entry.
    pub name: String,
    /// Node management IP (absent on the `cluster` entry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Quorum membership flag as reported by corosync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<u8>,
    /// Set on the entry describing the queried node itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<u8>,
    /// Corosync node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodeid: Option<i64>,
}

impl ClusterStatusEntry {
    pub fn is_node(&self) -> bool {
        self.kind == "node"
    }
}

/// The response of `cluster/ha/status/manager_status`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct HaManagerStatus {
    #[serde(default)]
    pub manager_status: ManagerStatus,
}

/// The `manager_status` object: per-node HA state as seen by the CRM.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ManagerStatus {
    /// Node name -> mode string (`online`, `maintenance`, ...).
    #[serde(default)]
    pub node_status: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_node: Option<String>,
}

impl HaManagerStatus {
    /// The HA mode of `node`, or `"unknown"` when the CRM does not list it.
    /// The lookup is a plain map access keyed by the raw node name, so
    /// hostnames containing dots are safe.
    pub fn node_mode(&self, node: &str) -> &str {
        self.manager_status
            .node_status
            .get(node)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Number of nodes the CRM does not consider available. `maintenance`
    /// is an orderly state and does not count; anything else that is not
    /// `online` does.
    pub fn offline_count(&self) -> usize {
        self.manager_status
            .node_status
            .values()
            .filter(|mode| *mode != "online" && *mode != "maintenance")
            .count()
    }
}

/// One guest entry from `nodes/<node>/lxc` or `nodes/<node>/qemu`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GuestEntry {
    /// Current status (`running`, `stopped`, ...).
    pub status: String,
    /// Guest identifier. LXC reports this as a string, QEMU as a number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmid: Option<serde_json::Value>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GuestEntry {
    /// Everything that is not fully stopped still occupies the node.
    pub fn is_active(&self) -> bool {
        self.status != "stopped"
    }
}

/// One entry from `nodes/<node>/tasks --source=active`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upid: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}
