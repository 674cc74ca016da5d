use thiserror::Error;

/// Result type alias for upgrade operations.
pub type UpgradeResult<T> = Result<T, UpgradeError>;

/// Enumeration of possible errors.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Configuration error (mutually exclusive flags, missing values, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A node did not answer the SSH liveness probe.
    #[error("Node '{node}' is not reachable over SSH")]
    Unreachable { node: String },

    /// A node is reachable but does not carry the PVE stack.
    #[error("Node '{node}' is not a Proxmox host (pvesh not found)")]
    NotProxmox { node: String },

    /// The cluster failed a global precondition; nothing has been mutated.
    #[error("Cluster is not healthy: {0}")]
    ClusterNotHealthy(String),

    /// A remote command returned a non-zero exit code where success was required.
    #[error("Command [{command}] on '{node}' failed with exit code {code}: {stderr}")]
    CommandFailure {
        node: String,
        command: String,
        code: i32,
        stderr: String,
    },

    /// The SSH transport itself could not be started.
    #[error("Failed to run ssh for '{node}': {source}")]
    Transport {
        node: String,
        #[source]
        source: std::io::Error,
    },

    /// A remote command produced output that is not the expected JSON.
    #[error("Failed to decode JSON from [{command}] on '{node}': {source}")]
    Json {
        node: String,
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// An aggregated fan-out check failed on one or more nodes.
    #[error("{check} failed on {failed} of {total} node(s)")]
    FanOut {
        check: String,
        failed: usize,
        total: usize,
    },

    /// Other unexpected errors.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
