//! The remote execution seam.
//!
//! Everything the orchestrator does to a node goes through [`RemoteExec`],
//! so the whole rollout can be exercised against a scripted fake. The
//! production implementation is [`ssh::SshExec`].

use crate::error::UpgradeResult;
use async_trait::async_trait;
use std::time::Duration;

pub mod ssh;

/// The captured result of one remote command.
///
/// A non-zero exit code is not an error at this layer; the caller decides
/// what a failure means for its step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    /// Connection timeout for the transport. `None` means the transport's
    /// own default (no timeout for the SSH implementation).
    pub connect_timeout: Option<Duration>,
}

impl ExecOpts {
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
        }
    }
}

/// Runs a shell command on a named host.
///
/// The command string is interpreted by a shell on the remote side, so
/// expansions like `$(hostname)` evaluate remotely. Implementations must
/// only error on transport-level problems; remote command failure is
/// reported through [`CommandOutput::exit_code`].
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn run(
        &self,
        host: &str,
        command: &str,
        opts: &ExecOpts,
    ) -> UpgradeResult<CommandOutput>;
}
