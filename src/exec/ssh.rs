//! SSH transport: wraps the system `ssh` binary via `tokio::process`.

use crate::config::RunConfig;
use crate::error::{UpgradeError, UpgradeResult};
use crate::exec::{CommandOutput, ExecOpts, RemoteExec};
use crate::logging::Logger;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Executes commands over the system `ssh` client.
///
/// Stdout is collected whole and returned; stderr is forwarded line by line
/// into the log as it arrives (long-running `apt-get` output stays visible)
/// and also returned collected.
pub struct SshExec {
    user: String,
    options: Vec<String>,
    key_auth_only: bool,
    verbosity: u8,
    logger: Logger,
}

impl SshExec {
    pub fn new(cfg: &RunConfig, logger: Logger) -> Self {
        Self {
            user: cfg.ssh_user.clone(),
            options: cfg.ssh_options.clone(),
            key_auth_only: cfg.ssh_key_auth_only,
            verbosity: cfg.verbosity(),
            logger,
        }
    }

    /// The full argv passed to `ssh`, including host and command.
    fn argv(&self, host: &str, command: &str, opts: &ExecOpts) -> Vec<String> {
        let mut args = Vec::new();
        // Verbosity 5 asks the SSH client for verbose output, 7 for
        // extra-verbose output.
        if self.verbosity >= 7 {
            args.push("-vvv".to_string());
        } else if self.verbosity >= 5 {
            args.push("-v".to_string());
        }
        args.push("-l".to_string());
        args.push(self.user.clone());
        if let Some(timeout) = opts.connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs()));
        }
        if self.key_auth_only {
            args.push("-o".to_string());
            args.push("PasswordAuthentication=no".to_string());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(host.to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExec for SshExec {
    async fn run(
        &self,
        host: &str,
        command: &str,
        opts: &ExecOpts,
    ) -> UpgradeResult<CommandOutput> {
        let log = self.logger.with_prefix(host);
        let argv = self.argv(host, command, opts);
        log.debug2(format!("$ {command}"));
        if self.verbosity >= 6 {
            log.debug3(format!("+ ssh {}", argv.join(" ")));
        }

        let mut child = Command::new("ssh")
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| UpgradeError::Transport {
                node: host.to_string(),
                source,
            })?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let stderr_pipe = child.stderr.take().expect("stderr was piped");

        let stdout_fut = async {
            let mut buf = String::new();
            stdout_pipe.read_to_string(&mut buf).await.map(|_| buf)
        };
        let stderr_fut = async {
            let mut collected = String::new();
            let mut lines = BufReader::new(stderr_pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log.verbose(&line);
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        };

        let (stdout, stderr) = tokio::join!(stdout_fut, stderr_fut);
        let stdout = stdout.map_err(|source| UpgradeError::Transport {
            node: host.to_string(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| UpgradeError::Transport {
            node: host.to_string(),
            source,
        })?;
        let exit_code = status.code().unwrap_or(-1);
        log.debug3(format!("exit code {exit_code}"));

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    fn exec_for(args: &[&str]) -> SshExec {
        let mut full = vec!["pve-upgrade", "-n", "pve1"];
        full.extend_from_slice(args);
        let cfg = RunConfig::try_parse_from(full).unwrap();
        let logger = Logger::with_sink(cfg.verbosity(), Box::new(std::io::sink()));
        SshExec::new(&cfg, logger)
    }

    #[test]
    fn test_argv_defaults() {
        let exec = exec_for(&[]);
        let argv = exec.argv("pve1", "whoami", &ExecOpts::default());
        assert_eq!(argv, vec!["-l", "root", "pve1", "whoami"]);
    }

    #[test]
    fn test_argv_carries_user_and_options() {
        let exec = exec_for(&[
            "--ssh-user",
            "upgrade",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "LogLevel=ERROR",
        ]);
        let argv = exec.argv("pve2", "uname -r", &ExecOpts::default());
        assert_eq!(
            argv,
            vec![
                "-l",
                "upgrade",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "LogLevel=ERROR",
                "pve2",
                "uname -r"
            ]
        );
    }

    #[test]
    fn test_argv_key_auth_only_and_timeout() {
        let exec = exec_for(&["--ssh-key-auth-only"]);
        let opts = ExecOpts::with_connect_timeout(Duration::from_secs(2));
        let argv = exec.argv("pve1", "whoami", &opts);
        assert_eq!(
            argv,
            vec![
                "-l",
                "root",
                "-o",
                "ConnectTimeout=2",
                "-o",
                "PasswordAuthentication=no",
                "pve1",
                "whoami"
            ]
        );
    }

    #[test]
    fn test_argv_ssh_verbosity_tiers() {
        let quiet = exec_for(&["-vvvv"]);
        assert!(!quiet
            .argv("pve1", "whoami", &ExecOpts::default())
            .contains(&"-v".to_string()));

        let verbose = exec_for(&["-vvvvv"]);
        assert_eq!(verbose.argv("pve1", "whoami", &ExecOpts::default())[0], "-v");

        let extra = exec_for(&["-vvvvvvv"]);
        assert_eq!(extra.argv("pve1", "whoami", &ExecOpts::default())[0], "-vvv");
    }
}
