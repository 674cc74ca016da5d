use clap::Parser;
use pve_upgrade::exec::ssh::SshExec;
use pve_upgrade::{Logger, Orchestrator, RunConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cfg = match RunConfig::try_parse() {
        Ok(cfg) => Arc::new(cfg),
        // --help and --version print to stdout and exit 0; genuine usage
        // errors go to stderr with a pointer to --help and exit 1.
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let logger = Logger::new(cfg.verbosity(), cfg.no_color);
    let exec = Arc::new(SshExec::new(&cfg, logger.clone()));

    if let Err(err) = Orchestrator::new(exec, cfg, logger.clone()).run().await {
        logger.error(format!("{err}"));
        std::process::exit(1);
    }
}
