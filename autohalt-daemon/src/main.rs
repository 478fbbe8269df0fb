//! Entry point for the `autohalt` daemon.

use std::sync::Arc;

use autohalt_daemon::{init_logging, listen_for_session_end, run, Cli};
use autohalt_executor::{ShutdownPipeline, VmrunService};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = cli.host_config();
    info!(
        vmrun = %config.vmrun_path.display(),
        provider = %config.provider,
        power_mode = %config.power_mode,
        "autohalt starting"
    );
    let service = Arc::new(VmrunService::from_config(&config));
    let pipeline = Arc::new(ShutdownPipeline::new(service, config));

    match run(pipeline, cli.debug, listen_for_session_end).await {
        Ok(report) => info!(phase = %report.phase, "autohalt quits"),
        Err(e) => {
            tracing::error!(error = %e, "cannot wait for the session to end");
            std::process::exit(1);
        }
    }
}
