use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use hub_repo::logging::LoggingArgs;
use hub_repo::{server, RepoArgs, ShutdownOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "hub-repo",
    about = "Packages Helm charts at startup and serves them as a chart repository",
    disable_version_flag = true
)]
struct Args {
    #[command(flatten)]
    repo: RepoArgs,

    #[command(flatten)]
    logging: LoggingArgs,
}

async fn run(args: Args) -> anyhow::Result<ShutdownOutcome> {
    let config = args.repo.into_config()?;
    info!(
        "Packaging charts from {} into {} as version {}",
        config.chart_dir.display(),
        config.repo_dir.display(),
        config.version
    );

    server::run(config)
        .await
        .context("chart repository did not start")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    args.logging.init();

    info!(
        "hub-repo {} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    match run(args).await {
        Ok(ShutdownOutcome::Drained) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Ok(ShutdownOutcome::Forced) => {
            warn!("Shut down with requests still in flight");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
