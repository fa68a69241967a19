use std::process::ExitCode as ProcessExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{debug, warn};

use kira::{
    Args,
    core::{
        ExitCode,
        runner::{LatestRunner, LatestRunnerConfig},
    },
    logging::{init_logging, parse_early_log_config},
    models::Commands,
};

#[tokio::main]
async fn main() -> ProcessExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    let _log_guard = init_logging(parse_early_log_config(&raw_args));

    let args = Args::parse();
    debug!(version = kira::VERSION, "starting kira");

    match args.command {
        Commands::Latest(latest) => {
            let config = match LatestRunnerConfig::from_args(&latest) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    return ExitCode::GeneralError.into();
                }
            };

            let mut runner = LatestRunner::new(config);
            let cancel = runner.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing the current repositories");
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let result = runner.run().await;
            if let Some(message) = &result.message
                && !result.is_success()
            {
                debug!(code = result.exit_code.code(), %message, "latest did not succeed");
            }
            result.exit_code.into()
        }
    }
}
