//! Runs one scheduled-mail scan and exits. Meant for cron or a similar trigger.

use std::process::ExitCode;

use campusmail_http::{config::Config, init_tracing, state::Components};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let dispatcher = match Config::from_env()
        .and_then(|config| Components::from_config(&config))
        .and_then(|components| components.dispatcher())
    {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match dispatcher.run_once().await {
        Ok(report) if report.skipped => {
            info!("another dispatcher holds the store; nothing to do");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            info!(
                sent = report.sent,
                failed = report.failed,
                cleanup_failures = report.cleanup_failures,
                "scheduled dispatch finished"
            );
            if report.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            error!(error = %err, "scheduled dispatch scan failed");
            ExitCode::FAILURE
        }
    }
}
