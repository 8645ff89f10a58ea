use std::{process::ExitCode, sync::Arc};

use campusmail_http::{
    config::Config,
    init_tracing, router, shutdown_signal,
    state::{AppState, Components},
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Loading configuration...");
    let config = Config::from_env()?;
    if config.mode.is_debug() {
        info!("Debug mode is on: limits bypassed, mail is not delivered");
    }

    info!("Initializing state...");
    let components = Components::from_config(&config)?;
    let state = Arc::new(AppState::build(&components, AppState::identity_for(&config)?)?);

    let (stop_dispatch, stopped) = watch::channel(false);
    let dispatch = match config.dispatch_interval {
        Some(every) => {
            info!("Dispatching scheduled mail every {every:?}");
            let dispatcher = components.dispatcher()?;
            Some(tokio::spawn(async move { dispatcher.run_periodic(every, stopped).await }))
        }
        None => None,
    };

    let address = format!("0.0.0.0:{}", config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    let _ = stop_dispatch.send(true);
    if let Some(task) = dispatch {
        if let Err(err) = task.await {
            error!("dispatcher task failed: {err}");
        }
    }
    state.registry.shutdown().await;
    Ok(())
}
