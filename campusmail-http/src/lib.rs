//! HTTP surface for `campusmail`.
//!
//! | Method | Path | |
//! |---|---|---|
//! | POST | `/mail/send` | send now, send a test, or schedule |
//! | POST | `/mail/sendTestMail` | send a test to the caller |
//! | GET | `/mail/scheduled/user` | caller's scheduled mail, ascending |
//! | DELETE | `/mail/scheduled` | cancel by send time |
//! | GET, POST, DELETE | `/mail/digest` | digest status, submit, remove |
//!
//! Every route expects `Authorization: Bearer <token>`.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    Router,
};
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use routes::{
    digest_delete_handler, digest_send_handler, digest_status_handler, scheduled_delete_handler,
    scheduled_list_handler, send_handler, test_mail_handler,
};
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/mail/send", post(send_handler))
        .route("/mail/sendTestMail", post(test_mail_handler))
        .route("/mail/scheduled/user", get(scheduled_list_handler))
        .route("/mail/scheduled", axum::routing::delete(scheduled_delete_handler))
        .route(
            "/mail/digest",
            get(digest_status_handler).post(digest_send_handler).delete(digest_delete_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!("Failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
