//! flowline server entry point.

mod config;
mod error;
mod routes;
mod state;
mod stream;

use config::ServerConfig;
use flowline_scheduler::ScheduleRunner;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let app_state = AppState::new(&config);

    // Spawn the schedule-trigger scanner
    let scheduler = ScheduleRunner::new(
        Arc::clone(app_state.engine.catalog()),
        Arc::clone(&app_state.engine),
    )
    .with_poll_interval(Duration::from_secs(config.scheduler.poll_interval_seconds));
    tokio::spawn(scheduler.run());

    let app = routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutting down");
}
