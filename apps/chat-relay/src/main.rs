mod cli;
mod config;
mod handlers;
mod telemetry;
mod websocket;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use chat_relay_core::{spawn_engine, ChatSessionEngine, EngineHandle, LivenessSweeper};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    cli::{Cli, Command},
    config::ServerConfig,
    handlers::{health_handler, metrics_handler, stats_handler},
    websocket::websocket_handler,
};

pub struct AppState {
    engine: EngineHandle,
    metrics: PrometheusHandle,
    outbound_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Chat(args)) = cli.command {
        telemetry::init_client_logging()?;
        return cli::run_chat_client(args).await;
    }

    let telemetry = telemetry::Telemetry::init(cli.server.otel_stdout)?;
    let config = ServerConfig::try_from(cli.server)?;
    info!(
        listen_addr = %config.listen_addr,
        liveness_timeout_secs = config.liveness_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        debounce_presence = config.debounce_presence,
        "starting chat relay"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let (engine, engine_task) = spawn_engine(ChatSessionEngine::new(config.engine_config()));
    let sweeper_task = LivenessSweeper::new(config.sweep_interval).spawn(engine.clone());

    let state = Arc::new(AppState {
        engine,
        metrics,
        outbound_buffer: config.outbound_buffer,
    });

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/chat", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("chat relay listening on {}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; draining"
    );
    sweeper_task.abort();
    tokio::time::sleep(config.shutdown_grace).await;
    engine_task.abort();
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
