//! # Pipecat Bridge - Main Application Entry Point
//!
//! Bridges live telephone calls to an AI conversation pipeline. The switch
//! streams each call's audio over AudioSocket; the pipeline runner dials back
//! over a WebSocket and exchanges protobuf frames.
//!
//! ## Listeners:
//! - **AudioSocket** (TCP): one connection per call from the telephony switch
//! - **Runner callback** (WebSocket): one connection per call from the pipeline runner
//! - **Control API** (HTTP): health, session inspection, message injection
//!
//! ## Application Architecture:
//! - **audio**: resampling and the AudioSocket wire protocol
//! - **runner**: runner frames, RTVI translation, the callback server
//! - **session**: session registry and keepalive supervisor
//! - **bridge**: per-call orchestration
//! - **ports / control_plane**: collaborator contracts and their HTTP adapter
//! - **handlers / health / state**: the control API
//! - **config / error / models**: shared plumbing

mod audio;
mod bridge;
mod config;
mod control_plane;
mod error;
mod handlers;
mod health;
mod models;
mod ports;
mod runner;
mod session;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::audio::audiosocket::WritePacing;
use crate::bridge::Bridge;
use crate::config::AppConfig;
use crate::control_plane::ControlPlaneClient;
use crate::ports::PipelineRunner;
use crate::runner::{RtviTranslator, RunnerServer, RunnerTransport};
use crate::session::{KeepaliveSupervisor, SessionRegistry};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let control_plane = Arc::new(ControlPlaneClient::new(&config.control_plane)?);
    let pipeline: Arc<dyn PipelineRunner> = control_plane.clone();

    let registry = Arc::new(SessionRegistry::new(
        config.runner.outbound_queue_size,
        pipeline.clone(),
    ));

    let pacing = WritePacing {
        fragment_size: config.audiosocket.fragment_size,
        fragment_delay: config.audiosocket.fragment_delay(),
    };
    let transport = Arc::new(RunnerTransport::new(
        &config.runner,
        pacing,
        RtviTranslator::new(control_plane.clone()),
    ));

    let bridge = Arc::new(Bridge::new(
        config.audiosocket.clone(),
        config.runner.clone(),
        registry.clone(),
        control_plane.clone(),
        control_plane.clone(),
        pipeline,
        transport.clone(),
        KeepaliveSupervisor::new(&config.keepalive),
    ));
    let runner_server = Arc::new(RunnerServer::new(registry.clone(), transport));

    let shutdown = CancellationToken::new();

    let audiosocket_listener = TcpListener::bind(config.audiosocket.bind_address()).await?;
    info!("AudioSocket listener on {}", config.audiosocket.bind_address());
    let audiosocket_task = tokio::spawn(bridge.clone().serve(audiosocket_listener, shutdown.clone()));

    let runner_listener = TcpListener::bind(config.runner.bind_address()).await?;
    info!("Runner callback listener on {}", config.runner.bind_address());
    let runner_task = tokio::spawn(runner_server.serve(runner_listener, shutdown.clone()));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, bridge);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
        }
    }

    shutdown.cancel();
    server_handle.stop(true).await;

    info!("Stopping {} active sessions", registry.len());
    registry.stop_all().await;

    for task in [audiosocket_task, runner_task] {
        if let Err(e) = task.await {
            error!("Listener task error: {}", e);
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipecat_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
