use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roomcast::server::{
    LoopbackEngine, ServerConfig, SessionCoordinator, SessionState, SignalingService,
    SignalingState, signaling_router,
};

/// Delay before exiting once the media engine is gone, so the last log
/// lines reach the collector.
const ENGINE_DEATH_EXIT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("loading configuration")?;
    info!(
        "Starting conference server (retention {:?}, announced ip {:?})",
        config.room_retention, config.transport.announced_ip
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(LoopbackEngine::new(config.transport.clone(), events_tx));
    let service = SignalingService::new();

    let coordinator = SessionCoordinator::new(
        SessionState::new(config.room_retention),
        engine,
        Arc::new(service.clone()),
        config.media_codecs.clone(),
    );

    tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            match coordinator.run_engine_events(events_rx).await {
                Ok(()) => info!("Engine event loop finished"),
                Err(e) => {
                    error!("Media engine failed, exiting in {:?}: {}", ENGINE_DEATH_EXIT_DELAY, e);
                    tokio::time::sleep(ENGINE_DEATH_EXIT_DELAY).await;
                    process::exit(1);
                }
            }
        }
    });

    // Browser clients are served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = signaling_router(SignalingState {
        coordinator,
        service,
    })
    .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Signaling server listening on ws://{}/ws", config.bind_address);

    axum::serve(listener, app).await.context("serving signaling")?;
    Ok(())
}
