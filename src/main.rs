//! # Whisper Gateway - Main Application Entry Point
//!
//! Real-time speech transcription over WebSocket. Clients stream raw 16kHz PCM, send
//! `{"type":"commit"}` at the end of each utterance and receive
//! `{"type":"final","text":...}` back.
//!
//! ## Application Architecture:
//! - **config**: configuration layering (defaults, config.toml, environment)
//! - **audio**: PCM decoding, per-session buffers and the session state machine
//! - **protocol**: WebSocket frame classification and outbound messages
//! - **websocket**: one actor per connection
//! - **transcription**: the engine, model resolution and the single inference worker
//! - **health** / **handlers** / **middleware**: the HTTP side (health, metrics, uploads)
//! - **error**: the gateway error type and its HTTP mapping

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod protocol;
mod state;
mod transcription;
mod websocket;

use crate::config::{AppConfig, TranscriptionSettings};
use crate::state::AppState;
use crate::transcription::{InferenceSerializer, SerializerSettings, TranscriptionEngine};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Startup order:
/// 1. **Configuration and logging**
/// 2. **Model**: resolved (downloaded if needed) and loaded before anything listens
/// 3. **Inference worker**: takes ownership of the engine
/// 4. **HTTP server**: WebSocket endpoint plus health, metrics and upload routes
///
/// The process then runs until a shutdown signal arrives or the inference worker dies.
/// Without the worker no session can be served, so that case exits with an error for the
/// supervisor to restart us.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        language = %config.transcription.language,
        min_utterance_seconds = config.transcription.min_utterance_seconds,
        max_buffered_bytes = config.session.max_buffered_bytes,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let engine = load_engine(&config.transcription).await?;
    let (inference, monitor) =
        InferenceSerializer::spawn(engine, SerializerSettings::from(&config.transcription))
            .context("failed to start inference worker")?;

    let app_state = AppState::new(config.clone(), inference);
    let bind_addr = config.bind_addr();

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
            .wrap(middleware::MetricsMiddleware)
            .configure(websocket::configure_routes)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/transcribe", web::post().to(handlers::transcribe_upload)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("Server exited"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
        _ = monitor.exited() => {
            error!("Inference worker exited; no session can be served");
            server_handle.stop(false).await;
            bail!("inference worker exited unexpectedly");
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(feature = "whisper")]
async fn load_engine(settings: &TranscriptionSettings) -> Result<Box<dyn TranscriptionEngine>> {
    let model_path = transcription::model::resolve_model_path(settings).await?;
    let threads = settings.threads;
    info!(path = %model_path.display(), "Loading Whisper model");

    let engine = tokio::task::spawn_blocking(move || {
        transcription::engine::WhisperEngine::load(&model_path, threads)
    })
    .await
    .context("model loading task panicked")??;

    Ok(Box::new(engine))
}

#[cfg(not(feature = "whisper"))]
async fn load_engine(settings: &TranscriptionSettings) -> Result<Box<dyn TranscriptionEngine>> {
    bail!(
        "no transcription engine compiled in (model {}); rebuild with the `whisper` feature",
        settings.model
    )
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
