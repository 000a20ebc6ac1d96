//! Parley worker entry point.
//!
//! Loads configuration, prewarms shared models, and serves voice
//! sessions until a shutdown signal arrives. Without remote providers
//! configured it runs against the scripted stack over a loopback
//! transport, which exercises the full pipeline locally.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use parley_config::{load_settings, Settings};
use parley_core::{AudioFrame, Channels, SampleRate};
use parley_providers::LoopbackTransport;
use parley_worker::{Lifecycle, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config file > defaults
    let config_path = std::env::var("PARLEY_CONFIG").ok();
    let settings = resolve_settings(config_path.as_deref())?;

    init_tracing();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %settings.worker.room,
        max_sessions = settings.worker.max_sessions,
        "starting parley worker"
    );

    let lifecycle = Arc::new(Lifecycle::new());
    // Fatal if the model cannot load; no sessions are accepted.
    lifecycle.prewarm(&settings.provider)?;

    let manager = Arc::new(SessionManager::new(settings, Arc::clone(&lifecycle)));

    let transport = LoopbackTransport::new(demo_audio());
    let session_id = manager.open(&transport).await?;
    tracing::info!(session_id = %session_id, "loopback session opened");

    shutdown_signal().await;
    manager.shutdown().await;
    tracing::info!("worker shutdown complete");
    Ok(())
}

/// An explicitly configured source must load cleanly; local defaults
/// apply only when no config was specified at all.
fn resolve_settings(config_path: Option<&str>) -> anyhow::Result<Settings> {
    match config_path {
        Some(path) => load_settings(Some(path))
            .map_err(|e| anyhow::anyhow!("failed to load config {path}: {e}")),
        None => Ok(load_settings(None).unwrap_or_else(|e| {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("warning: no usable config in environment: {e}. Using local defaults.");
            local_defaults()
        })),
    }
}

fn local_defaults() -> Settings {
    let mut settings = Settings::default();
    settings.provider.persona =
        "You are a friendly voice assistant. Keep replies short and conversational.".to_string();
    settings
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parley=info,parley_worker=info".into());
    let json = std::env::var("PARLEY_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// One spoken turn followed by silence, for the loopback session.
fn demo_audio() -> Vec<AudioFrame> {
    let mut frames = Vec::new();
    let mut ts = 0;
    for _ in 0..40 {
        frames.push(AudioFrame::new(
            vec![0.4; 320],
            SampleRate::Hz16000,
            Channels::Mono,
            ts,
        ));
        ts += 20;
    }
    for _ in 0..100 {
        frames.push(AudioFrame::silence(20, SampleRate::Hz16000, ts));
        ts += 20;
    }
    frames
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
