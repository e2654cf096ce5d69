// ABOUTME: Server entry point: wires configuration, storage, providers, and the HTTP router
// ABOUTME: Runs until SIGINT or SIGTERM, then shuts the listener down gracefully
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use chorus_server::chat::ChatSessionManager;
use chorus_server::config::ServerConfig;
use chorus_server::database::SessionStore;
use chorus_server::llm::{GatewayConfig, GatewayProvider, GatewaySpeech, SpeechProvider};
use chorus_server::logging;
use chorus_server::routes::{router, AppState};
use chorus_server::voice::VoiceSessionManager;

#[derive(Debug, Parser)]
#[command(name = "chorus-server", about = "Real-time assistant backend")]
struct Args {
    /// Override the HTTP listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env().context("failed to initialize logging")?;

    let mut config = ServerConfig::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    let store = SessionStore::connect(&config.database_url)
        .await
        .context("failed to open database")?;
    store.migrate().await.context("failed to run migrations")?;
    info!(database_url = config.database_url, "Database ready");

    let gateway_config = GatewayConfig::from(&config);
    let provider = Arc::new(
        GatewayProvider::new(gateway_config.clone()).context("failed to create gateway client")?,
    );
    let speech: Arc<dyn SpeechProvider> = Arc::new(
        GatewaySpeech::new(gateway_config, config.tts_model.clone())
            .context("failed to create speech client")?,
    );

    let chat = Arc::new(ChatSessionManager::new(
        store.clone(),
        provider.clone(),
        config.default_model.clone(),
        config.history_context_limit,
    ));
    let voice = Arc::new(VoiceSessionManager::new(provider, speech, &config));

    let app = router(AppState { store, chat, voice });

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr, "Chorus server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Chorus server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
