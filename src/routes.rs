// ABOUTME: HTTP surface: WebSocket upgrade endpoints for chat and voice plus the health probe
// ABOUTME: Builds the axum router with tracing and CORS layers over shared application state
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::chat::ChatSessionManager;
use crate::database::SessionStore;
use crate::voice::VoiceSessionManager;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    /// Durable session store
    pub store: SessionStore,
    /// Chat session manager
    pub chat: Arc<ChatSessionManager>,
    /// Voice session manager
    pub voice: Arc<VoiceSessionManager>,
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceParams {
    model: Option<String>,
    voice: Option<String>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat", get(chat_upgrade))
        .route("/ws/voice", get(voice_upgrade))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn chat_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(model = ?params.model, "Chat WebSocket upgrade");
    ws.on_upgrade(move |socket| async move {
        state.chat.handle_connection(socket, params.model).await;
    })
}

async fn voice_upgrade(
    State(state): State<AppState>,
    Query(params): Query<VoiceParams>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(model = ?params.model, voice = ?params.voice, "Voice WebSocket upgrade");
    ws.on_upgrade(move |socket| async move {
        state
            .voice
            .handle_connection(socket, params.model, params.voice)
            .await;
    })
}

async fn health(State(state): State<AppState>) -> Response {
    let database_ok = state.store.health_check().await.is_ok();
    let status = if database_ok { "ok" } else { "degraded" };
    let body = json!({
        "status": status,
        "database": database_ok,
        "chatSessions": state.chat.live_sessions(),
        "voiceSessions": state.voice.live_sessions(),
    });
    let code = if database_ok {
        http::StatusCode::OK
    } else {
        http::StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}
