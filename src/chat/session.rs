// ABOUTME: Hibernation-aware chat session actor owning one WebSocket connection
// ABOUTME: Dispatches inbound frames to the streaming engine, orchestrator, and artifact store
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Chat Session Actor
//!
//! One actor per chat connection. The live-session map is the source of
//! truth; the serialized attachment exists so a session can be rebuilt
//! after the hosting process restarts while the socket stays up. A frame
//! for a session missing from the map is served by reconstructing a minimal
//! session from the attachment, and fails only when no attachment exists.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::functions::FunctionOrchestrator;
use super::protocol::{ClientFrame, ServerFrame};
use super::streaming::{ActiveStreams, StreamingEngine};
use crate::database::SessionStore;
use crate::errors::{AppError, AppResult};
use crate::llm::InferenceProvider;

/// Compact serialized snapshot for post-restart session recovery
///
/// History is deliberately absent; it is reloaded from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttachment {
    /// Session identifier
    pub session_id: String,
    /// Model selected at connect time
    pub model: String,
}

#[derive(Debug)]
struct LiveSession {
    model: String,
}

/// Manages chat WebSocket sessions
#[derive(Clone)]
pub struct ChatSessionManager {
    store: SessionStore,
    streaming: StreamingEngine,
    functions: FunctionOrchestrator,
    streams: ActiveStreams,
    live: Arc<DashMap<String, LiveSession>>,
    default_model: String,
}

impl ChatSessionManager {
    /// Create a new session manager
    #[must_use]
    pub fn new(
        store: SessionStore,
        provider: Arc<dyn InferenceProvider>,
        default_model: impl Into<String>,
        history_limit: usize,
    ) -> Self {
        let streams = ActiveStreams::new();
        let streaming = StreamingEngine::new(
            store.clone(),
            Arc::clone(&provider),
            streams.clone(),
            history_limit,
        );
        let functions = FunctionOrchestrator::new(store.clone(), provider, history_limit);
        Self {
            store,
            streaming,
            functions,
            streams,
            live: Arc::new(DashMap::new()),
            default_model: default_model.into(),
        }
    }

    /// Number of live sessions (for health reporting)
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.live.len()
    }

    /// Handle one upgraded chat WebSocket until it closes
    pub async fn handle_connection(&self, socket: WebSocket, requested_model: Option<String>) {
        let session_id = Uuid::new_v4().to_string();
        let model = requested_model.unwrap_or_else(|| self.default_model.clone());
        let attachment = SessionAttachment {
            session_id: session_id.clone(),
            model: model.clone(),
        };

        self.live
            .insert(session_id.clone(), LiveSession { model: model.clone() });
        info!(session_id, model, "Chat session connected");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

        // Pump task: serialize outbound frames onto the socket.
        let pump = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize outbound frame: {e}"),
                }
            }
        });

        // Sent unconditionally; an on-open event may not fire after a
        // wake-from-hibernation.
        let _ = tx.send(ServerFrame::Connection {
            session_id: session_id.clone(),
            model,
        });

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        self.handle_frame(&session_id, Some(&attachment), frame, &tx)
                            .await;
                    }
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: format!("Invalid message format: {e}"),
                        });
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }

        // In-flight streams are abandoned: their registrations die with the
        // pump, and sends to the closed channel are ignored.
        self.live.remove(&session_id);
        pump.abort();
        info!(session_id, "Chat session closed");
    }

    /// Look up the session's model, rebuilding the live entry from the
    /// attachment after a wake
    fn resolve_model(
        &self,
        session_id: &str,
        attachment: Option<&SessionAttachment>,
    ) -> AppResult<String> {
        if let Some(live) = self.live.get(session_id) {
            return Ok(live.model.clone());
        }
        let attachment = attachment
            .filter(|a| a.session_id == session_id)
            .ok_or_else(|| AppError::not_found(format!("Session {session_id}")))?;
        debug!(session_id, "Rebuilding session from attachment");
        self.live.insert(
            session_id.to_owned(),
            LiveSession {
                model: attachment.model.clone(),
            },
        );
        Ok(attachment.model.clone())
    }

    /// Dispatch one inbound frame
    ///
    /// Public so integration tests can drive a session without a socket.
    pub async fn handle_frame(
        &self,
        session_id: &str,
        attachment: Option<&SessionAttachment>,
        frame: ClientFrame,
        tx: &UnboundedSender<ServerFrame>,
    ) {
        let model = match self.resolve_model(session_id, attachment) {
            Ok(model) => model,
            Err(e) => {
                let _ = tx.send(ServerFrame::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        match frame {
            ClientFrame::Chat {
                content,
                message_id,
                enable_function_calling,
            } => {
                // Turns run as their own tasks so a stop_generation frame
                // is handled while the stream is in flight.
                let tx = tx.clone();
                let session_id = session_id.to_owned();
                if enable_function_calling {
                    let functions = self.functions.clone();
                    tokio::spawn(async move {
                        functions
                            .run_turn(&session_id, &model, &message_id, &content, &tx)
                            .await;
                    });
                } else {
                    let streaming = self.streaming.clone();
                    tokio::spawn(async move {
                        streaming
                            .run_turn(&session_id, &model, &message_id, &content, &tx)
                            .await;
                    });
                }
            }
            ClientFrame::Ping => {
                let _ = tx.send(ServerFrame::Pong);
            }
            ClientFrame::ChangeModel { model } => {
                if let Some(mut live) = self.live.get_mut(session_id) {
                    live.model = model.clone();
                }
                info!(session_id, model, "Session model changed");
                let _ = tx.send(ServerFrame::ModelChanged { model });
            }
            ClientFrame::GetArtifacts { message_id } => {
                match self.store.get_artifacts(session_id).await {
                    Ok(artifacts) => {
                        let artifacts = match message_id {
                            Some(message_id) => artifacts
                                .into_iter()
                                .filter(|a| a.message_id == message_id)
                                .collect(),
                            None => artifacts,
                        };
                        let _ = tx.send(ServerFrame::ArtifactsLoaded {
                            artifacts,
                            session_id: session_id.to_owned(),
                        });
                    }
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientFrame::UpdateArtifact {
                artifact_id,
                updates,
            } => match self
                .store
                .update_artifact(session_id, &artifact_id, &updates)
                .await
            {
                Ok(()) => {
                    let _ = tx.send(ServerFrame::ArtifactUpdated { artifact_id });
                }
                Err(e) => {
                    let _ = tx.send(ServerFrame::Error {
                        message: e.to_string(),
                    });
                }
            },
            ClientFrame::DeleteArtifact { artifact_id } => {
                match self.store.delete_artifact(session_id, &artifact_id).await {
                    Ok(()) => {
                        let _ = tx.send(ServerFrame::ArtifactDeleted { artifact_id });
                    }
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientFrame::StopGeneration => {
                // Stopping with nothing in flight is a valid no-op; the
                // acknowledgment is sent either way.
                let stopped = self.streams.stop_session(session_id);
                debug!(session_id, stopped, "Stop generation requested");
                let _ = tx.send(ServerFrame::GenerationStopped {
                    timestamp: chrono::Utc::now().to_rfc3339(),
                });
            }
        }
    }
}
