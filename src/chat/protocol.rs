// ABOUTME: Wire protocol frames for the chat WebSocket channel
// ABOUTME: JSON frames with a type discriminator, camelCase field names toward the client
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use crate::database::{ArtifactRecord, ArtifactUpdate};
use serde::{Deserialize, Serialize};

/// Frames the client sends on the chat channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start a chat turn
    #[serde(rename_all = "camelCase")]
    Chat {
        /// User message text
        content: String,
        /// Client-chosen message identifier
        message_id: String,
        /// Route through the function-calling orchestrator instead of streaming
        #[serde(default)]
        enable_function_calling: bool,
    },
    /// Keep-alive probe
    Ping,
    /// Switch the session's inference model
    ChangeModel {
        /// New model identifier
        model: String,
    },
    /// Load the session's artifacts
    #[serde(rename_all = "camelCase")]
    GetArtifacts {
        /// Restrict to artifacts of one message
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Apply a partial update to an artifact
    #[serde(rename_all = "camelCase")]
    UpdateArtifact {
        /// Artifact to update
        artifact_id: String,
        /// Fields to change
        updates: ArtifactUpdate,
    },
    /// Delete an artifact
    #[serde(rename_all = "camelCase")]
    DeleteArtifact {
        /// Artifact to delete
        artifact_id: String,
    },
    /// Cancel any in-flight generation for this session
    StopGeneration,
}

/// Frames the server sends on the chat channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection established confirmation
    #[serde(rename_all = "camelCase")]
    Connection {
        /// Session identifier assigned at connect time
        session_id: String,
        /// Active model
        model: String,
    },
    /// Receipt for an inbound chat frame
    #[serde(rename_all = "camelCase")]
    MessageReceived {
        /// Message the receipt is for
        message_id: String,
    },
    /// Generation is about to stream
    #[serde(rename_all = "camelCase")]
    StreamStart {
        /// Message being answered
        message_id: String,
    },
    /// One flushed span of generated text
    #[serde(rename_all = "camelCase")]
    StreamChunk {
        /// Message being answered
        message_id: String,
        /// Text delta (empty on the final frame)
        content: String,
        /// Whether this is the final frame of the stream
        done: bool,
    },
    /// Generation failed upstream
    #[serde(rename_all = "camelCase")]
    StreamError {
        /// Message being answered
        message_id: String,
        /// Human-readable cause
        error: String,
    },
    /// Function-calling turn started
    #[serde(rename_all = "camelCase")]
    FunctionCallingStart {
        /// Message being answered
        message_id: String,
    },
    /// Function-calling turn finished with a composed message
    #[serde(rename_all = "camelCase")]
    FunctionCallingComplete {
        /// Message being answered
        message_id: String,
        /// Composed assistant text
        content: String,
    },
    /// Function-calling turn failed
    #[serde(rename_all = "camelCase")]
    FunctionCallingError {
        /// Message being answered
        message_id: String,
        /// Human-readable cause
        error: String,
    },
    /// Model switch confirmation
    ModelChanged {
        /// Now-active model
        model: String,
    },
    /// Artifact listing response
    #[serde(rename_all = "camelCase")]
    ArtifactsLoaded {
        /// The session's artifacts
        artifacts: Vec<ArtifactRecord>,
        /// Owning session
        session_id: String,
    },
    /// Artifact update confirmation
    #[serde(rename_all = "camelCase")]
    ArtifactUpdated {
        /// Updated artifact
        artifact_id: String,
    },
    /// Artifact deletion confirmation
    #[serde(rename_all = "camelCase")]
    ArtifactDeleted {
        /// Deleted artifact
        artifact_id: String,
    },
    /// Stop request acknowledgment
    GenerationStopped {
        /// When the stop was processed (RFC 3339)
        timestamp: String,
    },
    /// Keep-alive reply
    Pong,
    /// Generic error, connection stays open
    Error {
        /// Human-readable cause
        message: String,
    },
}
