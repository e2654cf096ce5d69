// ABOUTME: Main library entry point for the Chorus real-time assistant backend
// ABOUTME: Provides WebSocket chat and voice session actors over an embedded SQLite store
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

#![deny(unsafe_code)]

//! # Chorus Server
//!
//! A real-time assistant backend. Clients open one persistent WebSocket per
//! conversation (text chat or voice) and the server streams model-generated
//! output back incrementally while persisting history and derived artifacts.
//!
//! ## Architecture
//!
//! - **Session actors**: one logical conversation per connection, restored
//!   from a compact attachment if the hosting process restarts mid-connection
//! - **Streaming chat engine**: token streaming with cooperative cancellation
//! - **Artifact extractor**: fenced code blocks become addressable artifacts
//! - **Voice pipeline**: audio ingestion → speech-to-text → LLM response →
//!   speech synthesis, with rate-limited inference calls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chorus_server::config::ServerConfig;
//! use chorus_server::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Chorus configured for port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Chat session actor: frame dispatch, streaming engine, function calling,
/// artifact extraction
pub mod chat;

/// Environment-driven server configuration
pub mod config;

/// Durable session store (SQLite): chat messages and artifacts
pub mod database;

/// Unified error handling (`AppError`, `ErrorCode`, `AppResult`)
pub mod errors;

/// Inference gateway: chat completion, streaming, tool calling, speech
pub mod llm;

/// Structured logging configuration
pub mod logging;

/// HTTP routes and WebSocket upgrade endpoints
pub mod routes;

/// Voice session actor: audio buffering, turn detection, conversation
/// orchestration
pub mod voice;
