// ABOUTME: Chat session actor family: protocol, session lifecycle, streaming, tools, artifacts
// ABOUTME: One actor per connection; engines share the durable store and the inference provider
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Chat Channel
//!
//! Everything behind the `/ws/chat` endpoint: frame protocol, the
//! hibernation-aware session actor, the streaming engine with cooperative
//! cancellation, the function-calling orchestrator, and artifact extraction.

pub mod artifacts;
pub mod functions;
pub mod protocol;
pub mod session;
pub mod streaming;

pub use artifacts::extract_artifacts;
pub use protocol::{ClientFrame, ServerFrame};
pub use session::{ChatSessionManager, SessionAttachment};
pub use streaming::{ActiveStreams, StreamingEngine};
