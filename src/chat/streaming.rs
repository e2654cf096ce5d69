// ABOUTME: Streaming chat engine with chunk coalescing and cooperative cancellation
// ABOUTME: Persists completed turns and hands finalized text to the artifact extractor
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Streaming Chat Engine
//!
//! Turns a user message plus stored history into a stream of `stream_chunk`
//! frames. Generated text is coalesced before sending: a flush happens when
//! the pending buffer reaches ~100 characters or ~150 ms have elapsed since
//! the last send, bounding both frame count and perceived latency.
//!
//! Cancellation is cooperative. Each in-flight generation registers an
//! atomic flag keyed by `(session_id, message_id)`; the flag is checked
//! before every flush, and a cleared flag stops the read loop without
//! emitting the final `done:true` frame. The underlying network read is
//! never forcibly aborted.

use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::artifacts::extract_artifacts;
use super::protocol::ServerFrame;
use crate::database::SessionStore;
use crate::errors::AppResult;
use crate::llm::{ChatMessage, ChatRequest, InferenceProvider, MessageRole};

/// Flush once this many characters are pending
const FLUSH_CHARS: usize = 100;

/// Flush once this long has passed since the last send
const FLUSH_INTERVAL: Duration = Duration::from_millis(150);

/// Registry of in-flight generations with their cancellation flags
///
/// The flag is `true` while the stream may keep sending. `stop_generation`
/// clears every flag belonging to the session.
#[derive(Clone, Default)]
pub struct ActiveStreams {
    streams: Arc<DashMap<(String, String), Arc<AtomicBool>>>,
}

impl ActiveStreams {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight generation and return its flag
    #[must_use]
    pub fn begin(&self, session_id: &str, message_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(true));
        self.streams.insert(
            (session_id.to_owned(), message_id.to_owned()),
            Arc::clone(&flag),
        );
        flag
    }

    /// Clear the flags of every in-flight generation for a session
    ///
    /// Returns whether any stream was active. Stopping a session with no
    /// active stream is valid and simply reports `false`.
    pub fn stop_session(&self, session_id: &str) -> bool {
        let mut stopped = false;
        for entry in self.streams.iter() {
            if entry.key().0 == session_id {
                entry.value().store(false, Ordering::SeqCst);
                stopped = true;
            }
        }
        stopped
    }

    /// Remove a finished or cancelled generation
    pub fn finish(&self, session_id: &str, message_id: &str) {
        self.streams
            .remove(&(session_id.to_owned(), message_id.to_owned()));
    }

    /// Number of registered generations (for metrics and tests)
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no generation is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Buffers generated text between flushes
///
/// Time is passed in by the caller so the policy is testable without
/// sleeping.
#[derive(Debug)]
pub struct ChunkCoalescer {
    pending: String,
    last_flush: Instant,
}

impl ChunkCoalescer {
    /// Create a coalescer whose interval starts at `now`
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            pending: String::new(),
            last_flush: now,
        }
    }

    /// Add a delta; returns the text to send if a flush is due
    pub fn push(&mut self, delta: &str, now: Instant) -> Option<String> {
        self.pending.push_str(delta);
        if self.pending.is_empty() {
            return None;
        }
        if self.pending.len() >= FLUSH_CHARS || now.duration_since(self.last_flush) >= FLUSH_INTERVAL
        {
            self.last_flush = now;
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    /// Drain whatever is still pending
    pub fn drain(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }
}

/// Streaming chat engine bound to one store and provider
#[derive(Clone)]
pub struct StreamingEngine {
    store: SessionStore,
    provider: Arc<dyn InferenceProvider>,
    streams: ActiveStreams,
    history_limit: usize,
}

impl StreamingEngine {
    /// Create a new engine
    #[must_use]
    pub fn new(
        store: SessionStore,
        provider: Arc<dyn InferenceProvider>,
        streams: ActiveStreams,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            provider,
            streams,
            history_limit,
        }
    }

    /// Cancellation flag registry shared with the stop-generation path
    #[must_use]
    pub fn streams(&self) -> &ActiveStreams {
        &self.streams
    }

    /// Load the most recent history of a session as inference messages
    async fn load_context(&self, session_id: &str) -> AppResult<Vec<ChatMessage>> {
        let records = self
            .store
            .get_recent_messages(session_id, self.history_limit)
            .await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let role = if r.role == "assistant" {
                    MessageRole::Assistant
                } else {
                    MessageRole::User
                };
                ChatMessage::new(role, r.content)
            })
            .collect())
    }

    /// Run one streaming chat turn
    ///
    /// Persists the user message, streams coalesced chunks to `outbound`,
    /// and on normal completion persists the assistant text and extracts
    /// artifacts. A cancelled turn persists nothing and never sends the
    /// final `done:true` frame.
    pub async fn run_turn(
        &self,
        session_id: &str,
        model: &str,
        message_id: &str,
        content: &str,
        outbound: &UnboundedSender<ServerFrame>,
    ) {
        if let Err(e) = self.store.save_message(session_id, "user", content).await {
            warn!(session_id, "Failed to persist user message: {e}");
            let _ = outbound.send(ServerFrame::StreamError {
                message_id: message_id.to_owned(),
                error: e.to_string(),
            });
            return;
        }

        let _ = outbound.send(ServerFrame::MessageReceived {
            message_id: message_id.to_owned(),
        });

        let messages = match self.load_context(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                let _ = outbound.send(ServerFrame::StreamError {
                    message_id: message_id.to_owned(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let request = ChatRequest::new(messages)
            .with_model(model)
            .with_streaming();

        let active = self.streams.begin(session_id, message_id);
        let _ = outbound.send(ServerFrame::StreamStart {
            message_id: message_id.to_owned(),
        });

        let mut stream = match self.provider.complete_stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.streams.finish(session_id, message_id);
                let _ = outbound.send(ServerFrame::StreamError {
                    message_id: message_id.to_owned(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let mut coalescer = ChunkCoalescer::new(Instant::now());
        let mut full_text = String::new();
        let mut cancelled = false;
        let mut failed = false;

        while let Some(chunk_result) = stream.next().await {
            if !active.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            match chunk_result {
                Ok(chunk) => {
                    full_text.push_str(&chunk.delta);
                    if let Some(flush) = coalescer.push(&chunk.delta, Instant::now()) {
                        if !active.load(Ordering::SeqCst) {
                            cancelled = true;
                            break;
                        }
                        let _ = outbound.send(ServerFrame::StreamChunk {
                            message_id: message_id.to_owned(),
                            content: flush,
                            done: false,
                        });
                    }
                    if chunk.is_final {
                        break;
                    }
                }
                Err(e) => {
                    failed = true;
                    let _ = outbound.send(ServerFrame::StreamError {
                        message_id: message_id.to_owned(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        self.streams.finish(session_id, message_id);

        if cancelled {
            debug!(session_id, message_id, "Generation cancelled mid-stream");
            return;
        }
        if failed {
            return;
        }

        if let Some(rest) = coalescer.drain() {
            let _ = outbound.send(ServerFrame::StreamChunk {
                message_id: message_id.to_owned(),
                content: rest,
                done: false,
            });
        }
        let _ = outbound.send(ServerFrame::StreamChunk {
            message_id: message_id.to_owned(),
            content: String::new(),
            done: true,
        });

        if let Err(e) = self
            .store
            .save_message(session_id, "assistant", &full_text)
            .await
        {
            warn!(session_id, "Failed to persist assistant message: {e}");
            return;
        }

        for artifact in extract_artifacts(session_id, message_id, &full_text) {
            if let Err(e) = self.store.save_artifact(&artifact).await {
                warn!(session_id, artifact_id = %artifact.id, "Failed to persist artifact: {e}");
            }
        }
    }
}
