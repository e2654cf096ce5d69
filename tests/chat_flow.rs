// ABOUTME: End-to-end chat turn tests over an in-memory store and a scripted provider
// ABOUTME: Covers streaming completion, cancellation, hibernation recovery, and artifact frames
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use chorus_server::chat::protocol::{ClientFrame, ServerFrame};
use chorus_server::chat::streaming::{ActiveStreams, StreamingEngine};
use chorus_server::chat::{ChatSessionManager, SessionAttachment};
use chorus_server::database::SessionStore;
use chorus_server::errors::AppError;
use chorus_server::llm::{
    ChatRequest, ChatResponse, ChatResponseWithTools, ChatStream, InferenceCapabilities,
    InferenceProvider, StreamChunk, Tool,
};

/// Provider that streams a fixed script, optionally pausing between chunks
struct ScriptedProvider {
    deltas: Vec<String>,
    chunk_delay: Duration,
}

impl ScriptedProvider {
    fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(ToString::to_string).collect(),
            chunk_delay: Duration::from_millis(0),
        }
    }

    fn slow(deltas: &[&str], chunk_delay: Duration) -> Self {
        Self {
            deltas: deltas.iter().map(ToString::to_string).collect(),
            chunk_delay,
        }
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn display_name(&self) -> &'static str {
        "Scripted"
    }

    fn capabilities(&self) -> InferenceCapabilities {
        InferenceCapabilities::full_featured()
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, AppError> {
        Ok(ChatResponse {
            content: self.deltas.concat(),
            model: "scripted-1".to_owned(),
            usage: None,
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(&self, _request: &ChatRequest) -> Result<ChatStream, AppError> {
        let deltas = self.deltas.clone();
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            let count = deltas.len();
            for (i, delta) in deltas.into_iter().enumerate() {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamChunk {
                    delta,
                    is_final: i + 1 == count,
                    finish_reason: (i + 1 == count).then(|| "stop".to_owned()),
                });
            }
        };
        Ok(Box::pin(stream))
    }

    async fn complete_with_tools(
        &self,
        _request: &ChatRequest,
        _tools: Option<Vec<Tool>>,
    ) -> Result<ChatResponseWithTools, AppError> {
        Ok(ChatResponseWithTools {
            content: Some(self.deltas.concat()),
            function_calls: None,
            model: "scripted-1".to_owned(),
            usage: None,
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

async fn memory_store() -> SessionStore {
    let store = SessionStore::connect("sqlite::memory:").await.unwrap();
    store.migrate().await.unwrap();
    store
}

async fn collect_frames(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
        match frame {
            Some(frame) => frames.push(frame),
            None => break,
        }
    }
    frames
}

#[tokio::test]
async fn streaming_turn_delivers_chunks_and_persists_both_messages() {
    let store = memory_store().await;
    let provider = Arc::new(ScriptedProvider::new(&["Hello ", "there, ", "friend."]));
    let engine = StreamingEngine::new(store.clone(), provider, ActiveStreams::new(), 20);
    let (tx, mut rx) = mpsc::unbounded_channel();

    engine.run_turn("s1", "scripted-1", "m1", "hi", &tx).await;
    drop(tx);

    let frames = collect_frames(&mut rx).await;
    assert!(matches!(frames[0], ServerFrame::MessageReceived { .. }));
    assert!(matches!(frames[1], ServerFrame::StreamStart { .. }));

    let done_frames: Vec<_> = frames
        .iter()
        .filter(|f| matches!(f, ServerFrame::StreamChunk { done: true, .. }))
        .collect();
    assert_eq!(done_frames.len(), 1, "exactly one terminal chunk");

    let streamed: String = frames
        .iter()
        .filter_map(|f| match f {
            ServerFrame::StreamChunk { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello there, friend.");

    assert_eq!(store.message_count("s1").await.unwrap(), 2);
    let messages = store.get_recent_messages("s1", 10).await.unwrap();
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hello there, friend.");
}

#[tokio::test]
async fn completed_turn_extracts_artifacts_from_fenced_code() {
    let store = memory_store().await;
    let response = "Here you go:\n```tsx\nexport default function Widget() {\n  return <div>hi</div>;\n}\n```\n";
    let provider = Arc::new(ScriptedProvider::new(&[response]));
    let engine = StreamingEngine::new(store.clone(), provider, ActiveStreams::new(), 20);
    let (tx, mut rx) = mpsc::unbounded_channel();

    engine.run_turn("s1", "scripted-1", "m1", "make a widget", &tx).await;
    drop(tx);
    let _ = collect_frames(&mut rx).await;

    let artifacts = store.get_artifacts("s1").await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].artifact_type, "react-component");
    assert_eq!(artifacts[0].title, "Widget Component");
    assert_eq!(artifacts[0].message_id, "m1");
    assert!(artifacts[0].id.starts_with("m1-0-"));
}

#[tokio::test]
async fn stop_generation_suppresses_terminal_chunk_and_persists_nothing_generated() {
    let store = memory_store().await;
    let deltas: Vec<String> = (0..20).map(|i| format!("chunk {i} ")).collect();
    let delta_refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
    let provider = Arc::new(ScriptedProvider::slow(&delta_refs, Duration::from_millis(100)));
    let manager = ChatSessionManager::new(store.clone(), provider, "scripted-1", 20);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attachment = SessionAttachment {
        session_id: "s1".to_owned(),
        model: "scripted-1".to_owned(),
    };

    manager
        .handle_frame(
            "s1",
            Some(&attachment),
            ClientFrame::Chat {
                content: "long story please".to_owned(),
                message_id: "m1".to_owned(),
                enable_function_calling: false,
            },
            &tx,
        )
        .await;

    // Wait for the stream to actually start before stopping it.
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ServerFrame::StreamStart { .. })) => break,
            Ok(Some(_)) => {}
            _ => panic!("stream never started"),
        }
    }

    manager
        .handle_frame("s1", Some(&attachment), ClientFrame::StopGeneration, &tx)
        .await;
    drop(tx);

    let frames = collect_frames(&mut rx).await;
    let stopped = frames
        .iter()
        .filter(|f| matches!(f, ServerFrame::GenerationStopped { .. }))
        .count();
    assert_eq!(stopped, 1, "stop is always acknowledged exactly once");
    assert!(
        !frames
            .iter()
            .any(|f| matches!(f, ServerFrame::StreamChunk { done: true, .. })),
        "cancelled stream must not send a terminal chunk"
    );

    // Only the user message survives; nothing generated is persisted.
    assert_eq!(store.message_count("s1").await.unwrap(), 1);
    let messages = store.get_recent_messages("s1", 10).await.unwrap();
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn stop_with_nothing_in_flight_is_still_acknowledged() {
    let store = memory_store().await;
    let provider = Arc::new(ScriptedProvider::new(&["unused"]));
    let manager = ChatSessionManager::new(store, provider, "scripted-1", 20);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attachment = SessionAttachment {
        session_id: "s1".to_owned(),
        model: "scripted-1".to_owned(),
    };

    manager
        .handle_frame("s1", Some(&attachment), ClientFrame::StopGeneration, &tx)
        .await;

    assert!(matches!(
        rx.recv().await,
        Some(ServerFrame::GenerationStopped { .. })
    ));
}

#[tokio::test]
async fn unknown_session_without_attachment_is_an_error() {
    let store = memory_store().await;
    let provider = Arc::new(ScriptedProvider::new(&["unused"]));
    let manager = ChatSessionManager::new(store, provider, "scripted-1", 20);
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .handle_frame("ghost", None, ClientFrame::Ping, &tx)
        .await;

    assert!(matches!(rx.recv().await, Some(ServerFrame::Error { .. })));
}

#[tokio::test]
async fn session_rebuilds_from_attachment_after_wake() {
    let store = memory_store().await;
    let provider = Arc::new(ScriptedProvider::new(&["unused"]));
    let manager = ChatSessionManager::new(store, provider, "scripted-1", 20);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attachment = SessionAttachment {
        session_id: "hibernated".to_owned(),
        model: "scripted-1".to_owned(),
    };

    // The live map has never seen this session; the attachment alone
    // must be enough to serve the frame.
    manager
        .handle_frame("hibernated", Some(&attachment), ClientFrame::Ping, &tx)
        .await;
    assert!(matches!(rx.recv().await, Some(ServerFrame::Pong)));
}

#[tokio::test]
async fn artifact_frames_round_trip_through_the_session() {
    let store = memory_store().await;
    let response = "```css\n.banner { color: red; font-size: 2rem; }\n```";
    let provider = Arc::new(ScriptedProvider::new(&[response]));
    let manager = ChatSessionManager::new(store, provider, "scripted-1", 20);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attachment = SessionAttachment {
        session_id: "s1".to_owned(),
        model: "scripted-1".to_owned(),
    };

    manager
        .handle_frame(
            "s1",
            Some(&attachment),
            ClientFrame::Chat {
                content: "style a banner".to_owned(),
                message_id: "m1".to_owned(),
                enable_function_calling: false,
            },
            &tx,
        )
        .await;

    // Drain the streaming frames; the turn runs as its own task.
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ServerFrame::StreamChunk { done: true, .. })) => break,
            Ok(Some(_)) => {}
            _ => panic!("turn never completed"),
        }
    }
    // Artifact persistence happens after the terminal chunk.
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager
        .handle_frame(
            "s1",
            Some(&attachment),
            ClientFrame::GetArtifacts { message_id: None },
            &tx,
        )
        .await;

    let artifact_id = match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(ServerFrame::ArtifactsLoaded { artifacts, .. })) => {
            assert_eq!(artifacts.len(), 1);
            assert_eq!(artifacts[0].artifact_type, "css");
            artifacts[0].id.clone()
        }
        other => panic!("unexpected frame: {other:?}"),
    };

    manager
        .handle_frame(
            "s1",
            Some(&attachment),
            ClientFrame::DeleteArtifact {
                artifact_id: artifact_id.clone(),
            },
            &tx,
        )
        .await;
    match rx.recv().await {
        Some(ServerFrame::ArtifactDeleted { artifact_id: id }) => assert_eq!(id, artifact_id),
        other => panic!("unexpected frame: {other:?}"),
    }

    // Deleting again reports the miss without closing the session.
    manager
        .handle_frame(
            "s1",
            Some(&attachment),
            ClientFrame::DeleteArtifact { artifact_id },
            &tx,
        )
        .await;
    assert!(matches!(rx.recv().await, Some(ServerFrame::Error { .. })));
}
