// ABOUTME: Voice session actor owning one WebSocket connection and its pipeline state
// ABOUTME: Decodes inbound audio frames and dispatches commands to the voice pipeline
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Voice Session Actor
//!
//! One actor per voice connection. Audio payloads arrive base64-encoded and
//! are decoded here before entering the buffer; everything downstream works
//! on raw bytes. Command frames mutate session settings or invoke pipeline
//! operations; the pipeline reports back over the shared outbound channel.

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use super::buffer::{AudioChunk, AudioFormat, TranscriptionMode, VoiceMode};
use super::limiter::LimiterFactory;
use super::orchestrator::{ConversationState, VoicePipeline, VoiceSessionState};
use super::protocol::{ConversationConfig, VoiceClientFrame, VoiceServerFrame};
use crate::config::ServerConfig;
use crate::llm::{InferenceProvider, SpeechProvider};

const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Manages voice WebSocket sessions
#[derive(Clone)]
pub struct VoiceSessionManager {
    pipeline: VoicePipeline,
    limiters: LimiterFactory,
    live: Arc<DashMap<String, Arc<VoiceSessionState>>>,
    default_voice: String,
    default_model: String,
}

impl VoiceSessionManager {
    /// Create a new voice session manager
    #[must_use]
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        speech: Arc<dyn SpeechProvider>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            pipeline: VoicePipeline::new(provider, speech, config.asr_model.clone()),
            limiters: LimiterFactory::new(config.limiter_scope, config.asr_min_spacing),
            live: Arc::new(DashMap::new()),
            default_voice: config.default_voice.clone(),
            default_model: config.default_model.clone(),
        }
    }

    /// Number of live voice sessions (for health reporting)
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.live.len()
    }

    /// Handle one upgraded voice WebSocket until it closes
    pub async fn handle_connection(
        &self,
        socket: WebSocket,
        requested_model: Option<String>,
        requested_voice: Option<String>,
    ) {
        let session_id = Uuid::new_v4().to_string();
        let voice = requested_voice.unwrap_or_else(|| self.default_voice.clone());
        let model = requested_model.unwrap_or_else(|| self.default_model.clone());

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<VoiceServerFrame>();

        let state = Arc::new(VoiceSessionState::new(
            session_id.clone(),
            voice.clone(),
            model.clone(),
            self.limiters.for_session(),
            tx.clone(),
        ));
        self.live.insert(session_id.clone(), Arc::clone(&state));
        info!(session_id, voice, model, "Voice session connected");

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

        let _ = tx.send(VoiceServerFrame::SessionCreated {
            session_id: session_id.clone(),
            voice,
            model,
        });

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<VoiceClientFrame>(&text) {
                    Ok(frame) => self.handle_frame(&state, frame, &tx).await,
                    Err(e) => {
                        let _ = tx.send(VoiceServerFrame::Error {
                            message: format!("Invalid message format: {e}"),
                        });
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }

        self.live.remove(&session_id);
        pump.abort();
        info!(session_id, "Voice session closed");
    }

    /// Dispatch one inbound frame
    ///
    /// Public so integration tests can drive a session without a socket.
    pub async fn handle_frame(
        &self,
        state: &Arc<VoiceSessionState>,
        frame: VoiceClientFrame,
        tx: &UnboundedSender<VoiceServerFrame>,
    ) {
        match frame {
            VoiceClientFrame::Configure { voice, model } => {
                self.apply_config(
                    state,
                    &ConversationConfig {
                        voice,
                        model,
                        transcription_mode: None,
                    },
                )
                .await;
                let settings = state.settings.lock().await;
                let _ = tx.send(VoiceServerFrame::Configured {
                    voice: settings.voice.clone(),
                    model: settings.model.clone(),
                });
            }
            VoiceClientFrame::StartRecording => {
                state.recording.store(true, Ordering::SeqCst);
                let _ = tx.send(VoiceServerFrame::RecordingStarted);
            }
            VoiceClientFrame::StopRecording => {
                state.recording.store(false, Ordering::SeqCst);
                let _ = tx.send(VoiceServerFrame::RecordingStopped);
                // Audio already buffered still deserves a pass.
                self.pipeline.force_turn(state).await;
            }
            VoiceClientFrame::AudioChunk {
                data,
                sample_rate,
                index,
            } => {
                self.ingest(state, &data, AudioFormat::Encoded, sample_rate, index, tx)
                    .await;
            }
            VoiceClientFrame::AudioChunkPcm { data, sample_rate } => {
                self.ingest(state, &data, AudioFormat::Pcm, sample_rate, None, tx)
                    .await;
            }
            VoiceClientFrame::StartConversation { config } => {
                if let Some(config) = config {
                    self.apply_config(state, &config).await;
                }
                state.conversation_active.store(true, Ordering::SeqCst);
                state.recording.store(true, Ordering::SeqCst);
                {
                    let mut buffer = state.buffer.lock().await;
                    buffer.set_mode(VoiceMode::Conversation);
                }
                state.settings.lock().await.state = ConversationState::Listening;
                let _ = tx.send(VoiceServerFrame::ConversationStarted);
            }
            VoiceClientFrame::StopConversation => {
                state.conversation_active.store(false, Ordering::SeqCst);
                state.recording.store(false, Ordering::SeqCst);
                {
                    let mut buffer = state.buffer.lock().await;
                    buffer.set_mode(VoiceMode::Plain);
                }
                state.settings.lock().await.state = ConversationState::Idle;
                let _ = tx.send(VoiceServerFrame::ConversationStopped);
            }
            VoiceClientFrame::ProcessTurn => {
                self.pipeline.force_turn(state).await;
            }
            VoiceClientFrame::GenerateResponse {
                text,
                conversation_history,
            } => {
                self.pipeline
                    .generate_response(state, &text, &conversation_history)
                    .await;
            }
            VoiceClientFrame::GenerateTts { text, voice } => {
                self.pipeline
                    .generate_tts(state, &text, voice.as_deref())
                    .await;
            }
            VoiceClientFrame::UpdateVoice { voice } => {
                state.settings.lock().await.voice = voice.clone();
                info!(session_id = state.session_id, voice, "Voice updated");
                let settings = state.settings.lock().await;
                let _ = tx.send(VoiceServerFrame::Configured {
                    voice: settings.voice.clone(),
                    model: settings.model.clone(),
                });
            }
            VoiceClientFrame::TestTranscription => {
                self.pipeline.test_transcription(state).await;
            }
            VoiceClientFrame::Ping => {
                let _ = tx.send(VoiceServerFrame::Pong);
            }
        }
    }

    async fn apply_config(&self, state: &Arc<VoiceSessionState>, config: &ConversationConfig) {
        let mut settings = state.settings.lock().await;
        if let Some(voice) = &config.voice {
            settings.voice = voice.clone();
        }
        if let Some(model) = &config.model {
            settings.model = model.clone();
        }
        if let Some(mode) = &config.transcription_mode {
            settings.transcription_mode = TranscriptionMode::from_str_or_default(mode);
        }
    }

    async fn ingest(
        &self,
        state: &Arc<VoiceSessionState>,
        data: &str,
        format: AudioFormat,
        sample_rate: Option<u32>,
        part_index: Option<u32>,
        tx: &UnboundedSender<VoiceServerFrame>,
    ) {
        let bytes = match BASE64.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(VoiceServerFrame::Error {
                    message: format!("Invalid audio payload: {e}"),
                });
                return;
            }
        };
        let chunk = AudioChunk::new(
            &state.session_id,
            bytes,
            format,
            sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            part_index,
        );
        self.pipeline.ingest_chunk(state, chunk).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::llm::{
        ChatMessage, ChatRequest, ChatResponse, ChatResponseWithTools, ChatStream,
        InferenceCapabilities, Tool,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoProvider;

    #[async_trait]
    impl InferenceProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn display_name(&self) -> &'static str {
            "Echo"
        }
        fn capabilities(&self) -> InferenceCapabilities {
            InferenceCapabilities::full_featured()
        }
        fn default_model(&self) -> &str {
            "echo-1"
        }
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
            let last = request
                .messages
                .last()
                .map(ChatMessage::clone)
                .map(|m| m.content)
                .unwrap_or_default();
            Ok(ChatResponse {
                content: last,
                model: "echo-1".to_owned(),
                usage: None,
                finish_reason: None,
            })
        }
        async fn complete_stream(&self, _request: &ChatRequest) -> Result<ChatStream, AppError> {
            Err(AppError::internal("not used"))
        }
        async fn complete_with_tools(
            &self,
            _request: &ChatRequest,
            _tools: Option<Vec<Tool>>,
        ) -> Result<ChatResponseWithTools, AppError> {
            Err(AppError::internal("not used"))
        }
        async fn health_check(&self) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    struct SilentSpeech;

    #[async_trait]
    impl SpeechProvider for SilentSpeech {
        async fn transcribe(
            &self,
            _wav: Vec<u8>,
            _model: &str,
        ) -> Result<Option<String>, AppError> {
            Ok(None)
        }
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, AppError> {
            Ok(vec![1, 2, 3])
        }
    }

    fn manager() -> VoiceSessionManager {
        VoiceSessionManager::new(
            Arc::new(EchoProvider),
            Arc::new(SilentSpeech),
            &ServerConfig::default(),
        )
    }

    fn state_and_channel() -> (
        Arc<VoiceSessionState>,
        mpsc::UnboundedSender<VoiceServerFrame>,
        mpsc::UnboundedReceiver<VoiceServerFrame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let limiters = LimiterFactory::new(
            crate::config::LimiterScope::Session,
            Duration::from_millis(0),
        );
        let state = Arc::new(VoiceSessionState::new(
            "vs-test".to_owned(),
            "alloy".to_owned(),
            "echo-1".to_owned(),
            limiters.for_session(),
            tx.clone(),
        ));
        (state, tx, rx)
    }

    #[tokio::test]
    async fn start_conversation_switches_mode_and_acknowledges() {
        let manager = manager();
        let (state, tx, mut rx) = state_and_channel();

        manager
            .handle_frame(
                &state,
                VoiceClientFrame::StartConversation { config: None },
                &tx,
            )
            .await;

        assert!(state.conversation_active.load(Ordering::SeqCst));
        assert!(state.recording.load(Ordering::SeqCst));
        assert!(matches!(
            rx.recv().await,
            Some(VoiceServerFrame::ConversationStarted)
        ));
    }

    #[tokio::test]
    async fn configure_applies_overrides() {
        let manager = manager();
        let (state, tx, mut rx) = state_and_channel();

        manager
            .handle_frame(
                &state,
                VoiceClientFrame::Configure {
                    voice: Some("nova".to_owned()),
                    model: None,
                },
                &tx,
            )
            .await;

        match rx.recv().await {
            Some(VoiceServerFrame::Configured { voice, model }) => {
                assert_eq!(voice, "nova");
                assert_eq!(model, "echo-1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected_without_closing() {
        let manager = manager();
        let (state, tx, mut rx) = state_and_channel();
        state.recording.store(true, Ordering::SeqCst);

        manager
            .handle_frame(
                &state,
                VoiceClientFrame::AudioChunkPcm {
                    data: "not base64!!".to_owned(),
                    sample_rate: None,
                },
                &tx,
            )
            .await;

        assert!(matches!(rx.recv().await, Some(VoiceServerFrame::Error { .. })));
        assert!(state.buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ping_pong() {
        let manager = manager();
        let (state, tx, mut rx) = state_and_channel();
        manager
            .handle_frame(&state, VoiceClientFrame::Ping, &tx)
            .await;
        assert!(matches!(rx.recv().await, Some(VoiceServerFrame::Pong)));
    }

    #[tokio::test]
    async fn generate_tts_emits_audio() {
        let manager = manager();
        let (state, tx, mut rx) = state_and_channel();
        manager
            .handle_frame(
                &state,
                VoiceClientFrame::GenerateTts {
                    text: "read this".to_owned(),
                    voice: None,
                },
                &tx,
            )
            .await;
        match rx.recv().await {
            Some(VoiceServerFrame::TtsReady { audio_data }) => {
                assert_eq!(BASE64.decode(audio_data).unwrap(), vec![1, 2, 3]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
