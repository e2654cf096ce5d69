// ABOUTME: Four-stage voice pipeline: buffer drain, transcription, inference, synthesis
// ABOUTME: Owns the per-session state machine and the single-flight processing guard
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Voice Pipeline
//!
//! Each audio arrival is evaluated against the buffer's trigger policies.
//! Partial passes are interim: they never clear the buffer, are skipped when
//! the rate limiter rejects them, and carry no authority. Full passes and
//! conversation turns drain the buffer and run under a compare-exchange
//! guard so at most one is in flight per session; a trigger that loses the
//! race is dropped, its audio picked up by the pass already running.
//!
//! Silence is not an error anywhere in the pipeline: an empty transcript
//! aborts the turn without a frame, and the guard is released so the next
//! turn can run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::buffer::{
    wrap_pcm_in_wav, AudioBuffer, AudioChunk, AudioFormat, TranscriptionMode, VoiceMode,
    ACCUMULATION_TIMEOUT,
};
use super::limiter::AsrRateLimiter;
use super::protocol::{HistoryEntry, VoiceServerFrame};
use super::turn::{ConversationWindow, TurnDetector};
use crate::llm::{ChatMessage, ChatRequest, InferenceProvider, MessageRole, SpeechProvider};

/// Standing instruction for conversation-mode responses
const CONVERSATION_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant. Keep responses concise and conversational; \
     they will be read aloud.";

/// Where the session is in the conversation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// Not in conversation mode
    #[default]
    Idle,
    /// Accepting audio, waiting for a turn
    Listening,
    /// A turn is running through the pipeline
    Processing,
    /// Synthesized audio is being delivered
    Speaking,
}

/// Mutable per-session settings
#[derive(Debug)]
pub struct SessionSettings {
    /// Synthesis voice
    pub voice: String,
    /// Inference model
    pub model: String,
    /// When the buffer submits to ASR
    pub transcription_mode: TranscriptionMode,
    /// Conversation loop position
    pub state: ConversationState,
}

/// Shared state of one voice session
pub struct VoiceSessionState {
    /// Session identifier
    pub session_id: String,
    /// Ordered audio buffer
    pub buffer: Mutex<AudioBuffer>,
    /// Sliding conversation window
    pub window: Mutex<ConversationWindow>,
    /// Mutable settings
    pub settings: Mutex<SessionSettings>,
    /// Single-flight guard for full passes and turns
    pub is_processing: AtomicBool,
    /// Whether conversation mode is active
    pub conversation_active: AtomicBool,
    /// Whether audio is currently accepted
    pub recording: AtomicBool,
    /// Whether an accumulation watchdog task is running
    watchdog_armed: AtomicBool,
    /// ASR submission limiter for this session
    pub limiter: Arc<AsrRateLimiter>,
    /// Outbound frame channel
    pub tx: UnboundedSender<VoiceServerFrame>,
}

impl VoiceSessionState {
    /// Create state for a fresh session
    #[must_use]
    pub fn new(
        session_id: String,
        voice: String,
        model: String,
        limiter: Arc<AsrRateLimiter>,
        tx: UnboundedSender<VoiceServerFrame>,
    ) -> Self {
        Self {
            session_id,
            buffer: Mutex::new(AudioBuffer::new(VoiceMode::Plain)),
            window: Mutex::new(ConversationWindow::new()),
            settings: Mutex::new(SessionSettings {
                voice,
                model,
                transcription_mode: TranscriptionMode::Turn,
                state: ConversationState::Idle,
            }),
            is_processing: AtomicBool::new(false),
            conversation_active: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            watchdog_armed: AtomicBool::new(false),
            limiter,
            tx,
        }
    }

    fn send(&self, frame: VoiceServerFrame) {
        let _ = self.tx.send(frame);
    }

    async fn set_state(&self, state: ConversationState) {
        self.settings.lock().await.state = state;
    }
}

/// Runs audio through transcription, inference, and synthesis
#[derive(Clone)]
pub struct VoicePipeline {
    provider: Arc<dyn InferenceProvider>,
    speech: Arc<dyn SpeechProvider>,
    asr_model: String,
    detector: TurnDetector,
}

impl VoicePipeline {
    /// Create a pipeline over the given providers
    #[must_use]
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        speech: Arc<dyn SpeechProvider>,
        asr_model: impl Into<String>,
    ) -> Self {
        let detector = TurnDetector::new(VoiceMode::Conversation.full_threshold());
        Self {
            provider,
            speech,
            asr_model: asr_model.into(),
            detector,
        }
    }

    /// Ingest one audio chunk and fire whatever passes are due
    pub async fn ingest_chunk(&self, state: &Arc<VoiceSessionState>, chunk: AudioChunk) {
        if !state.recording.load(Ordering::SeqCst)
            && !state.conversation_active.load(Ordering::SeqCst)
        {
            debug!(session_id = state.session_id, "Dropping audio while not recording");
            return;
        }

        let now = Instant::now();
        let (partial_due, full_due, buffer_len, live_mode) = {
            let mut buffer = state.buffer.lock().await;
            buffer.push(chunk, now);
            let live = state.settings.lock().await.transcription_mode == TranscriptionMode::Live;
            (buffer.partial_due(), buffer.full_due(now), buffer.len(), live)
        };

        if live_mode && partial_due && state.limiter.try_acquire(now) {
            let pipeline = self.clone();
            let state = Arc::clone(state);
            tokio::spawn(async move {
                pipeline.partial_pass(&state).await;
            });
        }

        let turn_complete = self.detector.is_turn_complete(None, buffer_len);
        if full_due || (state.conversation_active.load(Ordering::SeqCst) && turn_complete) {
            self.try_full_pass(state).await;
        } else {
            self.arm_watchdog(state);
        }
    }

    /// Fire a full pass when audio sits under threshold past the
    /// accumulation timeout, so quiet speakers are not silently stalled
    ///
    /// One watchdog task per session; it exits once the buffer empties and
    /// is re-armed by the next chunk.
    fn arm_watchdog(&self, state: &Arc<VoiceSessionState>) {
        if state
            .watchdog_armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pipeline = self.clone();
        let state = Arc::clone(state);
        tokio::spawn(async move {
            loop {
                let generation = state.buffer.lock().await.generation();
                tokio::time::sleep(ACCUMULATION_TIMEOUT + Duration::from_millis(250)).await;
                let (empty, unchanged) = {
                    let buffer = state.buffer.lock().await;
                    (buffer.is_empty(), buffer.generation() == generation)
                };
                if empty {
                    break;
                }
                if unchanged {
                    pipeline.try_full_pass(&state).await;
                }
            }
            state.watchdog_armed.store(false, Ordering::SeqCst);
        });
    }

    /// Spawn a full pass or conversation turn if none is in flight
    async fn try_full_pass(&self, state: &Arc<VoiceSessionState>) {
        if state
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                session_id = state.session_id,
                "Pass already in flight, trigger dropped"
            );
            return;
        }
        let pipeline = self.clone();
        let state = Arc::clone(state);
        tokio::spawn(async move {
            if state.conversation_active.load(Ordering::SeqCst) {
                pipeline.run_conversation_turn(&state).await;
            } else {
                pipeline.run_plain_pass(&state).await;
            }
            state.is_processing.store(false, Ordering::SeqCst);
        });
    }

    /// Force a turn now, regardless of buffer thresholds
    pub async fn force_turn(&self, state: &Arc<VoiceSessionState>) {
        if state.buffer.lock().await.is_empty() {
            return;
        }
        self.try_full_pass(state).await;
    }

    /// Interim transcription of the current buffer, non-consuming
    async fn partial_pass(&self, state: &Arc<VoiceSessionState>) {
        let wav = {
            let buffer = state.buffer.lock().await;
            if buffer.is_empty() {
                return;
            }
            prepare_audio(&buffer.combined(), buffer.format(), buffer.sample_rate())
        };

        match self.speech.transcribe(wav, &self.asr_model).await {
            Ok(Some(text)) => {
                state.send(VoiceServerFrame::PartialTranscription {
                    text,
                    is_partial: true,
                });
            }
            Ok(None) => {}
            Err(e) => {
                // Partials are best-effort; a failure is logged, not surfaced.
                debug!(session_id = state.session_id, "Partial pass failed: {e}");
            }
        }
    }

    /// Full pass outside conversation mode: authoritative transcript plus
    /// timing metrics
    async fn run_plain_pass(&self, state: &Arc<VoiceSessionState>) {
        let (wav, buffer_size) = {
            let mut buffer = state.buffer.lock().await;
            if buffer.is_empty() {
                return;
            }
            let size = buffer.len();
            let format = buffer.format();
            let rate = buffer.sample_rate();
            (prepare_audio(&buffer.drain(), format, rate), size)
        };

        let started = Instant::now();
        match self.speech.transcribe(wav, &self.asr_model).await {
            Ok(transcript) => {
                let latency = elapsed_ms(started);
                let quality = if transcript.is_some() { 0.9 } else { 0.0 };
                if let Some(text) = transcript {
                    state.send(VoiceServerFrame::LiveTranscription {
                        text,
                        confidence: 1.0,
                    });
                }
                state.send(VoiceServerFrame::Metrics {
                    latency,
                    buffer_size,
                    quality,
                });
            }
            Err(e) => {
                warn!(session_id = state.session_id, "Transcription failed: {e}");
                state.send(VoiceServerFrame::TranscriptionError {
                    error: e.to_string(),
                });
            }
        }
    }

    /// One full conversation turn: transcribe, infer, synthesize
    async fn run_conversation_turn(&self, state: &Arc<VoiceSessionState>) {
        state.set_state(ConversationState::Processing).await;

        let wav = {
            let mut buffer = state.buffer.lock().await;
            if buffer.is_empty() {
                state.set_state(ConversationState::Listening).await;
                return;
            }
            let format = buffer.format();
            let rate = buffer.sample_rate();
            prepare_audio(&buffer.drain(), format, rate)
        };

        let transcript = match self.speech.transcribe(wav, &self.asr_model).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                // Silence: abort the turn without a frame.
                debug!(session_id = state.session_id, "Turn audio was silence");
                state.set_state(ConversationState::Listening).await;
                return;
            }
            Err(e) => {
                warn!(session_id = state.session_id, "Turn transcription failed: {e}");
                state.send(VoiceServerFrame::TranscriptionError {
                    error: e.to_string(),
                });
                state.set_state(ConversationState::Listening).await;
                return;
            }
        };

        state.send(VoiceServerFrame::TranscriptionResult {
            text: transcript.clone(),
            confidence: 1.0,
        });

        let (messages, model, voice) = {
            let mut window = state.window.lock().await;
            window.push(MessageRole::User, transcript);
            let mut messages = vec![ChatMessage::system(CONVERSATION_SYSTEM_PROMPT)];
            messages.extend(window.as_messages());
            let settings = state.settings.lock().await;
            (messages, settings.model.clone(), settings.voice.clone())
        };

        let request = ChatRequest::new(messages)
            .with_model(&model)
            .with_temperature(0.7);

        let response = match self.provider.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(session_id = state.session_id, "Turn inference failed: {e}");
                state.send(VoiceServerFrame::ConversationError {
                    error: e.to_string(),
                });
                state.set_state(ConversationState::Listening).await;
                return;
            }
        };

        state.window.lock().await.push(MessageRole::Assistant, response.content.clone());
        state.send(VoiceServerFrame::LlmResponse {
            text: response.content.clone(),
        });

        state.set_state(ConversationState::Speaking).await;
        self.deliver_tts(state, &response.content, &voice).await;
        state.set_state(ConversationState::Listening).await;
        info!(session_id = state.session_id, "Conversation turn completed");
    }

    /// Direct response generation from client-supplied history
    pub async fn generate_response(
        &self,
        state: &Arc<VoiceSessionState>,
        text: &str,
        history: &[HistoryEntry],
    ) {
        let (model, voice) = {
            let settings = state.settings.lock().await;
            (settings.model.clone(), settings.voice.clone())
        };

        let mut messages = vec![ChatMessage::system(CONVERSATION_SYSTEM_PROMPT)];
        for entry in history {
            let role = match entry.role.as_str() {
                "assistant" => MessageRole::Assistant,
                _ => MessageRole::User,
            };
            messages.push(ChatMessage::new(role, entry.text.clone()));
        }
        messages.push(ChatMessage::user(text));

        let request = ChatRequest::new(messages)
            .with_model(&model)
            .with_temperature(0.7);

        match self.provider.complete(&request).await {
            Ok(response) => {
                state.send(VoiceServerFrame::LlmResponse {
                    text: response.content.clone(),
                });
                self.deliver_tts(state, &response.content, &voice).await;
            }
            Err(e) => {
                state.send(VoiceServerFrame::ConversationError {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Direct speech synthesis
    pub async fn generate_tts(
        &self,
        state: &Arc<VoiceSessionState>,
        text: &str,
        voice_override: Option<&str>,
    ) {
        let voice = match voice_override {
            Some(voice) => voice.to_owned(),
            None => state.settings.lock().await.voice.clone(),
        };
        self.deliver_tts(state, text, &voice).await;
    }

    /// Transcribe the buffered audio without consuming it
    pub async fn test_transcription(&self, state: &Arc<VoiceSessionState>) {
        let wav = {
            let buffer = state.buffer.lock().await;
            if buffer.is_empty() {
                state.send(VoiceServerFrame::TranscriptionError {
                    error: "no audio buffered".to_owned(),
                });
                return;
            }
            prepare_audio(&buffer.combined(), buffer.format(), buffer.sample_rate())
        };

        match self.speech.transcribe(wav, &self.asr_model).await {
            Ok(transcript) => {
                state.send(VoiceServerFrame::TranscriptionResult {
                    text: transcript.unwrap_or_default(),
                    confidence: 1.0,
                });
            }
            Err(e) => {
                state.send(VoiceServerFrame::TranscriptionError {
                    error: e.to_string(),
                });
            }
        }
    }

    async fn deliver_tts(&self, state: &Arc<VoiceSessionState>, text: &str, voice: &str) {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        match self.speech.synthesize(text, voice).await {
            Ok(audio) if audio.is_empty() => {}
            Ok(audio) => {
                state.send(VoiceServerFrame::TtsReady {
                    audio_data: STANDARD.encode(audio),
                });
            }
            Err(e) => {
                warn!(session_id = state.session_id, "Synthesis failed: {e}");
                state.send(VoiceServerFrame::TtsError {
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Make buffered audio submission-ready: raw PCM gains a WAV header,
/// container formats pass through untouched
fn prepare_audio(combined: &[u8], format: AudioFormat, sample_rate: u32) -> Vec<u8> {
    match format {
        AudioFormat::Pcm => wrap_pcm_in_wav(combined, sample_rate),
        AudioFormat::Encoded => combined.to_vec(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::llm::{
        ChatResponse, ChatResponseWithTools, ChatStream, InferenceCapabilities, Tool,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ScriptedSpeech {
        transcript: Option<String>,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl SpeechProvider for ScriptedSpeech {
        async fn transcribe(
            &self,
            _wav: Vec<u8>,
            _model: &str,
        ) -> Result<Option<String>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.transcript.clone())
        }

        async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, AppError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    struct ScriptedProvider;

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
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse {
                content: format!("echo: {last}"),
                model: "scripted-1".to_owned(),
                usage: None,
                finish_reason: Some("stop".to_owned()),
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

    fn pipeline_with(
        transcript: Option<&str>,
        delay: Duration,
    ) -> (VoicePipeline, Arc<ScriptedSpeech>) {
        let speech = Arc::new(ScriptedSpeech {
            transcript: transcript.map(ToOwned::to_owned),
            calls: AtomicUsize::new(0),
            delay,
        });
        let pipeline = VoicePipeline::new(
            Arc::new(ScriptedProvider),
            Arc::clone(&speech) as Arc<dyn SpeechProvider>,
            "whisper-1",
        );
        (pipeline, speech)
    }

    fn session_state(
        tx: mpsc::UnboundedSender<VoiceServerFrame>,
    ) -> Arc<VoiceSessionState> {
        Arc::new(VoiceSessionState::new(
            "vs-1".to_owned(),
            "alloy".to_owned(),
            "scripted-1".to_owned(),
            Arc::new(AsrRateLimiter::new(Duration::from_millis(0))),
            tx,
        ))
    }

    fn pcm_chunk() -> AudioChunk {
        AudioChunk::new("vs-1", vec![0u8; 64], AudioFormat::Pcm, 16_000, None)
    }

    async fn collect_frames(
        rx: &mut mpsc::UnboundedReceiver<VoiceServerFrame>,
    ) -> Vec<VoiceServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            match frame {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }

    #[tokio::test]
    async fn conversation_turn_emits_full_frame_sequence() {
        let (pipeline, _) = pipeline_with(Some("turn it up"), Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.conversation_active.store(true, Ordering::SeqCst);
        state.buffer.lock().await.set_mode(VoiceMode::Conversation);

        for _ in 0..8 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }

        let frames = collect_frames(&mut rx).await;
        let kinds: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                VoiceServerFrame::TranscriptionResult { .. } => "transcription_result",
                VoiceServerFrame::LlmResponse { .. } => "llm_response",
                VoiceServerFrame::TtsReady { .. } => "tts_ready",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["transcription_result", "llm_response", "tts_ready"]
        );
        assert_eq!(state.window.lock().await.len(), 2);
        assert!(state.buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn silence_aborts_turn_without_frames() {
        let (pipeline, _) = pipeline_with(None, Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.conversation_active.store(true, Ordering::SeqCst);
        state.buffer.lock().await.set_mode(VoiceMode::Conversation);

        for _ in 0..8 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }

        let frames = collect_frames(&mut rx).await;
        assert!(frames.is_empty(), "silence should not surface frames");
        assert!(!state.is_processing.load(Ordering::SeqCst));
        assert!(state.window.lock().await.is_empty());
    }

    #[tokio::test]
    async fn processing_guard_allows_at_most_one_pass() {
        // A slow ASR call holds the guard while more triggers arrive.
        let (pipeline, speech) = pipeline_with(Some("hello"), Duration::from_millis(150));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.recording.store(true, Ordering::SeqCst);

        for _ in 0..30 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }
        let _ = collect_frames(&mut rx).await;
        assert_eq!(speech.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plain_pass_emits_transcript_and_metrics() {
        let (pipeline, _) = pipeline_with(Some("plain text"), Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.recording.store(true, Ordering::SeqCst);

        for _ in 0..12 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }

        let frames = collect_frames(&mut rx).await;
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::LiveTranscription { text, .. } if text == "plain text")));
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::Metrics { buffer_size, .. } if *buffer_size == 12)));
    }

    #[tokio::test]
    async fn test_transcription_keeps_buffer() {
        let (pipeline, _) = pipeline_with(Some("probe"), Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.recording.store(true, Ordering::SeqCst);

        pipeline.ingest_chunk(&state, pcm_chunk()).await;
        pipeline.test_transcription(&state).await;

        let frames = collect_frames(&mut rx).await;
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::TranscriptionResult { text, .. } if text == "probe")));
        assert_eq!(state.buffer.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn generate_response_uses_supplied_history() {
        let (pipeline, _) = pipeline_with(None, Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);

        let history = vec![HistoryEntry {
            role: "assistant".to_owned(),
            text: "earlier".to_owned(),
        }];
        pipeline.generate_response(&state, "what now", &history).await;

        let frames = collect_frames(&mut rx).await;
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::LlmResponse { text } if text == "echo: what now")));
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::TtsReady { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn accumulation_timeout_fires_turn_below_threshold() {
        // 7 chunks never reach the 8-chunk threshold; the watchdog must
        // run the turn once the accumulation timeout passes with no
        // further audio.
        let (pipeline, speech) = pipeline_with(Some("quiet speaker"), Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = session_state(tx);
        state.conversation_active.store(true, Ordering::SeqCst);
        state.buffer.lock().await.set_mode(VoiceMode::Conversation);

        for _ in 0..7 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }
        assert_eq!(speech.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(ACCUMULATION_TIMEOUT + Duration::from_secs(1)).await;

        let frames = collect_frames(&mut rx).await;
        assert!(frames
            .iter()
            .any(|f| matches!(f, VoiceServerFrame::TranscriptionResult { text, .. } if text == "quiet speaker")));
        assert!(state.buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn audio_dropped_while_not_recording() {
        let (pipeline, speech) = pipeline_with(Some("x"), Duration::from_millis(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let state = session_state(tx);

        for _ in 0..12 {
            pipeline.ingest_chunk(&state, pcm_chunk()).await;
        }
        assert!(state.buffer.lock().await.is_empty());
        assert_eq!(speech.calls.load(Ordering::SeqCst), 0);
    }
}
