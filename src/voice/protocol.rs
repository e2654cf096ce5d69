// ABOUTME: Wire protocol frames for the voice WebSocket channel
// ABOUTME: Audio payloads travel base64-encoded; all outbound frames are one-way notifications
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use serde::{Deserialize, Serialize};

/// Conversation configuration carried by `start_conversation` and `configure`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    /// Synthesis voice
    pub voice: Option<String>,
    /// Inference model
    pub model: Option<String>,
    /// Transcription mode (`live` or `turn`)
    pub transcription_mode: Option<String>,
}

/// One prior turn supplied with a direct `generate_response` request
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// `user` or `assistant`
    pub role: String,
    /// Turn text
    pub text: String,
}

/// Frames the client sends on the voice channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceClientFrame {
    /// Set voice and model for the session
    Configure {
        /// Synthesis voice
        voice: Option<String>,
        /// Inference model
        model: Option<String>,
    },
    /// Begin accepting audio
    StartRecording,
    /// Stop accepting audio
    StopRecording,
    /// Pre-encoded audio fragment (base64)
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        /// Base64-encoded audio bytes
        data: String,
        /// Sample rate, if known
        #[serde(default)]
        sample_rate: Option<u32>,
        /// Position of this fragment when a file is split into labeled parts
        #[serde(default)]
        index: Option<u32>,
    },
    /// Raw PCM fragment (base64, 16-bit mono)
    #[serde(rename_all = "camelCase")]
    AudioChunkPcm {
        /// Base64-encoded PCM samples
        data: String,
        /// Sample rate, if known
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// Enter conversation mode
    StartConversation {
        /// Optional configuration overrides
        #[serde(default)]
        config: Option<ConversationConfig>,
    },
    /// Leave conversation mode
    StopConversation,
    /// Force turn processing now
    ProcessTurn,
    /// Direct response generation from supplied history
    #[serde(rename_all = "camelCase")]
    GenerateResponse {
        /// Prompt text
        text: String,
        /// Prior turns for context
        #[serde(default)]
        conversation_history: Vec<HistoryEntry>,
    },
    /// Direct speech synthesis
    GenerateTts {
        /// Text to synthesize
        text: String,
        /// Override voice
        #[serde(default)]
        voice: Option<String>,
    },
    /// Change the synthesis voice
    UpdateVoice {
        /// New voice
        voice: String,
    },
    /// Transcribe whatever is buffered, without clearing it
    TestTranscription,
    /// Keep-alive probe
    Ping,
}

/// Frames the server sends on the voice channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceServerFrame {
    /// Connection established
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        /// Session identifier
        session_id: String,
        /// Active voice
        voice: String,
        /// Active model
        model: String,
    },
    /// Configuration applied
    Configured {
        /// Active voice
        voice: String,
        /// Active model
        model: String,
    },
    /// Recording started
    RecordingStarted,
    /// Recording stopped
    RecordingStopped,
    /// Authoritative transcription of a full buffer pass
    LiveTranscription {
        /// Transcript text
        text: String,
        /// Confidence estimate
        confidence: f32,
    },
    /// Interim, non-authoritative transcription
    #[serde(rename_all = "camelCase")]
    PartialTranscription {
        /// Transcript text
        text: String,
        /// Always true; distinguishes interim results
        is_partial: bool,
    },
    /// Transcription stage failed
    TranscriptionError {
        /// Human-readable cause
        error: String,
    },
    /// Timing and buffer statistics after a full pass
    #[serde(rename_all = "camelCase")]
    Metrics {
        /// Milliseconds spent in the ASR call
        latency: u64,
        /// Chunks combined for the pass
        buffer_size: usize,
        /// Coarse quality estimate
        quality: f32,
    },
    /// Conversation mode entered
    ConversationStarted,
    /// Conversation mode left
    ConversationStopped,
    /// Transcript that advanced the conversation
    TranscriptionResult {
        /// Transcript text
        text: String,
        /// Confidence estimate
        confidence: f32,
    },
    /// Assistant response text
    LlmResponse {
        /// Response text
        text: String,
    },
    /// Synthesized speech audio (base64)
    #[serde(rename_all = "camelCase")]
    TtsReady {
        /// Base64-encoded audio bytes
        audio_data: String,
    },
    /// Synthesis stage failed
    TtsError {
        /// Human-readable cause
        error: String,
    },
    /// Conversation pipeline failed
    ConversationError {
        /// Human-readable cause
        error: String,
    },
    /// Keep-alive reply
    Pong,
    /// Generic error, connection stays open
    Error {
        /// Human-readable cause
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_pcm_parses() {
        let frame: VoiceClientFrame = serde_json::from_str(
            r#"{"type":"audio_chunk_pcm","data":"AAAA","sampleRate":16000}"#,
        )
        .unwrap();
        match frame {
            VoiceClientFrame::AudioChunkPcm { data, sample_rate } => {
                assert_eq!(data, "AAAA");
                assert_eq!(sample_rate, Some(16000));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn start_conversation_config_is_optional() {
        let frame: VoiceClientFrame =
            serde_json::from_str(r#"{"type":"start_conversation"}"#).unwrap();
        assert!(matches!(
            frame,
            VoiceClientFrame::StartConversation { config: None }
        ));

        let frame: VoiceClientFrame = serde_json::from_str(
            r#"{"type":"start_conversation","config":{"voice":"nova","transcriptionMode":"turn"}}"#,
        )
        .unwrap();
        match frame {
            VoiceClientFrame::StartConversation {
                config: Some(config),
            } => {
                assert_eq!(config.voice.as_deref(), Some("nova"));
                assert_eq!(config.transcription_mode.as_deref(), Some("turn"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn tts_ready_serializes_camel_case() {
        let json = serde_json::to_string(&VoiceServerFrame::TtsReady {
            audio_data: "QUJD".to_owned(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"tts_ready""#));
        assert!(json.contains(r#""audioData":"QUJD""#));
    }

    #[test]
    fn metrics_frame_shape() {
        let json = serde_json::to_string(&VoiceServerFrame::Metrics {
            latency: 420,
            buffer_size: 8,
            quality: 0.9,
        })
        .unwrap();
        assert!(json.contains(r#""bufferSize":8"#));
    }
}
