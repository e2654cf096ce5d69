// ABOUTME: Speech-to-text and text-to-speech adapter for the inference gateway
// ABOUTME: Multipart WAV upload for transcription, JSON POST for synthesis, tolerant response parsing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Speech Adapter
//!
//! Wraps the gateway's audio endpoints. Transcription responses vary by
//! backend, so parsing tries an ordered list of extractors and treats a
//! missing transcript as silence rather than an error. Every external call
//! is bounded by a hard 30 second timeout.

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::gateway::GatewayConfig;
use crate::errors::AppError;

/// Hard ceiling on any single speech API call
const SPEECH_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech provider trait for transcription and synthesis
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Transcribe WAV audio. `Ok(None)` means the backend heard silence.
    async fn transcribe(&self, wav_bytes: Vec<u8>, model: &str)
        -> Result<Option<String>, AppError>;

    /// Synthesize speech audio for `text` with the given voice
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, AppError>;
}

/// Speech client for an OpenAI-compatible gateway
pub struct GatewaySpeech {
    client: Client,
    config: GatewayConfig,
    tts_model: String,
}

impl GatewaySpeech {
    /// Create a new speech client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: GatewayConfig, tts_model: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(SPEECH_TIMEOUT)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            tts_model: tts_model.into(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'))
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }
}

/// Pull a transcript out of a transcription response body
///
/// Extractors are tried in order; the first that yields a string wins. A
/// response where neither shape is present is silence, not an error.
pub(crate) fn extract_transcript(body: &Value) -> Option<String> {
    let extractors: [fn(&Value) -> Option<&str>; 2] = [
        // Deepgram-style nested shape
        |v| {
            v.get("results")?
                .get("channels")?
                .get(0)?
                .get("alternatives")?
                .get(0)?
                .get("transcript")?
                .as_str()
        },
        // Whisper-style flat shape
        |v| v.get("text")?.as_str(),
    ];

    extractors
        .iter()
        .find_map(|extract| extract(body))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
}

#[async_trait]
impl SpeechProvider for GatewaySpeech {
    async fn transcribe(
        &self,
        wav_bytes: Vec<u8>,
        model: &str,
    ) -> Result<Option<String>, AppError> {
        let audio_len = wav_bytes.len();
        let part = multipart::Part::bytes(wav_bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AppError::internal(format!("invalid mime type: {e}")))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", model.to_owned());

        let request = self
            .client
            .post(self.api_url("audio/transcriptions"))
            .multipart(form);

        let response = tokio::time::timeout(SPEECH_TIMEOUT, self.add_auth_header(request).send())
            .await
            .map_err(|_| AppError::external_timeout("asr"))?
            .map_err(|e| AppError::external_service("asr", format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::external_service("asr", format!("read failed: {e}")))?;

        if !status.is_success() {
            return Err(AppError::external_service(
                "asr",
                format!("{status}: {}", body.chars().take(200).collect::<String>()),
            ));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| AppError::external_service("asr", format!("parse failed: {e}")))?;

        let transcript = extract_transcript(&parsed);
        match &transcript {
            Some(text) => debug!(
                "Transcribed {audio_len} bytes of audio into {} chars",
                text.len()
            ),
            None => debug!("Transcription of {audio_len} bytes returned silence"),
        }
        Ok(transcript)
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.tts_model,
            "input": text,
            "voice": voice,
        });

        let request = self.client.post(self.api_url("audio/speech")).json(&body);

        let response = tokio::time::timeout(SPEECH_TIMEOUT, self.add_auth_header(request).send())
            .await
            .map_err(|_| AppError::external_timeout("tts"))?
            .map_err(|e| AppError::external_service("tts", format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("TTS request failed: {status}");
            return Err(AppError::external_service(
                "tts",
                format!("{status}: {}", body.chars().take(200).collect::<String>()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::external_service("tts", format!("read failed: {e}")))?;

        info!("Synthesized {} bytes of speech audio", bytes.len());
        Ok(bytes.to_vec())
    }
}
