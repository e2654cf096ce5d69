// ABOUTME: Per-session ordered audio buffer and the transcription trigger policies
// ABOUTME: Wraps raw PCM in a WAV container and reassembles labeled fragments in index order
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Audio Ingestion & Buffering
//!
//! Every inbound audio frame becomes an [`AudioChunk`] appended to the
//! session's buffer. Chunks are fragments of one continuous stream, so they
//! are always concatenated in arrival order (or explicit part-index order
//! for pre-encoded files split into labeled parts) before being handed to
//! the speech adapter.
//!
//! Two trigger policies, selected by [`TranscriptionMode`]:
//!
//! - **live**: a partial pass is due whenever the buffer length is a
//!   multiple of the partial threshold; partials never clear the buffer.
//! - **turn**: a full pass is due at the full threshold, or once audio has
//!   been accumulating longer than 8 seconds so speech that never reaches
//!   the threshold is not silently stalled. Full passes mark chunks
//!   processed and clear the buffer.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Audio accumulating longer than this forces a full pass
pub const ACCUMULATION_TIMEOUT: Duration = Duration::from_secs(8);

/// Encoding of a chunk's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw 16-bit mono PCM samples, needs a WAV header before submission
    Pcm,
    /// Already a complete container format (WAV, MP3, WebM, ...)
    Encoded,
}

/// When the buffer submits audio to the speech adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionMode {
    /// Interim partial passes while audio keeps arriving
    Live,
    /// One full pass per detected turn
    #[default]
    Turn,
}

impl TranscriptionMode {
    /// Parse from string with fallback to turn mode
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "live" => Self::Live,
            _ => Self::Turn,
        }
    }
}

/// Operating mode affecting the buffer thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceMode {
    /// Full conversation pipeline (partials at 6, full at 8)
    #[default]
    Conversation,
    /// Plain transcription (partials at 3, full at 12)
    Plain,
}

impl VoiceMode {
    /// Buffer length multiple that triggers a partial pass
    #[must_use]
    pub const fn partial_threshold(self) -> usize {
        match self {
            Self::Conversation => 6,
            Self::Plain => 3,
        }
    }

    /// Buffer length that triggers a full pass
    #[must_use]
    pub const fn full_threshold(self) -> usize {
        match self {
            Self::Conversation => 8,
            Self::Plain => 12,
        }
    }
}

/// One inbound audio fragment
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Chunk identifier
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Payload bytes
    pub data: Vec<u8>,
    /// Arrival time
    pub timestamp: DateTime<Utc>,
    /// Whether a full pass has consumed this chunk
    pub processed: bool,
    /// Payload encoding
    pub format: AudioFormat,
    /// Sample rate of the payload
    pub sample_rate: u32,
    /// Explicit position for labeled file parts
    pub part_index: Option<u32>,
}

impl AudioChunk {
    /// Create a chunk arriving now
    #[must_use]
    pub fn new(
        session_id: &str,
        data: Vec<u8>,
        format: AudioFormat,
        sample_rate: u32,
        part_index: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            data,
            timestamp: Utc::now(),
            processed: false,
            format,
            sample_rate,
            part_index,
        }
    }
}

/// Ordered per-session audio buffer
#[derive(Debug)]
pub struct AudioBuffer {
    chunks: Vec<AudioChunk>,
    mode: VoiceMode,
    /// When the oldest unprocessed audio arrived
    accumulating_since: Option<Instant>,
    /// Incremented on every drain; lets a watchdog tell whether a pass
    /// consumed the audio it was watching
    generation: u64,
}

impl AudioBuffer {
    /// Create an empty buffer for the given mode
    #[must_use]
    pub const fn new(mode: VoiceMode) -> Self {
        Self {
            chunks: Vec::new(),
            mode,
            accumulating_since: None,
            generation: 0,
        }
    }

    /// Change the operating mode (affects thresholds only)
    pub fn set_mode(&mut self, mode: VoiceMode) {
        self.mode = mode;
    }

    /// Append a chunk, starting the accumulation clock if idle
    pub fn push(&mut self, chunk: AudioChunk, now: Instant) {
        if self.accumulating_since.is_none() {
            self.accumulating_since = Some(now);
        }
        self.chunks.push(chunk);
    }

    /// Number of buffered chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the buffer holds no chunks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether a partial (live) pass is due at the current length
    #[must_use]
    pub fn partial_due(&self) -> bool {
        let threshold = self.mode.partial_threshold();
        !self.chunks.is_empty() && self.chunks.len() % threshold == 0
    }

    /// Whether a full pass is due: threshold reached, or audio has been
    /// accumulating past the timeout
    #[must_use]
    pub fn full_due(&self, now: Instant) -> bool {
        if self.chunks.is_empty() {
            return false;
        }
        if self.chunks.len() >= self.mode.full_threshold() {
            return true;
        }
        self.accumulating_since
            .is_some_and(|since| now.duration_since(since) > ACCUMULATION_TIMEOUT)
    }

    /// Concatenate buffered audio in submission order without consuming it
    ///
    /// Labeled parts are reassembled by part index; otherwise arrival order
    /// is preserved.
    #[must_use]
    pub fn combined(&self) -> Vec<u8> {
        let mut ordered: Vec<&AudioChunk> = self.chunks.iter().collect();
        if ordered.iter().all(|c| c.part_index.is_some()) {
            ordered.sort_by_key(|c| c.part_index);
        }
        let mut combined = Vec::with_capacity(ordered.iter().map(|c| c.data.len()).sum());
        for chunk in ordered {
            combined.extend_from_slice(&chunk.data);
        }
        combined
    }

    /// Dominant payload format of the buffered audio
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        if self.chunks.iter().any(|c| c.format == AudioFormat::Encoded) {
            AudioFormat::Encoded
        } else {
            AudioFormat::Pcm
        }
    }

    /// Sample rate of the buffered audio (first chunk wins)
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.chunks.first().map_or(16_000, |c| c.sample_rate)
    }

    /// Drain counter; advances every time a full pass consumes the buffer
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consume the buffer for a full pass: combine, mark processed, clear
    #[must_use]
    pub fn drain(&mut self) -> Vec<u8> {
        let combined = self.combined();
        for chunk in &mut self.chunks {
            chunk.processed = true;
        }
        self.chunks.clear();
        self.accumulating_since = None;
        self.generation += 1;
        combined
    }
}

/// Wrap raw 16-bit mono PCM bytes in a canonical 44-byte WAV header
#[must_use]
pub fn wrap_pcm_in_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let byte_rate = sample_rate * 2;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt subchunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
