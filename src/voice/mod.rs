// ABOUTME: Voice channel: audio buffering, turn detection, rate limiting, and the speech pipeline
// ABOUTME: One session actor per connection; the pipeline fans audio out to ASR, LLM, and TTS
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Voice Channel
//!
//! Everything behind the `/ws/voice` endpoint: frame protocol, per-session
//! audio buffering with trigger policies, conversation turn detection, the
//! ASR rate limiter, and the four-stage pipeline that turns buffered audio
//! into a spoken response.

pub mod buffer;
pub mod limiter;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod turn;

pub use buffer::{AudioBuffer, AudioChunk, AudioFormat, TranscriptionMode, VoiceMode};
pub use limiter::{AsrRateLimiter, LimiterFactory};
pub use orchestrator::{VoicePipeline, VoiceSessionState};
pub use protocol::{VoiceClientFrame, VoiceServerFrame};
pub use session::VoiceSessionManager;
