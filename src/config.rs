// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Reads server, database, and inference gateway settings from environment variables
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! Environment-based configuration for the Chorus server

use crate::errors::{AppError, AppResult};
use std::env;
use std::time::Duration;

/// Scope of the shared ASR call limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimiterScope {
    /// One limiter shared by every voice session on this server instance
    #[default]
    Global,
    /// One limiter per voice session
    Session,
}

impl LimiterScope {
    /// Parse from string with fallback to the global scope
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "session" | "per-session" => LimiterScope::Session,
            _ => LimiterScope::Global,
        }
    }
}

/// Server configuration assembled from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// SQLite database URL (e.g. `sqlite:chorus.db` or `sqlite::memory:`)
    pub database_url: String,
    /// Model identifier used when the client does not request one
    pub default_model: String,
    /// Inference gateway base URL (OpenAI-compatible, no trailing slash)
    pub gateway_base_url: String,
    /// Bearer key for the inference gateway
    pub gateway_api_key: String,
    /// ASR model identifier
    pub asr_model: String,
    /// TTS model identifier
    pub tts_model: String,
    /// Default synthesis voice
    pub default_voice: String,
    /// Number of most-recent messages loaded as model context
    pub history_context_limit: usize,
    /// Scope of the shared ASR call limiter
    pub limiter_scope: LimiterScope,
    /// Minimum spacing between ASR submissions
    pub asr_min_spacing: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            database_url: "sqlite:chorus.db".into(),
            default_model: "llama-3.3-70b".into(),
            gateway_base_url: "https://api.openai.com/v1".into(),
            gateway_api_key: String::new(),
            asr_model: "whisper-1".into(),
            tts_model: "tts-1".into(),
            default_voice: "alloy".into(),
            history_context_limit: 20,
            limiter_scope: LimiterScope::Global,
            asr_min_spacing: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let http_port = match env::var("CHORUS_HTTP_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::config(format!("invalid CHORUS_HTTP_PORT: {e}")))?,
            Err(_) => defaults.http_port,
        };

        let history_context_limit = match env::var("CHORUS_HISTORY_LIMIT") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|e| AppError::config(format!("invalid CHORUS_HISTORY_LIMIT: {e}")))?,
            Err(_) => defaults.history_context_limit,
        };

        let asr_min_spacing = match env::var("CHORUS_ASR_MIN_SPACING_MS") {
            Ok(raw) => {
                let ms = raw.parse::<u64>().map_err(|e| {
                    AppError::config(format!("invalid CHORUS_ASR_MIN_SPACING_MS: {e}"))
                })?;
                Duration::from_millis(ms)
            }
            Err(_) => defaults.asr_min_spacing,
        };

        Ok(Self {
            http_port,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            default_model: env::var("CHORUS_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            gateway_base_url: env::var("CHORUS_GATEWAY_URL")
                .map(|u| u.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.gateway_base_url),
            gateway_api_key: env::var("CHORUS_GATEWAY_API_KEY").unwrap_or_default(),
            asr_model: env::var("CHORUS_ASR_MODEL").unwrap_or(defaults.asr_model),
            tts_model: env::var("CHORUS_TTS_MODEL").unwrap_or(defaults.tts_model),
            default_voice: env::var("CHORUS_DEFAULT_VOICE").unwrap_or(defaults.default_voice),
            history_context_limit,
            limiter_scope: env::var("CHORUS_LIMITER_SCOPE")
                .map(|s| LimiterScope::from_str_or_default(&s))
                .unwrap_or(defaults.limiter_scope),
            asr_min_spacing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_scope_parses_known_values() {
        assert_eq!(
            LimiterScope::from_str_or_default("session"),
            LimiterScope::Session
        );
        assert_eq!(
            LimiterScope::from_str_or_default("global"),
            LimiterScope::Global
        );
        assert_eq!(
            LimiterScope::from_str_or_default("garbage"),
            LimiterScope::Global
        );
    }

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.history_context_limit, 20);
        assert_eq!(config.asr_min_spacing, Duration::from_secs(1));
        assert_eq!(config.limiter_scope, LimiterScope::Global);
    }
}
