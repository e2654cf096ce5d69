// ABOUTME: OpenAI-compatible inference gateway client for chat completion
// ABOUTME: Implements non-streaming, streaming (SSE), and tool-calling requests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Inference Gateway Client
//!
//! Speaks the OpenAI chat completions wire format, which covers cloud
//! gateways and local servers (Ollama, vLLM) alike. Streaming responses are
//! SSE-framed; the line buffer in [`super::sse_parser`] handles chunk
//! boundary alignment.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::sse_parser::{SseEvent, SseLineBuffer};
use super::{
    ChatMessage, ChatRequest, ChatResponse, ChatResponseWithTools, ChatStream, FunctionCall,
    InferenceCapabilities, InferenceProvider, StreamChunk, TokenUsage, Tool,
};
use crate::config::ServerConfig;
use crate::errors::AppError;

/// Connection timeout
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Request timeout (inference can be slow)
const REQUEST_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Wire Types (OpenAI-compatible format)
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireToolCall {
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

// ============================================================================
// Gateway Provider
// ============================================================================

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL without trailing slash (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Bearer API key (empty for local servers)
    pub api_key: String,
    /// Default model identifier
    pub default_model: String,
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            base_url: config.gateway_base_url.clone(),
            api_key: config.gateway_api_key.clone(),
            default_model: config.default_model.clone(),
        }
    }
}

/// OpenAI-compatible inference gateway client
pub struct GatewayProvider {
    client: Client,
    config: GatewayConfig,
}

impl GatewayProvider {
    /// Create a new gateway client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: GatewayConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "Initializing inference gateway: base_url={}, model={}",
            config.base_url, config.default_model
        );

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ChatRequest, stream: bool, tools: Option<&[Tool]>) -> WireRequest {
        WireRequest {
            model: request
                .model
                .as_deref()
                .unwrap_or(&self.config.default_model)
                .to_owned(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            tools: tools.map(Self::convert_tools),
            tool_choice: tools.map(|_| "auto".to_owned()),
        }
    }

    fn convert_tools(tools: &[Tool]) -> Vec<WireTool> {
        tools
            .iter()
            .flat_map(|tool| {
                tool.function_declarations.iter().map(|func| WireTool {
                    tool_type: "function".to_owned(),
                    function: WireFunction {
                        name: func.name.clone(),
                        description: func.description.clone(),
                        parameters: func.parameters.clone(),
                    },
                })
            })
            .collect()
    }

    fn convert_tool_calls(tool_calls: &[WireToolCall]) -> Vec<FunctionCall> {
        tool_calls
            .iter()
            .map(|call| {
                let args: Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                FunctionCall {
                    name: call.function.name.clone(),
                    args,
                }
            })
            .collect()
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    fn connect_error(&self, e: &reqwest::Error) -> AppError {
        error!("Failed to reach inference gateway: {e}");
        if e.is_connect() {
            AppError::external_service(
                "gateway",
                format!("cannot connect to {}", self.config.base_url),
            )
        } else if e.is_timeout() {
            AppError::external_timeout("gateway")
        } else {
            AppError::external_service("gateway", format!("request failed: {e}"))
        }
    }

    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
        if let Ok(parsed) = serde_json::from_str::<WireErrorResponse>(body) {
            AppError::external_service("gateway", format!("{status}: {}", parsed.error.message))
        } else {
            AppError::external_service(
                "gateway",
                format!("{status}: {}", body.chars().take(200).collect::<String>()),
            )
        }
    }

    async fn send_completion(&self, wire: &WireRequest) -> Result<WireResponse, AppError> {
        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(wire);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::external_service("gateway", format!("read failed: {e}")))?;

        if !status.is_success() {
            return Err(Self::parse_error_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                "Failed to parse gateway response: {e} - body: {}",
                &body[..body.len().min(500)]
            );
            AppError::external_service("gateway", format!("parse failed: {e}"))
        })
    }
}

/// Parse one SSE data payload into a stream chunk, skipping unparseable noise
fn parse_stream_payload(json_str: &str) -> Option<StreamChunk> {
    match serde_json::from_str::<WireStreamChunk>(json_str) {
        Ok(chunk) => chunk.choices.into_iter().next().map(|choice| StreamChunk {
            delta: choice.delta.content.unwrap_or_default(),
            is_final: choice.finish_reason.is_some(),
            finish_reason: choice.finish_reason,
        }),
        Err(e) => {
            warn!("Failed to parse stream chunk: {e}");
            None
        }
    }
}

#[async_trait]
impl InferenceProvider for GatewayProvider {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn display_name(&self) -> &'static str {
        "Inference Gateway"
    }

    fn capabilities(&self) -> InferenceCapabilities {
        InferenceCapabilities::full_featured()
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let wire = self.build_request(request, false, None);
        let response = self.send_completion(&wire).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::external_service("gateway", "API returned no choices"))?;

        let content = choice.message.content.unwrap_or_default();
        debug!(
            "Gateway completion: {} chars, finish_reason: {:?}",
            content.len(),
            choice.finish_reason
        );

        Ok(ChatResponse {
            content,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let wire = self.build_request(request, true, None);

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&wire);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let mut byte_stream = response.bytes_stream();

        let chunk_stream = stream! {
            let mut parser = SseLineBuffer::new();
            let mut done = false;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(AppError::external_service(
                            "gateway",
                            format!("Stream read error: {e}"),
                        ));
                        return;
                    }
                };

                for event in parser.feed(&bytes) {
                    match event {
                        SseEvent::Data(json_str) => {
                            if let Some(chunk) = parse_stream_payload(&json_str) {
                                if !chunk.delta.is_empty() || chunk.is_final {
                                    done = done || chunk.is_final;
                                    yield Ok(chunk);
                                }
                            }
                        }
                        SseEvent::Done => {
                            if !done {
                                done = true;
                                yield Ok(StreamChunk {
                                    delta: String::new(),
                                    is_final: true,
                                    finish_reason: Some("stop".to_owned()),
                                });
                            }
                        }
                    }
                }
            }

            // Stream ended without a [DONE] marker; recover any buffered tail.
            if let Some(SseEvent::Data(json_str)) = parser.flush() {
                if let Some(chunk) = parse_stream_payload(&json_str) {
                    if !chunk.delta.is_empty() || chunk.is_final {
                        yield Ok(chunk);
                    }
                }
            }
        };

        Ok(Box::pin(chunk_stream))
    }

    #[instrument(skip(self, request, tools), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_with_tools(
        &self,
        request: &ChatRequest,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatResponseWithTools, AppError> {
        let wire = self.build_request(request, false, tools.as_deref());
        let response = self.send_completion(&wire).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::external_service("gateway", "API returned no choices"))?;

        let function_calls = choice.message.tool_calls.map(|calls| {
            info!("Gateway returned {} tool calls", calls.len());
            Self::convert_tool_calls(&calls)
        });

        Ok(ChatResponseWithTools {
            content: choice.message.content,
            function_calls,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let http_request = self.client.get(self.api_url("models"));
        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stream_payload_extracts_delta() {
        let chunk = parse_stream_payload(
            r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.delta, "hi");
        assert!(!chunk.is_final);
    }

    #[test]
    fn parse_stream_payload_marks_final() {
        let chunk = parse_stream_payload(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert!(chunk.delta.is_empty());
        assert!(chunk.is_final);
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_stream_payload_skips_garbage() {
        assert!(parse_stream_payload("not json").is_none());
        assert!(parse_stream_payload(r#"{"choices":[]}"#).is_none());
    }

    #[test]
    fn wire_request_omits_unset_fields() {
        let request = WireRequest {
            model: "m".to_owned(),
            messages: vec![],
            temperature: None,
            max_tokens: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("tools"));
    }
}
