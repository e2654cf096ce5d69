// ABOUTME: Function-calling orchestrator with the built-in tool set
// ABOUTME: Executes model-requested tool invocations locally and composes one assistant message
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Function-Calling Orchestrator
//!
//! Non-streaming alternate path of the chat engine. The model receives the
//! conversation plus a fixed tool schema; any invocations it returns are
//! executed locally against pure functions and their results concatenated,
//! in encounter order, into one composed assistant message. Unknown tool
//! names produce an inline error string instead of failing the turn.

use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use super::artifacts::extract_artifacts;
use super::protocol::ServerFrame;
use crate::database::SessionStore;
use crate::errors::AppResult;
use crate::llm::{
    ChatMessage, ChatRequest, FunctionCall, FunctionDeclaration, InferenceProvider, MessageRole,
    Tool,
};

/// The fixed tool schema offered to the model
#[must_use]
pub fn builtin_tools() -> Vec<Tool> {
    vec![Tool {
        function_declarations: vec![
            FunctionDeclaration {
                name: "calculator".to_owned(),
                description: "Evaluate an arithmetic expression with +, -, *, / and parentheses"
                    .to_owned(),
                parameters: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "expression": {"type": "string", "description": "Expression to evaluate"}
                    },
                    "required": ["expression"]
                })),
            },
            FunctionDeclaration {
                name: "clock".to_owned(),
                description: "Get the current date and time in UTC".to_owned(),
                parameters: Some(serde_json::json!({"type": "object", "properties": {}})),
            },
            FunctionDeclaration {
                name: "random_number".to_owned(),
                description: "Generate a random integer in an inclusive range".to_owned(),
                parameters: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "min": {"type": "integer"},
                        "max": {"type": "integer"}
                    },
                    "required": ["min", "max"]
                })),
            },
            FunctionDeclaration {
                name: "create_task".to_owned(),
                description: "Create a task with a title and optional description".to_owned(),
                parameters: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["title"]
                })),
            },
        ],
    }]
}

/// Execute one tool invocation against the built-in pure functions
#[must_use]
pub fn execute_function(call: &FunctionCall) -> String {
    match call.name.as_str() {
        "calculator" => run_calculator(&call.args),
        "clock" => chrono::Utc::now().to_rfc3339(),
        "random_number" => run_random_number(&call.args),
        "create_task" => run_create_task(&call.args),
        unknown => format!("Error: unknown function '{unknown}'"),
    }
}

fn run_calculator(args: &Value) -> String {
    let Some(expression) = args.get("expression").and_then(Value::as_str) else {
        return "Error: calculator requires an 'expression' argument".to_owned();
    };
    match evaluate_expression(expression) {
        Ok(value) => {
            // Render integers without a trailing ".0"
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{expression} = {}", value as i64)
            } else {
                format!("{expression} = {value}")
            }
        }
        Err(e) => format!("Error: {e}"),
    }
}

fn run_random_number(args: &Value) -> String {
    let min = args.get("min").and_then(Value::as_i64).unwrap_or(0);
    let max = args.get("max").and_then(Value::as_i64).unwrap_or(100);
    if min > max {
        return format!("Error: invalid range {min}..{max}");
    }
    let value = rand::thread_rng().gen_range(min..=max);
    format!("Random number between {min} and {max}: {value}")
}

fn run_create_task(args: &Value) -> String {
    let Some(title) = args.get("title").and_then(Value::as_str) else {
        return "Error: create_task requires a 'title' argument".to_owned();
    };
    match args.get("description").and_then(Value::as_str) {
        Some(description) => format!("Task created: \"{title}\" ({description})"),
        None => format!("Task created: \"{title}\""),
    }
}

// ============================================================================
// Expression Evaluator
// ============================================================================

/// Recursive-descent evaluator for `+ - * /` and parentheses
fn evaluate_expression(input: &str) -> Result<f64, String> {
    let mut parser = ExprParser {
        chars: input.as_bytes(),
        pos: 0,
    };
    let value = parser.parse_sum()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected input at position {}", parser.pos));
    }
    Ok(value)
}

struct ExprParser<'a> {
    chars: &'a [u8],
    pos: usize,
}

impl ExprParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.chars.get(self.pos).copied()
    }

    fn parse_sum(&mut self) -> Result<f64, String> {
        let mut value = self.parse_product()?;
        while let Some(op) = self.peek() {
            match op {
                b'+' => {
                    self.pos += 1;
                    value += self.parse_product()?;
                }
                b'-' => {
                    self.pos += 1;
                    value -= self.parse_product()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_product(&mut self) -> Result<f64, String> {
        let mut value = self.parse_atom()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => {
                    self.pos += 1;
                    value *= self.parse_atom()?;
                }
                b'/' => {
                    self.pos += 1;
                    let divisor = self.parse_atom()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_owned());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.parse_sum()?;
                if self.peek() == Some(b')') {
                    self.pos += 1;
                    Ok(value)
                } else {
                    Err("missing closing parenthesis".to_owned())
                }
            }
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.parse_atom()?)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self
                    .chars
                    .get(self.pos)
                    .is_some_and(|c| c.is_ascii_digit() || *c == b'.')
                {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.chars[start..self.pos])
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| "invalid number".to_owned())
            }
            _ => Err("expected a number or '('".to_owned()),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Function-calling orchestrator bound to one store and provider
#[derive(Clone)]
pub struct FunctionOrchestrator {
    store: SessionStore,
    provider: Arc<dyn InferenceProvider>,
    history_limit: usize,
}

impl FunctionOrchestrator {
    /// Create a new orchestrator
    #[must_use]
    pub fn new(
        store: SessionStore,
        provider: Arc<dyn InferenceProvider>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            provider,
            history_limit,
        }
    }

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

    /// Run one function-calling turn; request/response, never streams
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
            let _ = outbound.send(ServerFrame::FunctionCallingError {
                message_id: message_id.to_owned(),
                error: e.to_string(),
            });
            return;
        }

        let _ = outbound.send(ServerFrame::MessageReceived {
            message_id: message_id.to_owned(),
        });
        let _ = outbound.send(ServerFrame::FunctionCallingStart {
            message_id: message_id.to_owned(),
        });

        let messages = match self.load_context(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                let _ = outbound.send(ServerFrame::FunctionCallingError {
                    message_id: message_id.to_owned(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let request = ChatRequest::new(messages).with_model(model);
        let response = match self
            .provider
            .complete_with_tools(&request, Some(builtin_tools()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let _ = outbound.send(ServerFrame::FunctionCallingError {
                    message_id: message_id.to_owned(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let mut parts = Vec::new();
        if let Some(text) = response.content {
            let text = text.trim().to_owned();
            if !text.is_empty() {
                parts.push(text);
            }
        }
        if let Some(calls) = response.function_calls {
            info!(session_id, "Executing {} tool invocations", calls.len());
            for call in &calls {
                parts.push(execute_function(call));
            }
        }
        let composed = parts.join("\n\n");

        if let Err(e) = self
            .store
            .save_message(session_id, "assistant", &composed)
            .await
        {
            warn!(session_id, "Failed to persist composed message: {e}");
            let _ = outbound.send(ServerFrame::FunctionCallingError {
                message_id: message_id.to_owned(),
                error: e.to_string(),
            });
            return;
        }

        for artifact in extract_artifacts(session_id, message_id, &composed) {
            if let Err(e) = self.store.save_artifact(&artifact).await {
                warn!(session_id, artifact_id = %artifact.id, "Failed to persist artifact: {e}");
            }
        }

        let _ = outbound.send(ServerFrame::FunctionCallingComplete {
            message_id: message_id.to_owned(),
            content: composed,
        });
    }
}
