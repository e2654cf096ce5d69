// ABOUTME: Turn-completion detection and the bounded conversation history window
// ABOUTME: Classifier signal with confidence gating, buffer-size heuristic as fallback
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::llm::{ChatMessage, MessageRole};

/// Classifier output below this confidence is ignored
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Turns kept as inference context
pub const HISTORY_WINDOW: usize = 5;

/// Output of an external turn classifier
#[derive(Debug, Clone, Copy)]
pub struct TurnSignal {
    /// Probability that the user finished speaking
    pub probability: f32,
    /// The classifier's boolean verdict
    pub complete: bool,
}

/// Decides when the user has finished speaking
#[derive(Debug, Clone, Copy)]
pub struct TurnDetector {
    /// Buffer length at which the fallback heuristic declares a turn
    fallback_chunks: usize,
}

impl TurnDetector {
    /// Create a detector whose fallback fires at `fallback_chunks` buffered
    /// chunks
    #[must_use]
    pub const fn new(fallback_chunks: usize) -> Self {
        Self { fallback_chunks }
    }

    /// Evaluate turn completion
    ///
    /// A confident classifier signal wins. Without one, or below the
    /// confidence threshold, the buffer-size heuristic decides.
    #[must_use]
    pub fn is_turn_complete(&self, signal: Option<TurnSignal>, buffer_len: usize) -> bool {
        if let Some(signal) = signal {
            if signal.probability >= CONFIDENCE_THRESHOLD {
                return signal.complete;
            }
        }
        buffer_len >= self.fallback_chunks
    }
}

/// One turn in the sliding conversation window
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// `user` or `assistant`
    pub role: MessageRole,
    /// Turn text
    pub text: String,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

/// Bounded sliding window of recent turns used as inference context
///
/// Not the durable message log; voice turns live only in memory.
#[derive(Debug, Default)]
pub struct ConversationWindow {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    /// Create an empty window
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, evicting the oldest past the window bound
    pub fn push(&mut self, role: MessageRole, text: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > HISTORY_WINDOW {
            self.turns.pop_front();
        }
    }

    /// Number of retained turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The retained turns as inference messages, oldest first
    #[must_use]
    pub fn as_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| ChatMessage::new(turn.role, turn.text.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_signal_wins_over_buffer() {
        let detector = TurnDetector::new(8);
        let signal = TurnSignal {
            probability: 0.95,
            complete: true,
        };
        assert!(detector.is_turn_complete(Some(signal), 0));

        let not_done = TurnSignal {
            probability: 0.9,
            complete: false,
        };
        // Confident "not complete" overrides a full buffer.
        assert!(!detector.is_turn_complete(Some(not_done), 100));
    }

    #[test]
    fn low_confidence_falls_back_to_heuristic() {
        let detector = TurnDetector::new(8);
        let weak = TurnSignal {
            probability: 0.4,
            complete: true,
        };
        assert!(!detector.is_turn_complete(Some(weak), 7));
        assert!(detector.is_turn_complete(Some(weak), 8));
    }

    #[test]
    fn missing_signal_uses_heuristic() {
        let detector = TurnDetector::new(8);
        assert!(!detector.is_turn_complete(None, 7));
        assert!(detector.is_turn_complete(None, 8));
    }

    #[test]
    fn window_keeps_last_five_turns() {
        let mut window = ConversationWindow::new();
        for i in 0..7 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            window.push(role, format!("turn {i}"));
        }
        assert_eq!(window.len(), HISTORY_WINDOW);
        let messages = window.as_messages();
        assert_eq!(messages[0].content, "turn 2");
        assert_eq!(messages[4].content, "turn 6");
    }
}
