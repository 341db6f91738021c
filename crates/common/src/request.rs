//! Per-turn request and per-conversation session types.

use serde::{Deserialize, Serialize};

/// One inbound user utterance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub utterance: String,
    pub session_id: String,
    /// Zero-based position of this turn within its session
    pub turn_index: usize,
}

impl Request {
    pub fn new(utterance: impl Into<String>, session_id: impl Into<String>, turn_index: usize) -> Self {
        Self {
            utterance: utterance.into(),
            session_id: session_id.into(),
            turn_index,
        }
    }
}

/// A completed request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub request: Request,
    pub response: String,
    /// Source system that handled the turn, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<crate::SourceSystem>,
    /// Timestamp (Unix millis)
    pub completed_at: i64,
}

/// Ordered history of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub turns: Vec<Turn>,
    /// Timestamp (Unix millis)
    pub created_at: i64,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn next_turn_index(&self) -> usize {
        self.turns.len()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}
