//! Transcript messages exchanged between the user, the supervisor, and specialists.

use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Prefixes that mark control-transfer notices rather than substantive answers.
pub const TRANSFER_PREFIXES: &[&str] = &["Transferring back", "Successfully transferred"];

/// A single entry in a turn's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Unique message ID
    pub id: String,

    pub role: MessageRole,

    pub content: String,

    /// Agent that produced the message (supervisor or a specialist id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,

    /// Agent control is being handed to, for handoff messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,

    /// Timestamp (Unix millis)
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl TranscriptMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            source_agent: None,
            target_agent: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn from_agent(agent: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(MessageRole::Assistant, content);
        msg.source_agent = Some(agent.into());
        msg
    }

    /// A control transfer from one agent to another.
    pub fn handoff(from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        let mut msg = Self::with_role(MessageRole::Assistant, format!("Transferring to {to}"));
        msg.source_agent = Some(from.into());
        msg.target_agent = Some(to);
        msg
    }

    /// A tool result produced on behalf of `agent`.
    pub fn tool(agent: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(MessageRole::Tool, content);
        msg.source_agent = Some(agent.into());
        msg
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// True for handoffs and "transferred back" acknowledgements.
    pub fn is_transfer_notice(&self) -> bool {
        self.target_agent.is_some()
            || TRANSFER_PREFIXES
                .iter()
                .any(|prefix| self.content.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_is_a_transfer_notice() {
        let msg = TranscriptMessage::handoff("supervisor", "jira_agent");
        assert!(msg.is_transfer_notice());
        assert_eq!(msg.content, "Transferring to jira_agent");
    }

    #[test]
    fn transfer_back_text_is_a_transfer_notice() {
        let msg = TranscriptMessage::from_agent("jira_agent", "Transferring back to supervisor");
        assert!(msg.is_transfer_notice());
        let ack = TranscriptMessage::from_agent("supervisor", "Successfully transferred back to supervisor");
        assert!(ack.is_transfer_notice());
    }

    #[test]
    fn answer_is_not_a_transfer_notice() {
        let msg = TranscriptMessage::from_agent("jira_agent", "Created PROJ-7 and attached invoice.pdf");
        assert!(!msg.is_transfer_notice());
    }

    #[test]
    fn null_metadata_is_omitted() {
        let json = serde_json::to_value(TranscriptMessage::user("hi")).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["role"], "user");
    }
}
