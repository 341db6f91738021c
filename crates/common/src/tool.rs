//! Records of capability-tool calls.

use crate::OperationError;
use serde::{Deserialize, Serialize};

/// Arguments passed to a capability tool.
pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// One capability-tool call and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: ToolArguments,
    pub result: std::result::Result<serde_json::Value, OperationError>,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Short human-readable rendering for transcripts and planner prompts.
    pub fn render(&self) -> String {
        match &self.result {
            Ok(value) => format!("{} -> ok: {}", self.tool_name, value),
            Err(e) => format!("{} -> error ({}): {}", self.tool_name, e.kind, e.message),
        }
    }
}
