//! The seam between the supervisor and specialist agents.
//!
//! Lives in `docrelay-common` so that the coordinator can hold specialists
//! without depending on how they are built.

use crate::{Request, Result, SourceSystem, ToolInvocation, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Work handed from the supervisor to one specialist.
#[derive(Debug, Clone)]
pub struct DelegatedTask {
    pub request: Request,
    /// Instruction relayed by the supervisor
    pub instruction: String,
    /// Earlier turns of the same session, oldest first
    pub history: Vec<Turn>,
}

impl DelegatedTask {
    pub fn new(request: Request) -> Self {
        Self {
            instruction: request.utterance.clone(),
            request,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }
}

/// What a specialist hands back after its tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistReport {
    pub system: SourceSystem,
    pub answer: String,
    /// Tool calls in the order they were made
    pub invocations: Vec<ToolInvocation>,
    pub steps: usize,
    /// False when the step budget ran out before a final answer
    pub completed: bool,
}

/// A specialist agent bound to one source system.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn system(&self) -> SourceSystem;

    /// Names of the capability tools this agent can call.
    fn capabilities(&self) -> Vec<String>;

    fn has_capability(&self, tool: &str) -> bool {
        self.capabilities().iter().any(|t| t == tool)
    }

    /// Run the delegated task to completion.
    async fn handle(&self, task: &DelegatedTask) -> Result<SpecialistReport>;

    /// Check if the agent is available (not busy and not shut down).
    fn is_available(&self) -> bool;

    /// Release the agent's external client handle.
    async fn shutdown(&self);
}
