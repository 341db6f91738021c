//! The supervisor: route one turn, delegate it, record what happened.

use crate::routing::{Route, RouteDecision, RoutingPolicy};
use crate::session::{SessionStore, resolve_session_id};
use crate::transcript::TranscriptStore;
use docrelay_common::{
    Agent, DelegatedTask, DocrelayError, MessageRole, Request, Result, SourceSystem, TranscriptMessage,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub const SUPERVISOR_ID: &str = "supervisor";

/// Outcome of one supervised turn.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorResponse {
    pub response: String,
    pub session_id: String,
    pub decision: RouteDecision,
    /// Every message of the turn in order
    pub transcript: Vec<TranscriptMessage>,
}

/// The last substantive answer in a transcript.
///
/// Skips supervisor messages and transfer notices. Falls back to the last
/// message when nothing else qualifies.
pub fn extract_final_answer(transcript: &[TranscriptMessage]) -> String {
    transcript
        .iter()
        .rev()
        .find(|m| {
            m.role == MessageRole::Assistant
                && m.source_agent.as_deref() != Some(SUPERVISOR_ID)
                && !m.is_transfer_notice()
        })
        .or_else(|| transcript.last())
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// Routes requests to specialists, one delegation at a time.
pub struct Supervisor {
    agents: Vec<Arc<dyn Agent>>,
    policy: RoutingPolicy,
    sessions: SessionStore,
    transcripts: TranscriptStore,
    /// Held for the whole of a delegation
    delegation: Mutex<()>,
}

impl Supervisor {
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
        let policy = RoutingPolicy::new(agents.iter().map(|a| a.system()).collect());
        Self {
            agents,
            policy,
            sessions: SessionStore::new(),
            transcripts: TranscriptStore::disabled(),
            delegation: Mutex::new(()),
        }
    }

    pub fn with_transcripts(mut self, transcripts: TranscriptStore) -> Self {
        self.transcripts = transcripts;
        self
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn agent(&self, system: SourceSystem) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.system() == system)
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Open a turn for `session_id` (or a new session) and handle it.
    ///
    /// Turns of one session run one after another: the next turn is numbered
    /// and sees its history only once the previous one is recorded.
    pub async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<SupervisorResponse> {
        let session_id = resolve_session_id(session_id);
        let lock = self.sessions.turn_lock(&session_id);
        let _turn = lock.lock().await;
        let request = self.sessions.begin_turn(Some(&session_id), message);
        self.run_turn(request).await
    }

    /// Handle a request built by the caller.
    pub async fn handle(&self, request: Request) -> Result<SupervisorResponse> {
        let lock = self.sessions.turn_lock(&request.session_id);
        let _turn = lock.lock().await;
        self.run_turn(request).await
    }

    async fn run_turn(&self, request: Request) -> Result<SupervisorResponse> {
        info!(
            session_id = %request.session_id,
            turn = request.turn_index,
            "Handling request"
        );
        let mut transcript = vec![TranscriptMessage::user(&request.utterance)];
        let decision = self.policy.route(&request);

        let system = match &decision.route {
            Route::Clarify { question } => {
                transcript.push(
                    TranscriptMessage::from_agent(SUPERVISOR_ID, question)
                        .with_metadata(json!({ "rationale": decision.rationale })),
                );
                return Ok(self.finish(request, decision, transcript, None).await);
            }
            Route::Delegate { system } => *system,
        };

        let agent = self
            .agent(system)
            .cloned()
            .ok_or_else(|| DocrelayError::Routing(format!("no specialist registered for {system}")))?;

        transcript.push(
            TranscriptMessage::from_agent(
                SUPERVISOR_ID,
                format!("Routing to {} ({})", agent.name(), decision.rationale),
            )
            .with_metadata(json!({ "confidence": decision.confidence })),
        );
        transcript.push(TranscriptMessage::handoff(SUPERVISOR_ID, agent.id()));

        let task = DelegatedTask::new(request.clone()).with_history(self.sessions.history(&request.session_id));
        let outcome = {
            let _delegation = self.delegation.lock().await;
            agent.handle(&task).await
        };

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(agent = %agent.id(), error = %e, "Specialist failed");
                transcript.push(TranscriptMessage::system(format!("{} failed: {e}", agent.name())));
                self.transcripts.save(&request.session_id, &transcript).await;
                return Err(e);
            }
        };

        for invocation in &report.invocations {
            transcript.push(
                TranscriptMessage::from_agent(agent.id(), format!("Calling {}", invocation.tool_name))
                    .with_metadata(json!({
                        "tool": invocation.tool_name,
                        "arguments": Value::Object(invocation.arguments.clone()),
                    })),
            );
            transcript.push(
                TranscriptMessage::tool(agent.id(), invocation.render()).with_metadata(json!({
                    "tool": invocation.tool_name,
                    "success": invocation.succeeded(),
                    "duration_ms": invocation.duration_ms,
                })),
            );
        }
        transcript.push(
            TranscriptMessage::from_agent(agent.id(), &report.answer).with_metadata(json!({
                "steps": report.steps,
                "completed": report.completed,
            })),
        );
        transcript.push(TranscriptMessage::from_agent(agent.id(), "Transferring back to supervisor"));
        transcript.push(TranscriptMessage::from_agent(
            SUPERVISOR_ID,
            "Successfully transferred back to supervisor",
        ));

        Ok(self.finish(request, decision, transcript, Some(system)).await)
    }

    async fn finish(
        &self,
        request: Request,
        decision: RouteDecision,
        transcript: Vec<TranscriptMessage>,
        handled_by: Option<SourceSystem>,
    ) -> SupervisorResponse {
        let response = extract_final_answer(&transcript);
        let session_id = request.session_id.clone();
        self.transcripts.save(&session_id, &transcript).await;
        self.sessions.record(request, &response, handled_by);
        SupervisorResponse {
            response,
            session_id,
            decision,
            transcript,
        }
    }

    /// Release every specialist's client handle.
    pub async fn shutdown(&self) {
        for agent in &self.agents {
            agent.shutdown().await;
        }
        info!(agents = self.agents.len(), "Supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_skips_transfer_notices_and_supervisor() {
        let transcript = vec![
            TranscriptMessage::user("create a ticket"),
            TranscriptMessage::handoff(SUPERVISOR_ID, "jira_agent"),
            TranscriptMessage::from_agent("jira_agent", "Created FIN-1."),
            TranscriptMessage::from_agent("jira_agent", "Transferring back to supervisor"),
            TranscriptMessage::from_agent(SUPERVISOR_ID, "Successfully transferred back to supervisor"),
        ];
        assert_eq!(extract_final_answer(&transcript), "Created FIN-1.");
    }

    #[test]
    fn final_answer_falls_back_to_last_message() {
        let transcript = vec![
            TranscriptMessage::user("hello"),
            TranscriptMessage::from_agent(SUPERVISOR_ID, "Which system should I use?"),
        ];
        assert_eq!(extract_final_answer(&transcript), "Which system should I use?");
        assert_eq!(extract_final_answer(&[]), "");
    }

    #[test]
    fn tool_messages_are_not_answers() {
        let transcript = vec![
            TranscriptMessage::from_agent("jira_agent", "Done."),
            TranscriptMessage::tool("jira_agent", "list_projects -> ok: []"),
        ];
        assert_eq!(extract_final_answer(&transcript), "Done.");
    }
}
