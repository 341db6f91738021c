//! End-to-end supervisor tests over in-memory sources.
//!
//! Planners are rule-based so no language model is needed.

use async_trait::async_trait;
use docrelay_agents::{RulePlanner, SourceToolkit, Specialist};
use docrelay_common::{
    Agent, DelegatedTask, MessageRole, Result, SourceSystem, SpecialistReport,
};
use docrelay_coordinator::{Route, SUPERVISOR_ID, Supervisor, TranscriptStore};
use docrelay_sources::{InMemorySource, ScriptedIngestor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn memory_specialist(source: InMemorySource) -> Arc<dyn Agent> {
    let toolkit = SourceToolkit::new(Box::new(source), Arc::new(ScriptedIngestor::new()));
    Arc::new(Specialist::new(toolkit, Box::new(RulePlanner::new())))
}

fn memory_supervisor() -> Supervisor {
    Supervisor::new(vec![
        memory_specialist(InMemorySource::new(SourceSystem::Confluence).with_scope("DOCS")),
        memory_specialist(InMemorySource::new(SourceSystem::Jira).with_scope("FIN")),
    ])
}

/// Agent that sleeps while tracking how many of its calls overlap.
struct SlowAgent {
    system: SourceSystem,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    history_seen: Arc<AtomicUsize>,
}

impl SlowAgent {
    fn new(system: SourceSystem, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Self {
        Self {
            system,
            active,
            peak,
            history_seen: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Agent for SlowAgent {
    fn id(&self) -> &str {
        self.system.agent_id()
    }

    fn name(&self) -> &str {
        self.system.display_name()
    }

    fn system(&self) -> SourceSystem {
        self.system
    }

    fn capabilities(&self) -> Vec<String> {
        vec![]
    }

    async fn handle(&self, task: &DelegatedTask) -> Result<SpecialistReport> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.history_seen.store(task.history.len(), Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(SpecialistReport {
            system: self.system,
            answer: format!("handled by {}", self.system),
            invocations: vec![],
            steps: 1,
            completed: true,
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn shutdown(&self) {}
}

/// Answers with how many earlier turns it was shown.
struct HistoryAgent;

#[async_trait]
impl Agent for HistoryAgent {
    fn id(&self) -> &str {
        "jira_agent"
    }

    fn name(&self) -> &str {
        "Jira Agent"
    }

    fn system(&self) -> SourceSystem {
        SourceSystem::Jira
    }

    fn capabilities(&self) -> Vec<String> {
        vec![]
    }

    async fn handle(&self, task: &DelegatedTask) -> Result<SpecialistReport> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(SpecialistReport {
            system: SourceSystem::Jira,
            answer: format!("saw {} prior", task.history.len()),
            invocations: vec![],
            steps: 1,
            completed: true,
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn shutdown(&self) {}
}

#[tokio::test]
async fn overlapping_turns_of_one_session_are_numbered_in_order() {
    let supervisor = Supervisor::new(vec![Arc::new(HistoryAgent) as Arc<dyn Agent>]);

    let (a, b) = tokio::join!(
        supervisor.chat("list jira projects", Some("s1")),
        supervisor.chat("list jira projects again", Some("s1")),
    );
    let mut answers = vec![a.unwrap().response, b.unwrap().response];
    answers.sort();
    assert_eq!(answers, vec!["saw 0 prior", "saw 1 prior"]);

    let indexes: Vec<usize> = supervisor
        .sessions()
        .history("s1")
        .iter()
        .map(|turn| turn.request.turn_index)
        .collect();
    assert_eq!(indexes, vec![0, 1]);
}

#[tokio::test]
async fn jira_ticket_request_is_routed_and_uses_composite_tool() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("invoice.pdf");
    std::fs::write(&file, b"%PDF-1.7").unwrap();
    let supervisor = memory_supervisor();

    let text = format!("create a Jira ticket and attach {}", file.display());
    let reply = supervisor.chat(&text, None).await.unwrap();

    assert_eq!(reply.decision.chosen(), Some(SourceSystem::Jira));
    let tools: Vec<String> = reply
        .transcript
        .iter()
        .filter_map(|m| m.metadata.get("arguments").and(m.metadata.get("tool")))
        .filter_map(|t| t.as_str().map(str::to_string))
        .collect();
    assert!(tools.contains(&"create_issue_and_upload_and_ingest_file".to_string()));
    assert!(!tools.contains(&"upload_file_to_issue".to_string()));
    assert!(reply.response.contains("Created issue"), "{}", reply.response);
    assert!(reply.session_id.starts_with("session_"));
}

#[tokio::test]
async fn transcript_follows_delegation_order() {
    let supervisor = memory_supervisor();
    let reply = supervisor.chat("list the jira projects", Some("s1")).await.unwrap();
    let t = &reply.transcript;

    assert_eq!(t[0].role, MessageRole::User);
    assert_eq!(t[1].source_agent.as_deref(), Some(SUPERVISOR_ID));
    assert!(t[1].content.starts_with("Routing to"));
    assert_eq!(t[2].content, "Transferring to jira_agent");
    assert_eq!(t[3].content, "Calling list_projects");
    assert_eq!(t[4].role, MessageRole::Tool);

    let n = t.len();
    assert_eq!(t[n - 2].content, "Transferring back to supervisor");
    assert_eq!(t[n - 1].content, "Successfully transferred back to supervisor");
    assert_eq!(reply.response, t[n - 3].content);
    assert!(reply.response.contains("FIN"));
}

#[tokio::test]
async fn ambiguous_request_gets_a_question() {
    let supervisor = memory_supervisor();
    let reply = supervisor.chat("upload this file please", None).await.unwrap();

    assert!(matches!(reply.decision.route, Route::Clarify { .. }));
    assert_eq!(reply.transcript.len(), 2);
    assert!(reply.response.contains("Confluence"));
    assert!(reply.response.contains("Jira"));
}

#[tokio::test]
async fn delegations_never_overlap() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let supervisor = Supervisor::new(vec![
        Arc::new(SlowAgent::new(SourceSystem::Jira, active.clone(), peak.clone())) as Arc<dyn Agent>,
        Arc::new(SlowAgent::new(SourceSystem::Confluence, active.clone(), peak.clone())),
    ]);

    let (a, b, c) = tokio::join!(
        supervisor.chat("open a jira ticket", Some("a")),
        supervisor.chat("write a confluence page", Some("b")),
        supervisor.chat("file a jira bug", Some("c")),
    );
    assert_eq!(a.unwrap().response, "handled by jira");
    assert_eq!(b.unwrap().response, "handled by confluence");
    assert!(c.is_ok());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prior_turns_are_passed_as_history() {
    let agent = SlowAgent::new(
        SourceSystem::Jira,
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    );
    let seen = agent.history_seen.clone();
    let supervisor = Supervisor::new(vec![Arc::new(agent) as Arc<dyn Agent>]);

    let first = supervisor.chat("open a jira ticket", None).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    supervisor.chat("and another jira ticket", Some(&first.session_id)).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.sessions().history(&first.session_id).len(), 2);
}

#[tokio::test]
async fn transcripts_are_persisted_per_turn() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = memory_supervisor().with_transcripts(TranscriptStore::new(dir.path()));
    supervisor.chat("list the jira projects", Some("audit")).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("api_response_audit_"));
}

#[tokio::test]
async fn shutdown_releases_specialists() {
    let supervisor = memory_supervisor();
    supervisor.shutdown().await;
    for agent in supervisor.agents() {
        assert!(!agent.is_available());
    }
    assert!(supervisor.chat("list the jira projects", None).await.is_err());
}
