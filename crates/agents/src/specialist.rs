//! Specialist agent: one source, one toolkit, a bounded tool loop.

use crate::planner::{PlannerContext, PlannerStep, ToolPlanner, describe};
use crate::toolkit::SourceToolkit;
use async_trait::async_trait;
use docrelay_common::{Agent, DelegatedTask, DocrelayError, Result, SourceSystem, SpecialistReport};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_STEPS: usize = 6;

const CONFLUENCE_SYSTEM_PROMPT: &str = r#"You are a Confluence assistant. You manage pages and their attachments:
list spaces, search content, create pages, upload files to pages, and ingest PDF attachments
into the vector store. Use exact page titles and space keys from the request."#;

const JIRA_SYSTEM_PROMPT: &str = r#"You are a Jira assistant. You manage issues and their attachments:
list projects, search issues, create issues, attach files, and ingest PDF attachments into the
vector store. Issue keys look like PROJ-123; a project key is the part before the dash."#;

const SHAREPOINT_SYSTEM_PROMPT: &str = r#"You are a SharePoint assistant. You manage document libraries:
list libraries and files, create folders, upload files into folders, and ingest PDFs into the
vector store."#;

const GDRIVE_SYSTEM_PROMPT: &str = r#"You are a Google Drive assistant. You can list, search, and
download Drive files, create folders, and ingest downloaded PDFs into the vector store.
Uploading to Google Drive is not available."#;

const LOCAL_PDF_SYSTEM_PROMPT: &str = r#"You are a local PDF assistant. You list, inspect, move, copy,
and delete PDF files on this machine and ingest them into the vector store. Never delete a file
unless the user asked for it."#;

pub fn role_prompt(system: SourceSystem) -> &'static str {
    match system {
        SourceSystem::Confluence => CONFLUENCE_SYSTEM_PROMPT,
        SourceSystem::Jira => JIRA_SYSTEM_PROMPT,
        SourceSystem::SharePoint => SHAREPOINT_SYSTEM_PROMPT,
        SourceSystem::GDrive => GDRIVE_SYSTEM_PROMPT,
        SourceSystem::LocalPdf => LOCAL_PDF_SYSTEM_PROMPT,
    }
}

/// Clears the busy flag when a turn ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Agent bound to one source system.
///
/// Owns its toolkit, and through it the only client handle for that source.
pub struct Specialist {
    name: String,
    toolkit: SourceToolkit,
    planner: Box<dyn ToolPlanner>,
    max_steps: usize,
    busy: AtomicBool,
    shut_down: AtomicBool,
}

impl Specialist {
    pub fn new(toolkit: SourceToolkit, planner: Box<dyn ToolPlanner>) -> Self {
        Self {
            name: format!("{} Agent", toolkit.system().display_name()),
            toolkit,
            planner,
            max_steps: DEFAULT_MAX_STEPS,
            busy: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn toolkit(&self) -> &SourceToolkit {
        &self.toolkit
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }
}

#[async_trait]
impl Agent for Specialist {
    fn id(&self) -> &str {
        self.toolkit.system().agent_id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn system(&self) -> SourceSystem {
        self.toolkit.system()
    }

    fn capabilities(&self) -> Vec<String> {
        self.toolkit.catalog().names().into_iter().map(str::to_string).collect()
    }

    async fn handle(&self, task: &DelegatedTask) -> Result<SpecialistReport> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DocrelayError::Agent(format!("{} has been shut down", self.name)));
        }
        self.busy.store(true, Ordering::SeqCst);
        let _busy = BusyGuard(&self.busy);

        let system = self.system();
        info!(
            agent = %self.id(),
            session_id = %task.request.session_id,
            turn = task.request.turn_index,
            "Processing delegated task"
        );

        let mut invocations = Vec::new();
        for step in 0..self.max_steps {
            let ctx = PlannerContext {
                system,
                catalog: self.toolkit.catalog(),
                task,
                invocations: &invocations,
                step,
                max_steps: self.max_steps,
            };

            match self.planner.next_step(&ctx).await? {
                PlannerStep::Call { tool, arguments } => {
                    debug!(agent = %self.id(), step, tool = %tool, "Calling tool");
                    let invocation = self.toolkit.invoke(&tool, arguments).await;
                    invocations.push(invocation);
                }
                PlannerStep::Finish { answer } => {
                    info!(agent = %self.id(), steps = step + 1, calls = invocations.len(), "Task complete");
                    return Ok(SpecialistReport {
                        system,
                        answer,
                        invocations,
                        steps: step + 1,
                        completed: true,
                    });
                }
            }
        }

        warn!(agent = %self.id(), max_steps = self.max_steps, "Step budget exhausted");
        let answer = format!(
            "I could not finish this request within {} steps. Last result: {}",
            self.max_steps,
            describe(system, &invocations)
        );
        Ok(SpecialistReport {
            system,
            answer,
            invocations,
            steps: self.max_steps,
            completed: false,
        })
    }

    fn is_available(&self) -> bool {
        !self.busy.load(Ordering::SeqCst) && !self.shut_down.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            self.toolkit.shutdown().await;
            info!(agent = %self.id(), "Specialist shut down");
        }
    }
}
