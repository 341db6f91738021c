//! Assembles specialists and the supervisor from configuration.

use crate::config::{CoordinatorConfig, SourceMode};
use crate::supervisor::Supervisor;
use crate::transcript::TranscriptStore;
use docrelay_agents::{LlmPlanner, RulePlanner, SourceToolkit, Specialist, ToolPlanner, ToolkitSettings, role_prompt};
use docrelay_common::{Agent, DocrelayError, PathPolicy, Result, SourceSystem};
use docrelay_llm::{LlmClient, build_llm_client};
use docrelay_sources::{
    CommandIngestor, InMemorySource, IngestOptions, Ingestor, LocalPdfSource, RemoteSource, SourceClient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The source client a specialist for `system` should own.
pub fn build_client(config: &CoordinatorConfig, system: SourceSystem) -> Result<Box<dyn SourceClient>> {
    if system == SourceSystem::LocalPdf {
        let policy = PathPolicy {
            allowed_base_dirs: config.local_pdf.allowed_base_dirs.clone(),
        };
        return Ok(Box::new(LocalPdfSource::new(policy)));
    }

    let source = config.source(system);
    match source.mode {
        SourceMode::Memory => {
            let client = source
                .scopes
                .iter()
                .chain(source.default_scope.iter())
                .fold(InMemorySource::new(system), |client, scope| client.with_scope(scope));
            Ok(Box::new(client))
        }
        SourceMode::Remote => {
            let endpoint = source
                .endpoint_for(system)
                .ok_or_else(|| DocrelayError::Config(format!("no endpoint configured for {system}")))?;
            Ok(Box::new(RemoteSource::new(system, endpoint, source.request_timeout())?))
        }
    }
}

pub fn build_ingestor(config: &CoordinatorConfig) -> Arc<dyn Ingestor> {
    Arc::new(CommandIngestor::new(
        config.ingestion.command.clone(),
        config.ingestion.args.clone(),
    ))
}

pub fn toolkit_settings(config: &CoordinatorConfig) -> ToolkitSettings {
    ToolkitSettings {
        download_dir: config.composite.download_dir.clone(),
        operation_timeout: Duration::from_secs(config.composite.deadline_secs),
        ingest: IngestOptions {
            keep_messages: config.ingestion.keep_messages,
            timeout: Duration::from_secs(config.ingestion.timeout_secs),
            ..Default::default()
        },
    }
}

fn build_planner(
    config: &CoordinatorConfig,
    system: SourceSystem,
    llm: Option<&Arc<dyn LlmClient>>,
) -> Box<dyn ToolPlanner> {
    let rules = RulePlanner::new().with_default_scope(config.source(system).default_scope);
    match (llm, config.llm.as_ref()) {
        (Some(llm), Some(llm_config)) => Box::new(
            LlmPlanner::new(llm.clone(), role_prompt(system))
                .with_fallback(rules)
                .with_sampling(llm_config.temperature, llm_config.max_tokens),
        ),
        _ => Box::new(rules),
    }
}

/// Build one specialist with its own client handle.
pub fn build_specialist(
    config: &CoordinatorConfig,
    system: SourceSystem,
    ingestor: Arc<dyn Ingestor>,
    llm: Option<&Arc<dyn LlmClient>>,
) -> Result<Specialist> {
    let client = build_client(config, system)?;
    let toolkit = SourceToolkit::new(client, ingestor).with_settings(toolkit_settings(config));
    Ok(Specialist::new(toolkit, build_planner(config, system, llm)).with_max_steps(config.agents.max_steps))
}

/// Language model shared by every planner, when `[llm]` is configured.
pub fn build_shared_llm(config: &CoordinatorConfig) -> Option<Arc<dyn LlmClient>> {
    let llm_config = config.llm.as_ref()?;
    match build_llm_client(llm_config) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "Failed to build LLM client, using rule-based planners");
            None
        }
    }
}

/// Build the supervisor with one specialist per enabled source.
pub fn build_supervisor(config: &CoordinatorConfig) -> Result<Supervisor> {
    let ingestor = build_ingestor(config);
    let llm = build_shared_llm(config);

    let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
    for system in config.enabled_sources() {
        let specialist = build_specialist(config, system, ingestor.clone(), llm.as_ref())?;
        info!(agent = %specialist.id(), tools = specialist.capabilities().len(), "Specialist ready");
        agents.push(Arc::new(specialist));
    }
    if agents.is_empty() {
        return Err(DocrelayError::Config("no sources are enabled".to_string()));
    }

    let transcripts = if config.transcripts.enabled {
        TranscriptStore::new(config.transcripts.dir.clone())
    } else {
        TranscriptStore::disabled()
    };
    Ok(Supervisor::new(agents).with_transcripts(transcripts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_builds_every_specialist() {
        let supervisor = build_supervisor(&CoordinatorConfig::in_memory()).unwrap();
        let systems: Vec<SourceSystem> = supervisor.agents().iter().map(|a| a.system()).collect();
        assert_eq!(systems, SourceSystem::ALL.to_vec());
    }

    #[test]
    fn disabled_sources_are_left_out() {
        let mut config = CoordinatorConfig::in_memory();
        if let Some(gdrive) = config.sources.get_mut("gdrive") {
            gdrive.enabled = false;
        }
        let supervisor = build_supervisor(&config).unwrap();
        assert!(supervisor.agent(SourceSystem::GDrive).is_none());
        assert!(!supervisor.policy().enabled().contains(&SourceSystem::GDrive));
    }

    #[test]
    fn max_steps_comes_from_config() {
        let mut config = CoordinatorConfig::in_memory();
        config.agents.max_steps = 3;
        let ingestor = build_ingestor(&config);
        let specialist = build_specialist(&config, SourceSystem::Jira, ingestor, None).unwrap();
        assert_eq!(specialist.max_steps(), 3);
    }

    #[tokio::test]
    async fn remote_mode_needs_no_connection_to_build() {
        let config = CoordinatorConfig::default();
        let client = build_client(&config, SourceSystem::Jira).unwrap();
        assert_eq!(client.system(), SourceSystem::Jira);
    }
}
