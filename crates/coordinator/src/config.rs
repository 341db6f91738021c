//! Configuration for the coordinator and everything it assembles.
//!
//! # Security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use docrelay_common::SourceSystem;
use docrelay_llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_PORT: u16 = 8004;

/// Main coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Language model for specialist planning. Rule-based planning when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    /// Per-source settings keyed by source name (`jira`, `confluence`, ...)
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub composite: CompositeConfig,

    #[serde(default)]
    pub local_pdf: LocalPdfConfig,

    #[serde(default)]
    pub transcripts: TranscriptConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Tool endpoint reached over HTTP
    #[default]
    Remote,
    /// Process-local store, for offline use and tests
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the tool endpoint. Defaults to the source's standard local port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: SourceMode,

    /// Space/project/library used when a request names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_scope: Option<String>,

    /// Scopes seeded into a memory-mode source
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            enabled: true,
            mode: SourceMode::Remote,
            default_scope: None,
            scopes: Vec::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SourceConfig {
    /// Endpoint URL for `system`, if it is reached over the network.
    pub fn endpoint_for(&self, system: SourceSystem) -> Option<String> {
        if self.mode == SourceMode::Memory {
            return None;
        }
        self.endpoint
            .clone()
            .or_else(|| system.default_port().map(|port| format!("http://127.0.0.1:{port}")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Program run once per file, with the file path appended to `args`
    #[serde(default = "default_ingest_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,

    /// Trailing status lines kept for diagnosis
    #[serde(default = "default_keep_messages")]
    pub keep_messages: usize,
}

fn default_ingest_command() -> String {
    "docrelay-ingest".into()
}

fn default_ingest_timeout() -> u64 {
    300
}

fn default_keep_messages() -> usize {
    3
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            command: default_ingest_command(),
            args: Vec::new(),
            timeout_secs: default_ingest_timeout(),
            keep_messages: default_keep_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Tool-loop bound per delegated task
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    docrelay_agents::DEFAULT_MAX_STEPS
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Deadline for one composite or download-and-ingest call
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Where downloads land before ingestion
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_deadline() -> u64 {
    600
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join("docrelay-downloads")
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline(),
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalPdfConfig {
    /// Allowed base directories for local file operations.
    /// Empty vec = allow all (dev mode fallback).
    #[serde(default)]
    pub allowed_base_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_transcript_dir")]
    pub dir: PathBuf,
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from("./transcripts")
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_transcript_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// How long to wait for each source endpoint to accept connections
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl CoordinatorConfig {
    /// Settings for `system`. Sources missing from the file use the defaults.
    pub fn source(&self, system: SourceSystem) -> SourceConfig {
        self.sources
            .iter()
            .find(|(name, _)| name.parse::<SourceSystem>().ok() == Some(system))
            .map(|(_, cfg)| cfg.clone())
            .unwrap_or_default()
    }

    pub fn enabled_sources(&self) -> Vec<SourceSystem> {
        SourceSystem::ALL
            .into_iter()
            .filter(|s| self.source(*s).enabled)
            .collect()
    }

    /// Every enabled source in memory mode. Used for offline runs and tests.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        for system in SourceSystem::ALL {
            config.sources.insert(
                system.as_str().to_string(),
                SourceConfig {
                    mode: SourceMode::Memory,
                    ..Default::default()
                },
            );
        }
        config.transcripts.enabled = false;
        config
    }

    /// Load configuration from a TOML file.
    ///
    /// # Security
    ///
    /// On Unix systems, this function validates that:
    /// - The file is a regular file (not a symlink)
    /// - The file is not world-readable if it contains an API key
    /// - Warns if API keys are stored in the config file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;

        if config.llm.as_ref().is_some_and(|llm| llm.api_key.is_some()) {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use environment variables instead (OPENAI_API_KEY, ANTHROPIC_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Parse configuration text and check source names.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        for name in config.sources.keys() {
            if let Err(e) = name.parse::<SourceSystem>() {
                anyhow::bail!("Invalid [sources.{name}] section: {e}");
            }
        }
        if config.agents.max_steps == 0 {
            anyhow::bail!("[agents] max_steps must be at least 1");
        }
        Ok(config)
    }
}

/// Validate config file permissions on Unix systems.
///
/// Requirements:
/// - File must be a regular file (not symlink, directory, etc.)
/// - File must not be world-writable (mode & 0o002 == 0)
/// - If file contains API key patterns, must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). \
             This is a security risk. Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = content.contains("api_key")
        && (content.contains("sk-") || content.contains("key ="));

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             This is a security risk. Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
