//! Application context for the API server.

use docrelay_common::SourceSystem;
use docrelay_coordinator::{CoordinatorConfig, SourceMode, Supervisor};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// How a source's health is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEndpoint {
    /// A `host:port` that must accept TCP connections
    Tcp(String),
    /// Served in-process; always ready
    InProcess,
}

impl ServiceEndpoint {
    pub fn tcp_addr(&self) -> Option<&str> {
        match self {
            Self::Tcp(addr) => Some(addr),
            Self::InProcess => None,
        }
    }
}

/// `host:port` of an endpoint URL, filling in the scheme's default port.
pub fn socket_addr_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

/// Endpoints of every enabled source.
pub fn service_endpoints(config: &CoordinatorConfig) -> BTreeMap<SourceSystem, ServiceEndpoint> {
    config
        .enabled_sources()
        .into_iter()
        .map(|system| {
            let source = config.source(system);
            let endpoint = match (system, source.mode) {
                (SourceSystem::LocalPdf, _) | (_, SourceMode::Memory) => ServiceEndpoint::InProcess,
                (_, SourceMode::Remote) => source
                    .endpoint_for(system)
                    .and_then(|url| socket_addr_of(&url))
                    .map(ServiceEndpoint::Tcp)
                    .unwrap_or(ServiceEndpoint::InProcess),
            };
            (system, endpoint)
        })
        .collect()
}

/// Shared state handed to every handler.
pub struct AppContext {
    pub config: CoordinatorConfig,

    /// Set once bootstrap finishes
    supervisor: OnceCell<Arc<Supervisor>>,

    pub endpoints: BTreeMap<SourceSystem, ServiceEndpoint>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppContext {
    pub fn new(config: CoordinatorConfig) -> Self {
        let endpoints = service_endpoints(&config);
        Self {
            config,
            supervisor: OnceCell::new(),
            endpoints,
            start_time: std::time::Instant::now(),
        }
    }

    /// The supervisor, once agents are ready.
    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.get()
    }

    /// Install the supervisor. Returns false if one was already installed.
    pub fn install(&self, supervisor: Arc<Supervisor>) -> bool {
        self.supervisor.set(supervisor).is_ok()
    }

    pub fn agents_ready(&self) -> bool {
        self.supervisor.initialized()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_fill_in_missing_ones() {
        assert_eq!(socket_addr_of("http://127.0.0.1:8000/mcp").as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(socket_addr_of("http://jira.internal/mcp").as_deref(), Some("jira.internal:80"));
        assert_eq!(socket_addr_of("not a url"), None);
    }

    #[test]
    fn memory_sources_are_in_process() {
        let ctx = AppContext::new(CoordinatorConfig::in_memory());
        assert!(ctx.endpoints.values().all(|e| *e == ServiceEndpoint::InProcess));
        assert!(!ctx.agents_ready());
    }

    #[test]
    fn remote_sources_use_default_ports() {
        let endpoints = service_endpoints(&CoordinatorConfig::default());
        assert_eq!(
            endpoints.get(&SourceSystem::Jira),
            Some(&ServiceEndpoint::Tcp("127.0.0.1:8000".into()))
        );
        assert_eq!(endpoints.get(&SourceSystem::LocalPdf), Some(&ServiceEndpoint::InProcess));
    }
}
