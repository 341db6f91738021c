//! Startup: wait for source endpoints, then build the supervisor.

use crate::state::AppContext;
use docrelay_common::{DocrelayError, Result};
use docrelay_coordinator::build_supervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

/// Timeout for one TCP probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// True if `addr` accepts a TCP connection within `timeout`.
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Poll `addr` until it accepts connections or `timeout` runs out.
pub async fn wait_for_endpoint(addr: &str, timeout: Duration, poll_interval: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if probe(addr, remaining.min(PROBE_TIMEOUT)).await {
            info!(endpoint = %addr, attempts, "Endpoint is accepting connections");
            return Ok(());
        }
        if Instant::now() + poll_interval >= deadline {
            return Err(DocrelayError::Bootstrap(format!(
                "endpoint {addr} did not accept connections within {}s",
                timeout.as_secs()
            )));
        }
        debug!(endpoint = %addr, attempts, "Endpoint not ready yet");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait for every remote source, then build and install the supervisor.
pub async fn bootstrap(ctx: &AppContext) -> Result<()> {
    let timeout = Duration::from_secs(ctx.config.bootstrap.wait_timeout_secs);
    let poll = Duration::from_millis(ctx.config.bootstrap.poll_interval_ms.max(1));

    let mut waits = JoinSet::new();
    for (system, endpoint) in &ctx.endpoints {
        if let Some(addr) = endpoint.tcp_addr() {
            info!(source = %system, endpoint = %addr, "Waiting for source endpoint");
            let addr = addr.to_string();
            waits.spawn(async move { wait_for_endpoint(&addr, timeout, poll).await });
        }
    }
    while let Some(joined) = waits.join_next().await {
        joined.map_err(|e| DocrelayError::Bootstrap(format!("endpoint wait task failed: {e}")))??;
    }

    let supervisor = build_supervisor(&ctx.config)?;
    if !ctx.install(Arc::new(supervisor)) {
        return Err(DocrelayError::Bootstrap("supervisor already installed".to_string()));
    }
    info!(agents = ctx.endpoints.len(), "Supervisor initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_coordinator::CoordinatorConfig;

    #[tokio::test]
    async fn listening_endpoint_is_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        wait_for_endpoint(&addr, Duration::from_secs(2), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_with_its_name() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = wait_for_endpoint(&addr, Duration::from_millis(300), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, DocrelayError::Bootstrap(_)));
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn memory_config_bootstraps_without_waiting() {
        let ctx = AppContext::new(CoordinatorConfig::in_memory());
        bootstrap(&ctx).await.unwrap();
        assert!(ctx.agents_ready());
        assert!(bootstrap(&ctx).await.is_err());
    }
}
