//! HTTP route handlers for the API.

use crate::bootstrap::{PROBE_TIMEOUT, probe};
use crate::state::AppContext;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Local;
use docrelay_common::SourceSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "docrelay supervisor API",
        status: "running",
    })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub servers_ready: BTreeMap<String, bool>,
    pub agents_ready: bool,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

/// Probe every source endpoint and report readiness.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let mut servers_ready = BTreeMap::new();
    for (system, endpoint) in &ctx.endpoints {
        let ready = match endpoint.tcp_addr() {
            Some(addr) => probe(addr, PROBE_TIMEOUT).await,
            None => true,
        };
        servers_ready.insert(system.as_str().to_string(), ready);
    }
    let agents_ready = ctx.agents_ready();
    let healthy = agents_ready && servers_ready.values().all(|ready| *ready);

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        servers_ready,
        agents_ready,
        uptime_seconds: ctx.uptime_seconds(),
        timestamp: Local::now().to_rfc3339(),
    })
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Chat response body.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
    pub success: bool,
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub detail: String,
}

impl ErrorResponse {
    pub fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            detail: "Agents not initialized. Please check server status.".into(),
        }
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("Error processing request: {message}"),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Send a message to the supervisor.
pub async fn chat(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ErrorResponse> {
    let supervisor = ctx.supervisor().ok_or_else(ErrorResponse::unavailable)?;
    info!(
        content_preview = %request.message.chars().take(100).collect::<String>(),
        "Received message"
    );

    let reply = supervisor
        .chat(&request.message, request.session_id.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, "Request failed");
            ErrorResponse::internal(e)
        })?;

    Ok(Json(ChatResponse {
        response: reply.response,
        session_id: reply.session_id,
        timestamp: Local::now().to_rfc3339(),
        success: true,
    }))
}

fn operations(system: SourceSystem) -> &'static [&'static str] {
    match system {
        SourceSystem::Confluence => &[
            "Create and manage Confluence pages",
            "Upload documents to pages, creating the page if missing",
            "Search content across Confluence spaces",
            "Generate space statistics",
            "Download page attachments and ingest PDFs",
        ],
        SourceSystem::Jira => &[
            "Create and manage Jira issues",
            "Attach files to issues, creating the issue if missing",
            "Search and filter project issues",
            "Generate project statistics",
            "Download issue attachments and ingest PDFs",
        ],
        SourceSystem::SharePoint => &[
            "Upload files into SharePoint folders, creating the folder if missing",
            "List document libraries and files",
            "Search content across libraries",
            "Download files and ingest PDFs",
        ],
        SourceSystem::GDrive => &[
            "List and search Google Drive files and folders",
            "Create folders",
            "Download files and ingest PDFs",
        ],
        SourceSystem::LocalPdf => &[
            "List and inspect local PDF files",
            "Copy, move, and delete PDF files",
            "Ingest local PDFs",
        ],
    }
}

/// Capability listing for each enabled source.
pub async fn capabilities(State(ctx): State<Arc<AppContext>>) -> Json<BTreeMap<String, Vec<&'static str>>> {
    Json(
        ctx.endpoints
            .keys()
            .map(|system| (format!("{}_operations", system.as_str()), operations(*system).to_vec()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_session_is_optional() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(request.message, "hi");
        assert!(request.session_id.is_none());
    }

    #[test]
    fn error_body_carries_only_detail() {
        let json = serde_json::to_value(ErrorResponse::internal("boom")).unwrap();
        assert_eq!(json, serde_json::json!({ "detail": "Error processing request: boom" }));
    }

    #[test]
    fn every_source_lists_operations() {
        for system in SourceSystem::ALL {
            assert!(!operations(system).is_empty());
        }
    }
}
