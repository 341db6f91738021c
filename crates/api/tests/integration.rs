//! Integration tests for the API layer.
//!
//! These tests spin up a real HTTP server on a random port, backed by
//! in-memory sources.

use docrelay_api::{AppContext, bootstrap, create_router};
use docrelay_coordinator::CoordinatorConfig;
use serde_json::{Value, json};
use std::sync::Arc;

/// Spin up a test server on a random port and return (base URL, context).
async fn start_test_server(config: CoordinatorConfig) -> (String, Arc<AppContext>) {
    let ctx = Arc::new(AppContext::new(config));
    let router = create_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), ctx)
}

async fn ready_server() -> (String, Arc<AppContext>) {
    let mut config = CoordinatorConfig::in_memory();
    for (name, source) in config.sources.iter_mut() {
        if name == "jira" {
            source.scopes = vec!["FIN".into()];
        }
    }
    let (base, ctx) = start_test_server(config).await;
    bootstrap(&ctx).await.unwrap();
    (base, ctx)
}

/// Helper to GET a URL and return (status, body).
async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

/// Helper to POST JSON and return (status, body).
async fn post_json(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn root_reports_running() {
    let (base, _) = start_test_server(CoordinatorConfig::in_memory()).await;
    let (status, body) = get(&base, "/").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn chat_is_unavailable_before_bootstrap() {
    let (base, _) = start_test_server(CoordinatorConfig::in_memory()).await;
    let (status, body) = post_json(&base, "/chat", json!({ "message": "list jira projects" })).await;
    assert_eq!(status, 503);
    assert!(body["detail"].as_str().unwrap().contains("not initialized"));

    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["agents_ready"], false);
}

#[tokio::test]
async fn chat_round_trip_keeps_session() {
    let (base, _) = ready_server().await;

    let (status, body) = post_json(&base, "/chat", json!({ "message": "list the jira projects" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(body["response"].as_str().unwrap().contains("FIN"));
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("session_"));

    let (status, body) = post_json(
        &base,
        "/chat",
        json!({ "message": "list the jira projects", "session_id": session_id }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["session_id"], session_id.as_str());
}

#[tokio::test]
async fn health_is_healthy_once_ready() {
    let (base, _) = ready_server().await;
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agents_ready"], true);
    assert_eq!(body["servers_ready"]["jira"], true);
    assert_eq!(body["servers_ready"]["local_pdf"], true);
}

#[tokio::test]
async fn unreachable_remote_source_is_unhealthy() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = CoordinatorConfig::from_toml(&format!(
        r#"
        [sources.jira]
        endpoint = "http://{dead}/mcp"

        [sources.confluence]
        enabled = false
        [sources.sharepoint]
        enabled = false
        [sources.gdrive]
        enabled = false
        "#
    ))
    .unwrap();
    let (base, _) = start_test_server(config).await;

    let (_, body) = get(&base, "/health").await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["servers_ready"]["jira"], false);
    assert!(body["servers_ready"].get("confluence").is_none());
}

#[tokio::test]
async fn capabilities_list_each_source() {
    let (base, _) = start_test_server(CoordinatorConfig::in_memory()).await;
    let (status, body) = get(&base, "/capabilities").await;
    assert_eq!(status, 200);
    for key in [
        "confluence_operations",
        "jira_operations",
        "sharepoint_operations",
        "gdrive_operations",
        "local_pdf_operations",
    ] {
        assert!(body[key].as_array().is_some_and(|ops| !ops.is_empty()), "{key}");
    }
}
