//! HTTP client for a source's local tool endpoint.
//!
//! Every call is `POST {endpoint}/tools/{operation}` with a JSON object of
//! arguments. The endpoint answers `{"ok": <value>}` or
//! `{"error": {"kind": "...", "message": "..."}}`.

use crate::client::{CreateFields, SourceClient, SourceResult, TargetRef, TargetStore, UploadReceipt, file_name_of};
use async_trait::async_trait;
use docrelay_common::{ErrorKind, SourceError, SourceSystem};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ISSUE_TYPE: &str = "Task";
pub const DEFAULT_PRIORITY: &str = "Medium";

static ISSUE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9]+-\d+$").expect("valid regex"));

/// Whether `s` has the shape of a Jira issue key such as `PROJ-123`.
pub fn looks_like_issue_key(s: &str) -> bool {
    ISSUE_KEY.is_match(s.trim())
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default = "default_wire_kind")]
    kind: ErrorKind,
    #[serde(default)]
    message: String,
}

fn default_wire_kind() -> ErrorKind {
    ErrorKind::Internal
}

#[derive(Deserialize)]
struct WireTarget {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WireReceipt {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

/// Operation and argument names a system uses for target-level calls.
struct TargetProtocol {
    lookup_op: &'static str,
    create_op: &'static str,
    upload_op: &'static str,
    scope_arg: &'static str,
    name_arg: &'static str,
    body_arg: &'static str,
    target_arg: &'static str,
}

fn protocol_for(system: SourceSystem) -> Option<TargetProtocol> {
    match system {
        SourceSystem::Confluence => Some(TargetProtocol {
            lookup_op: "get_content_by_title",
            create_op: "create_page",
            upload_op: "upload_attachment",
            scope_arg: "space_key",
            name_arg: "title",
            body_arg: "content",
            target_arg: "content_id",
        }),
        SourceSystem::Jira => Some(TargetProtocol {
            lookup_op: "find_issue_by_summary",
            create_op: "create_issue",
            upload_op: "upload_attachment",
            scope_arg: "project_key",
            name_arg: "summary",
            body_arg: "description",
            target_arg: "issue_key",
        }),
        SourceSystem::SharePoint => Some(TargetProtocol {
            lookup_op: "get_folder",
            create_op: "create_folder",
            upload_op: "upload_file",
            scope_arg: "library",
            name_arg: "folder_path",
            body_arg: "description",
            target_arg: "folder_path",
        }),
        SourceSystem::GDrive | SourceSystem::LocalPdf => None,
    }
}

pub struct RemoteSource {
    system: SourceSystem,
    base_url: String,
    http: reqwest::Client,
    protocol: Option<TargetProtocol>,
    closed: AtomicBool,
}

impl RemoteSource {
    pub fn new(system: SourceSystem, endpoint: impl Into<String>, timeout: Duration) -> SourceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::new(ErrorKind::Internal, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            system,
            base_url: endpoint.into().trim_end_matches('/').to_string(),
            http,
            protocol: protocol_for(system),
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn status_kind(status: u16) -> ErrorKind {
        match status {
            401 | 403 => ErrorKind::AuthFailure,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            413 => ErrorKind::SizeLimitExceeded,
            400 | 422 => ErrorKind::InvalidInput,
            408 | 504 => ErrorKind::Timeout,
            _ => ErrorKind::NetworkFailure,
        }
    }

    async fn call(&self, operation: &str, args: Value) -> SourceResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::network(format!(
                "{} client has been shut down",
                self.system.display_name()
            )));
        }

        let url = format!("{}/tools/{}", self.base_url, operation);
        debug!(system = %self.system, operation = %operation, "Calling source endpoint");

        let response = self.http.post(&url).json(&args).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::timeout(format!("{operation} timed out: {e}"))
            } else {
                SourceError::network(format!("{operation} failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::network(format!("{operation}: failed to read response: {e}")))?;
        let envelope: Option<Envelope> = serde_json::from_str(&body).ok();

        if let Some(Envelope { error: Some(err), .. }) = envelope {
            return Err(SourceError::new(err.kind, err.message));
        }
        if !status.is_success() {
            return Err(SourceError::new(
                Self::status_kind(status.as_u16()),
                format!("{operation} returned {status}: {body}"),
            ));
        }
        match envelope {
            Some(Envelope { ok: Some(value), .. }) => Ok(value),
            _ => Err(SourceError::new(
                ErrorKind::Internal,
                format!("{operation}: malformed response: {}", body.chars().take(200).collect::<String>()),
            )),
        }
    }

    fn protocol(&self) -> SourceResult<&TargetProtocol> {
        self.protocol.as_ref().ok_or_else(|| {
            SourceError::invalid_input(format!(
                "{} does not support uploads to targets",
                self.system.display_name()
            ))
        })
    }

    fn create_args(&self, protocol: &TargetProtocol, scope: &str, name: &str, body: &str, fields: &CreateFields) -> Value {
        let mut args = json!({
            protocol.scope_arg: scope,
            protocol.name_arg: name,
            protocol.body_arg: body,
        });
        if self.system == SourceSystem::Jira {
            args["issue_type"] = json!(fields.issue_type.as_deref().unwrap_or(DEFAULT_ISSUE_TYPE));
            args["priority"] = json!(fields.priority.as_deref().unwrap_or(DEFAULT_PRIORITY));
        }
        args
    }

    /// Parse a target out of a lookup/create response. Arrays pick the first entry.
    fn parse_target(value: Value, scope: &str, name: &str) -> SourceResult<TargetRef> {
        let first = match value {
            Value::Array(items) => items.into_iter().next().ok_or_else(|| {
                SourceError::not_found(format!("'{name}' not found in {scope}"))
            })?,
            Value::Null => return Err(SourceError::not_found(format!("'{name}' not found in {scope}"))),
            other => other,
        };
        let wire: WireTarget = serde_json::from_value(first)
            .map_err(|e| SourceError::new(ErrorKind::Internal, format!("unexpected target shape: {e}")))?;
        Ok(TargetRef {
            id: wire.id,
            title: wire.title.unwrap_or_else(|| name.to_string()),
            scope: scope.to_string(),
            url: wire.url,
        })
    }
}

#[async_trait]
impl TargetStore for RemoteSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn lookup(&self, scope: &str, name: &str) -> SourceResult<TargetRef> {
        let protocol = self.protocol()?;
        let (op, args) = if self.system == SourceSystem::Jira && looks_like_issue_key(name) {
            ("get_issue", json!({ "issue_key": name.trim() }))
        } else {
            (
                protocol.lookup_op,
                json!({ protocol.scope_arg: scope, protocol.name_arg: name, "limit": 1 }),
            )
        };
        let value = self.call(op, args).await?;
        Self::parse_target(value, scope, name)
    }

    async fn create(&self, scope: &str, name: &str, body: &str, fields: &CreateFields) -> SourceResult<TargetRef> {
        let protocol = self.protocol()?;
        let args = self.create_args(protocol, scope, name, body, fields);
        let value = self.call(protocol.create_op, args).await?;
        Self::parse_target(value, scope, name)
    }

    async fn upload(&self, target: &TargetRef, file: &Path, file_name: Option<&str>) -> SourceResult<UploadReceipt> {
        let protocol = self.protocol()?;
        let size_bytes = tokio::fs::metadata(file).await?.len();
        let mut args = json!({
            protocol.target_arg: target.id,
            "file_path": file.display().to_string(),
        });
        if self.system == SourceSystem::SharePoint {
            args["library"] = json!(target.scope);
        }
        if let Some(name) = file_name {
            args["filename"] = json!(name);
        }
        let value = self.call(protocol.upload_op, args).await?;
        let wire: WireReceipt = serde_json::from_value(value).unwrap_or(WireReceipt {
            attachment_id: None,
            size_bytes: None,
        });
        Ok(UploadReceipt {
            target_id: target.id.clone(),
            file_name: file_name.map_or_else(|| file_name_of(file), str::to_string),
            size_bytes: wire.size_bytes.unwrap_or(size_bytes),
            attachment_id: wire.attachment_id,
        })
    }
}

#[async_trait]
impl SourceClient for RemoteSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn invoke(&self, operation: &str, args: Value) -> SourceResult<Value> {
        self.call(operation, args).await
    }

    fn targets(&self) -> Option<&dyn TargetStore> {
        if self.protocol.is_some() {
            Some(self)
        } else {
            None
        }
    }

    async fn probe(&self) -> bool {
        let Ok(url) = reqwest::Url::parse(&self.base_url) else {
            return false;
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return false;
        };
        matches!(
            tokio::time::timeout(
                Duration::from_secs(2),
                tokio::net::TcpStream::connect((host, port))
            )
            .await,
            Ok(Ok(_))
        )
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!(system = %self.system, endpoint = %self.base_url, "Source client shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_key_shape() {
        assert!(looks_like_issue_key("PROJ-123"));
        assert!(looks_like_issue_key(" AB2-7 "));
        assert!(!looks_like_issue_key("proj-123"));
        assert!(!looks_like_issue_key("Quarterly invoice"));
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(RemoteSource::status_kind(401), ErrorKind::AuthFailure);
        assert_eq!(RemoteSource::status_kind(404), ErrorKind::NotFound);
        assert_eq!(RemoteSource::status_kind(409), ErrorKind::Conflict);
        assert_eq!(RemoteSource::status_kind(413), ErrorKind::SizeLimitExceeded);
        assert_eq!(RemoteSource::status_kind(502), ErrorKind::NetworkFailure);
    }

    #[test]
    fn parse_target_takes_first_of_many() {
        let value = json!([{"id": "1", "title": "A"}, {"id": "2", "title": "A"}]);
        let target = RemoteSource::parse_target(value, "DOCS", "A").unwrap();
        assert_eq!(target.id, "1");
        assert_eq!(target.scope, "DOCS");
    }

    #[test]
    fn parse_target_empty_is_not_found() {
        let err = RemoteSource::parse_target(json!([]), "DOCS", "A").unwrap_err();
        assert!(err.is_not_found());
        assert!(RemoteSource::parse_target(Value::Null, "DOCS", "A").unwrap_err().is_not_found());
    }

    #[test]
    fn jira_create_args_default_type_and_priority() {
        let source = RemoteSource::new(SourceSystem::Jira, "http://127.0.0.1:8002", Duration::from_secs(5)).unwrap();
        let protocol = source.protocol().unwrap();

        let args = source.create_args(protocol, "OPS", "Outage", "", &CreateFields::default());
        assert_eq!(args["issue_type"], "Task");
        assert_eq!(args["priority"], "Medium");

        let fields = CreateFields {
            issue_type: Some("Bug".into()),
            priority: Some("High".into()),
        };
        let args = source.create_args(protocol, "OPS", "Outage", "", &fields);
        assert_eq!(args["issue_type"], "Bug");
        assert_eq!(args["priority"], "High");
        assert_eq!(args["project_key"], "OPS");
    }

    #[test]
    fn confluence_create_args_carry_no_jira_fields() {
        let source = RemoteSource::new(SourceSystem::Confluence, "http://127.0.0.1:8001", Duration::from_secs(5)).unwrap();
        let args = source.create_args(source.protocol().unwrap(), "DOCS", "Page", "<p/>", &CreateFields::default());
        assert!(args.get("issue_type").is_none());
        assert_eq!(args["title"], "Page");
    }

    #[test]
    fn gdrive_has_no_target_protocol() {
        let source = RemoteSource::new(SourceSystem::GDrive, "http://127.0.0.1:8005", Duration::from_secs(5)).unwrap();
        assert!(source.targets().is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_failure() {
        let source = RemoteSource::new(SourceSystem::Jira, "http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = source.invoke("list_projects", json!({})).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NetworkFailure | ErrorKind::Timeout));
        assert!(!source.probe().await);
    }
}
