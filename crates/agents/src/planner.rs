//! Tool selection for the specialist loop.
//!
//! [`RulePlanner`] is deterministic and encodes the composite preference
//! rules directly. [`LlmPlanner`] asks a language model and falls back to the
//! rules whenever the model fails or proposes something outside the catalog.

use crate::tools::{CompositeNames, ToolCatalog, ToolKind, target_keys};
use async_trait::async_trait;
use docrelay_common::{DelegatedTask, Result, SourceSystem, ToolArguments, ToolInvocation};
use docrelay_llm::{LlmClient, LlmRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a planner sees when choosing the next step.
pub struct PlannerContext<'a> {
    pub system: SourceSystem,
    pub catalog: &'a ToolCatalog,
    pub task: &'a DelegatedTask,
    /// Calls made so far this turn, in order
    pub invocations: &'a [ToolInvocation],
    pub step: usize,
    pub max_steps: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerStep {
    Call { tool: String, arguments: ToolArguments },
    Finish { answer: String },
}

impl PlannerStep {
    fn call(tool: impl Into<String>, arguments: Value) -> Self {
        Self::Call {
            tool: tool.into(),
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    fn finish(answer: impl Into<String>) -> Self {
        Self::Finish { answer: answer.into() }
    }
}

#[async_trait]
pub trait ToolPlanner: Send + Sync {
    async fn next_step(&self, ctx: &PlannerContext<'_>) -> Result<PlannerStep>;
}

const FILE_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "gif", "svg", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "md",
    "json", "zip",
];

const SCOPE_STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "my", "our", "this", "that", "new", "existing", "to", "for", "with", "in", "key",
    "jira", "confluence", "sharepoint", "drive", "google",
];

static ISSUE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z0-9]+-\d+)\b").expect("issue key regex"));

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]+)"|“([^”]+)”|(?:^|\s)'([^']+)'"#).expect("quoted text regex")
});

static NAMED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:called|named|titled|entitled)\s+([^,.;]+?)(?:\s+(?:in|to|on|under|and|with)\b|[,.;]|$)")
        .expect("named target regex")
});

static NOUN_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:page|issue|ticket|folder|directory))\s+([A-Z0-9][\w/\-]*)").expect("noun name regex")
});

static SCOPE_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:space|project|library)\s+(?:key\s+)?["']?([A-Za-z][\w\-]*)"#).expect("scope regex")
});

static SCOPE_BEFORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:in|to|into|under|on)\s+(?:the\s+)?["']?([A-Za-z][\w\-]*)["']?\s+(?:space|project|library)\b"#)
        .expect("scope regex")
});

static CREATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:create|open|raise|make|start)\s+(?:a\s+|an\s+)?(?:new\s+)?(?:\w+\s+)?(?:page|issue|ticket|bug|story|task|folder|directory|article)\b|\bnew\s+(?:\w+\s+)?(?:page|issue|ticket|bug|story|task|folder|directory|article)\b",
    )
    .expect("create intent regex")
});

static QUERY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:for|about|containing|mentioning|matching)\s+(.+?)[.?!]*$").expect("query regex")
});

fn has_word(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == *w)
    })
}

/// Tokens that look like file names, stripped of surrounding punctuation.
fn find_file(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| "\"'“”()[],;:!?".contains(c)).trim_end_matches('.'))
        .find(|t| {
            Path::new(t)
                .extension()
                .map(|ext| FILE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        })
        .map(str::to_string)
}

fn find_directory(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| "\"'“”()[],;:!?".contains(c)).trim_end_matches('.'))
        .find(|t| (t.starts_with('/') || t.starts_with("~/") || t.starts_with("./")) && Path::new(t).extension().is_none())
        .map(str::to_string)
}

/// What a single utterance asks for, as far as rules can tell.
#[derive(Debug, Default, Clone)]
struct Intent {
    file: Option<String>,
    directory: Option<String>,
    name: Option<String>,
    scope: Option<String>,
    issue_key: Option<String>,
    query: Option<String>,
    create: bool,
    existing: bool,
    upload: bool,
    ingest: bool,
    download: bool,
    search: bool,
    list: bool,
    stats: bool,
    attachments: bool,
    delete: bool,
    recursive: bool,
}

impl Intent {
    fn parse(text: &str) -> Self {
        let lower = text.to_lowercase();
        let file = find_file(text);

        let quoted = QUOTED_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
            .map(|m| m.as_str().trim().to_string())
            .find(|q| Some(q) != file.as_ref() && !q.is_empty());

        let issue_key = ISSUE_KEY_RE.captures(text).map(|c| c[1].to_string());

        let name = quoted
            .clone()
            .or_else(|| NAMED_RE.captures(text).map(|c| c[1].trim().to_string()))
            .or_else(|| issue_key.clone())
            .or_else(|| NOUN_NAME_RE.captures(text).map(|c| c[1].to_string()));

        let scope = SCOPE_AFTER_RE
            .captures_iter(text)
            .chain(SCOPE_BEFORE_RE.captures_iter(text))
            .map(|c| c[1].to_string())
            .find(|s| !SCOPE_STOPWORDS.contains(&s.to_lowercase().as_str()))
            .or_else(|| {
                issue_key
                    .as_ref()
                    .and_then(|k| k.split_once('-'))
                    .map(|(project, _)| project.to_string())
            });

        let query = quoted
            .clone()
            .or_else(|| QUERY_RE.captures(text).map(|c| c[1].trim().to_string()));

        Self {
            directory: find_directory(text),
            name,
            scope,
            issue_key,
            query,
            create: CREATE_RE.is_match(text),
            existing: has_word(&lower, &["existing"]),
            upload: has_word(&lower, &["upload", "attach", "put", "save", "store", "send", "add"]),
            ingest: has_word(&lower, &["ingest", "index", "vectorize", "embed"]) || lower.contains("vector"),
            download: has_word(&lower, &["download", "pull", "fetch", "grab"]),
            search: has_word(&lower, &["search", "find"]) || lower.contains("look for"),
            list: has_word(&lower, &["list", "show"]) || lower.contains("what are"),
            stats: has_word(&lower, &["statistics", "stats", "count"]) || lower.contains("how many"),
            attachments: has_word(&lower, &["attachments"]),
            delete: has_word(&lower, &["delete", "remove"]),
            recursive: has_word(&lower, &["recursive", "recursively", "subfolders", "subdirectories"]),
            file,
        }
    }
}

/// Deterministic planner driven by regex extraction and fixed preferences.
#[derive(Debug, Clone, Default)]
pub struct RulePlanner {
    default_scope: Option<String>,
}

impl RulePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope to use when the utterance names none.
    pub fn with_default_scope(mut self, scope: Option<String>) -> Self {
        self.default_scope = scope.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn plan(&self, ctx: &PlannerContext<'_>) -> PlannerStep {
        let intent = Intent::parse(&ctx.task.instruction);
        let proposed = self.decide(&intent, ctx);

        if let PlannerStep::Call { tool, arguments } = &proposed {
            let attempts: Vec<&ToolInvocation> = ctx
                .invocations
                .iter()
                .filter(|i| &i.tool_name == tool && &i.arguments == arguments)
                .collect();
            let retry = match attempts.last() {
                None => true,
                // One more attempt after a transient failure.
                Some(last) => attempts.len() < 2 && last.result.as_ref().err().is_some_and(|e| e.kind.is_retryable()),
            };
            if !retry {
                return PlannerStep::finish(describe(ctx.system, ctx.invocations));
            }
        }
        proposed
    }

    fn scope(&self, intent: &Intent, ctx: &PlannerContext<'_>) -> Option<String> {
        intent
            .scope
            .clone()
            .or_else(|| self.default_scope.clone())
            .or_else(|| {
                // A scope listing that returned exactly one candidate.
                let list_tool = scope_list_tool(ctx.system)?;
                let listing = ctx.invocations.iter().rev().find(|i| i.tool_name == list_tool)?;
                let results = listing.result.as_ref().ok()?.get("results")?.as_array()?;
                match results.as_slice() {
                    [only] => scope_name(only),
                    _ => None,
                }
            })
    }

    fn decide(&self, intent: &Intent, ctx: &PlannerContext<'_>) -> PlannerStep {
        let system = ctx.system;
        let catalog = ctx.catalog;

        if system == SourceSystem::LocalPdf {
            return self.decide_local(intent);
        }

        if let Some(file) = &intent.file {
            if intent.upload || !intent.download {
                return self.decide_upload(intent, file, ctx);
            }
        }

        if intent.download || (intent.ingest && intent.file.is_none()) {
            if let Some(tool) = catalog.iter().find(|t| matches!(t.kind, ToolKind::DownloadAndIngest { .. })) {
                return match intent.issue_key.clone().or_else(|| intent.name.clone()) {
                    Some(target) => PlannerStep::call(&tool.name, json!({ "target_id": target, "file_types": ["pdf"] })),
                    None => PlannerStep::finish(format!(
                        "Which {} should I download from?",
                        system.target_noun().unwrap_or("file or folder")
                    )),
                };
            }
        }

        if intent.attachments && catalog.contains("list_attachments") {
            if let Some(target) = intent.issue_key.clone().or_else(|| intent.name.clone()) {
                return PlannerStep::call("list_attachments", json!({ "target_id": target }));
            }
        }

        if intent.stats {
            if let Some(tool) = catalog.iter().find(|t| t.name.ends_with("_statistics")) {
                let mut args = json!({});
                if let Some(scope) = self.scope(intent, ctx) {
                    args["scope"] = json!(scope);
                }
                return PlannerStep::call(&tool.name, args);
            }
        }

        if intent.search {
            if let Some(tool) = catalog.iter().find(|t| t.name.starts_with("search")) {
                let query = intent.query.clone().unwrap_or_else(|| ctx.task.instruction.clone());
                let mut args = json!({ "query": query });
                if let Some(scope) = &intent.scope {
                    args["scope"] = json!(scope);
                }
                return PlannerStep::call(&tool.name, args);
            }
        }

        if intent.create && system.supports_targets() {
            if let (Some(noun), Some(keys)) = (system.target_noun(), target_keys(system)) {
                let Some(scope) = self.scope(intent, ctx) else {
                    return self.ask_scope(ctx);
                };
                let Some(name) = intent.name.clone() else {
                    return PlannerStep::finish(format!("What should the new {noun} be called?"));
                };
                let mut args = json!({});
                args[keys.scope] = json!(scope);
                args[keys.name] = json!(name);
                return PlannerStep::call(CompositeNames::for_noun(noun).create, args);
            }
        }

        if intent.list {
            if system == SourceSystem::GDrive {
                let tool = if has_word(&ctx.task.instruction.to_lowercase(), &["folders"]) {
                    "list_folders"
                } else {
                    "list_files"
                };
                let query = intent.query.clone().unwrap_or_default();
                return PlannerStep::call(tool, json!({ "query": query }));
            }
            if let Some(tool) = scope_list_tool(system) {
                return PlannerStep::call(tool, json!({}));
            }
        }

        PlannerStep::finish(format!(
            "I can work with {} using these tools: {}. Tell me which one you need.",
            system.display_name(),
            catalog.names().join(", ")
        ))
    }

    fn ask_scope(&self, ctx: &PlannerContext<'_>) -> PlannerStep {
        let noun = ctx.system.scope_noun().unwrap_or("scope");
        if let Some(tool) = scope_list_tool(ctx.system) {
            if !ctx.invocations.iter().any(|i| i.tool_name == tool) {
                return PlannerStep::call(tool, json!({}));
            }
        }
        PlannerStep::finish(format!("Which {} should I use?", noun))
    }

    fn decide_upload(&self, intent: &Intent, file: &str, ctx: &PlannerContext<'_>) -> PlannerStep {
        let system = ctx.system;
        let (Some(noun), Some(keys)) = (system.target_noun(), target_keys(system)) else {
            return PlannerStep::finish(format!(
                "Uploading files to {} is not supported. I can list, search, or download its files instead.",
                system.display_name()
            ));
        };

        let Some(scope) = self.scope(intent, ctx) else {
            return self.ask_scope(ctx);
        };

        let pdf = Path::new(file)
            .extension()
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        let names = CompositeNames::for_noun(noun);

        // The named target may not exist: PDFs go through the combined upload-and-ingest tool,
        // an explicit "create" gets a fresh target, anything else is created only if missing.
        let tool = match (intent.create, pdf) {
            (true, true) => names.create_and_upload_and_ingest,
            (true, false) => names.create_and_upload,
            (false, true) => names.upload_and_ingest_or_create,
            (false, false) if intent.existing => names.upload,
            (false, false) => names.upload_or_create,
        };

        let name = match intent.name.clone() {
            Some(name) => name,
            None if intent.create => Path::new(file)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.to_string()),
            None => return PlannerStep::finish(format!("Which {noun} should I attach {file} to?")),
        };

        let mut args = json!({ "file_path": file });
        args[keys.scope] = json!(scope);
        args[keys.name] = json!(name);
        debug!(system = %system, tool = %tool, "Selected composite tool");
        PlannerStep::call(tool, args)
    }

    fn decide_local(&self, intent: &Intent) -> PlannerStep {
        if let Some(file) = &intent.file {
            if intent.delete {
                return PlannerStep::call("delete_pdf", json!({ "file_path": file }));
            }
            if intent.ingest || intent.upload {
                return PlannerStep::call("ingest_pdfs", json!({ "file_paths": [file] }));
            }
            return PlannerStep::call("get_pdf_metadata", json!({ "file_path": file }));
        }
        if let Some(directory) = &intent.directory {
            if intent.ingest {
                return PlannerStep::call(
                    "ingest_pdfs",
                    json!({ "directory": directory, "recursive": intent.recursive }),
                );
            }
            return PlannerStep::call("list_pdfs", json!({ "directory": directory, "recursive": intent.recursive }));
        }
        PlannerStep::finish("Which local PDF file or directory should I work with?")
    }
}

#[async_trait]
impl ToolPlanner for RulePlanner {
    async fn next_step(&self, ctx: &PlannerContext<'_>) -> Result<PlannerStep> {
        Ok(self.plan(ctx))
    }
}

fn scope_list_tool(system: SourceSystem) -> Option<&'static str> {
    match system {
        SourceSystem::Confluence => Some("list_spaces"),
        SourceSystem::Jira => Some("list_projects"),
        SourceSystem::SharePoint => Some("list_libraries"),
        SourceSystem::GDrive | SourceSystem::LocalPdf => None,
    }
}

/// Key of one scope listing entry: a bare string, or an object with `key` or `name`.
fn scope_name(entry: &Value) -> Option<String> {
    entry
        .as_str()
        .or_else(|| entry.get("key").and_then(Value::as_str))
        .or_else(|| entry.get("name").and_then(Value::as_str))
        .map(str::to_string)
}

const MAX_RESULT_PREVIEW: usize = 1500;

/// Final answer describing the most recent call.
pub fn describe(system: SourceSystem, invocations: &[ToolInvocation]) -> String {
    let Some(last) = invocations.last() else {
        return format!("No {} operations were needed.", system.display_name());
    };
    match &last.result {
        Ok(value) => match value.get("summary").and_then(Value::as_str) {
            Some(summary) => summary.to_string(),
            None => {
                let rendered = value.to_string();
                let preview: String = rendered.chars().take(MAX_RESULT_PREVIEW).collect();
                let ellipsis = if rendered.len() > preview.len() { "..." } else { "" };
                format!("{} returned: {preview}{ellipsis}", last.tool_name)
            }
        },
        Err(e) => format!(
            "I could not complete the request: {} failed ({}): {}",
            last.tool_name, e.kind, e.message
        ),
    }
}

/// Extract the first balanced JSON object from text that may surround it.
pub fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

const MAX_ANSWER_LENGTH: usize = 4000;

/// Planner backed by a language model, with [`RulePlanner`] as the safety net.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    fallback: RulePlanner,
    role_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, role_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            fallback: RulePlanner::new(),
            role_prompt: role_prompt.into(),
            temperature: 0.1,
            max_tokens: 1024,
        }
    }

    pub fn with_fallback(mut self, fallback: RulePlanner) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn system_prompt(&self, ctx: &PlannerContext<'_>) -> String {
        format!(
            "{role}\n\nAvailable tools:\n{tools}\n\
             Rules:\n\
             - If the file is a PDF and the target may not exist, use the upload-and-ingest tool that creates the target if missing.\n\
             - If the user explicitly asks to create a new target, use the create-and-upload tool.\n\
             - For files that are not PDFs, use the upload tool that creates the target if missing.\n\
             - Call one tool at a time. You have {remaining} step(s) left.\n\n\
             Reply with exactly one JSON object and nothing else:\n\
             {{\"tool\": \"<tool name>\", \"arguments\": {{...}}}} to call a tool, or\n\
             {{\"answer\": \"<final answer for the user>\"}} when you are done.",
            role = self.role_prompt,
            tools = ctx.catalog.render(),
            remaining = ctx.max_steps.saturating_sub(ctx.step),
        )
    }

    fn user_prompt(&self, ctx: &PlannerContext<'_>) -> String {
        let mut out = String::new();
        if !ctx.task.history.is_empty() {
            out.push_str("Earlier in this conversation:\n");
            for turn in &ctx.task.history {
                out.push_str(&format!("User: {}\nAssistant: {}\n", turn.request.utterance, turn.response));
            }
            out.push('\n');
        }
        out.push_str(&format!("Request: {}\n", ctx.task.instruction));
        if !ctx.invocations.is_empty() {
            out.push_str("\nTool results so far:\n");
            for call in ctx.invocations {
                out.push_str(&format!("- {}\n", call.render()));
            }
        }
        out
    }

    fn parse_decision(&self, response: &str, ctx: &PlannerContext<'_>) -> std::result::Result<PlannerStep, String> {
        let json_str = extract_json_object(response)
            .ok_or_else(|| format!("no JSON object in reply: {}", response.chars().take(200).collect::<String>()))?;
        let parsed: Value = serde_json::from_str(json_str).map_err(|e| format!("invalid JSON: {e}"))?;

        if let Some(tool) = parsed.get("tool").and_then(Value::as_str) {
            // Only catalog tools may be called.
            if !ctx.catalog.contains(tool) {
                return Err(format!("unknown tool '{tool}'"));
            }
            let arguments = parsed
                .get("arguments")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let repeated = ctx
                .invocations
                .iter()
                .any(|i| i.tool_name == tool && i.arguments == arguments && i.succeeded());
            if repeated {
                return Err(format!("repeated successful call to '{tool}'"));
            }
            return Ok(PlannerStep::Call {
                tool: tool.to_string(),
                arguments,
            });
        }

        if let Some(answer) = parsed.get("answer").and_then(Value::as_str) {
            return Ok(PlannerStep::finish(answer.chars().take(MAX_ANSWER_LENGTH).collect::<String>()));
        }

        Err("reply has neither 'tool' nor 'answer'".to_string())
    }
}

#[async_trait]
impl ToolPlanner for LlmPlanner {
    async fn next_step(&self, ctx: &PlannerContext<'_>) -> Result<PlannerStep> {
        let request = LlmRequest::prompt(self.system_prompt(ctx), self.user_prompt(ctx))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        match self.llm.complete(request).await {
            Ok(response) => match self.parse_decision(&response.content, ctx) {
                Ok(step) => Ok(step),
                Err(reason) => {
                    warn!(system = %ctx.system, reason = %reason, "Unusable planner reply, falling back to rules");
                    Ok(self.fallback.plan(ctx))
                }
            },
            Err(e) => {
                warn!(system = %ctx.system, error = %e, "LLM planning failed, falling back to rules");
                Ok(self.fallback.plan(ctx))
            }
        }
    }
}
