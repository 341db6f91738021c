//! Capability tool catalog per source system.
//!
//! Composite tool names are generated from the system's target noun, so the
//! same five Create-or-Upload variants exist for pages, issues, and folders.

use docrelay_common::SourceSystem;
use docrelay_sources::TargetPolicy;
use serde::Serialize;

/// How a tool is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKind {
    /// Create-or-Upload composite
    Composite { policy: TargetPolicy, ingest: bool },
    CreateTarget,
    /// Upload several files to one existing target
    UploadMany,
    /// Forwarded to the source as `operation`
    PassThrough { operation: &'static str },
    /// Download through `operation`, then ingest what arrived
    DownloadAndIngest { operation: &'static str },
    /// Ingest PDFs already on the local filesystem
    IngestLocalPdfs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

const fn param(name: &'static str, description: &'static str, required: bool) -> ToolParam {
    ToolParam {
        name,
        description,
        required,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub parameters: Vec<ToolParam>,
}

impl ToolSpec {
    fn new(name: impl Into<String>, description: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            parameters: Vec::new(),
        }
    }

    fn with_params(mut self, params: &[ToolParam]) -> Self {
        self.parameters.extend_from_slice(params);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ToolParam> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// Argument names a system uses for the scope and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetKeys {
    pub scope: &'static str,
    pub name: &'static str,
    pub body: &'static str,
}

pub fn target_keys(system: SourceSystem) -> Option<TargetKeys> {
    match system {
        SourceSystem::Confluence => Some(TargetKeys {
            scope: "space_key",
            name: "title",
            body: "content",
        }),
        SourceSystem::Jira => Some(TargetKeys {
            scope: "project_key",
            name: "summary",
            body: "description",
        }),
        SourceSystem::SharePoint => Some(TargetKeys {
            scope: "library",
            name: "folder_path",
            body: "description",
        }),
        SourceSystem::GDrive | SourceSystem::LocalPdf => None,
    }
}

/// Composite tool names for a target noun.
pub struct CompositeNames {
    pub upload: String,
    pub upload_or_create: String,
    pub create_and_upload: String,
    pub upload_and_ingest_or_create: String,
    pub create_and_upload_and_ingest: String,
    pub create: String,
}

impl CompositeNames {
    pub fn for_noun(noun: &str) -> Self {
        Self {
            upload: format!("upload_file_to_{noun}"),
            upload_or_create: format!("upload_file_to_{noun}_or_create"),
            create_and_upload: format!("create_{noun}_and_upload_file"),
            upload_and_ingest_or_create: format!("upload_and_ingest_file_to_{noun}_or_create"),
            create_and_upload_and_ingest: format!("create_{noun}_and_upload_and_ingest_file"),
            create: format!("create_{noun}"),
        }
    }
}

/// Ordered set of tools one specialist may call.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    system: SourceSystem,
    tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn for_system(system: SourceSystem) -> Self {
        let mut tools = Vec::new();

        if let (Some(noun), Some(keys)) = (system.target_noun(), target_keys(system)) {
            tools.extend(composite_tools(system, noun, keys));
        }

        let download = ToolSpec::new(
            "download_and_ingest_attachments",
            "Download the attachments of an item and ingest the PDFs among them into the vector store. Downloaded files are removed once ingested.",
            ToolKind::DownloadAndIngest { operation: "download" },
        )
        .with_params(&[
            param("target_id", "Page id, issue key, or folder path to download from", true),
            param("file_types", "Extensions to download, e.g. [\"pdf\"]", false),
        ]);

        let search = |operation: &'static str, what: &str| {
            ToolSpec::new(operation, format!("Search {what} by text"), ToolKind::PassThrough { operation })
                .with_params(&[param("query", "Search text", true), param("scope", "Restrict to one space/project/library", false)])
        };
        let list = |operation: &'static str, what: &str| {
            ToolSpec::new(operation, format!("List {what}"), ToolKind::PassThrough { operation })
        };

        match system {
            SourceSystem::Confluence => {
                tools.push(list("list_spaces", "Confluence spaces"));
                tools.push(
                    list("get_space_info", "details of a Confluence space")
                        .with_params(&[param("space_key", "Space key", true)]),
                );
                tools.push(search("search_content", "Confluence pages"));
                tools.push(
                    list("get_content_details", "details of a page, including its attachments")
                        .with_params(&[param("content_id", "Page id", true)]),
                );
                tools.push(
                    list("list_attachments", "attachments of a page")
                        .with_params(&[param("target_id", "Page id or title", true)]),
                );
                tools.push(
                    list("get_space_statistics", "page and attachment counts for a space")
                        .with_params(&[param("scope", "Space key", false)]),
                );
                tools.push(download);
                tools.push(scope_download("space_key", "space", "download_space_attachments"));
            }
            SourceSystem::Jira => {
                tools.push(list("list_projects", "Jira projects"));
                tools.push(
                    list("get_project_info", "details of a Jira project")
                        .with_params(&[param("project_key", "Project key", true)]),
                );
                tools.push(search("search_issues", "Jira issues"));
                tools.push(
                    list("get_issue_details", "details of an issue, including its attachments")
                        .with_params(&[param("issue_key", "Issue key, e.g. PROJ-123", true)]),
                );
                tools.push(
                    list("list_attachments", "attachments of an issue")
                        .with_params(&[param("target_id", "Issue key", true)]),
                );
                tools.push(
                    list("get_issue_statistics", "issue and attachment counts for a project")
                        .with_params(&[param("scope", "Project key", false)]),
                );
                tools.push(download);
                tools.push(scope_download("project_key", "project", "download_project_attachments"));
            }
            SourceSystem::SharePoint => {
                tools.push(list("list_libraries", "SharePoint document libraries"));
                tools.push(search("list_files", "files in a library"));
                tools.push(search("search_content", "SharePoint documents"));
                tools.push(
                    list("get_file_info", "details of a file or folder")
                        .with_params(&[param("id", "File or folder path", true)]),
                );
                tools.push(ToolSpec {
                    name: "download_and_ingest_files".into(),
                    ..download
                });
            }
            SourceSystem::GDrive => {
                tools.push(search("list_files", "Google Drive files"));
                tools.push(list("list_folders", "Google Drive folders"));
                tools.push(search("search_content", "Google Drive documents"));
                tools.push(
                    list("get_file_info", "details of a Drive file")
                        .with_params(&[param("id", "Drive file id", true)]),
                );
                tools.push(
                    ToolSpec::new(
                        "create_folder",
                        "Create a Google Drive folder",
                        ToolKind::PassThrough { operation: "create_folder" },
                    )
                    .with_params(&[param("name", "Folder name", true)]),
                );
                tools.push(
                    ToolSpec::new(
                        "download_file",
                        "Download Drive files into a local directory without ingesting them",
                        ToolKind::PassThrough { operation: "download" },
                    )
                    .with_params(&[
                        param("target_id", "Drive folder or file id", true),
                        param("dest_dir", "Local destination directory", true),
                    ]),
                );
                tools.push(ToolSpec {
                    name: "download_and_ingest_files".into(),
                    ..download
                });
            }
            SourceSystem::LocalPdf => {
                let path = param("file_path", "Path to a local PDF", true);
                tools.push(
                    list("list_pdfs", "PDF files in a local directory").with_params(&[
                        param("directory", "Directory to scan", true),
                        param("recursive", "Descend into subdirectories", false),
                    ]),
                );
                tools.push(list("get_pdf_metadata", "size and timestamps of a local PDF").with_params(&[path.clone()]));
                tools.push(
                    ToolSpec::new("delete_pdf", "Delete a local PDF", ToolKind::PassThrough { operation: "delete_pdf" })
                        .with_params(&[path]),
                );
                for (operation, verb) in [("move_pdf", "Move"), ("copy_pdf", "Copy")] {
                    tools.push(
                        ToolSpec::new(operation, format!("{verb} a local PDF"), ToolKind::PassThrough { operation })
                            .with_params(&[
                                param("source_path", "Existing PDF", true),
                                param("destination_path", "New location; must not exist", true),
                            ]),
                    );
                }
                tools.push(
                    ToolSpec::new(
                        "ingest_pdfs",
                        "Ingest local PDFs into the vector store. Give file_paths, or a directory to scan. Files are never deleted.",
                        ToolKind::IngestLocalPdfs,
                    )
                    .with_params(&[
                        param("file_paths", "List of PDF paths", false),
                        param("directory", "Directory to scan instead of file_paths", false),
                        param("recursive", "Descend into subdirectories", false),
                    ]),
                );
            }
        }

        Self { system, tools }
    }

    pub fn system(&self) -> SourceSystem {
        self.system
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    /// Plain-text listing for a planning prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            for p in &tool.parameters {
                let marker = if p.required { "required" } else { "optional" };
                out.push_str(&format!("    {} ({marker}): {}\n", p.name, p.description));
            }
        }
        out
    }
}

/// Name of the multi-file upload tool, as each source's own tooling calls it.
pub fn upload_many_name(system: SourceSystem) -> &'static str {
    match system {
        SourceSystem::Confluence => "upload_multiple_files_to_content",
        SourceSystem::Jira => "upload_multiple_files_to_issue",
        _ => "bulk_upload_to_sharepoint",
    }
}

/// Download every attachment in a space or project, then ingest the PDFs.
fn scope_download(scope_key: &'static str, scope_noun: &str, operation: &'static str) -> ToolSpec {
    ToolSpec::new(
        format!("download_and_ingest_{scope_noun}_attachments"),
        format!(
            "Download the attachments of every item in a {scope_noun} and ingest the PDFs among them. Downloaded files are removed once ingested."
        ),
        ToolKind::DownloadAndIngest { operation },
    )
    .with_params(&[
        param(scope_key, "Scope to download from", true),
        param("file_types", "Extensions to download, e.g. [\"pdf\"]", false),
        param("cleanup_after_ingest", "Delete downloaded files once ingested (default true)", false),
    ])
}

fn composite_tools(system: SourceSystem, noun: &str, keys: TargetKeys) -> Vec<ToolSpec> {
    let names = CompositeNames::for_noun(noun);
    let scope = param(keys.scope, "Scope that holds the target", true);
    let name = param(keys.name, "Exact title, key, or path of the target", true);
    let file = param("file_path", "Local file to upload", true);
    let body = param(keys.body, "Body used if the target has to be created", false);
    let cleanup = param(
        "cleanup_after_ingest",
        "Delete the local file once ingested (default true)",
        false,
    );

    // Jira issues take a type and priority on creation and can rename the upload.
    let (create_fields, rename): (Vec<ToolParam>, Vec<ToolParam>) = if system == SourceSystem::Jira {
        (
            vec![
                param("issue_type", "Issue type for a created issue: Task, Bug, Story, ... (default Task)", false),
                param("priority", "Priority for a created issue: Low, Medium, High, Critical (default Medium)", false),
            ],
            vec![param("filename", "Attachment name to use instead of the local file name", false)],
        )
    } else {
        (Vec::new(), Vec::new())
    };

    let composite = |tool: &str, description: String, policy: TargetPolicy, ingest: bool| {
        let mut params = vec![scope.clone(), name.clone(), file.clone()];
        if policy != TargetPolicy::MustExist {
            params.push(body.clone());
            params.extend_from_slice(&create_fields);
        }
        params.extend_from_slice(&rename);
        if ingest {
            params.push(cleanup.clone());
        }
        ToolSpec::new(tool, description, ToolKind::Composite { policy, ingest }).with_params(&params)
    };
    let mut create_params = vec![scope.clone(), name.clone(), body.clone()];
    create_params.extend_from_slice(&create_fields);

    vec![
        composite(
            &names.upload,
            format!("Upload a file to an existing {noun}. Fails if the {noun} does not exist."),
            TargetPolicy::MustExist,
            false,
        ),
        composite(
            &names.upload_or_create,
            format!("Upload a file to a {noun}, creating the {noun} first if it does not exist. Use for non-PDF files."),
            TargetPolicy::CreateIfMissing,
            false,
        ),
        composite(
            &names.create_and_upload,
            format!("Create a new {noun} and upload a file to it. Use when the user asks for a new {noun}."),
            TargetPolicy::CreateNew,
            false,
        ),
        composite(
            &names.upload_and_ingest_or_create,
            format!("Upload a PDF to a {noun}, creating the {noun} if missing, then ingest the PDF into the vector store."),
            TargetPolicy::CreateIfMissing,
            true,
        ),
        composite(
            &names.create_and_upload_and_ingest,
            format!("Create a new {noun}, upload a PDF to it, then ingest the PDF into the vector store."),
            TargetPolicy::CreateNew,
            true,
        ),
        ToolSpec::new(&names.create, format!("Create a {noun} without uploading anything."), ToolKind::CreateTarget)
            .with_params(&create_params),
        ToolSpec::new(
            upload_many_name(system),
            format!("Upload several files to an existing {noun}. Each file succeeds or fails on its own."),
            ToolKind::UploadMany,
        )
        .with_params(&[
            scope.clone(),
            name.clone(),
            param("file_paths", "List of local files to upload", true),
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jira_catalog_has_issue_composites() {
        let catalog = ToolCatalog::for_system(SourceSystem::Jira);
        for name in [
            "upload_file_to_issue",
            "upload_file_to_issue_or_create",
            "create_issue_and_upload_file",
            "upload_and_ingest_file_to_issue_or_create",
            "create_issue_and_upload_and_ingest_file",
            "create_issue",
            "search_issues",
            "download_and_ingest_attachments",
            "download_and_ingest_project_attachments",
            "upload_multiple_files_to_issue",
            "get_issue_details",
            "get_project_info",
        ] {
            assert!(catalog.contains(name), "missing {name}");
        }
    }

    #[test]
    fn confluence_catalog_has_space_and_content_tools() {
        let catalog = ToolCatalog::for_system(SourceSystem::Confluence);
        for name in [
            "upload_multiple_files_to_content",
            "download_and_ingest_space_attachments",
            "get_content_details",
            "get_space_info",
        ] {
            assert!(catalog.contains(name), "missing {name}");
        }
        assert_eq!(
            catalog.get("download_and_ingest_space_attachments").map(|t| t.kind),
            Some(ToolKind::DownloadAndIngest {
                operation: "download_space_attachments"
            })
        );
    }

    #[test]
    fn only_jira_takes_issue_type_and_priority() {
        let has = |system, tool: &str, p: &str| {
            ToolCatalog::for_system(system)
                .get(tool)
                .is_some_and(|t| t.parameters.iter().any(|q| q.name == p))
        };
        assert!(has(SourceSystem::Jira, "create_issue", "issue_type"));
        assert!(has(SourceSystem::Jira, "upload_file_to_issue_or_create", "priority"));
        assert!(has(SourceSystem::Jira, "upload_file_to_issue", "filename"));
        assert!(!has(SourceSystem::Jira, "upload_file_to_issue", "issue_type"));
        assert!(!has(SourceSystem::Confluence, "create_page", "issue_type"));
    }

    #[test]
    fn ingest_cleanup_default_is_documented() {
        let catalog = ToolCatalog::for_system(SourceSystem::Jira);
        let tool = catalog.get("create_issue_and_upload_and_ingest_file").unwrap();
        let cleanup = tool.parameters.iter().find(|p| p.name == "cleanup_after_ingest").unwrap();
        assert!(cleanup.description.contains("default true"));
    }

    #[test]
    fn gdrive_has_no_upload_tools() {
        let catalog = ToolCatalog::for_system(SourceSystem::GDrive);
        assert!(catalog.iter().all(|t| !matches!(t.kind, ToolKind::Composite { .. } | ToolKind::CreateTarget)));
        assert!(catalog.names().iter().all(|n| !n.contains("upload")));
        assert!(catalog.contains("download_and_ingest_files"));
    }

    #[test]
    fn local_pdf_ingest_tool_present() {
        let catalog = ToolCatalog::for_system(SourceSystem::LocalPdf);
        assert_eq!(catalog.get("ingest_pdfs").map(|t| t.kind), Some(ToolKind::IngestLocalPdfs));
    }

    #[test]
    fn composite_kinds_match_names() {
        let catalog = ToolCatalog::for_system(SourceSystem::SharePoint);
        assert_eq!(
            catalog.get("create_folder_and_upload_and_ingest_file").map(|t| t.kind),
            Some(ToolKind::Composite {
                policy: TargetPolicy::CreateNew,
                ingest: true
            })
        );
        assert!(catalog.render().contains("folder_path (required)"));
    }
}
