//! The external systems docrelay knows how to talk to.

use serde::{Deserialize, Serialize};

/// Bytes in one mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// One external data source, and the specialist bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Confluence,
    Jira,
    #[serde(rename = "sharepoint")]
    SharePoint,
    #[serde(rename = "gdrive")]
    GDrive,
    LocalPdf,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 5] = [
        Self::Confluence,
        Self::Jira,
        Self::SharePoint,
        Self::GDrive,
        Self::LocalPdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confluence => "confluence",
            Self::Jira => "jira",
            Self::SharePoint => "sharepoint",
            Self::GDrive => "gdrive",
            Self::LocalPdf => "local_pdf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Confluence => "Confluence",
            Self::Jira => "Jira",
            Self::SharePoint => "SharePoint",
            Self::GDrive => "Google Drive",
            Self::LocalPdf => "Local PDF",
        }
    }

    /// Name the specialist uses in transcripts.
    pub fn agent_id(&self) -> &'static str {
        match self {
            Self::Confluence => "confluence_agent",
            Self::Jira => "jira_agent",
            Self::SharePoint => "sharepoint_agent",
            Self::GDrive => "gdrive_agent",
            Self::LocalPdf => "local_pdf_agent",
        }
    }

    /// Port the source's tool endpoint listens on by default.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Jira => Some(8000),
            Self::Confluence => Some(8001),
            Self::SharePoint => Some(8002),
            Self::GDrive => Some(8005),
            Self::LocalPdf => None,
        }
    }

    /// Largest file the source accepts as an attachment.
    pub fn upload_limit_bytes(&self) -> Option<u64> {
        match self {
            Self::Confluence => Some(25 * MIB),
            Self::Jira => Some(10 * MIB),
            _ => None,
        }
    }

    /// What an upload lands in: page, issue, or folder.
    pub fn target_noun(&self) -> Option<&'static str> {
        match self {
            Self::Confluence => Some("page"),
            Self::Jira => Some("issue"),
            Self::SharePoint => Some("folder"),
            Self::GDrive | Self::LocalPdf => None,
        }
    }

    /// Container that scopes a target lookup: space, project, or library.
    pub fn scope_noun(&self) -> Option<&'static str> {
        match self {
            Self::Confluence => Some("space"),
            Self::Jira => Some("project"),
            Self::SharePoint => Some("library"),
            Self::GDrive | Self::LocalPdf => None,
        }
    }

    /// Whether the Create-or-Upload composite applies to this source.
    pub fn supports_targets(&self) -> bool {
        self.target_noun().is_some()
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confluence" => Ok(Self::Confluence),
            "jira" => Ok(Self::Jira),
            "sharepoint" => Ok(Self::SharePoint),
            "gdrive" | "google_drive" | "drive" => Ok(Self::GDrive),
            "local_pdf" | "localpdf" | "local" => Ok(Self::LocalPdf),
            other => Err(format!("unknown source system: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_ceilings() {
        assert_eq!(SourceSystem::Confluence.upload_limit_bytes(), Some(26_214_400));
        assert_eq!(SourceSystem::Jira.upload_limit_bytes(), Some(10_485_760));
        assert_eq!(SourceSystem::SharePoint.upload_limit_bytes(), None);
    }

    #[test]
    fn serde_names_match_as_str() {
        for system in SourceSystem::ALL {
            let json = serde_json::to_string(&system).unwrap();
            assert_eq!(json, format!("\"{}\"", system.as_str()));
        }
    }

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("GDrive".parse::<SourceSystem>().unwrap(), SourceSystem::GDrive);
        assert_eq!("local".parse::<SourceSystem>().unwrap(), SourceSystem::LocalPdf);
        assert!("dropbox".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn only_document_stores_have_targets() {
        assert!(SourceSystem::Confluence.supports_targets());
        assert!(SourceSystem::SharePoint.supports_targets());
        assert!(!SourceSystem::GDrive.supports_targets());
        assert!(!SourceSystem::LocalPdf.supports_targets());
    }
}
