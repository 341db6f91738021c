//! Audit transcripts, one JSON file per turn.

use chrono::Utc;
use docrelay_common::TranscriptMessage;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Render anything serializable as JSON, falling back to its debug text.
pub fn to_json_or_debug<T: Serialize + std::fmt::Debug>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{value:?}")))
}

/// Writes turn transcripts under one directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: Option<PathBuf>,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    /// A store that records nothing.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Persist a turn. Failures are logged and swallowed; returns the path
    /// written, if any.
    pub async fn save(&self, session_id: &str, messages: &[TranscriptMessage]) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let safe_session: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        let path = dir.join(format!("api_response_{safe_session}_{stamp}.json"));

        let document = json!({
            "session_id": session_id,
            "saved_at": Utc::now().to_rfc3339(),
            "messages": messages.iter().map(to_json_or_debug).collect::<Vec<_>>(),
        });
        let body = match serde_json::to_string_pretty(&document) {
            Ok(body) => body,
            Err(e) => format!("{document:?}\n// serialization error: {e}"),
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Could not create transcript directory");
            return None;
        }
        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                debug!(path = %path.display(), "Transcript saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not write transcript");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_named_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        let messages = vec![
            TranscriptMessage::user("hello"),
            TranscriptMessage::from_agent("supervisor", "hi"),
        ];
        let path = store.save("session_1", &messages).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("api_response_session_1_"));
        assert!(name.ends_with(".json"));

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["messages"].as_array().unwrap().len(), 2);
        assert_eq!(saved["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn write_errors_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // A regular file where the directory should be.
        let store = TranscriptStore::new(blocker.join("nested"));
        assert!(store.save("s", &[TranscriptMessage::user("x")]).await.is_none());
    }

    #[tokio::test]
    async fn disabled_store_writes_nothing() {
        assert!(TranscriptStore::disabled().save("s", &[]).await.is_none());
    }

    #[test]
    fn unserializable_values_fall_back_to_debug() {
        #[derive(Debug)]
        struct Opaque;
        impl Serialize for Opaque {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("nope"))
            }
        }
        assert_eq!(to_json_or_debug(&Opaque), Value::String("Opaque".into()));
    }
}
