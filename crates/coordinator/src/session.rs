//! In-process session store.

use chrono::Utc;
use docrelay_common::{Request, Session, SourceSystem, Turn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Generate a session id of the form `session_YYYYmmdd_HHMMSS_xxxxxx`.
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..6])
}

/// The caller's session id, or a fresh one when absent or blank.
pub fn resolve_session_id(session_id: Option<&str>) -> String {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => new_session_id(),
    }
}

/// Conversation history keyed by session id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    /// Held from `begin_turn` until the turn is recorded
    turn_locks: RwLock<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock serialising the turns of one session.
    pub fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(lock) = self.turn_locks.read().get(session_id) {
            return lock.clone();
        }
        self.turn_locks
            .write()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Open the next turn of `session_id`, creating the session if it is
    /// unknown or absent.
    ///
    /// The index is only stable while the session's [`turn_lock`](Self::turn_lock)
    /// is held until [`record`](Self::record).
    pub fn begin_turn(&self, session_id: Option<&str>, utterance: impl Into<String>) -> Request {
        let session_id = resolve_session_id(session_id);
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| Session::new(session_id.clone()));
        Request::new(utterance, session_id, session.next_turn_index())
    }

    /// Append a finished turn to its session.
    pub fn record(&self, request: Request, response: impl Into<String>, handled_by: Option<SourceSystem>) {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(request.session_id.clone())
            .or_insert_with(|| Session::new(request.session_id.clone()));
        session.push(Turn {
            request,
            response: response.into(),
            handled_by,
            completed_at: Utc::now().timestamp_millis(),
        });
    }

    /// Prior turns of a session, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn generated_ids_have_timestamp_and_suffix() {
        let id = new_session_id();
        let re = Regex::new(r"^session_\d{8}_\d{6}_[0-9a-f]{6}$").unwrap();
        assert!(re.is_match(&id), "unexpected id {id}");
    }

    #[test]
    fn turns_are_indexed_per_session() {
        let store = SessionStore::new();
        let first = store.begin_turn(None, "hello");
        assert_eq!(first.turn_index, 0);
        let sid = first.session_id.clone();
        store.record(first, "hi", None);

        let second = store.begin_turn(Some(&sid), "again");
        assert_eq!(second.turn_index, 1);
        assert_eq!(store.history(&sid).len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn turn_lock_is_shared_per_session() {
        let store = SessionStore::new();
        let a = store.turn_lock("s1");
        let b = store.turn_lock("s1");
        let other = store.turn_lock("s2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn caller_supplied_id_is_kept() {
        let store = SessionStore::new();
        let req = store.begin_turn(Some("abc"), "x");
        assert_eq!(req.session_id, "abc");
        let blank = store.begin_turn(Some("  "), "x");
        assert!(blank.session_id.starts_with("session_"));
    }
}
