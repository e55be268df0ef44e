//! In-memory session store.
//!
//! Sessions live behind one `Arc<tokio::sync::Mutex<Session>>` each. The map
//! itself sits behind a short-lived `std::sync::Mutex`: it is only held to
//! look up or insert an entry, never across an `.await`. Turns for the same
//! session serialize on the per-session lock; different sessions proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use uuid::Uuid;

use super::errors::AgentError;
use super::session::{Session, SessionSnapshot};
use crate::TokioMutex;

/// Id used when the caller sends an empty session id.
pub const DEFAULT_SESSION_ID: &str = "default";

const MAX_SESSION_ID_LEN: usize = 64;

static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid session id regex"));

/// Normalize and check a caller-supplied session id.
pub fn validate_session_id(raw: &str) -> Result<String, AgentError> {
    let id = raw.trim();
    if id.is_empty() {
        return Ok(DEFAULT_SESSION_ID.to_string());
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(AgentError::InvalidInput {
            reason: format!("session id longer than {MAX_SESSION_ID_LEN} characters"),
        });
    }
    if !SESSION_ID_RE.is_match(id) {
        return Err(AgentError::InvalidInput {
            reason: "session id may only contain letters, digits, '_' and '-'".into(),
        });
    }
    Ok(id.to_string())
}

pub type SessionHandle = Arc<TokioMutex<Session>>;

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    max_history_messages: usize,
}

impl SessionStore {
    pub fn new(max_history_messages: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history_messages,
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        // A panic while holding the map lock cannot leave the map half-written.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the session handle, creating a fresh session for a new id.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut map = self.map();
        map.entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = %session_id, "session created");
                Arc::new(TokioMutex::new(Session::new(
                    session_id,
                    self.max_history_messages,
                )))
            })
            .clone()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.map().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state, waiting for any in-flight turn on that session.
    pub async fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        let handle = self.get_or_create(session_id);
        let session = handle.lock().await;
        session.snapshot()
    }

    /// Discard a session and start over under a new id.
    ///
    /// Waits for any in-flight turn, resets the session in place, and re-keys
    /// it under `suggested_id` (validated) or a fresh UUID. The old id is
    /// removed. Returns the new id. A suggestion naming another live session
    /// is rejected and nothing changes.
    pub async fn reset(
        &self,
        session_id: &str,
        suggested_id: Option<&str>,
    ) -> Result<String, AgentError> {
        let new_id = match suggested_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => validate_session_id(s)?,
            None => Uuid::new_v4().to_string(),
        };

        let handle = self.get_or_create(session_id);
        let mut session = handle.lock().await;
        {
            let mut map = self.map();
            if new_id != session_id && map.contains_key(&new_id) {
                tracing::warn!(
                    session_id = %session_id,
                    suggested_id = %new_id,
                    "reset refused, id already in use"
                );
                return Err(AgentError::InvalidInput {
                    reason: "session id already in use".into(),
                });
            }
            session.reset(new_id.clone());
            map.remove(session_id);
            map.insert(new_id.clone(), Arc::clone(&handle));
        }
        drop(session);

        tracing::info!(old_session_id = %session_id, new_session_id = %new_id, "session reset");
        Ok(new_id)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::phase::Phase;
    use crate::agent_core::session::DocumentType;

    #[test]
    fn test_validate_session_id() {
        assert_eq!(validate_session_id("").unwrap(), "default");
        assert_eq!(validate_session_id("  abc-1_2 ").unwrap(), "abc-1_2");
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("semi;colon").is_err());
        assert!(validate_session_id(&"a".repeat(65)).is_err());
        assert!(validate_session_id(&"a".repeat(64)).is_ok());
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_handle() {
        let store = SessionStore::new(50);
        let a = store.get_or_create("s1");
        let b = store.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_rekeys_session() {
        let store = SessionStore::new(50);
        {
            let handle = store.get_or_create("old");
            let mut s = handle.lock().await;
            s.set_document_type(DocumentType::Nda);
            s.set_field("party_a_name", "Acme");
            s.transition_to(Phase::Clarification).unwrap();
        }

        let new_id = store.reset("old", Some("fresh")).await.unwrap();
        assert_eq!(new_id, "fresh");
        assert!(!store.contains("old"));
        assert!(store.contains("fresh"));

        let snap = store.snapshot("fresh").await;
        assert_eq!(snap.phase, Phase::Intake);
        assert!(snap.collected_data.is_empty());
        assert!(snap.document_type.is_none());
    }

    #[tokio::test]
    async fn test_reset_onto_live_session_is_rejected() {
        let store = SessionStore::new(50);
        store.get_or_create("a");
        {
            let handle = store.get_or_create("b");
            let mut s = handle.lock().await;
            s.set_document_type(DocumentType::Nda);
            s.set_field("party_a_name", "Acme");
        }

        let err = store.reset("a", Some("b")).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(store.contains("a"));

        let b = store.snapshot("b").await;
        assert_eq!(b.document_type, Some(DocumentType::Nda));
        assert_eq!(b.collected_data["party_a_name"], "Acme");

        // Resetting a session onto its own id is still allowed.
        assert_eq!(store.reset("b", Some("b")).await.unwrap(), "b");
        assert!(store.snapshot("b").await.document_type.is_none());
    }

    #[tokio::test]
    async fn test_reset_without_suggestion_uses_uuid() {
        let store = SessionStore::new(50);
        store.get_or_create("x");
        let new_id = store.reset("x", None).await.unwrap();
        assert_eq!(new_id.len(), 36);
        assert!(validate_session_id(&new_id).is_ok());
    }

    #[tokio::test]
    async fn test_reset_rejects_bad_suggestion() {
        let store = SessionStore::new(50);
        store.get_or_create("x");
        assert!(store.reset("x", Some("bad id!")).await.is_err());
        assert!(store.contains("x"));
    }

    #[tokio::test]
    async fn test_reset_waits_for_in_flight_turn() {
        let store = Arc::new(SessionStore::new(50));
        let handle = store.get_or_create("busy");
        let guard = handle.lock().await;

        let store2 = Arc::clone(&store);
        let reset = tokio::spawn(async move { store2.reset("busy", Some("after")).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!reset.is_finished());
        assert!(store.contains("busy"));

        drop(guard);
        assert_eq!(reset.await.unwrap().unwrap(), "after");
    }
}
