//! Process-wide session registry.
//!
//! Holds one entry per active broker session, keyed by session id. The
//! registry lock is only ever held long enough to insert, look up, remove,
//! or snapshot the id set — per-session mutable state lives behind its own
//! lock inside [`SessionEntry`] so registry contention never blocks on a
//! single session's work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{GatewayError, Result};
use crate::tool_executor::SessionToolState;

/// Per-session state tracked by the registry, independent of the upstream
/// socket itself (which the broker holds separately).
pub struct SessionEntry {
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tool_state: tokio::sync::Mutex<SessionToolState>,
}

impl SessionEntry {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: chrono::Utc::now(),
            tool_state: tokio::sync::Mutex::new(SessionToolState::default()),
        }
    }
}

/// Concurrent map of session id to [`SessionEntry`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. Fails if the id is already present.
    pub fn insert(&self, entry: Arc<SessionEntry>) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&entry.session_id) {
            return Err(GatewayError::AlreadyExists(entry.session_id.clone()));
        }
        sessions.insert(entry.session_id.clone(), entry);
        Ok(())
    }

    /// Look up a session by id.
    pub fn lookup(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).cloned()
    }

    /// Remove a session by id, returning the removed entry if present.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id)
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of currently registered session ids, for heartbeat sweeps.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_then_remove() {
        let registry = SessionRegistry::new();
        let entry = Arc::new(SessionEntry::new("sonj_1"));
        registry.insert(entry.clone()).unwrap();
        assert!(registry.lookup("sonj_1").is_some());
        assert_eq!(registry.len(), 1);
        let removed = registry.remove("sonj_1");
        assert!(removed.is_some());
        assert!(registry.lookup("sonj_1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_insert_fails() {
        let registry = SessionRegistry::new();
        registry.insert(Arc::new(SessionEntry::new("sonj_1"))).unwrap();
        let err = registry.insert(Arc::new(SessionEntry::new("sonj_1"))).unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
    }
}
