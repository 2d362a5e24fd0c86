use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use crate::errors::TurnError;
use crate::models::{ConversationState, StateConflict, StateUpdate, TurnMessage};

/// Everything the core remembers about one call or chat.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Bound by the first turn; a session never changes organization.
    pub organization_id: Option<String>,
    pub state: ConversationState,
    pub transcript: Vec<TurnMessage>,
    pub last_activity: Instant,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            organization_id: None,
            state: ConversationState::default(),
            transcript: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

pub type SessionHandle = Arc<AsyncMutex<Session>>;

/// In-memory session registry. The outer lock only guards the map; each
/// session has its own async lock, held for a whole turn, so turns within a
/// session are serialized while different sessions run in parallel.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap();
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Session::new(session_id)))),
        )
    }

    /// Snapshot of the session's state; creates an empty session on first access.
    pub async fn get(&self, session_id: &str) -> ConversationState {
        self.entry(session_id).lock().await.state.clone()
    }

    pub async fn merge(&self, session_id: &str, update: StateUpdate) -> Result<(), StateConflict> {
        let handle = self.entry(session_id);
        let mut session = handle.lock().await;
        session.state.apply(update)?;
        session.touch();
        Ok(())
    }

    /// The session for a turn, bound to `organization_id`. Callers lock the
    /// handle for the duration of the turn.
    pub async fn handle(&self, session_id: &str, organization_id: &str) -> Result<SessionHandle, TurnError> {
        let handle = self.entry(session_id);
        {
            let mut session = handle.lock().await;
            match &session.organization_id {
                Some(bound) if bound != organization_id => {
                    return Err(TurnError::OrganizationMismatch {
                        session_id: session_id.to_string(),
                        expected: bound.clone(),
                        actual: organization_id.to_string(),
                    });
                }
                Some(_) => {}
                None => session.organization_id = Some(organization_id.to_string()),
            }
        }
        Ok(handle)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session_id)
    }

    /// Discards the session and its state. Returns whether it existed.
    pub fn end(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().unwrap().remove(session_id).is_some();
        if removed {
            tracing::info!(session_id, "session ended");
        }
        removed
    }

    /// Drops sessions idle for longer than `ttl`. Sessions in the middle of
    /// a turn are left alone.
    pub fn expire_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => session.last_activity.elapsed() <= ttl,
            Err(_) => true,
        });
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::info!(expired, remaining = sessions.len(), "expired idle sessions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Patch, PatientUpdate};

    #[tokio::test]
    async fn test_get_creates_empty_state() {
        let store = SessionStore::new();
        assert!(!store.contains("s1"));
        let state = store.get("s1").await;
        assert_eq!(state, ConversationState::default());
        assert!(store.contains("s1"));
    }

    #[tokio::test]
    async fn test_merge_on_unknown_session_creates_it() {
        let store = SessionStore::new();
        store
            .merge(
                "s1",
                StateUpdate {
                    patient: PatientUpdate {
                        phone: Patch::Set("5550100".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.merge("s1", StateUpdate::default()).await.unwrap();

        let state = store.get("s1").await;
        assert_eq!(state.patient.phone.as_deref(), Some("5550100"));
    }

    #[tokio::test]
    async fn test_handle_rejects_other_organization() {
        let store = SessionStore::new();
        store.handle("s1", "org-1").await.unwrap();
        assert!(store.handle("s1", "org-1").await.is_ok());
        assert!(matches!(
            store.handle("s1", "org-2").await,
            Err(TurnError::OrganizationMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_discards_state() {
        let store = SessionStore::new();
        store.get("s1").await;
        assert!(store.end("s1"));
        assert!(!store.end("s1"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expire_idle_skips_busy_sessions() {
        let store = SessionStore::new();
        store.get("idle").await;
        let busy = store.handle("busy", "org-1").await.unwrap();
        let _guard = busy.lock().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.expire_idle(Duration::from_millis(1)), 1);
        assert!(store.contains("busy"));
        assert!(!store.contains("idle"));
    }
}
