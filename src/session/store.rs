//! Session store — keyed locks and draft recovery.
//!
//! Each session is logically single-threaded: the store hands out one
//! `Mutex<SessionState>` per session id, and callers hold that lock for the
//! whole turn. Distinct sessions proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::session::state::{SessionState, SessionStatus};
use crate::store::Database;

/// In-memory session registry with optional draft persistence.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    db: Option<Arc<dyn Database>>,
}

impl SessionStore {
    pub fn new(db: Option<Arc<dyn Database>>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            db,
        }
    }

    /// Get the lock handle for a session, creating the session at
    /// `first_step` on first contact. A persisted draft, if present, is
    /// recovered instead of starting fresh.
    pub async fn entry(&self, session_id: &str, first_step: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(session_id) {
            return handle.clone();
        }

        let state = match self.recover_draft(session_id).await {
            Some(state) => {
                debug!(session_id, "Recovered session from draft");
                state
            }
            None => SessionState::new(session_id, first_step),
        };

        let handle = Arc::new(Mutex::new(state));
        sessions.insert(session_id.to_string(), handle.clone());
        handle
    }

    /// Persist the session as a draft. Best effort — a storage failure is
    /// logged and never propagated into the turn.
    pub async fn save(&self, session: &SessionState, completion: f32) {
        let Some(ref db) = self.db else {
            return;
        };
        if session.status != SessionStatus::Active {
            return;
        }

        let state_json = match serde_json::to_string(session) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize session {}: {e}", session.session_id);
                return;
            }
        };

        if let Err(e) = db
            .upsert_draft(&session.session_id, &state_json, completion)
            .await
        {
            warn!("Failed to persist draft for {}: {e}", session.session_id);
        }
    }

    /// Drop a session from memory (retention policy hook).
    pub async fn evict(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    async fn recover_draft(&self, session_id: &str) -> Option<SessionState> {
        let db = self.db.as_ref()?;
        match db.get_draft(session_id).await {
            Ok(Some(draft)) => match serde_json::from_str(&draft.state_json) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Draft for {session_id} is unreadable, starting fresh: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Draft lookup failed for {session_id}, starting fresh: {e}");
                None
            }
        }
    }
}
