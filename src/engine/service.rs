//! Turn orchestration around the state machine.
//!
//! `ChatService` owns the explicit side effects the engine deliberately
//! avoids: per-session mutual exclusion, appending the user message before
//! dispatch and the assistant response after, draft auto-save, and the
//! immutable conversation log. All persistence here is best-effort.

use std::sync::Arc;

use tracing::warn;

use crate::engine::{ChatEngine, ChatResult, IncomingTurn};
use crate::llm::Role;
use crate::session::SessionStore;
use crate::store::Database;

pub struct ChatService {
    engine: Arc<ChatEngine>,
    sessions: SessionStore,
    db: Arc<dyn Database>,
}

impl ChatService {
    pub fn new(engine: Arc<ChatEngine>, db: Arc<dyn Database>) -> Self {
        Self {
            engine,
            sessions: SessionStore::new(Some(db.clone())),
            db,
        }
    }

    /// Process one turn for a session.
    ///
    /// Holds the session's lock for the whole turn: at most one turn per
    /// session id is in flight at a time, while distinct sessions proceed
    /// in parallel.
    pub async fn process_message(&self, session_id: &str, turn: IncomingTurn) -> ChatResult {
        let form = self.engine.form_snapshot();
        let handle = self.sessions.entry(session_id, &form.first_step().id).await;
        let mut session = handle.lock().await;

        if session.user_id.is_none() {
            session.user_id = turn.user_id.clone();
        }

        session.push_message(Role::User, &turn.message);
        let result = self.engine.handle_turn(&mut session, &turn).await;
        session.push_message(Role::Assistant, &result.response);

        // Respond-first persistence: failures are logged, never surfaced.
        self.sessions
            .save(&session, result.completion_percentage)
            .await;
        if let Err(e) = self.db.append_log(session_id, "user", &turn.message).await {
            warn!("Failed to append user log entry: {e}");
        }
        if let Err(e) = self
            .db
            .append_log(session_id, "assistant", &result.response)
            .await
        {
            warn!("Failed to append assistant log entry: {e}");
        }

        result
    }
}
