//! Mutable per-conversation record: collected values, phase, documents,
//! rolling history, and the edit audit trail.
//!
//! Mutated only by the state machine during a turn; persisted and recovered
//! as a draft by the caller.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Role;

/// Maximum entries kept in the rolling conversation history.
pub const HISTORY_LIMIT: usize = 50;

/// Coarse conversational mode governing the active turn handler.
///
/// Distinct from the form step: a step names *what* is being collected, the
/// phase names *how* the current message is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collecting,
    UploadingDocuments,
    PreConfirm,
    AwaitingConfirm,
    AwaitingReset,
    Confirmed,
    AskNewRegistration,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Collecting
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Collecting => "collecting",
            Self::UploadingDocuments => "uploading_documents",
            Self::PreConfirm => "pre_confirm",
            Self::AwaitingConfirm => "awaiting_confirm",
            Self::AwaitingReset => "awaiting_reset",
            Self::Confirmed => "confirmed",
            Self::AskNewRegistration => "ask_new_registration",
        };
        write!(f, "{s}")
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Whether a set_value call created a field or replaced an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAction {
    Created,
    Updated,
}

/// One entry of the rolling conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Metadata of an uploaded document, keyed by its field id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSlot {
    pub file_name: String,
    pub stored_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub file_count: u32,
    pub uploaded_at: DateTime<Utc>,
}

/// One entry of the edit audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRecord {
    pub field_id: String,
    pub field_label: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-conversation mutable state.
///
/// Callers must only set fields whose ids exist in the active form
/// definition — the engine checks this before every write, which keeps an
/// unknown field id a no-op end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub current_step: String,
    pub phase: Phase,
    pub status: SessionStatus,
    /// Accepted field values, id → cleaned value.
    pub values: HashMap<String, String>,
    /// Latest rejection reason per field.
    pub validation_errors: HashMap<String, String>,
    /// Uploaded document metadata per file field.
    pub documents: HashMap<String, DocumentSlot>,
    /// Bounded rolling history, oldest first.
    pub history: VecDeque<HistoryEntry>,
    /// Audit trail of every value change.
    pub edits: Vec<EditRecord>,
    /// Cursor into the ordered document-field list during upload.
    pub document_cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Create a fresh session positioned at the first step.
    pub fn new(session_id: impl Into<String>, first_step: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: None,
            current_step: first_step.into(),
            phase: Phase::Collecting,
            status: SessionStatus::Active,
            values: HashMap::new(),
            validation_errors: HashMap::new(),
            documents: HashMap::new(),
            history: VecDeque::new(),
            edits: Vec::new(),
            document_cursor: 0,
            registration_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn value(&self, field_id: &str) -> Option<&str> {
        self.values.get(field_id).map(String::as_str)
    }

    pub fn has_value(&self, field_id: &str) -> bool {
        self.value(field_id).is_some_and(|v| !v.is_empty())
    }

    /// Set a field value, recording the change in the audit trail when it
    /// replaces a different value.
    pub fn set_value(
        &mut self,
        field_id: &str,
        value: impl Into<String>,
        field_label: &str,
    ) -> FieldAction {
        let value = value.into();
        let old = self.values.get(field_id).cloned();
        let action = if old.is_some() {
            FieldAction::Updated
        } else {
            FieldAction::Created
        };

        if old.as_deref() != Some(value.as_str()) && old.is_some() {
            self.edits.push(EditRecord {
                field_id: field_id.to_string(),
                field_label: field_label.to_string(),
                old_value: old,
                new_value: value.clone(),
                timestamp: Utc::now(),
            });
        }

        self.values.insert(field_id.to_string(), value);
        self.touch();
        action
    }

    /// Record an uploaded document and mirror its file name into the value
    /// map so completeness predicates see file fields like any other.
    pub fn set_document(&mut self, field_id: &str, field_label: &str, slot: DocumentSlot) {
        self.set_value(field_id, slot.file_name.clone(), field_label);
        self.documents.insert(field_id.to_string(), slot);
        self.touch();
    }

    pub fn document(&self, field_id: &str) -> Option<&DocumentSlot> {
        self.documents.get(field_id)
    }

    pub fn set_validation_error(&mut self, field_id: &str, reason: impl Into<String>) {
        self.validation_errors
            .insert(field_id.to_string(), reason.into());
    }

    pub fn clear_validation_error(&mut self, field_id: &str) {
        self.validation_errors.remove(field_id);
    }

    /// Append to the rolling history, evicting the oldest entry past the cap.
    pub fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.touch();
    }

    /// The most recent `count` history entries, oldest first.
    pub fn recent_messages(&self, count: usize) -> Vec<&HistoryEntry> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).collect()
    }

    /// Assign the registration number. Returns false (and changes nothing)
    /// if one is already assigned — the artifact is immutable.
    pub fn assign_registration(&mut self, number: impl Into<String>) -> bool {
        if self.registration_number.is_some() {
            return false;
        }
        self.registration_number = Some(number.into());
        self.touch();
        true
    }

    /// Clear all collected data and return to the first step.
    ///
    /// History is kept — the conversation continues, the form starts over.
    pub fn reset(&mut self, first_step: impl Into<String>) {
        self.values.clear();
        self.validation_errors.clear();
        self.documents.clear();
        self.edits.clear();
        self.document_cursor = 0;
        self.registration_number = None;
        self.current_step = first_step.into();
        self.phase = Phase::Collecting;
        self.status = SessionStatus::Active;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_matches_serde() {
        let phases = [
            Phase::Collecting,
            Phase::UploadingDocuments,
            Phase::PreConfirm,
            Phase::AwaitingConfirm,
            Phase::AwaitingReset,
            Phase::Confirmed,
            Phase::AskNewRegistration,
        ];
        for phase in phases {
            let display = format!("{phase}");
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(format!("\"{display}\""), json);
        }
    }

    #[test]
    fn set_value_records_audit_trail() {
        let mut session = SessionState::new("s1", "siswa");
        let action = session.set_value("nama", "Ahmad", "Nama Lengkap");
        assert_eq!(action, FieldAction::Created);
        assert!(session.edits.is_empty(), "first write is not an edit");

        let action = session.set_value("nama", "Ahmad Fauzi", "Nama Lengkap");
        assert_eq!(action, FieldAction::Updated);
        assert_eq!(session.edits.len(), 1);
        let edit = &session.edits[0];
        assert_eq!(edit.old_value.as_deref(), Some("Ahmad"));
        assert_eq!(edit.new_value, "Ahmad Fauzi");

        // Re-writing the same value is an update but not an edit.
        session.set_value("nama", "Ahmad Fauzi", "Nama Lengkap");
        assert_eq!(session.edits.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut session = SessionState::new("s1", "siswa");
        for i in 0..(HISTORY_LIMIT + 10) {
            session.push_message(Role::User, format!("pesan {i}"));
        }
        assert_eq!(session.history.len(), HISTORY_LIMIT);
        // Oldest entries were evicted.
        assert_eq!(session.history.front().unwrap().content, "pesan 10");
    }

    #[test]
    fn recent_messages_returns_tail() {
        let mut session = SessionState::new("s1", "siswa");
        for i in 0..8 {
            session.push_message(Role::User, format!("m{i}"));
        }
        let recent = session.recent_messages(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m5");
        assert_eq!(recent[2].content, "m7");
    }

    #[test]
    fn registration_number_is_immutable() {
        let mut session = SessionState::new("s1", "siswa");
        assert!(session.assign_registration("AZHAR-2025-SD-AAAA1111"));
        assert!(!session.assign_registration("AZHAR-2025-SD-BBBB2222"));
        assert_eq!(
            session.registration_number.as_deref(),
            Some("AZHAR-2025-SD-AAAA1111")
        );
    }

    #[test]
    fn reset_clears_data_but_keeps_history() {
        let mut session = SessionState::new("s1", "siswa");
        session.set_value("nama", "Ahmad", "Nama");
        session.set_validation_error("nik", "NIK harus 16 digit");
        session.push_message(Role::User, "halo");
        session.phase = Phase::PreConfirm;
        session.current_step = "review".to_string();
        session.assign_registration("AZHAR-2025-SD-AAAA1111");
        session.status = SessionStatus::Completed;

        session.reset("siswa");

        assert!(session.values.is_empty());
        assert!(session.validation_errors.is_empty());
        assert!(session.registration_number.is_none());
        assert_eq!(session.phase, Phase::Collecting);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.current_step, "siswa");
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn document_mirrors_into_values() {
        let mut session = SessionState::new("s1", "siswa");
        session.set_document(
            "akta",
            "Akta Kelahiran",
            DocumentSlot {
                file_name: "akta.pdf".to_string(),
                stored_path: "/uploads/akta.pdf".to_string(),
                size_bytes: 1024,
                mime: Some("application/pdf".to_string()),
                file_count: 1,
                uploaded_at: Utc::now(),
            },
        );
        assert!(session.has_value("akta"));
        assert_eq!(session.document("akta").unwrap().file_name, "akta.pdf");
    }

    #[test]
    fn serde_roundtrip() {
        let mut session = SessionState::new("s1", "siswa");
        session.set_value("nama", "Ahmad", "Nama");
        session.push_message(Role::Assistant, "Baik");
        session.phase = Phase::UploadingDocuments;
        session.document_cursor = 2;

        let json = serde_json::to_string(&session).unwrap();
        let parsed: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "s1");
        assert_eq!(parsed.phase, Phase::UploadingDocuments);
        assert_eq!(parsed.document_cursor, 2);
        assert_eq!(parsed.value("nama"), Some("Ahmad"));
        assert_eq!(parsed.history.len(), 1);
    }
}
