//! Per-turn result payload.
//!
//! Rebuilt fresh every turn from the session and the active form snapshot;
//! never persisted.

use std::collections::HashMap;

use serde::Serialize;

use crate::form::FormDefinition;
use crate::session::{Phase, SessionState, SessionStatus};

/// Position within the ordered step list.
#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub current: String,
    pub current_name: String,
    pub index: usize,
    pub total: usize,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Upload progress over the document-bearing fields.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentsProgress {
    pub total: usize,
    pub mandatory: usize,
    pub uploaded: usize,
    pub mandatory_uploaded: usize,
    pub slots: Vec<DocumentSlotStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSlotStatus {
    pub field_id: String,
    pub label: String,
    pub mandatory: bool,
    pub uploaded: bool,
    pub file_count: u32,
}

/// Everything the caller needs to render a turn and drive a client.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub response: String,
    pub session_id: String,
    pub current_step: String,
    pub phase: Phase,
    pub completion_percentage: f32,
    pub fields_updated: Vec<String>,
    pub fields_created: Vec<String>,
    /// Validation errors raised this turn.
    pub validation_errors: HashMap<String, String>,
    pub can_advance: bool,
    pub can_confirm: bool,
    pub can_go_back: bool,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_status: Option<String>,
    pub step_progress: StepProgress,
    pub documents: DocumentsProgress,
}

impl ChatResult {
    /// Build a result for the current session state.
    pub fn build(form: &FormDefinition, session: &SessionState, response: String) -> Self {
        let steps = form.steps();
        let current_step = form.step(&session.current_step);
        let step_progress = StepProgress {
            current: session.current_step.clone(),
            current_name: current_step.map(|s| s.name.clone()).unwrap_or_default(),
            index: form.step_index(&session.current_step).unwrap_or(0),
            total: steps.len(),
            steps: steps
                .iter()
                .map(|s| StepSummary {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    icon: s.icon.clone(),
                })
                .collect(),
        };

        let doc_fields = form.document_fields();
        let documents = DocumentsProgress {
            total: doc_fields.len(),
            mandatory: doc_fields.iter().filter(|f| f.mandatory).count(),
            uploaded: doc_fields.iter().filter(|f| session.has_value(&f.id)).count(),
            mandatory_uploaded: doc_fields
                .iter()
                .filter(|f| f.mandatory && session.has_value(&f.id))
                .count(),
            slots: doc_fields
                .iter()
                .map(|f| DocumentSlotStatus {
                    field_id: f.id.clone(),
                    label: f.label.clone(),
                    mandatory: f.mandatory,
                    uploaded: session.has_value(&f.id),
                    file_count: session.document(&f.id).map(|d| d.file_count).unwrap_or(0),
                })
                .collect(),
        };

        Self {
            response,
            session_id: session.session_id.clone(),
            current_step: session.current_step.clone(),
            phase: session.phase,
            completion_percentage: form.completion(&session.values),
            fields_updated: Vec::new(),
            fields_created: Vec::new(),
            validation_errors: HashMap::new(),
            can_advance: form.can_advance(&session.current_step, &session.values),
            can_confirm: form.can_confirm(&session.values).is_ok(),
            can_go_back: form.previous_step(&session.current_step).is_some(),
            is_complete: session.status == SessionStatus::Completed,
            registration_number: session.registration_number.clone(),
            registration_status: None,
            step_progress,
            documents,
        }
    }
}
