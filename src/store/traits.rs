//! `Database` trait — single async interface for all persistence.
//!
//! The state machine never calls this directly except for the two explicit
//! best-effort points (registration promotion, status lookup); drafts and
//! conversation logs are written by the caller after each turn.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Processing status of a confirmed registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Draft,
    PendingPayment,
    PaymentUploaded,
    PaymentVerified,
    DocumentsReview,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPayment => "pending_payment",
            Self::PaymentUploaded => "payment_uploaded",
            Self::PaymentVerified => "payment_verified",
            Self::DocumentsReview => "documents_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "payment_uploaded" => Self::PaymentUploaded,
            "payment_verified" => Self::PaymentVerified,
            "documents_review" => Self::DocumentsReview,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::PendingPayment,
        }
    }

    /// User-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "📝 Draft",
            Self::PendingPayment => "⏳ Menunggu Pembayaran",
            Self::PaymentUploaded => "📤 Bukti Pembayaran Diterima",
            Self::PaymentVerified => "✅ Pembayaran Terverifikasi",
            Self::DocumentsReview => "📋 Dokumen Direview",
            Self::Approved => "🎉 Disetujui",
            Self::Rejected => "❌ Ditolak",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted in-progress session draft.
#[derive(Debug, Clone)]
pub struct DraftRecord {
    pub session_id: String,
    /// Full `SessionState` JSON.
    pub state_json: String,
    pub completion: f32,
    pub updated_at: DateTime<Utc>,
}

/// A confirmed registration.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub registration_number: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub status: RegistrationStatus,
    /// Collected field values as JSON.
    pub data_json: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata of an uploaded document, keyed by (session id, field id).
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub session_id: String,
    pub field_id: String,
    pub file_name: String,
    pub stored_path: String,
    pub size_bytes: u64,
    pub mime: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// One immutable conversation-log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Drafts ──────────────────────────────────────────────────────

    /// Insert or update the draft for a session.
    async fn upsert_draft(
        &self,
        session_id: &str,
        state_json: &str,
        completion: f32,
    ) -> Result<(), DatabaseError>;

    /// Fetch the draft for a session, if any.
    async fn get_draft(&self, session_id: &str) -> Result<Option<DraftRecord>, DatabaseError>;

    /// Remove a session's draft (after promotion).
    async fn delete_draft(&self, session_id: &str) -> Result<(), DatabaseError>;

    // ── Registrations ───────────────────────────────────────────────

    /// Promote a draft to a confirmed registration.
    ///
    /// Fails with [`DatabaseError::Constraint`] if the registration number
    /// already exists — the caller retries with a fresh suffix.
    async fn save_registration(&self, record: &RegistrationRecord) -> Result<(), DatabaseError>;

    /// Look up a registration by its number.
    async fn get_registration(
        &self,
        registration_number: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError>;

    /// Look up the registration created from a session.
    async fn get_registration_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError>;

    // ── Documents ───────────────────────────────────────────────────

    /// Record document metadata, replacing any prior record for the same
    /// (session id, field id).
    async fn upsert_document(&self, record: &DocumentRecord) -> Result<(), DatabaseError>;

    /// All documents recorded for a session.
    async fn documents_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<DocumentRecord>, DatabaseError>;

    // ── Conversation log ────────────────────────────────────────────

    /// Append an immutable conversation-log entry.
    async fn append_log(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), DatabaseError>;

    /// All log entries for a session, oldest first.
    async fn logs_for_session(&self, session_id: &str) -> Result<Vec<LogEntry>, DatabaseError>;
}
