//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, DocumentRecord, DraftRecord, LogEntry, RegistrationRecord, RegistrationStatus,
};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn query_error(e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("UNIQUE") || text.contains("PRIMARY KEY") {
        DatabaseError::Constraint(text)
    } else {
        DatabaseError::Query(text)
    }
}

/// Column order: 0:registration_number, 1:session_id, 2:user_id, 3:status,
/// 4:data, 5:created_at
fn row_to_registration(row: &libsql::Row) -> Result<RegistrationRecord, libsql::Error> {
    let registration_number: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let user_id: Option<String> = row.get(2).ok();
    let status_str: String = row.get(3)?;
    let data_json: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(RegistrationRecord {
        registration_number,
        session_id,
        user_id,
        status: RegistrationStatus::parse(&status_str),
        data_json,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: 0:session_id, 1:field_id, 2:file_name, 3:stored_path,
/// 4:size_bytes, 5:mime, 6:uploaded_at
fn row_to_document(row: &libsql::Row) -> Result<DocumentRecord, libsql::Error> {
    let session_id: String = row.get(0)?;
    let field_id: String = row.get(1)?;
    let file_name: String = row.get(2)?;
    let stored_path: String = row.get(3)?;
    let size_bytes: i64 = row.get(4)?;
    let mime: Option<String> = row.get(5).ok();
    let uploaded_str: String = row.get(6)?;

    Ok(DocumentRecord {
        session_id,
        field_id,
        file_name,
        stored_path,
        size_bytes: size_bytes.max(0) as u64,
        mime,
        uploaded_at: parse_datetime(&uploaded_str),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    // ── Drafts ──────────────────────────────────────────────────────

    async fn upsert_draft(
        &self,
        session_id: &str,
        state_json: &str,
        completion: f32,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO registration_drafts (session_id, state, completion, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     state = excluded.state,
                     completion = excluded.completion,
                     updated_at = excluded.updated_at",
                params![
                    session_id,
                    state_json,
                    completion as f64,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn get_draft(&self, session_id: &str) -> Result<Option<DraftRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, state, completion, updated_at
                 FROM registration_drafts WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(query_error)?;

        let row = rows.next().await.map_err(query_error)?;
        match row {
            Some(row) => {
                let session_id: String = row.get(0).map_err(query_error)?;
                let state_json: String = row.get(1).map_err(query_error)?;
                let completion: f64 = row.get(2).map_err(query_error)?;
                let updated_str: String = row.get(3).map_err(query_error)?;
                Ok(Some(DraftRecord {
                    session_id,
                    state_json,
                    completion: completion as f32,
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete_draft(&self, session_id: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM registration_drafts WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    // ── Registrations ───────────────────────────────────────────────

    async fn save_registration(&self, record: &RegistrationRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO registrations
                     (registration_number, session_id, user_id, status, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.registration_number.as_str(),
                    record.session_id.as_str(),
                    record.user_id.as_deref(),
                    record.status.as_str(),
                    record.data_json.as_str(),
                    record.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn get_registration(
        &self,
        registration_number: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT registration_number, session_id, user_id, status, data, created_at
                 FROM registrations WHERE registration_number = ?1",
                params![registration_number],
            )
            .await
            .map_err(query_error)?;

        match rows.next().await.map_err(query_error)? {
            Some(row) => Ok(Some(row_to_registration(&row).map_err(query_error)?)),
            None => Ok(None),
        }
    }

    async fn get_registration_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT registration_number, session_id, user_id, status, data, created_at
                 FROM registrations WHERE session_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![session_id],
            )
            .await
            .map_err(query_error)?;

        match rows.next().await.map_err(query_error)? {
            Some(row) => Ok(Some(row_to_registration(&row).map_err(query_error)?)),
            None => Ok(None),
        }
    }

    // ── Documents ───────────────────────────────────────────────────

    async fn upsert_document(&self, record: &DocumentRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO registration_documents
                     (session_id, field_id, file_name, stored_path, size_bytes, mime, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id, field_id) DO UPDATE SET
                     file_name = excluded.file_name,
                     stored_path = excluded.stored_path,
                     size_bytes = excluded.size_bytes,
                     mime = excluded.mime,
                     uploaded_at = excluded.uploaded_at",
                params![
                    record.session_id.as_str(),
                    record.field_id.as_str(),
                    record.file_name.as_str(),
                    record.stored_path.as_str(),
                    record.size_bytes as i64,
                    record.mime.as_deref(),
                    record.uploaded_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn documents_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, field_id, file_name, stored_path, size_bytes, mime, uploaded_at
                 FROM registration_documents WHERE session_id = ?1
                 ORDER BY uploaded_at",
                params![session_id],
            )
            .await
            .map_err(query_error)?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_error)? {
            documents.push(row_to_document(&row).map_err(query_error)?);
        }
        Ok(documents)
    }

    // ── Conversation log ────────────────────────────────────────────

    async fn append_log(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO conversation_log (session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, role, content, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn logs_for_session(&self, session_id: &str) -> Result<Vec<LogEntry>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, role, content, created_at
                 FROM conversation_log WHERE session_id = ?1 ORDER BY id",
                params![session_id],
            )
            .await
            .map_err(query_error)?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_error)? {
            let session_id: String = row.get(0).map_err(query_error)?;
            let role: String = row.get(1).map_err(query_error)?;
            let content: String = row.get(2).map_err(query_error)?;
            let created_str: String = row.get(3).map_err(query_error)?;
            entries.push(LogEntry {
                session_id,
                role,
                content,
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(number: &str, session_id: &str) -> RegistrationRecord {
        RegistrationRecord {
            registration_number: number.to_string(),
            session_id: session_id.to_string(),
            user_id: None,
            status: RegistrationStatus::PendingPayment,
            data_json: r#"{"nama_lengkap":"Ahmad"}"#.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn draft_roundtrip() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.upsert_draft("s1", r#"{"k":"v"}"#, 25.0).await.unwrap();
        let draft = db.get_draft("s1").await.unwrap().unwrap();
        assert_eq!(draft.state_json, r#"{"k":"v"}"#);
        assert!((draft.completion - 25.0).abs() < f32::EPSILON);

        // Upsert replaces.
        db.upsert_draft("s1", r#"{"k":"w"}"#, 50.0).await.unwrap();
        let draft = db.get_draft("s1").await.unwrap().unwrap();
        assert_eq!(draft.state_json, r#"{"k":"w"}"#);

        db.delete_draft("s1").await.unwrap();
        assert!(db.get_draft("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registration_number_is_unique() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.save_registration(&registration("AZHAR-2025-SD-AAAA1111", "s1"))
            .await
            .unwrap();
        let err = db
            .save_registration(&registration("AZHAR-2025-SD-AAAA1111", "s2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let found = db
            .get_registration("AZHAR-2025-SD-AAAA1111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, "s1");
        assert_eq!(found.status, RegistrationStatus::PendingPayment);

        let by_session = db.get_registration_by_session("s1").await.unwrap().unwrap();
        assert_eq!(by_session.registration_number, "AZHAR-2025-SD-AAAA1111");
    }

    #[tokio::test]
    async fn document_upsert_replaces() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        let mut record = DocumentRecord {
            session_id: "s1".to_string(),
            field_id: "akta".to_string(),
            file_name: "akta_v1.pdf".to_string(),
            stored_path: "/uploads/akta_v1.pdf".to_string(),
            size_bytes: 100,
            mime: Some("application/pdf".to_string()),
            uploaded_at: Utc::now(),
        };
        db.upsert_document(&record).await.unwrap();

        record.file_name = "akta_v2.pdf".to_string();
        db.upsert_document(&record).await.unwrap();

        let docs = db.documents_for_session("s1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "akta_v2.pdf");
    }

    #[tokio::test]
    async fn local_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enroll.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.append_log("s1", "user", "halo").await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let logs = db.logs_for_session("s1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].content, "halo");
    }

    #[tokio::test]
    async fn conversation_log_appends_in_order() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        db.append_log("s1", "user", "halo").await.unwrap();
        db.append_log("s1", "assistant", "Selamat datang").await.unwrap();
        db.append_log("s2", "user", "lain").await.unwrap();

        let logs = db.logs_for_session("s1").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].role, "user");
        assert_eq!(logs[1].content, "Selamat datang");
    }
}
