//! Document-upload sub-flow.
//!
//! The session keeps an ordered cursor over the document-bearing fields.
//! Each turn handles exactly one of: an uploaded file, a skip, a
//! navigational command, or a re-prompt. When the cursor exhausts the list
//! the flow verifies mandatory coverage, then hands off to review.

use chrono::Utc;
use tracing::warn;

use crate::engine::{ChatEngine, ChatResult, IncomingTurn};
use crate::form::{CommandKind, FieldDescriptor, FormDefinition};
use crate::session::{DocumentSlot, Phase, SessionState};
use crate::store::DocumentRecord;

const SKIP_PHRASES: &[&str] = &["skip", "lewati", "tidak ada", "kosong"];

impl ChatEngine {
    pub(crate) async fn handle_document_phase(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        turn: &IncomingTurn,
    ) -> ChatResult {
        let message = turn.message.trim().to_lowercase();

        if SKIP_PHRASES.contains(&message.as_str()) {
            return self.handle_skip_document(form, session);
        }

        // Navigational/summary commands route exactly like the top level.
        match form.detect_command(&message) {
            Some(CommandKind::Back) => {
                session.phase = Phase::Collecting;
                return self.handle_back(form, session);
            }
            Some(CommandKind::Summary) => {
                let summary = self.format_summary(form, session);
                return ChatResult::build(form, session, summary);
            }
            _ => {}
        }

        if let Some(ref file) = turn.file {
            return self.handle_document_upload(form, session, file).await;
        }

        let prompt = self.prompt_documents(form, session);
        ChatResult::build(form, session, prompt)
    }

    async fn handle_document_upload(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        file: &crate::engine::FileUpload,
    ) -> ChatResult {
        let doc_fields = form.document_fields();
        advance_past_filled(session, &doc_fields);

        let Some(field) = doc_fields.get(session.document_cursor).copied() else {
            return self.finish_document_upload(form, session);
        };

        // Extension gate against the field's allowed set.
        let extension = file_extension(&file.file_name);
        if !field
            .allowed_extensions
            .iter()
            .any(|allowed| *allowed == extension)
        {
            return ChatResult::build(
                form,
                session,
                format!(
                    "❌ Format tidak didukung untuk {}. Gunakan: {}",
                    field.label,
                    field.allowed_extensions.join(", ")
                ),
            );
        }

        session.set_document(
            &field.id,
            &field.label,
            DocumentSlot {
                file_name: file.file_name.clone(),
                stored_path: file.stored_path.clone(),
                size_bytes: file.size_bytes,
                mime: file.mime.clone(),
                file_count: 1,
                uploaded_at: Utc::now(),
            },
        );

        // Best-effort metadata append; the turn never blocks on storage.
        let record = DocumentRecord {
            session_id: session.session_id.clone(),
            field_id: field.id.clone(),
            file_name: file.file_name.clone(),
            stored_path: file.stored_path.clone(),
            size_bytes: file.size_bytes,
            mime: file.mime.clone(),
            uploaded_at: Utc::now(),
        };
        if let Err(e) = self.db_call(self.db.upsert_document(&record)).await {
            warn!("Failed to persist document metadata for {}: {e}", field.id);
        }

        let success = format!("✅ **{}** berhasil diupload!", field.label);

        advance_past_filled(session, &doc_fields);
        if session.document_cursor >= doc_fields.len() {
            let finish = self.finish_document_upload(form, session);
            return ChatResult::build(
                form,
                session,
                format!("{success}\n\n{}", finish.response),
            );
        }

        let prompt = self.prompt_documents(form, session);
        ChatResult::build(form, session, format!("{success}\n\n{prompt}"))
    }

    fn handle_skip_document(&self, form: &FormDefinition, session: &mut SessionState) -> ChatResult {
        let doc_fields = form.document_fields();
        advance_past_filled(session, &doc_fields);

        let Some(field) = doc_fields.get(session.document_cursor).copied() else {
            return self.finish_document_upload(form, session);
        };

        if field.mandatory {
            // Refuse: the cursor stays put until the document arrives.
            return ChatResult::build(
                form,
                session,
                format!(
                    "❌ **{}** wajib diupload dan tidak bisa dilewati.\n\nSilakan upload filenya ({}).",
                    field.label,
                    field.allowed_extensions.join(", ")
                ),
            );
        }

        session.document_cursor += 1;
        advance_past_filled(session, &doc_fields);
        if session.document_cursor >= doc_fields.len() {
            return self.finish_document_upload(form, session);
        }
        let prompt = self.prompt_documents(form, session);
        ChatResult::build(form, session, format!("⏭️ {} dilewati.\n\n{prompt}", field.label))
    }

    pub(crate) fn finish_document_upload(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
    ) -> ChatResult {
        let doc_fields = form.document_fields();

        // Mandatory coverage check; rewind to the first gap if any.
        if let Some(first_missing) = doc_fields
            .iter()
            .position(|f| f.mandatory && !session.has_value(&f.id))
        {
            session.document_cursor = first_missing;
            let missing: Vec<&str> = doc_fields
                .iter()
                .filter(|f| f.mandatory && !session.has_value(&f.id))
                .map(|f| f.label.as_str())
                .collect();
            return ChatResult::build(
                form,
                session,
                format!("⚠️ Dokumen wajib belum lengkap:\n• {}", missing.join("\n• ")),
            );
        }

        let mut uploaded = Vec::new();
        let mut skipped = Vec::new();
        for field in &doc_fields {
            if session.has_value(&field.id) {
                let count = session.document(&field.id).map(|d| d.file_count).unwrap_or(1);
                if count > 1 {
                    uploaded.push(format!("✅ {} ({count} file)", field.label));
                } else {
                    uploaded.push(format!("✅ {}", field.label));
                }
            } else {
                skipped.push(format!("⏭️ {}", field.label));
            }
        }

        let mut summary = format!("📋 **Dokumen:**\n{}", uploaded.join("\n"));
        if !skipped.is_empty() {
            summary.push_str(&format!("\n\n**Dilewati:**\n{}", skipped.join("\n")));
        }

        session.phase = Phase::PreConfirm;
        if let Some(review) = form.review_step() {
            session.current_step = review.id.clone();
        }

        ChatResult::build(
            form,
            session,
            format!("{summary}\n\n---\n\n✅ Upload selesai!\n\nKetik **'konfirmasi'** untuk menyelesaikan."),
        )
    }

    /// Prompt for the document at the cursor, with overall progress.
    pub(crate) fn prompt_documents(&self, form: &FormDefinition, session: &mut SessionState) -> String {
        let doc_fields = form.document_fields();
        advance_past_filled(session, &doc_fields);

        let mut parts = vec!["📄 **UPLOAD DOKUMEN**".to_string()];

        if let Some(field) = doc_fields.get(session.document_cursor) {
            let note = if field.mandatory {
                "*(wajib)*"
            } else {
                "*(opsional — ketik 'skip' untuk melewati)*"
            };
            parts.push(format!("\n▶️ Silakan upload **{}** {note}", field.label));
            parts.push(format!("   Format: {}", field.allowed_extensions.join(", ")));
        }

        let missing_mandatory: Vec<&str> = doc_fields
            .iter()
            .filter(|f| f.mandatory && !session.has_value(&f.id))
            .map(|f| f.label.as_str())
            .collect();
        if !missing_mandatory.is_empty() {
            parts.push("\n**Dokumen yang masih diperlukan:**".to_string());
            for label in &missing_mandatory {
                parts.push(format!("  ● {label} *(wajib)*"));
            }
        }

        let total_mandatory = doc_fields.iter().filter(|f| f.mandatory).count();
        let uploaded_mandatory = doc_fields
            .iter()
            .filter(|f| f.mandatory && session.has_value(&f.id))
            .count();
        parts.push(format!(
            "\n📊 Progress: {uploaded_mandatory}/{total_mandatory} dokumen wajib"
        ));

        let uploaded: Vec<&str> = doc_fields
            .iter()
            .filter(|f| session.has_value(&f.id))
            .map(|f| f.label.as_str())
            .collect();
        if !uploaded.is_empty() {
            parts.push("\n**Sudah diupload:**".to_string());
            for label in uploaded.iter().take(5) {
                parts.push(format!("  ✅ {label}"));
            }
        }

        parts.join("\n")
    }
}

/// Move the cursor past fields that already hold a document.
fn advance_past_filled(session: &mut SessionState, doc_fields: &[&FieldDescriptor]) {
    while let Some(field) = doc_fields.get(session.document_cursor) {
        if !session.has_value(&field.id) {
            break;
        }
        session.document_cursor += 1;
    }
}

/// Lowercased extension with leading dot, or empty.
fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => format!(".{}", ext.to_lowercase()),
        None => String::new(),
    }
}
