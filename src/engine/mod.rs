//! Dialogue state machine.
//!
//! `ChatEngine::handle_turn` is the single entry point: it resolves the
//! session's phase, routes the message to a handler, mutates the session,
//! and returns a [`ChatResult`]. It holds no locks and performs no I/O
//! beyond the two explicitly fallible external calls (extraction and
//! persistence) — appending history and persisting the session are the
//! caller's responsibility ([`ChatService`]).

mod documents;
mod edits;
mod registration;
mod result;
mod service;

pub use result::{ChatResult, DocumentSlotStatus, DocumentsProgress, StepProgress, StepSummary};
pub use service::ChatService;

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::extract::{ExtractionPipeline, FieldExtractor};
use crate::form::{CommandKind, FieldDescriptor, FormDefinition, FormRegistry};
use crate::session::{Phase, SessionState};
use crate::store::Database;

const EXAMPLE_KEYWORDS: &[&str] = &["contoh"];
const GREETING_KEYWORDS: &[&str] = &[
    "halo",
    "hai",
    "hello",
    "assalamualaikum",
    "selamat pagi",
    "selamat siang",
    "selamat sore",
    "selamat malam",
    "permisi",
];

/// Outcome of the external file validation service for an uploaded file.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub stored_path: String,
    pub size_bytes: u64,
    pub mime: Option<String>,
}

/// One incoming user turn.
#[derive(Debug, Clone)]
pub struct IncomingTurn {
    pub message: String,
    pub file: Option<FileUpload>,
    pub user_id: Option<String>,
}

impl IncomingTurn {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            user_id: None,
        }
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.file = Some(file);
        self
    }
}

/// The orchestrator. Explicitly constructed with its collaborators —
/// nothing is fetched from process-wide state.
pub struct ChatEngine {
    form: Arc<FormRegistry>,
    pipeline: ExtractionPipeline,
    db: Arc<dyn Database>,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn new(
        form: Arc<FormRegistry>,
        extractor: Arc<dyn FieldExtractor>,
        db: Arc<dyn Database>,
        config: EngineConfig,
    ) -> Self {
        Self {
            form,
            pipeline: ExtractionPipeline::new(extractor, config.extraction_timeout),
            db,
            config,
        }
    }

    /// Run a persistence future under the configured bound. The engine
    /// never lets a hung store stall a turn.
    async fn db_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, crate::error::DatabaseError>>,
    ) -> Result<T, crate::error::DatabaseError> {
        match tokio::time::timeout(self.config.persistence_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::DatabaseError::Query(format!(
                "persistence call exceeded {:?}",
                self.config.persistence_timeout
            ))),
        }
    }

    /// The active form snapshot.
    pub fn form_snapshot(&self) -> Arc<FormDefinition> {
        self.form.snapshot()
    }

    /// Process one turn against the session.
    pub async fn handle_turn(&self, session: &mut SessionState, turn: &IncomingTurn) -> ChatResult {
        let form = self.form.snapshot();

        // A reload may have removed the session's step. Re-anchor rather
        // than serve a turn against a dangling step id.
        if form.step(&session.current_step).is_none() {
            warn!(
                step = %session.current_step,
                "Current step no longer exists after reload, re-anchoring to first step"
            );
            session.current_step = form.first_step().id.clone();
            session.phase = Phase::Collecting;
        }

        let message = turn.message.trim();
        debug!(phase = %session.phase, step = %session.current_step, "Processing turn");

        // A registration number short-circuits to status lookup in any
        // phase, with no phase/step mutation.
        if let Some(number) = registration::find_number(&form, message) {
            return self.check_status(&form, session, &number).await;
        }

        match session.phase {
            Phase::UploadingDocuments => self.handle_document_phase(&form, session, turn).await,
            Phase::AwaitingConfirm => self.handle_confirmation_response(&form, session, message).await,
            Phase::AwaitingReset => self.handle_reset_response(&form, session, message),
            Phase::Confirmed | Phase::AskNewRegistration => {
                self.handle_post_confirmation(&form, session, message)
            }
            Phase::Collecting | Phase::PreConfirm => {
                if edits::is_edit_request(message) {
                    self.handle_edit_request(&form, session, message).await
                } else if let Some(kind) = form.detect_command(message) {
                    self.handle_command(&form, session, kind, message).await
                } else {
                    self.handle_data_input(&form, session, message).await
                }
            }
        }
    }

    // ── Command dispatch ────────────────────────────────────────────

    async fn handle_command(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        kind: CommandKind,
        message: &str,
    ) -> ChatResult {
        debug!(command = %kind, "Dispatching command");
        match kind {
            CommandKind::Advance => self.handle_advance(form, session).await,
            CommandKind::Back => self.handle_back(form, session),
            CommandKind::Summary => {
                let summary = self.format_summary(form, session);
                ChatResult::build(form, session, summary)
            }
            CommandKind::Confirm => self.handle_confirm_request(form, session),
            CommandKind::Reset => self.handle_reset_request(form, session),
            CommandKind::Help => self.handle_help(form, session),
            CommandKind::CheckStatus => {
                // The shape check already ran at the top of the turn, so no
                // number is present — ask for one.
                ChatResult::build(
                    form,
                    session,
                    format!(
                        "📋 Masukkan nomor registrasi.\n\nContoh: `{}-2025-SD-ABC12345`",
                        form.registration().prefix
                    ),
                )
            }
            // Accept/decline phrases only mean something while a
            // confirmation is pending — otherwise treat as plain input.
            CommandKind::ConfirmYes | CommandKind::ConfirmNo => {
                self.handle_data_input(form, session, message).await
            }
        }
    }

    // ── Advance / back ──────────────────────────────────────────────

    async fn handle_advance(&self, form: &FormDefinition, session: &mut SessionState) -> ChatResult {
        let current = session.current_step.clone();

        if !form.can_advance(&current, &session.values) {
            let missing: Vec<String> = form
                .missing_mandatory(&current, &session.values)
                .iter()
                .map(|f| f.label.clone())
                .collect();
            return ChatResult::build(
                form,
                session,
                format!(
                    "⚠️ Untuk melanjutkan, masih diperlukan:\n• {}",
                    missing.join("\n• ")
                ),
            );
        }

        match form.next_unskipped_step(&current, &session.values) {
            Some(next) if next.kind == crate::form::StepKind::Documents => {
                let next_id = next.id.clone();
                session.current_step = next_id.clone();
                session.phase = Phase::UploadingDocuments;
                session.document_cursor = 0;

                let transition = form.messages().step_transition(&current, &next_id);
                let header = if transition.is_empty() {
                    "📄 Lanjut ke upload dokumen.".to_string()
                } else {
                    transition
                };
                let prompt = self.prompt_documents(form, session);
                ChatResult::build(form, session, format!("{header}\n\n{prompt}"))
            }
            Some(next) => {
                let next_id = next.id.clone();
                let next_name = next.name.clone();
                let transition = form.messages().step_transition(&current, &next_id);
                session.current_step = next_id;
                let response = if transition.is_empty() {
                    format!("✅ Lanjut ke tahap **{next_name}**")
                } else {
                    transition
                };
                ChatResult::build(form, session, response)
            }
            None => {
                session.phase = Phase::PreConfirm;
                let summary = self.format_summary(form, session);
                ChatResult::build(
                    form,
                    session,
                    format!("{summary}\n\n---\n\nKetik **'konfirmasi'** untuk menyelesaikan."),
                )
            }
        }
    }

    fn handle_back(&self, form: &FormDefinition, session: &mut SessionState) -> ChatResult {
        let Some(prev) = form.previous_step(&session.current_step) else {
            return ChatResult::build(
                form,
                session,
                "⚠️ Tidak bisa kembali dari tahap ini.".to_string(),
            );
        };
        let prev_id = prev.id.clone();
        let prev_name = prev.name.clone();
        session.current_step = prev_id;
        // Back always exits upload/pre-confirm sub-flows.
        session.phase = Phase::Collecting;
        ChatResult::build(form, session, format!("⬅️ Kembali ke tahap **{prev_name}**"))
    }

    // ── Summary / help ──────────────────────────────────────────────

    fn format_summary(&self, form: &FormDefinition, session: &SessionState) -> String {
        let mut lines = vec!["📋 **RINGKASAN DATA PENDAFTARAN**\n".to_string()];
        for step in form.steps() {
            if step.kind == crate::form::StepKind::Review {
                continue;
            }
            let mut step_lines = Vec::new();
            for field in form.fields_for_step(&step.id) {
                let Some(value) = session.value(&field.id) else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                if field.field_type.is_file() {
                    let count = session.document(&field.id).map(|d| d.file_count).unwrap_or(1);
                    if count > 1 {
                        step_lines.push(format!("  • {}: ✓ {count} file", field.label));
                    } else {
                        step_lines.push(format!("  • {}: ✓ Terupload", field.label));
                    }
                } else {
                    step_lines.push(format!("  • {}: {value}", field.label));
                }
            }
            if !step_lines.is_empty() {
                let icon = step.icon.as_deref().unwrap_or("📍");
                lines.push(format!("{icon} **{}:**", step.name));
                lines.extend(step_lines);
                lines.push(String::new());
            }
        }
        lines.push(format!(
            "📊 **Kelengkapan:** {:.0}%",
            form.completion(&session.values)
        ));
        lines.join("\n")
    }

    fn handle_help(&self, form: &FormDefinition, session: &SessionState) -> ChatResult {
        let step_name = form
            .step(&session.current_step)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let mut help = format!(
            "🆘 **BANTUAN PENDAFTARAN**

📍 **Posisi Anda:** Tahap {step_name}

**Perintah yang tersedia:**
• **'lanjut'** - Ke tahap berikutnya
• **'kembali'** - Kembali ke tahap sebelumnya
• **'summary'** - Lihat ringkasan data
• **'konfirmasi'** - Selesaikan pendaftaran
• **'reset'** - Mulai dari awal
• **'contoh [field]'** - Lihat contoh pengisian

**Cara mengisi data:**
Cukup ketik data langsung, contoh:
• \"nama saya Ahmad Fauzi\"
• \"lahir di Jakarta 15 Mei 2010\"
• \"alamat Jl. Sudirman No. 10\"

**Mengubah data:**
• \"ubah nama menjadi Ahmad\"
• \"ganti alamat ke Jl. Baru\"
• \"koreksi hp 081234567890\""
        );
        if let Some(next) = form.missing_mandatory(&session.current_step, &session.values).first() {
            help.push_str(&format!("\n\n**▶️ Selanjutnya dibutuhkan:** {}", next.label));
        }
        ChatResult::build(form, session, help)
    }

    // ── Confirmation protocol ───────────────────────────────────────

    fn handle_confirm_request(&self, form: &FormDefinition, session: &mut SessionState) -> ChatResult {
        if let Err(reason) = form.can_confirm(&session.values) {
            return ChatResult::build(
                form,
                session,
                format!("❌ {reason}\n\nKetik **'summary'** untuk melihat data."),
            );
        }
        session.phase = Phase::AwaitingConfirm;
        let summary = self.format_summary(form, session);
        let accept = form
            .confirmation()
            .accept_phrases
            .first()
            .cloned()
            .unwrap_or_else(|| "ya saya yakin".to_string());
        ChatResult::build(
            form,
            session,
            format!(
                "{summary}\n\n---\n\n⚠️ **KONFIRMASI FINAL**\n\nKetik **'{accept}'** untuk konfirmasi."
            ),
        )
    }

    async fn handle_confirmation_response(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        message: &str,
    ) -> ChatResult {
        let accepted = form
            .confirmation()
            .accept_phrases
            .iter()
            .any(|phrase| phrase_match(message, phrase));
        if accepted {
            self.finalize_registration(form, session).await
        } else {
            // Anything but an accept phrase backs out, data intact.
            session.phase = Phase::Collecting;
            ChatResult::build(
                form,
                session,
                "Baik, silakan periksa data Anda.\n\nKetik **'summary'** untuk lihat data atau langsung ubah data yang salah."
                    .to_string(),
            )
        }
    }

    // ── Reset protocol ──────────────────────────────────────────────

    fn handle_reset_request(&self, form: &FormDefinition, session: &mut SessionState) -> ChatResult {
        session.phase = Phase::AwaitingReset;
        let accept = form
            .confirmation()
            .reset_phrases
            .first()
            .cloned()
            .unwrap_or_else(|| "ya hapus".to_string());
        ChatResult::build(
            form,
            session,
            format!("⚠️ Anda akan menghapus semua data. Ketik **'{accept}'** untuk konfirmasi."),
        )
    }

    fn handle_reset_response(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        message: &str,
    ) -> ChatResult {
        let accepted = form
            .confirmation()
            .reset_phrases
            .iter()
            .any(|phrase| phrase_match(message, phrase));
        if accepted {
            session.reset(form.first_step().id.clone());
            let welcome = form.messages().welcome();
            ChatResult::build(
                form,
                session,
                format!("🔄 Data berhasil dihapus.\n\n{welcome}"),
            )
        } else {
            session.phase = Phase::Collecting;
            ChatResult::build(form, session, "✅ Baik, data Anda tetap tersimpan.".to_string())
        }
    }

    // ── Post-confirmation ───────────────────────────────────────────

    fn handle_post_confirmation(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        message: &str,
    ) -> ChatResult {
        let wants_new = form
            .confirmation()
            .new_registration_phrases
            .iter()
            .any(|phrase| phrase_match(message, phrase));
        if wants_new {
            session.reset(form.first_step().id.clone());
            let welcome = form.messages().welcome();
            return ChatResult::build(
                form,
                session,
                format!("📝 **PENDAFTARAN BARU**\n\n{welcome}"),
            );
        }

        let number = session.registration_number.as_deref().unwrap_or("-");
        ChatResult::build(
            form,
            session,
            format!(
                "✅ Nomor registrasi: `{number}`\n\nKetik **'daftar baru'** untuk pendaftaran lain."
            ),
        )
    }

    // ── Data input ──────────────────────────────────────────────────

    async fn handle_data_input(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        message: &str,
    ) -> ChatResult {
        let lower = message.to_lowercase();

        if EXAMPLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return self.handle_ask_examples(form, session, &lower);
        }

        let fields: Vec<&FieldDescriptor> = form
            .fields_for_step(&session.current_step)
            .into_iter()
            .filter(|f| !f.field_type.is_file())
            .collect();
        let context = session.recent_messages(self.config.context_window);
        let raw = self.pipeline.run(message, &context, &fields).await;
        let changes = ExtractionPipeline::apply(form, session, &raw);

        if changes.is_empty() {
            if GREETING_KEYWORDS.iter().any(|k| lower.contains(k)) {
                return self.handle_greeting(form, session);
            }
            return self.handle_unknown_input(form, session);
        }

        let mut parts = Vec::new();
        for accepted in &changes.accepted {
            parts.push(format!("✓ {}: **{}**", accepted.label, accepted.value));
        }
        // Walk fields in form order so rejections report deterministically.
        for field in form.all_fields() {
            if let Some(reason) = changes.rejected.get(&field.id) {
                parts.push(format!("❌ {}: {reason}", field.label));
            }
        }

        if form.can_advance(&session.current_step, &session.values) {
            parts.push(
                "\n✅ Data tahap ini sudah cukup! Ketik **'lanjut'** untuk melanjutkan.".to_string(),
            );
        } else if let Some(next) = form
            .missing_mandatory(&session.current_step, &session.values)
            .first()
        {
            let example = next
                .examples
                .first()
                .map(|e| format!(" _(Contoh: {e})_"))
                .unwrap_or_default();
            parts.push(format!("\n▶️ Selanjutnya, **{}**?{example}", next.label));
        }

        let mut result = ChatResult::build(form, session, parts.join("\n"));
        result.fields_updated = changes
            .accepted
            .iter()
            .filter(|a| a.action == crate::session::FieldAction::Updated)
            .map(|a| a.field_id.clone())
            .collect();
        result.fields_created = changes
            .accepted
            .iter()
            .filter(|a| a.action == crate::session::FieldAction::Created)
            .map(|a| a.field_id.clone())
            .collect();
        result.validation_errors = changes.rejected;
        result
    }

    // ── Contextual helper responses ─────────────────────────────────

    fn handle_greeting(&self, form: &FormDefinition, session: &SessionState) -> ChatResult {
        let step_name = form
            .step(&session.current_step)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let completion = form.completion(&session.values);
        let mut parts = vec![
            "Halo! 👋 Selamat datang di pendaftaran.\n".to_string(),
            format!("📍 Anda sedang di tahap **{step_name}**"),
            format!("\n📊 Progress: **{completion:.0}%** selesai"),
        ];
        match form
            .missing_mandatory(&session.current_step, &session.values)
            .first()
        {
            Some(next) => {
                parts.push(format!("\n▶️ Selanjutnya, mohon berikan **{}**.", next.label));
                if let Some(example) = next.examples.first() {
                    parts.push(format!("\n💡 Contoh: {example}"));
                }
            }
            None => {
                parts.push("\n✅ Semua data di tahap ini sudah lengkap!".to_string());
                parts.push("Ketik **'lanjut'** untuk melanjutkan ke tahap berikutnya.".to_string());
            }
        }
        ChatResult::build(form, session, parts.join("\n"))
    }

    fn handle_unknown_input(&self, form: &FormDefinition, session: &SessionState) -> ChatResult {
        let mut parts = vec!["🤔 Hmm, saya belum bisa memproses input tersebut.\n".to_string()];

        match form
            .missing_mandatory(&session.current_step, &session.values)
            .first()
        {
            Some(next) => {
                parts.push(format!("Saat ini saya membutuhkan **{}**.", next.label));
                if !next.examples.is_empty() {
                    parts.push("\n📝 **Contoh cara mengisi:**".to_string());
                    for example in next.examples.iter().take(2) {
                        parts.push(format!("  • \"{example}\""));
                    }
                }
                if let Some(ref tips) = next.tips {
                    parts.push(format!("\n💡 **Tips:** {tips}"));
                }
                match next.field_type {
                    crate::form::FieldType::Date => {
                        parts.push("\n📅 Format tanggal: DD/MM/YYYY (contoh: 15/05/2010)".to_string())
                    }
                    crate::form::FieldType::Phone => {
                        parts.push("\n📱 Format telepon: 08xxxxxxxxxx".to_string())
                    }
                    crate::form::FieldType::Email => {
                        parts.push("\n📧 Format email: nama@domain.com".to_string())
                    }
                    _ => {}
                }
            }
            None => {
                parts.push(
                    "Semua data di tahap ini sudah lengkap.\n\n✅ Ketik **'lanjut'** untuk melanjutkan atau **'summary'** untuk melihat ringkasan."
                        .to_string(),
                );
            }
        }

        parts.push("\n📌 Ketik **'help'** untuk melihat panduan lengkap.".to_string());
        ChatResult::build(form, session, parts.join("\n"))
    }

    fn handle_ask_examples(
        &self,
        form: &FormDefinition,
        session: &SessionState,
        message_lower: &str,
    ) -> ChatResult {
        let fields = form.fields_for_step(&session.current_step);

        let mut matched: Option<&FieldDescriptor> = None;
        for field in fields.iter().copied() {
            if field.examples.is_empty() {
                continue;
            }
            let label_lower = field.label.to_lowercase();
            if message_lower.contains(&label_lower) || message_lower.contains(&field.id) {
                matched = Some(field);
                break;
            }
        }

        let with_examples: Vec<&FieldDescriptor> = fields
            .iter()
            .copied()
            .filter(|f| !f.examples.is_empty())
            .collect();
        if matched.is_none() {
            match with_examples.len() {
                0 => {
                    return ChatResult::build(
                        form,
                        session,
                        "Maaf, saya tidak menemukan contoh untuk tahap saat ini.\n\nKetik **'help'** untuk bantuan."
                            .to_string(),
                    )
                }
                1 => matched = Some(with_examples[0]),
                _ => {
                    let mut lines = vec!["📝 Ada beberapa field yang memiliki contoh:\n".to_string()];
                    for field in with_examples.iter().take(6) {
                        lines.push(format!(
                            "• **{}** - ketik 'contoh {}'",
                            field.label,
                            field.label.to_lowercase()
                        ));
                    }
                    return ChatResult::build(form, session, lines.join("\n"));
                }
            }
        }

        // matched is Some here by construction.
        let text = matched
            .map(|f| f.example_text())
            .unwrap_or_default();
        ChatResult::build(form, session, text)
    }
}

/// Case-insensitive whole-word phrase match.
///
/// "ya" must match in "ya saya yakin" but never inside "saya" — confirmation
/// phrases cannot trigger on substrings of unrelated words.
pub(crate) fn phrase_match(message: &str, phrase: &str) -> bool {
    let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase.trim()))) else {
        return false;
    };
    re.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_match_is_word_bounded() {
        assert!(phrase_match("ya saya yakin", "ya saya yakin"));
        assert!(phrase_match("ya", "ya"));
        assert!(phrase_match("oke ya deh", "ya"));
        // "ya" inside "saya" must not match.
        assert!(!phrase_match("saya kira tidak", "ya"));
        assert!(!phrase_match("bahaya", "ya"));
        // Case-insensitive.
        assert!(phrase_match("YA SAYA YAKIN", "ya saya yakin"));
    }
}
