//! Registration artifacts: number generation, finalization, status lookup.

use chrono::{Datelike, Utc};
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use crate::engine::{ChatEngine, ChatResult};
use crate::error::DatabaseError;
use crate::form::{FormDefinition, RegistrationRules};
use crate::session::{Phase, SessionState, SessionStatus};
use crate::store::{RegistrationRecord, RegistrationStatus};

/// Find a well-formed registration number for this form's prefix anywhere
/// in the message.
pub(crate) fn find_number(form: &FormDefinition, message: &str) -> Option<String> {
    let prefix = regex::escape(&form.registration().prefix);
    let pattern = format!(r"{prefix}-\d{{4}}-[A-Z]{{2,3}}-[A-Z0-9]{{8}}");
    let re = Regex::new(&pattern).ok()?;
    re.find(&message.to_uppercase()).map(|m| m.as_str().to_string())
}

/// Resolve the level code from the classification field's value.
///
/// First needle that matches as a case-insensitive substring wins; the
/// default code covers everything else.
pub(crate) fn level_code(rules: &RegistrationRules, classification: &str) -> String {
    let haystack = classification.to_lowercase();
    rules
        .level_codes
        .iter()
        .find(|lc| haystack.contains(&lc.needle.to_lowercase()))
        .map(|lc| lc.code.clone())
        .unwrap_or_else(|| rules.default_code.clone())
}

/// Mint a candidate registration number:
/// `<PREFIX>-<year>-<level code>-<8 uppercase alnum>`.
pub(crate) fn generate_number(rules: &RegistrationRules, classification: &str) -> String {
    let year = Utc::now().year();
    let code = level_code(rules, classification);
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("{}-{year}-{code}-{suffix}", rules.prefix)
}

impl ChatEngine {
    /// Finalize the registration: mint the number, attempt persistence,
    /// respond, and move to the post-confirmation phase.
    ///
    /// Persistence is best-effort — the number is surfaced to the user even
    /// when storage is down. Uniqueness collisions are retried with a fresh
    /// suffix before giving up.
    pub(crate) async fn finalize_registration(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
    ) -> ChatResult {
        // A completed session never mints a second artifact.
        if let Some(existing) = session.registration_number.clone() {
            session.phase = Phase::AskNewRegistration;
            return ChatResult::build(
                form,
                session,
                format!("✅ Pendaftaran Anda sudah terkonfirmasi.\n\n**Nomor Registrasi:** `{existing}`"),
            );
        }

        let rules = form.registration();
        let classification = session
            .value(&rules.classification_field)
            .unwrap_or_default()
            .to_string();
        let data_json =
            serde_json::to_string(&session.values).unwrap_or_else(|_| "{}".to_string());

        let mut number = generate_number(rules, &classification);
        for attempt in 0..3 {
            let record = RegistrationRecord {
                registration_number: number.clone(),
                session_id: session.session_id.clone(),
                user_id: session.user_id.clone(),
                status: RegistrationStatus::PendingPayment,
                data_json: data_json.clone(),
                created_at: Utc::now(),
            };
            match self.db_call(self.db.save_registration(&record)).await {
                Ok(()) => {
                    if let Err(e) = self.db_call(self.db.delete_draft(&session.session_id)).await {
                        warn!("Failed to drop draft after promotion: {e}");
                    }
                    break;
                }
                Err(DatabaseError::Constraint(_)) => {
                    warn!(number = %number, attempt, "Registration number collision, retrying");
                    number = generate_number(rules, &classification);
                }
                Err(e) => {
                    // Conversational progress never blocks on storage.
                    warn!("Failed to persist registration, responding anyway: {e}");
                    break;
                }
            }
        }

        session.assign_registration(number.clone());
        session.status = SessionStatus::Completed;
        session.phase = Phase::Confirmed;

        let response = format!(
            "🎉 **PENDAFTARAN BERHASIL!**

**Nomor Registrasi:** `{number}`

💡 Simpan nomor registrasi untuk cek status.

Ketik **'daftar baru'** untuk pendaftaran lain."
        );

        // Only "start new" or a status query remain legal after this point.
        session.phase = Phase::AskNewRegistration;

        let mut result = ChatResult::build(form, session, response);
        result.registration_status = Some(RegistrationStatus::PendingPayment.as_str().to_string());
        result
    }

    /// Status lookup. Never mutates phase or step.
    pub(crate) async fn check_status(
        &self,
        form: &FormDefinition,
        session: &SessionState,
        number: &str,
    ) -> ChatResult {
        match self.db_call(self.db.get_registration(number)).await {
            Ok(Some(record)) => {
                let data: std::collections::HashMap<String, String> =
                    serde_json::from_str(&record.data_json).unwrap_or_default();

                let mut text = format!("📋 **STATUS PENDAFTARAN**\n\n**Nomor:** `{number}`\n");
                if let Some(nama) = data.get("nama_lengkap") {
                    text.push_str(&format!("**Nama:** {nama}\n"));
                }
                text.push_str(&format!("**Status:** {}", record.status.label()));

                let mut result = ChatResult::build(form, session, text);
                result.registration_number = Some(number.to_string());
                result.registration_status = Some(record.status.as_str().to_string());
                result
            }
            Ok(None) => ChatResult::build(
                form,
                session,
                format!("❌ Nomor `{number}` tidak ditemukan."),
            ),
            Err(e) => {
                warn!("Status lookup failed for {number}: {e}");
                ChatResult::build(
                    form,
                    session,
                    "⚠️ Tidak dapat memeriksa status saat ini. Silakan coba lagi nanti.".to_string(),
                )
            }
        }
    }
}
