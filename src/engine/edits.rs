//! Edit-request handling.
//!
//! Detection is a cheap keyword heuristic; resolution runs extraction
//! against the *entire* field set so prior-step data can be corrected
//! without navigating back. Every applied change lands in the session's
//! edit audit trail and is enumerated in the response.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::engine::{ChatEngine, ChatResult};
use crate::extract::ExtractionPipeline;
use crate::form::{FieldDescriptor, FormDefinition};
use crate::session::SessionState;

const EDIT_KEYWORDS: &[&str] = &[
    "ubah",
    "ganti",
    "koreksi",
    "perbaiki",
    "salah",
    "edit",
    "update",
    "ralat",
    "bukan",
    "harusnya",
    "seharusnya",
    "yang benar",
];

/// Keyword → field id mapping for common Indonesian phrasings.
///
/// Consulted longest-alias-first so "nama ayah" wins over "nama".
const FIELD_ALIASES: &[(&str, &str)] = &[
    // Data siswa
    ("nama lengkap", "nama_lengkap"),
    ("nama siswa", "nama_lengkap"),
    ("nama anak", "nama_lengkap"),
    ("nama murid", "nama_lengkap"),
    ("namanya", "nama_lengkap"),
    ("nama", "nama_lengkap"),
    ("nama panggilan", "nama_panggilan"),
    ("panggilan", "nama_panggilan"),
    ("dipanggil", "nama_panggilan"),
    ("jenis kelamin", "jenis_kelamin"),
    ("kelamin", "jenis_kelamin"),
    ("gender", "jenis_kelamin"),
    ("tempat lahir", "tempat_lahir"),
    ("kota lahir", "tempat_lahir"),
    ("lahir di", "tempat_lahir"),
    ("tanggal lahir", "tanggal_lahir"),
    ("tgl lahir", "tanggal_lahir"),
    ("nomor induk", "nik"),
    ("nik", "nik"),
    ("agama", "agama"),
    // Alamat
    ("alamat lengkap", "alamat_lengkap"),
    ("alamat rumah", "alamat_lengkap"),
    ("tempat tinggal", "alamat_lengkap"),
    ("alamat", "alamat_lengkap"),
    ("kelurahan", "kelurahan"),
    ("desa", "kelurahan"),
    ("kecamatan", "kecamatan"),
    ("kabupaten", "kabupaten_kota"),
    ("kota", "kabupaten_kota"),
    ("provinsi", "provinsi"),
    ("kode pos", "kode_pos"),
    // Kontak
    ("nomor telepon", "nomor_telepon"),
    ("telepon", "nomor_telepon"),
    ("telp", "nomor_telepon"),
    ("nomor hp", "nomor_hp"),
    ("no hp", "nomor_hp"),
    ("handphone", "nomor_hp"),
    ("whatsapp", "nomor_hp"),
    ("wa", "nomor_hp"),
    ("hp", "nomor_hp"),
    ("email", "email"),
    ("e-mail", "email"),
    // Orang tua
    ("nama ayah", "nama_ayah"),
    ("bapak", "nama_ayah"),
    ("ayah", "nama_ayah"),
    ("pekerjaan ayah", "pekerjaan_ayah"),
    ("kerja ayah", "pekerjaan_ayah"),
    ("nama ibu", "nama_ibu"),
    ("mamah", "nama_ibu"),
    ("mama", "nama_ibu"),
    ("ibu", "nama_ibu"),
    ("pekerjaan ibu", "pekerjaan_ibu"),
    ("kerja ibu", "pekerjaan_ibu"),
    ("hp ayah", "nomor_hp_ayah"),
    ("hp ibu", "nomor_hp_ibu"),
    // Sekolah
    ("jenjang pendidikan", "jenjang_pendidikan"),
    ("jenjangnya", "jenjang_pendidikan"),
    ("jenjang", "jenjang_pendidikan"),
    ("tingkat", "jenjang_pendidikan"),
    ("pilihan sekolah", "pilihan_sekolah"),
    ("sekolahnya", "pilihan_sekolah"),
    ("sekolah", "pilihan_sekolah"),
    ("asal sekolah", "asal_sekolah"),
    ("tahun ajaran", "tahun_ajaran"),
    // Kesehatan
    ("tinggi badan", "tinggi_badan"),
    ("berat badan", "berat_badan"),
    ("golongan darah", "golongan_darah"),
    ("gol darah", "golongan_darah"),
    ("riwayat penyakit", "riwayat_penyakit"),
    ("alergi", "alergi"),
];

static VALUE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
static POLITENESS_SUFFIX: OnceLock<Regex> = OnceLock::new();

fn value_patterns() -> &'static [Regex] {
    VALUE_PATTERNS.get_or_init(|| {
        vec![
            // "ubah X menjadi/jadi/ke Y"
            Regex::new(
                r"(?i)(?:ubah|ganti|koreksi|perbaiki|edit|update|ralat)\s+[\w\s]+?\s+(?:menjadi|jadi|ke)\s+(.+?)(?:\s*[,.]|$)",
            )
            .unwrap(),
            // "yang benar (adalah) Y" / "seharusnya Y"
            Regex::new(r"(?i)(?:yang\s+benar(?:\s+adalah)?|seharusnya|harusnya)\s+(.+?)(?:\s*[,.]|$)")
                .unwrap(),
            // "bukan X tapi Y"
            Regex::new(r"(?i)bukan\s+[\w\s]+?\s+(?:tapi|tetapi|melainkan)\s+(.+?)(?:\s*[,.]|$)")
                .unwrap(),
            // "X: Y" / "X = Y"
            Regex::new(r"(?i)[\w\s]+?[:=]\s*(.+?)(?:\s*[,.]|$)").unwrap(),
            // "ubah <field> <value>"
            Regex::new(r"(?i)(?:ubah|ganti|koreksi|perbaiki)\s+\w+\s+(.+?)(?:\s*[,.]|$)").unwrap(),
        ]
    })
}

fn politeness_suffix() -> &'static Regex {
    POLITENESS_SUFFIX
        .get_or_init(|| Regex::new(r"(?i)\s+(ya|dong|gan|pak|bu|mas|mbak|nih|deh)$").unwrap())
}

/// Cheap, non-authoritative edit detection.
pub(crate) fn is_edit_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    EDIT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Detect which field the user wants to change.
pub(crate) fn detect_target_field(message: &str, fields: &[&FieldDescriptor]) -> Option<String> {
    let lower = message.to_lowercase();

    // Label mention is the most specific signal.
    for field in fields {
        let label = field.label.to_lowercase();
        if label.len() > 2 && lower.contains(&label) {
            return Some(field.id.clone());
        }
    }

    // Field id spelled with spaces.
    for field in fields {
        if lower.contains(&field.id.replace('_', " ")) {
            return Some(field.id.clone());
        }
    }

    // Aliases, longest first so the most specific wins.
    let mut aliases: Vec<&(&str, &str)> = FIELD_ALIASES.iter().collect();
    aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));
    for (alias, field_id) in aliases {
        if lower.contains(alias) && fields.iter().any(|f| f.id == *field_id) {
            return Some((*field_id).to_string());
        }
    }

    // Declared extraction keywords.
    for field in fields {
        for keyword in &field.extract_keywords {
            if lower.contains(&keyword.to_lowercase()) {
                return Some(field.id.clone());
            }
        }
    }

    None
}

/// Pull the replacement value out of an edit phrasing.
pub(crate) fn extract_new_value(message: &str) -> Option<String> {
    for pattern in value_patterns() {
        if let Some(caps) = pattern.captures(message) {
            let value = politeness_suffix().replace(caps[1].trim(), "").trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

impl ChatEngine {
    pub(crate) async fn handle_edit_request(
        &self,
        form: &FormDefinition,
        session: &mut SessionState,
        message: &str,
    ) -> ChatResult {
        // Edits apply to data fields only; documents go through the upload
        // sub-flow.
        let all_fields: Vec<&FieldDescriptor> = form
            .all_fields()
            .iter()
            .filter(|f| !f.field_type.is_file())
            .collect();

        // Rule-based resolution first: target field + replacement value.
        let mut raw: HashMap<String, String> = HashMap::new();
        if let Some(target) = detect_target_field(message, &all_fields) {
            if let Some(value) = extract_new_value(message) {
                tracing::debug!(field = %target, "Rule-based edit extraction");
                raw.insert(target, value);
            }
        }

        // Fall back to the full extraction pipeline over every field.
        if raw.is_empty() {
            let context = session.recent_messages(self.config.context_window);
            raw = self.pipeline.run(message, &context, &all_fields).await;
        }

        if raw.is_empty() {
            return self.edit_usage_response(form, session);
        }

        let before = session.values.clone();
        let changes = ExtractionPipeline::apply(form, session, &raw);

        if changes.accepted.is_empty() {
            if changes.rejected.is_empty() {
                return ChatResult::build(
                    form,
                    session,
                    "❌ Tidak ada perubahan yang diterapkan.".to_string(),
                );
            }
            let mut parts = vec!["⚠️ **Validasi gagal:**".to_string()];
            for field in form.all_fields() {
                if let Some(reason) = changes.rejected.get(&field.id) {
                    parts.push(format!("• {}: {reason}", field.label));
                }
            }
            let mut result = ChatResult::build(form, session, parts.join("\n"));
            result.validation_errors = changes.rejected;
            return result;
        }

        let mut parts = vec!["✅ **Data berhasil diubah:**".to_string()];
        for accepted in &changes.accepted {
            match before.get(&accepted.field_id) {
                Some(old) if !old.is_empty() => {
                    parts.push(format!(
                        "• {}: ~~{old}~~ → **{}**",
                        accepted.label, accepted.value
                    ));
                }
                _ => {
                    parts.push(format!("• {}: **{}** _(baru)_", accepted.label, accepted.value));
                }
            }
        }
        if !changes.rejected.is_empty() {
            parts.push("\n⚠️ **Tidak valid:**".to_string());
            for field in form.all_fields() {
                if let Some(reason) = changes.rejected.get(&field.id) {
                    parts.push(format!("• {}: {reason}", field.label));
                }
            }
        }
        parts.push("\nKetik **'summary'** untuk melihat semua data.".to_string());

        let mut result = ChatResult::build(form, session, parts.join("\n"));
        result.fields_updated = changes
            .accepted
            .iter()
            .filter(|a| before.contains_key(&a.field_id))
            .map(|a| a.field_id.clone())
            .collect();
        result.fields_created = changes
            .accepted
            .iter()
            .filter(|a| !before.contains_key(&a.field_id))
            .map(|a| a.field_id.clone())
            .collect();
        result.validation_errors = changes.rejected;
        result
    }

    /// Usage guidance when no edit could be resolved — not an error.
    fn edit_usage_response(&self, form: &FormDefinition, session: &SessionState) -> ChatResult {
        let mut parts = vec![
            "🤔 Maaf, saya tidak mengerti data mana yang ingin diubah.\n".to_string(),
            "**Cara mengubah data:**".to_string(),
            "• \"ubah nama menjadi Ahmad Fauzi\"".to_string(),
            "• \"ganti alamat ke Jl. Sudirman No. 10\"".to_string(),
            "• \"koreksi tanggal lahir 15/05/2010\"".to_string(),
            "• \"hp: 081234567890\"".to_string(),
        ];

        let editable: Vec<(&str, &str)> = form
            .all_fields()
            .iter()
            .filter(|f| !f.field_type.is_file())
            .filter_map(|f| session.value(&f.id).map(|v| (f.label.as_str(), v)))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        if !editable.is_empty() {
            parts.push("\n**Data yang bisa diubah:**".to_string());
            for (label, value) in editable.iter().take(10) {
                let display: String = if value.chars().count() > 50 {
                    format!("{}...", value.chars().take(50).collect::<String>())
                } else {
                    (*value).to_string()
                };
                parts.push(format!("• {label}: {display}"));
            }
        }

        ChatResult::build(form, session, parts.join("\n"))
    }
}
