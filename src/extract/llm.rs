//! LLM-backed field extraction.
//!
//! Builds a field-catalog prompt, asks for a bare JSON object, and
//! normalizes whatever comes back: salvage a JSON object from surrounding
//! prose, strip label prefixes, drop unknown field ids.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::LlmError;
use crate::extract::{ExtractionOutcome, FieldExtractor};
use crate::form::FieldDescriptor;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, Role};
use crate::session::HistoryEntry;

static VALUE_PREFIX: OnceLock<Regex> = OnceLock::new();

fn value_prefix() -> &'static Regex {
    VALUE_PREFIX.get_or_init(|| Regex::new(r"^[^:]+:\s*").unwrap())
}

/// Field extractor delegating to an LLM provider.
pub struct LlmFieldExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl LlmFieldExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn extract(
        &self,
        message: &str,
        context: &[&HistoryEntry],
        fields: &[&FieldDescriptor],
    ) -> Result<ExtractionOutcome, LlmError> {
        if fields.is_empty() {
            return Ok(ExtractionOutcome::Empty);
        }

        let system = extraction_prompt(fields);
        let mut user = String::new();
        if !context.is_empty() {
            user.push_str("PERCAKAPAN TERAKHIR:\n");
            for entry in context {
                let role = match entry.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                user.push_str(&format!("{role}: {}\n", entry.content));
            }
            user.push('\n');
        }
        user.push_str(&format!("PESAN USER: \"{message}\"\n\nExtract ke JSON:"));

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_max_tokens(1024)
        .with_temperature(0.0)
        .with_json_mode();

        let response = self.llm.complete(request).await?;
        let extracted = parse_extraction(&response.content, fields);
        debug!(count = extracted.len(), "LLM extraction parsed");
        Ok(ExtractionOutcome::from_map(extracted))
    }
}

/// Build the extraction system prompt from the candidate field catalog.
fn extraction_prompt(fields: &[&FieldDescriptor]) -> String {
    let mut catalog = String::new();
    for field in fields {
        catalog.push_str(&format!(
            "- {}: {} (type: {})",
            field.id, field.label, field.field_type
        ));
        if let Some(example) = field.examples.first() {
            catalog.push_str(&format!(" contoh: {example}"));
        }
        if !field.options.is_empty() {
            let options: Vec<&str> = field
                .options
                .iter()
                .take(5)
                .map(|o| o.value.as_str())
                .collect();
            catalog.push_str(&format!(" pilihan: {}", options.join(", ")));
        }
        if !field.extract_keywords.is_empty() {
            let keywords: Vec<&str> = field
                .extract_keywords
                .iter()
                .take(4)
                .map(String::as_str)
                .collect();
            catalog.push_str(&format!(" keyword: {}", keywords.join(", ")));
        }
        catalog.push('\n');
    }

    format!(
        r#"Kamu adalah AI yang mengekstrak informasi dari pesan user untuk form pendaftaran sekolah.

FIELD YANG TERSEDIA:
{catalog}
ATURAN PENTING:
1. Extract HANYA nilai murni yang disebutkan user
2. JANGAN PERNAH menyertakan nama field/label dalam nilai
3. Contoh BENAR:
   - User: "nama saya Ahmad Fauzi" -> {{"nama_lengkap": "Ahmad Fauzi"}}
   - User: "lahir di Jakarta 15 Mei 2000" -> {{"tempat_lahir": "Jakarta", "tanggal_lahir": "15/05/2000"}}
4. Contoh SALAH (JANGAN LAKUKAN):
   - {{"nama_lengkap": "Nama Lengkap Siswa: Ahmad"}}
5. Normalize nilai: tanggal ke DD/MM/YYYY, telepon angka saja
6. Return HANYA JSON object tanpa penjelasan
7. Return {{}} jika tidak ada data yang bisa diextract"#
    )
}

/// Parse the model's reply into a field map, keeping only known field ids.
fn parse_extraction(content: &str, fields: &[&FieldDescriptor]) -> HashMap<String, String> {
    let value = parse_json_object(content).unwrap_or(serde_json::Value::Null);
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };

    let mut result = HashMap::new();
    for (key, raw) in object {
        if !fields.iter().any(|f| &f.id == key) {
            continue;
        }
        let text = match raw {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        let cleaned = clean_value(&text);
        if !cleaned.is_empty() {
            result.insert(key.clone(), cleaned);
        }
    }
    result
}

/// Parse a JSON object, salvaging one embedded in surrounding prose.
fn parse_json_object(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Strip a leading "Label:" prefix the model sometimes echoes back.
fn clean_value(value: &str) -> String {
    value_prefix().replace(value.trim(), "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FieldType, ValidationRules};

    fn field(id: &str) -> FieldDescriptor {
        FieldDescriptor {
            id: id.to_string(),
            label: id.to_string(),
            step: "s".to_string(),
            field_type: FieldType::Text,
            mandatory: false,
            validation: ValidationRules::default(),
            options: Vec::new(),
            examples: Vec::new(),
            tips: None,
            extract_keywords: Vec::new(),
            auto_clean: false,
            allowed_extensions: Vec::new(),
            order: 0,
            default: None,
        }
    }

    #[test]
    fn parses_plain_json() {
        let nama = field("nama_lengkap");
        let fields = [&nama];
        let result = parse_extraction(r#"{"nama_lengkap": "Ahmad Fauzi"}"#, &fields);
        assert_eq!(result.get("nama_lengkap").map(String::as_str), Some("Ahmad Fauzi"));
    }

    #[test]
    fn salvages_json_from_prose() {
        let nama = field("nama_lengkap");
        let fields = [&nama];
        let result = parse_extraction(
            "Berikut hasilnya: {\"nama_lengkap\": \"Siti\"} semoga membantu",
            &fields,
        );
        assert_eq!(result.get("nama_lengkap").map(String::as_str), Some("Siti"));
    }

    #[test]
    fn drops_unknown_field_ids() {
        let nama = field("nama_lengkap");
        let fields = [&nama];
        let result = parse_extraction(
            r#"{"nama_lengkap": "Ahmad", "warna_favorit": "biru"}"#,
            &fields,
        );
        assert_eq!(result.len(), 1);
        assert!(!result.contains_key("warna_favorit"));
    }

    #[test]
    fn strips_echoed_label_prefix() {
        assert_eq!(clean_value("Nama Lengkap: Ahmad"), "Ahmad");
        assert_eq!(clean_value("  Ahmad  "), "Ahmad");
    }

    #[test]
    fn numbers_become_strings() {
        let tinggi = field("tinggi_badan");
        let fields = [&tinggi];
        let result = parse_extraction(r#"{"tinggi_badan": 120}"#, &fields);
        assert_eq!(result.get("tinggi_badan").map(String::as_str), Some("120"));
    }

    #[test]
    fn garbage_yields_empty() {
        let nama = field("nama_lengkap");
        let fields = [&nama];
        assert!(parse_extraction("maaf, tidak ada data", &fields).is_empty());
        assert!(parse_extraction("[1, 2, 3]", &fields).is_empty());
    }

    #[test]
    fn prompt_lists_catalog() {
        let mut jenjang = field("jenjang");
        jenjang.field_type = FieldType::Select;
        jenjang.options = vec![crate::form::FieldOption {
            value: "SD".to_string(),
            label: None,
            aliases: Vec::new(),
        }];
        jenjang.examples = vec!["SD".to_string()];
        let fields = [&jenjang];
        let prompt = extraction_prompt(&fields);
        assert!(prompt.contains("- jenjang: jenjang (type: select)"));
        assert!(prompt.contains("pilihan: SD"));
    }
}
