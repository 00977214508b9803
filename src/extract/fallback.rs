//! Deterministic fallback extraction.
//!
//! Runs only when the semantic oracle yields nothing. Matches are
//! intentionally conservative: options and aliases with word boundaries,
//! unambiguous date/phone/email shapes, and numbers anchored to a field
//! keyword. Free text is never guessed.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::form::{FieldDescriptor, FieldType};

static DATE_ANY: OnceLock<Regex> = OnceLock::new();
static DATE_SPELLED: OnceLock<Regex> = OnceLock::new();
static PHONE: OnceLock<Regex> = OnceLock::new();
static EMAIL: OnceLock<Regex> = OnceLock::new();
static LABEL_PREFIX: OnceLock<Regex> = OnceLock::new();

fn date_any() -> &'static Regex {
    DATE_ANY.get_or_init(|| {
        Regex::new(r"(\d{1,2}[-/]\d{1,2}[-/]\d{4}|\d{4}-\d{1,2}-\d{1,2})").unwrap()
    })
}

fn date_spelled() -> &'static Regex {
    DATE_SPELLED.get_or_init(|| {
        Regex::new(
            r"(?i)(\d{1,2}\s+(?:januari|februari|maret|april|mei|juni|juli|agustus|september|oktober|november|desember)\s+\d{4})",
        )
        .unwrap()
    })
}

fn phone() -> &'static Regex {
    PHONE.get_or_init(|| Regex::new(r"(0\d{9,13}|\+62\d{9,12})").unwrap())
}

fn email() -> &'static Regex {
    EMAIL.get_or_init(|| Regex::new(r"[\w.\-]+@[\w.\-]+\.\w+").unwrap())
}

fn label_prefix() -> &'static Regex {
    LABEL_PREFIX.get_or_init(|| Regex::new(r"^[A-Za-z\s]+:\s*").unwrap())
}

/// Extract field values from a message without the oracle.
pub fn extract_simple(message: &str, fields: &[&FieldDescriptor]) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for field in fields {
        let value = match field.field_type {
            FieldType::Select => match_select(message, field),
            FieldType::Date => match_date(message),
            FieldType::Phone => match_phone(message),
            FieldType::Email => email().find(message).map(|m| m.as_str().to_string()),
            FieldType::Number => match_number(message, field),
            // Free text needs the oracle — guessing produces garbage.
            FieldType::Text | FieldType::Textarea | FieldType::File => None,
        };

        if let Some(value) = value {
            let cleaned = label_prefix().replace(&value, "").trim().to_string();
            if !cleaned.is_empty() {
                result.insert(field.id.clone(), cleaned);
            }
        }
    }

    result
}

fn match_select(message: &str, field: &FieldDescriptor) -> Option<String> {
    for option in &field.options {
        if word_match(message, &option.value) {
            return Some(option.value.clone());
        }
        for alias in &option.aliases {
            if word_match(message, alias) {
                return Some(option.value.clone());
            }
        }
    }
    None
}

fn word_match(message: &str, needle: &str) -> bool {
    let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(needle))) else {
        return false;
    };
    re.is_match(message)
}

fn match_date(message: &str) -> Option<String> {
    if let Some(m) = date_any().find(message) {
        return Some(m.as_str().to_string());
    }
    date_spelled().find(message).map(|m| m.as_str().to_string())
}

fn match_phone(message: &str) -> Option<String> {
    // Collapse separators first so "0812-3456 789" still matches.
    let collapsed: String = message
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    phone().find(&collapsed).map(|m| m.as_str().to_string())
}

fn match_number(message: &str, field: &FieldDescriptor) -> Option<String> {
    for keyword in &field.extract_keywords {
        let Ok(re) = Regex::new(&format!(r"(?i){}\s*[:\s]\s*(\d+)", regex::escape(keyword))) else {
            continue;
        };
        if let Some(caps) = re.captures(message) {
            return Some(caps[1].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FieldOption, ValidationRules};

    fn field(id: &str, field_type: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            id: id.to_string(),
            label: id.to_string(),
            step: "s".to_string(),
            field_type,
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
    fn extracts_select_by_alias() {
        let mut jenjang = field("jenjang", FieldType::Select);
        jenjang.options = vec![
            FieldOption {
                value: "SD".to_string(),
                label: None,
                aliases: vec!["sekolah dasar".to_string()],
            },
            FieldOption {
                value: "SMP".to_string(),
                label: None,
                aliases: Vec::new(),
            },
        ];
        let fields = [&jenjang];

        let result = extract_simple("anak saya mau masuk sekolah dasar", &fields);
        assert_eq!(result.get("jenjang").map(String::as_str), Some("SD"));

        let result = extract_simple("mau daftar SMP", &fields);
        assert_eq!(result.get("jenjang").map(String::as_str), Some("SMP"));

        // "sd" embedded in a word must not match.
        let result = extract_simple("asdf", &fields);
        assert!(result.is_empty());
    }

    #[test]
    fn extracts_date_shapes() {
        let tanggal = field("tanggal_lahir", FieldType::Date);
        let fields = [&tanggal];

        for (msg, expected) in [
            ("lahir 15/05/2010 di Jakarta", "15/05/2010"),
            ("lahir 2010-05-15", "2010-05-15"),
            ("lahir 15 Mei 2010", "15 Mei 2010"),
        ] {
            let result = extract_simple(msg, &fields);
            assert_eq!(result.get("tanggal_lahir").map(String::as_str), Some(expected));
        }
    }

    #[test]
    fn extracts_phone_with_separators() {
        let hp = field("nomor_hp", FieldType::Phone);
        let fields = [&hp];
        let result = extract_simple("hp saya 0812-3456-7890 ya", &fields);
        assert_eq!(result.get("nomor_hp").map(String::as_str), Some("081234567890"));
    }

    #[test]
    fn extracts_email() {
        let email = field("email", FieldType::Email);
        let fields = [&email];
        let result = extract_simple("email: budi.s@example.com", &fields);
        assert_eq!(
            result.get("email").map(String::as_str),
            Some("budi.s@example.com")
        );
    }

    #[test]
    fn number_requires_keyword_anchor() {
        let mut tinggi = field("tinggi_badan", FieldType::Number);
        tinggi.extract_keywords = vec!["tinggi".to_string()];
        let fields = [&tinggi];

        let result = extract_simple("tinggi 120", &fields);
        assert_eq!(result.get("tinggi_badan").map(String::as_str), Some("120"));

        // A bare number without the keyword is ignored.
        let result = extract_simple("120", &fields);
        assert!(result.is_empty());
    }

    #[test]
    fn free_text_is_never_guessed() {
        let nama = field("nama_lengkap", FieldType::Text);
        let fields = [&nama];
        let result = extract_simple("nama saya Ahmad Fauzi", &fields);
        assert!(result.is_empty());
    }
}
