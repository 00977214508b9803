//! Pure per-type field validation.
//!
//! `normalize_and_validate` takes a raw extracted value and returns either
//! the cleaned canonical value or a rejection reason. It never touches
//! session state — rejection handling is the caller's concern.

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::form::model::{FieldDescriptor, FieldType};

static DATE_DMY: OnceLock<Regex> = OnceLock::new();
static DATE_YMD: OnceLock<Regex> = OnceLock::new();
static DATE_INDONESIAN: OnceLock<Regex> = OnceLock::new();

const MONTHS: &[(&str, u32)] = &[
    ("januari", 1),
    ("februari", 2),
    ("maret", 3),
    ("april", 4),
    ("mei", 5),
    ("juni", 6),
    ("juli", 7),
    ("agustus", 8),
    ("september", 9),
    ("oktober", 10),
    ("november", 11),
    ("desember", 12),
];

fn date_dmy() -> &'static Regex {
    DATE_DMY.get_or_init(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})$").unwrap())
}

fn date_ymd() -> &'static Regex {
    DATE_YMD.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap())
}

fn date_indonesian() -> &'static Regex {
    DATE_INDONESIAN.get_or_init(|| Regex::new(r"(?i)^(\d{1,2})\s+([a-z]+)\s+(\d{4})$").unwrap())
}

/// Validate and normalize a raw value for a field.
///
/// Returns the cleaned value, or a user-facing rejection reason.
pub fn normalize_and_validate(field: &FieldDescriptor, raw: &str) -> Result<String, String> {
    let mut value = raw.trim().to_string();

    if value.is_empty() {
        if field.mandatory {
            return Err(format!("{} wajib diisi", field.label));
        }
        return Ok(value);
    }

    // Type-specific normalization first, so pattern/length checks see the
    // canonical form.
    match field.field_type {
        FieldType::Phone => {
            if field.auto_clean {
                value = value.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();
            }
            if value.is_empty() {
                return Err(format!("{} format tidak valid", field.label));
            }
        }
        FieldType::Email => {
            value = value.to_lowercase();
            if !value.contains('@') || !value.split('@').nth(1).is_some_and(|d| d.contains('.')) {
                return Err(format!("{} format tidak valid (contoh: nama@domain.com)", field.label));
            }
        }
        FieldType::Date => {
            value = normalize_date(&value)
                .ok_or_else(|| format!("{}: format tanggal harus DD/MM/YYYY", field.label))?;
        }
        FieldType::Select => {
            if !field.options.is_empty() {
                match match_option(field, &value) {
                    Some(canonical) => value = canonical,
                    None => {
                        let choices: Vec<&str> =
                            field.options.iter().map(|o| o.value.as_str()).collect();
                        return Err(format!(
                            "{}: pilih salah satu dari {}",
                            field.label,
                            choices.join(", ")
                        ));
                    }
                }
            }
        }
        FieldType::Number => {
            if !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("{} harus berupa angka", field.label));
            }
        }
        FieldType::Text | FieldType::Textarea | FieldType::File => {}
    }

    if let Some(ref pattern) = field.validation.pattern {
        if !pattern.is_match(&value) {
            return Err(field
                .validation
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} format tidak valid", field.label)));
        }
    }

    if let Some(min) = field.validation.min_length {
        if value.chars().count() < min {
            return Err(format!("{} minimal {min} karakter", field.label));
        }
    }
    if let Some(max) = field.validation.max_length {
        if value.chars().count() > max {
            return Err(format!("{} maksimal {max} karakter", field.label));
        }
    }

    if field.field_type == FieldType::Date {
        if field.validation.min_age.is_some() || field.validation.max_age.is_some() {
            validate_age(&value, field.validation.min_age, field.validation.max_age)?;
        }
    }

    Ok(value)
}

/// Canonicalize a date into DD/MM/YYYY, accepting D/M/YYYY, YYYY-MM-DD and
/// "15 Mei 2010" spellings. Returns None for unparseable or impossible dates.
fn normalize_date(value: &str) -> Option<String> {
    let (day, month, year) = if let Some(caps) = date_dmy().captures(value) {
        (
            caps[1].parse::<u32>().ok()?,
            caps[2].parse::<u32>().ok()?,
            caps[3].parse::<i32>().ok()?,
        )
    } else if let Some(caps) = date_ymd().captures(value) {
        (
            caps[3].parse::<u32>().ok()?,
            caps[2].parse::<u32>().ok()?,
            caps[1].parse::<i32>().ok()?,
        )
    } else if let Some(caps) = date_indonesian().captures(value) {
        let month_name = caps[2].to_lowercase();
        let month = MONTHS
            .iter()
            .find(|(name, _)| *name == month_name)
            .map(|(_, n)| *n)?;
        (
            caps[1].parse::<u32>().ok()?,
            month,
            caps[3].parse::<i32>().ok()?,
        )
    } else {
        return None;
    };

    // Reject impossible dates (31/02/...).
    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(format!("{day:02}/{month:02}/{year:04}"))
}

/// Match a value against a select field's options and aliases,
/// case-insensitively, returning the canonical option value.
fn match_option(field: &FieldDescriptor, value: &str) -> Option<String> {
    let lower = value.to_lowercase();
    for opt in &field.options {
        if opt.value.to_lowercase() == lower {
            return Some(opt.value.clone());
        }
        if opt.aliases.iter().any(|a| a.to_lowercase() == lower) {
            return Some(opt.value.clone());
        }
    }
    None
}

fn validate_age(date: &str, min_age: Option<u32>, max_age: Option<u32>) -> Result<(), String> {
    let caps = date_dmy()
        .captures(date)
        .ok_or_else(|| "Format tanggal harus DD/MM/YYYY".to_string())?;
    let day: u32 = caps[1].parse().map_err(|_| "Tanggal tidak valid".to_string())?;
    let month: u32 = caps[2].parse().map_err(|_| "Tanggal tidak valid".to_string())?;
    let year: i32 = caps[3].parse().map_err(|_| "Tanggal tidak valid".to_string())?;

    let birth = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| "Tanggal tidak valid".to_string())?;
    let today = Utc::now().date_naive();

    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }

    if let Some(min) = min_age {
        if age < min as i32 {
            return Err(format!("Usia minimal {min} tahun"));
        }
    }
    if let Some(max) = max_age {
        if age > max as i32 {
            return Err(format!("Usia maksimal {max} tahun"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::model::{FieldOption, ValidationRules};

    fn make_field(field_type: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            id: "f".to_string(),
            label: "Field".to_string(),
            step: "s".to_string(),
            field_type,
            mandatory: true,
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
    fn text_passes_through_trimmed() {
        let field = make_field(FieldType::Text);
        assert_eq!(
            normalize_and_validate(&field, "  Ahmad Fauzi  ").unwrap(),
            "Ahmad Fauzi"
        );
    }

    #[test]
    fn empty_mandatory_rejected() {
        let field = make_field(FieldType::Text);
        assert!(normalize_and_validate(&field, "   ").is_err());
    }

    #[test]
    fn date_formats_canonicalize() {
        let field = make_field(FieldType::Date);
        assert_eq!(normalize_and_validate(&field, "15/05/2010").unwrap(), "15/05/2010");
        assert_eq!(normalize_and_validate(&field, "5/1/2010").unwrap(), "05/01/2010");
        assert_eq!(normalize_and_validate(&field, "2010-05-15").unwrap(), "15/05/2010");
        assert_eq!(normalize_and_validate(&field, "15 Mei 2010").unwrap(), "15/05/2010");
        assert_eq!(normalize_and_validate(&field, "1 januari 2020").unwrap(), "01/01/2020");
    }

    #[test]
    fn impossible_date_rejected() {
        let field = make_field(FieldType::Date);
        assert!(normalize_and_validate(&field, "31/02/2010").is_err());
        assert!(normalize_and_validate(&field, "besok").is_err());
    }

    #[test]
    fn age_bounds() {
        let mut field = make_field(FieldType::Date);
        field.validation.min_age = Some(3);
        field.validation.max_age = Some(18);
        // Someone born yesterday is too young.
        let today = Utc::now().date_naive();
        let newborn = format!("{:02}/{:02}/{}", today.day(), today.month(), today.year() - 1);
        assert!(normalize_and_validate(&field, &newborn).is_err());
        let in_range = format!("01/01/{}", today.year() - 10);
        assert!(normalize_and_validate(&field, &in_range).is_ok());
    }

    #[test]
    fn phone_auto_clean() {
        let mut field = make_field(FieldType::Phone);
        field.auto_clean = true;
        assert_eq!(
            normalize_and_validate(&field, "0812-3456 (789)").unwrap(),
            "08123456789"
        );
    }

    #[test]
    fn email_normalized_and_checked() {
        let field = make_field(FieldType::Email);
        assert_eq!(
            normalize_and_validate(&field, "Budi@Example.COM").unwrap(),
            "budi@example.com"
        );
        assert!(normalize_and_validate(&field, "not-an-email").is_err());
    }

    #[test]
    fn select_alias_canonicalizes() {
        let mut field = make_field(FieldType::Select);
        field.options = vec![
            FieldOption {
                value: "Laki-laki".to_string(),
                label: None,
                aliases: vec!["pria".to_string(), "cowok".to_string(), "l".to_string()],
            },
            FieldOption {
                value: "Perempuan".to_string(),
                label: None,
                aliases: vec!["wanita".to_string(), "p".to_string()],
            },
        ];
        assert_eq!(normalize_and_validate(&field, "pria").unwrap(), "Laki-laki");
        assert_eq!(normalize_and_validate(&field, "PEREMPUAN").unwrap(), "Perempuan");
        assert!(normalize_and_validate(&field, "lainnya").is_err());
    }

    #[test]
    fn length_bounds() {
        let mut field = make_field(FieldType::Text);
        field.validation.min_length = Some(3);
        field.validation.max_length = Some(5);
        assert!(normalize_and_validate(&field, "ab").is_err());
        assert!(normalize_and_validate(&field, "abcdef").is_err());
        assert_eq!(normalize_and_validate(&field, "abcd").unwrap(), "abcd");
    }

    #[test]
    fn pattern_uses_configured_message() {
        let mut field = make_field(FieldType::Text);
        field.validation.pattern = Some(Regex::new(r"^\d{16}$").unwrap());
        field.validation.error_message = Some("NIK harus 16 digit".to_string());
        let err = normalize_and_validate(&field, "12345").unwrap_err();
        assert_eq!(err, "NIK harus 16 digit");
    }
}
