//! Typed form model.
//!
//! Everything here is immutable after load. Runtime code dispatches on these
//! enums and structs — never on raw string-keyed maps.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Field value type, driving validation and deterministic extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Date,
    Select,
    Phone,
    Email,
    Number,
    File,
}

impl FieldType {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Date => "date",
            Self::Select => "select",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Number => "number",
            Self::File => "file",
        };
        write!(f, "{s}")
    }
}

/// One choice of a select field. Aliases canonicalize to `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Per-field validation rules. The pattern is compiled at load time.
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    pub pattern: Option<Regex>,
    pub error_message: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
}

/// A form field. Immutable.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub id: String,
    pub label: String,
    /// Owning step id.
    pub step: String,
    pub field_type: FieldType,
    pub mandatory: bool,
    pub validation: ValidationRules,
    pub options: Vec<FieldOption>,
    pub examples: Vec<String>,
    pub tips: Option<String>,
    /// Keywords the extraction layers match against user phrasing.
    pub extract_keywords: Vec<String>,
    /// Strip formatting noise before validation (phone fields).
    pub auto_clean: bool,
    /// Accepted file extensions, lowercase with leading dot (file fields).
    pub allowed_extensions: Vec<String>,
    /// Ordering within the step (and the document cursor for file fields).
    pub order: u32,
    pub default: Option<String>,
}

impl FieldDescriptor {
    /// Rendered examples/tips block for "contoh" requests.
    pub fn example_text(&self) -> String {
        if self.examples.is_empty() {
            return String::new();
        }
        let mut text = format!("📝 **{}**\n\nContoh:\n", self.label);
        for ex in self.examples.iter().take(3) {
            text.push_str(&format!("  • {ex}\n"));
        }
        if let Some(ref tips) = self.tips {
            text.push_str(&format!("\n💡 Tips: {tips}"));
        }
        text
    }
}

/// What role a step plays in the interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Ordinary data-collection step.
    Data,
    /// The document-upload step (at most one).
    Documents,
    /// The final review step (at most one).
    Review,
}

impl Default for StepKind {
    fn default() -> Self {
        Self::Data
    }
}

/// A skip condition: the step is skipped when the collected value of
/// `field` equals any of `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipCondition {
    pub field: String,
    pub values: Vec<String>,
}

/// An ordered section of the form. Immutable.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub order: u32,
    pub mandatory: bool,
    pub can_skip: bool,
    pub skip_conditions: Vec<SkipCondition>,
    pub icon: Option<String>,
    pub kind: StepKind,
}

/// The commands the dialogue understands. Exhaustive — an unrecognized
/// command name in the form definition is a load-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Advance,
    Back,
    Summary,
    Confirm,
    ConfirmYes,
    ConfirmNo,
    Reset,
    Help,
    CheckStatus,
}

impl CommandKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "advance" => Some(Self::Advance),
            "back" => Some(Self::Back),
            "summary" => Some(Self::Summary),
            "confirm" => Some(Self::Confirm),
            "confirm_yes" => Some(Self::ConfirmYes),
            "confirm_no" => Some(Self::ConfirmNo),
            "reset" => Some(Self::Reset),
            "help" => Some(Self::Help),
            "check_status" => Some(Self::CheckStatus),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Advance => "advance",
            Self::Back => "back",
            Self::Summary => "summary",
            Self::Confirm => "confirm",
            Self::ConfirmYes => "confirm_yes",
            Self::ConfirmNo => "confirm_no",
            Self::Reset => "reset",
            Self::Help => "help",
            Self::CheckStatus => "check_status",
        };
        write!(f, "{s}")
    }
}

/// A command with its trigger keywords and optional pattern.
///
/// Detection is case-insensitive substring (or pattern) match,
/// first-match-wins in declaration order.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub kind: CommandKind,
    pub keywords: Vec<String>,
    pub pattern: Option<Regex>,
}

/// Confirmation-protocol rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRules {
    /// Minimum completion percentage before a confirm request is accepted.
    pub min_completion: f32,
    /// Require every mandatory field of the whole form before confirming.
    pub require_all_mandatory: bool,
    /// Phrases that finalize from AWAITING_CONFIRM.
    pub accept_phrases: Vec<String>,
    /// Phrases that complete a reset from AWAITING_RESET.
    pub reset_phrases: Vec<String>,
    /// Phrases that start a fresh registration after completion.
    pub new_registration_phrases: Vec<String>,
}

impl Default for ConfirmationRules {
    fn default() -> Self {
        Self {
            min_completion: 60.0,
            require_all_mandatory: true,
            accept_phrases: vec![
                "ya saya yakin".to_string(),
                "ya yakin".to_string(),
                "yakin".to_string(),
                "ya".to_string(),
                "iya".to_string(),
            ],
            reset_phrases: vec![
                "ya hapus".to_string(),
                "ya reset".to_string(),
                "hapus".to_string(),
            ],
            new_registration_phrases: vec!["daftar baru".to_string(), "daftar lagi".to_string()],
        }
    }
}

/// Level-code lookup entry: `needle` matched as a case-insensitive
/// substring of the classification field's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelCode {
    #[serde(rename = "match")]
    pub needle: String,
    pub code: String,
}

/// Registration-number rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRules {
    /// Fixed number prefix, e.g. "AZHAR".
    pub prefix: String,
    /// Mandatory field whose value selects the level code.
    pub classification_field: String,
    /// Ordered lookup; first matching needle wins.
    pub level_codes: Vec<LevelCode>,
    /// Code used when nothing matches.
    pub default_code: String,
}

/// Message templates, looked up by dotted key with an empty-string fallback.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    root: serde_json::Value,
}

impl MessageCatalog {
    pub fn new(root: serde_json::Value) -> Self {
        Self { root }
    }

    /// Look up a template by dotted key. Missing keys yield an empty string.
    pub fn get(&self, key: &str) -> String {
        let mut value = &self.root;
        for part in key.split('.') {
            match value.get(part) {
                Some(v) => value = v,
                None => return String::new(),
            }
        }
        match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn welcome(&self) -> String {
        self.get("welcome")
    }

    pub fn step_transition(&self, from: &str, to: &str) -> String {
        self.get(&format!("step_transitions.{from}_to_{to}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_parse_roundtrip() {
        let kinds = [
            CommandKind::Advance,
            CommandKind::Back,
            CommandKind::Summary,
            CommandKind::Confirm,
            CommandKind::ConfirmYes,
            CommandKind::ConfirmNo,
            CommandKind::Reset,
            CommandKind::Help,
            CommandKind::CheckStatus,
        ];
        for kind in kinds {
            assert_eq!(CommandKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(CommandKind::parse("unknown"), None);
    }

    #[test]
    fn message_catalog_dotted_lookup() {
        let catalog = MessageCatalog::new(serde_json::json!({
            "welcome": "Selamat datang!",
            "step_transitions": { "a_to_b": "Lanjut ke B" },
        }));
        assert_eq!(catalog.welcome(), "Selamat datang!");
        assert_eq!(catalog.step_transition("a", "b"), "Lanjut ke B");
        assert_eq!(catalog.get("missing.key"), "");
        assert_eq!(catalog.get("step_transitions.b_to_a"), "");
    }

    #[test]
    fn confirmation_defaults() {
        let rules = ConfirmationRules::default();
        assert_eq!(rules.min_completion, 60.0);
        assert!(rules.require_all_mandatory);
        assert!(rules.accept_phrases.iter().any(|p| p == "ya saya yakin"));
        assert!(rules.reset_phrases.iter().any(|p| p == "ya hapus"));
    }
}
