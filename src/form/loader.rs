//! YAML form-definition loading.
//!
//! Parses the raw document, then cross-checks every reference before a
//! `FormDefinition` is handed out. A bad definition never serves a turn.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::form::definition::FormDefinition;
use crate::form::model::{
    CommandDescriptor, CommandKind, ConfirmationRules, FieldDescriptor, FieldOption, FieldType,
    LevelCode, MessageCatalog, RegistrationRules, SkipCondition, StepDescriptor, StepKind,
    ValidationRules,
};

#[derive(Debug, Deserialize)]
struct RawForm {
    form: RawFormMeta,
    steps: Vec<RawStep>,
    fields: BTreeMap<String, RawField>,
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default)]
    messages: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawFormMeta {
    #[allow(dead_code)]
    #[serde(default)]
    name: Option<String>,
    registration: RawRegistration,
    #[serde(default)]
    confirmation: Option<RawConfirmation>,
}

#[derive(Debug, Deserialize)]
struct RawRegistration {
    prefix: String,
    classification_field: String,
    #[serde(default)]
    level_codes: Vec<LevelCode>,
    #[serde(default = "default_level_code")]
    default_code: String,
}

fn default_level_code() -> String {
    "XX".to_string()
}

#[derive(Debug, Deserialize)]
struct RawConfirmation {
    #[serde(default = "default_min_completion")]
    min_completion_percentage: f32,
    #[serde(default = "default_true")]
    require_all_mandatory_fields: bool,
    #[serde(default)]
    accept_phrases: Option<Vec<String>>,
    #[serde(default)]
    reset_phrases: Option<Vec<String>>,
    #[serde(default)]
    new_registration_phrases: Option<Vec<String>>,
}

fn default_min_completion() -> f32 {
    60.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawStep {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    order: u32,
    #[serde(default)]
    kind: StepKind,
    #[serde(default = "default_true")]
    is_mandatory: bool,
    #[serde(default)]
    can_skip: bool,
    #[serde(default)]
    skip_conditions: Vec<SkipCondition>,
    #[serde(default)]
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(default)]
    label: Option<String>,
    step: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    is_mandatory: bool,
    #[serde(default)]
    validation: RawValidation,
    #[serde(default)]
    options: Vec<FieldOption>,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    tips: Option<String>,
    #[serde(default)]
    extract_keywords: Vec<String>,
    #[serde(default)]
    auto_clean: bool,
    #[serde(default)]
    allowed_extensions: Vec<String>,
    #[serde(default)]
    order: u32,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawValidation {
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min_age: Option<u32>,
    #[serde(default)]
    max_age: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    name: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    pattern: Option<String>,
}

const DEFAULT_FILE_EXTENSIONS: &[&str] = &[".pdf", ".jpg", ".jpeg", ".png"];

/// Load and validate a form definition from a YAML file.
pub fn load_form(path: &Path) -> Result<FormDefinition, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_form(&text)
}

/// Parse and validate a form definition from YAML text.
pub fn parse_form(yaml: &str) -> Result<FormDefinition, ConfigError> {
    let raw: RawForm = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if raw.steps.is_empty() {
        return Err(ConfigError::NoSteps);
    }

    // Steps: unique ids, sorted by order, at most one documents/review step.
    let mut steps: Vec<StepDescriptor> = Vec::with_capacity(raw.steps.len());
    let mut seen_steps = HashSet::new();
    for raw_step in raw.steps {
        if !seen_steps.insert(raw_step.id.clone()) {
            return Err(ConfigError::DuplicateStep(raw_step.id));
        }
        steps.push(StepDescriptor {
            id: raw_step.id,
            name: raw_step.name,
            description: raw_step.description,
            order: raw_step.order,
            mandatory: raw_step.is_mandatory,
            can_skip: raw_step.can_skip,
            skip_conditions: raw_step.skip_conditions,
            icon: raw_step.icon,
            kind: raw_step.kind,
        });
    }
    steps.sort_by_key(|s| s.order);

    for kind in [StepKind::Documents, StepKind::Review] {
        let label = match kind {
            StepKind::Documents => "documents",
            StepKind::Review => "review",
            StepKind::Data => unreachable!(),
        };
        if steps.iter().filter(|s| s.kind == kind).count() > 1 {
            return Err(ConfigError::DuplicateStepKind(label));
        }
    }

    let step_ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();

    // Fields: owning step must exist, validation patterns must compile.
    let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(raw.fields.len());
    for (field_id, raw_field) in raw.fields {
        if !step_ids.contains(raw_field.step.as_str()) {
            return Err(ConfigError::UnknownStep {
                field: field_id,
                step: raw_field.step,
            });
        }

        let pattern = raw_field
            .validation
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidPattern {
                context: format!("field {field_id}"),
                message: e.to_string(),
            })?;

        let allowed_extensions = if raw_field.field_type.is_file() {
            let declared = if raw_field.allowed_extensions.is_empty() {
                DEFAULT_FILE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
            } else {
                raw_field.allowed_extensions
            };
            declared
                .into_iter()
                .map(|ext| {
                    let ext = ext.to_lowercase();
                    if ext.starts_with('.') { ext } else { format!(".{ext}") }
                })
                .collect()
        } else {
            Vec::new()
        };

        fields.push(FieldDescriptor {
            label: raw_field.label.unwrap_or_else(|| field_id.clone()),
            id: field_id,
            step: raw_field.step,
            field_type: raw_field.field_type,
            mandatory: raw_field.is_mandatory,
            validation: ValidationRules {
                pattern,
                error_message: raw_field.validation.error_message,
                min_length: raw_field.validation.min_length,
                max_length: raw_field.validation.max_length,
                min_age: raw_field.validation.min_age,
                max_age: raw_field.validation.max_age,
            },
            options: raw_field.options,
            examples: raw_field.examples,
            tips: raw_field.tips,
            extract_keywords: raw_field.extract_keywords,
            auto_clean: raw_field.auto_clean,
            allowed_extensions,
            order: raw_field.order,
            default: raw_field.default,
        });
    }

    let field_ids: HashSet<&str> = fields.iter().map(|f| f.id.as_str()).collect();

    // Skip conditions must reference known fields.
    for step in &steps {
        for cond in &step.skip_conditions {
            if !field_ids.contains(cond.field.as_str()) {
                return Err(ConfigError::UnknownSkipField {
                    step: step.id.clone(),
                    field: cond.field.clone(),
                });
            }
        }
    }

    // File fields require a documents step and a review step to land on.
    if fields.iter().any(|f| f.field_type.is_file()) {
        if !steps.iter().any(|s| s.kind == StepKind::Documents) {
            return Err(ConfigError::MissingStepKind("documents"));
        }
        if !steps.iter().any(|s| s.kind == StepKind::Review) {
            return Err(ConfigError::MissingStepKind("review"));
        }
    }

    // Commands: known names only, one descriptor per kind, patterns compile.
    let raw_commands = if raw.commands.is_empty() {
        default_commands()
    } else {
        raw.commands
    };
    let mut commands: Vec<CommandDescriptor> = Vec::with_capacity(raw_commands.len());
    let mut seen_kinds = HashSet::new();
    for raw_command in raw_commands {
        let kind = CommandKind::parse(&raw_command.name)
            .ok_or_else(|| ConfigError::Parse(format!("unknown command {}", raw_command.name)))?;
        if !seen_kinds.insert(kind) {
            return Err(ConfigError::DuplicateCommand(raw_command.name));
        }
        let pattern = raw_command
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidPattern {
                context: format!("command {}", raw_command.name),
                message: e.to_string(),
            })?;
        commands.push(CommandDescriptor {
            kind,
            keywords: raw_command.keywords.iter().map(|k| k.to_lowercase()).collect(),
            pattern,
        });
    }

    // Registration rules: the classification field must be a known mandatory field.
    let classification_ok = fields
        .iter()
        .any(|f| f.id == raw.form.registration.classification_field && f.mandatory);
    if !classification_ok {
        return Err(ConfigError::BadClassificationField(
            raw.form.registration.classification_field,
        ));
    }
    let registration = RegistrationRules {
        prefix: raw.form.registration.prefix,
        classification_field: raw.form.registration.classification_field,
        level_codes: raw.form.registration.level_codes,
        default_code: raw.form.registration.default_code,
    };

    let confirmation = match raw.form.confirmation {
        Some(raw_conf) => {
            let defaults = ConfirmationRules::default();
            ConfirmationRules {
                min_completion: raw_conf.min_completion_percentage,
                require_all_mandatory: raw_conf.require_all_mandatory_fields,
                accept_phrases: raw_conf.accept_phrases.unwrap_or(defaults.accept_phrases),
                reset_phrases: raw_conf.reset_phrases.unwrap_or(defaults.reset_phrases),
                new_registration_phrases: raw_conf
                    .new_registration_phrases
                    .unwrap_or(defaults.new_registration_phrases),
            }
        }
        None => ConfirmationRules::default(),
    };

    let messages = MessageCatalog::new(
        serde_json::to_value(&raw.messages).map_err(|e| ConfigError::Parse(e.to_string()))?,
    );

    Ok(FormDefinition::new(
        steps,
        fields,
        commands,
        messages,
        confirmation,
        registration,
    ))
}

/// Built-in command keywords, used when the definition declares none.
fn default_commands() -> Vec<RawCommand> {
    fn cmd(name: &str, keywords: &[&str]) -> RawCommand {
        RawCommand {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            pattern: None,
        }
    }
    vec![
        cmd("check_status", &["cek status", "status pendaftaran"]),
        cmd("confirm_yes", &["ya saya yakin", "ya yakin"]),
        cmd("confirm_no", &["tidak jadi", "batal"]),
        cmd("advance", &["lanjut", "next", "selanjutnya", "skip"]),
        cmd("back", &["kembali", "sebelumnya"]),
        cmd("summary", &["summary", "ringkasan", "lihat data"]),
        cmd("confirm", &["konfirmasi", "selesai", "submit"]),
        cmd("reset", &["ulang dari awal", "mulai ulang", "reset"]),
        cmd("help", &["help", "bantuan", "tolong"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> String {
        r#"
form:
  registration:
    prefix: AZHAR
    classification_field: jenjang
    level_codes:
      - match: TK
        code: TK
      - match: SD
        code: SD
    default_code: XX
steps:
  - id: siswa
    name: Data Siswa
    order: 1
  - id: dokumen
    name: Dokumen
    order: 2
    kind: documents
  - id: review
    name: Review
    order: 3
    kind: review
fields:
  nama:
    label: Nama Lengkap
    step: siswa
    type: text
    is_mandatory: true
    order: 1
  jenjang:
    label: Jenjang
    step: siswa
    type: select
    is_mandatory: true
    order: 2
    options:
      - value: TK
        aliases: [taman kanak-kanak]
      - value: SD
  akta:
    label: Akta Kelahiran
    step: dokumen
    type: file
    is_mandatory: true
    order: 1
messages:
  welcome: "Selamat datang!"
"#
        .to_string()
    }

    #[test]
    fn minimal_form_parses() {
        let form = parse_form(&minimal_yaml()).unwrap();
        assert_eq!(form.steps().len(), 3);
        assert_eq!(form.first_step().id, "siswa");
        assert_eq!(form.documents_step().unwrap().id, "dokumen");
        assert_eq!(form.review_step().unwrap().id, "review");
        assert_eq!(form.registration().prefix, "AZHAR");
        assert_eq!(form.messages().welcome(), "Selamat datang!");
        // Default file extensions applied.
        let akta = form.field("akta").unwrap();
        assert!(akta.allowed_extensions.contains(&".pdf".to_string()));
        // Default commands installed.
        assert_eq!(form.detect_command("lanjut"), Some(CommandKind::Advance));
    }

    #[test]
    fn unknown_field_step_fails_fast() {
        let yaml = minimal_yaml().replace("step: siswa", "step: tidak_ada");
        match parse_form(&yaml) {
            Err(ConfigError::UnknownStep { step, .. }) => assert_eq!(step, "tidak_ada"),
            other => panic!("expected UnknownStep, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_step_id_fails_fast() {
        let yaml = minimal_yaml().replace("id: dokumen", "id: siswa");
        assert!(matches!(parse_form(&yaml), Err(ConfigError::DuplicateStep(_))));
    }

    #[test]
    fn unknown_skip_field_fails_fast() {
        let yaml = minimal_yaml().replace(
            "  - id: siswa\n    name: Data Siswa\n    order: 1",
            "  - id: siswa\n    name: Data Siswa\n    order: 1\n    skip_conditions:\n      - field: hantu\n        values: [x]",
        );
        assert!(matches!(
            parse_form(&yaml),
            Err(ConfigError::UnknownSkipField { .. })
        ));
    }

    #[test]
    fn unknown_command_fails_fast() {
        let yaml = format!(
            "{}commands:\n  - name: fly\n    keywords: [terbang]\n",
            minimal_yaml()
        );
        assert!(matches!(parse_form(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn non_mandatory_classification_fails_fast() {
        let yaml = minimal_yaml().replace(
            "  jenjang:\n    label: Jenjang\n    step: siswa\n    type: select\n    is_mandatory: true",
            "  jenjang:\n    label: Jenjang\n    step: siswa\n    type: select\n    is_mandatory: false",
        );
        assert!(matches!(
            parse_form(&yaml),
            Err(ConfigError::BadClassificationField(_))
        ));
    }

    #[test]
    fn file_fields_require_documents_step() {
        let yaml = minimal_yaml().replace("    kind: documents\n", "");
        assert!(matches!(
            parse_form(&yaml),
            Err(ConfigError::MissingStepKind("documents"))
        ));
    }

    #[test]
    fn bad_regex_fails_fast() {
        let yaml = minimal_yaml().replace(
            "  nama:\n    label: Nama Lengkap\n    step: siswa\n    type: text\n    is_mandatory: true\n    order: 1",
            "  nama:\n    label: Nama Lengkap\n    step: siswa\n    type: text\n    is_mandatory: true\n    order: 1\n    validation:\n      pattern: \"[unclosed\"",
        );
        assert!(matches!(
            parse_form(&yaml),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn steps_sorted_by_order() {
        let yaml = minimal_yaml()
            .replace("order: 1\n  - id: dokumen", "order: 5\n  - id: dokumen");
        let form = parse_form(&yaml).unwrap();
        // siswa moved to order 5, after dokumen (2) and review (3).
        assert_eq!(form.first_step().id, "dokumen");
        assert_eq!(form.steps().last().unwrap().id, "siswa");
    }
}
