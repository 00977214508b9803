//! Validated form snapshot and its read-only queries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::ConfigError;
use crate::form::model::{
    CommandDescriptor, CommandKind, ConfirmationRules, FieldDescriptor, MessageCatalog,
    RegistrationRules, StepDescriptor, StepKind,
};

/// An immutable, fully cross-checked form definition.
///
/// Constructed only by the loader, which guarantees at least one step and
/// that every id reference resolves.
#[derive(Debug)]
pub struct FormDefinition {
    steps: Vec<StepDescriptor>,
    fields: Vec<FieldDescriptor>,
    field_index: HashMap<String, usize>,
    commands: Vec<CommandDescriptor>,
    messages: MessageCatalog,
    confirmation: ConfirmationRules,
    registration: RegistrationRules,
}

impl FormDefinition {
    pub(crate) fn new(
        steps: Vec<StepDescriptor>,
        fields: Vec<FieldDescriptor>,
        commands: Vec<CommandDescriptor>,
        messages: MessageCatalog,
        confirmation: ConfirmationRules,
        registration: RegistrationRules,
    ) -> Self {
        let field_index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        Self {
            steps,
            fields,
            field_index,
            commands,
            messages,
            confirmation,
            registration,
        }
    }

    // ── Steps ───────────────────────────────────────────────────────

    /// All steps in order.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The first step. The loader guarantees the form is non-empty.
    pub fn first_step(&self) -> &StepDescriptor {
        &self.steps[0]
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn next_step(&self, step_id: &str) -> Option<&StepDescriptor> {
        let idx = self.step_index(step_id)?;
        self.steps.get(idx + 1)
    }

    pub fn previous_step(&self, step_id: &str) -> Option<&StepDescriptor> {
        let idx = self.step_index(step_id)?;
        idx.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    /// The next step after `step_id` whose skip condition does not hold
    /// against the collected data.
    pub fn next_unskipped_step(
        &self,
        step_id: &str,
        values: &HashMap<String, String>,
    ) -> Option<&StepDescriptor> {
        let mut cursor = step_id;
        loop {
            let next = self.next_step(cursor)?;
            if !self.should_skip(&next.id, values) {
                return Some(next);
            }
            cursor = &next.id;
        }
    }

    /// Whether a step's skip condition holds for the collected data.
    pub fn should_skip(&self, step_id: &str, values: &HashMap<String, String>) -> bool {
        let Some(step) = self.step(step_id) else {
            return false;
        };
        step.skip_conditions.iter().any(|cond| {
            values
                .get(&cond.field)
                .is_some_and(|v| cond.values.iter().any(|allowed| allowed == v))
        })
    }

    pub fn documents_step(&self) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.kind == StepKind::Documents)
    }

    pub fn review_step(&self) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.kind == StepKind::Review)
    }

    // ── Fields ──────────────────────────────────────────────────────

    pub fn field(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.field_index.get(field_id).map(|&i| &self.fields[i])
    }

    pub fn all_fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Fields belonging to a step, in their declared order.
    pub fn fields_for_step(&self, step_id: &str) -> Vec<&FieldDescriptor> {
        let mut fields: Vec<&FieldDescriptor> =
            self.fields.iter().filter(|f| f.step == step_id).collect();
        fields.sort_by_key(|f| f.order);
        fields
    }

    pub fn all_mandatory_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|f| f.mandatory).collect()
    }

    /// Document-bearing fields across the form, ordered by their index.
    pub fn document_fields(&self) -> Vec<&FieldDescriptor> {
        let mut fields: Vec<&FieldDescriptor> = self
            .fields
            .iter()
            .filter(|f| f.field_type.is_file())
            .collect();
        fields.sort_by_key(|f| f.order);
        fields
    }

    /// Mandatory fields of a step with no accepted value yet.
    pub fn missing_mandatory(
        &self,
        step_id: &str,
        values: &HashMap<String, String>,
    ) -> Vec<&FieldDescriptor> {
        self.fields_for_step(step_id)
            .into_iter()
            .filter(|f| f.mandatory && !has_value(values, &f.id))
            .collect()
    }

    pub fn can_advance(&self, step_id: &str, values: &HashMap<String, String>) -> bool {
        self.missing_mandatory(step_id, values).is_empty()
    }

    /// Completion percentage: share of all mandatory fields holding a value.
    pub fn completion(&self, values: &HashMap<String, String>) -> f32 {
        let mandatory = self.all_mandatory_fields();
        if mandatory.is_empty() {
            return 100.0;
        }
        let filled = mandatory.iter().filter(|f| has_value(values, &f.id)).count();
        (filled as f32 / mandatory.len() as f32) * 100.0
    }

    /// The confirm-request gate. Returns the reason on failure.
    pub fn can_confirm(&self, values: &HashMap<String, String>) -> Result<(), String> {
        let completion = self.completion(values);
        if completion < self.confirmation.min_completion {
            return Err(format!(
                "Data baru {completion:.0}% lengkap. Minimal {:.0}%.",
                self.confirmation.min_completion
            ));
        }
        if self.confirmation.require_all_mandatory {
            let missing: Vec<&str> = self
                .all_mandatory_fields()
                .into_iter()
                .filter(|f| !has_value(values, &f.id))
                .map(|f| f.label.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(format!("Field wajib belum diisi: {}", missing.join(", ")));
            }
        }
        Ok(())
    }

    // ── Commands & messages ─────────────────────────────────────────

    /// Detect a command in a message. Case-insensitive substring or pattern
    /// match, first match wins in declaration order.
    pub fn detect_command(&self, message: &str) -> Option<CommandKind> {
        let lower = message.to_lowercase();
        let lower = lower.trim();
        for command in &self.commands {
            if let Some(ref pattern) = command.pattern {
                if pattern.is_match(lower) {
                    return Some(command.kind);
                }
            }
            if command.keywords.iter().any(|kw| lower.contains(kw.as_str())) {
                return Some(command.kind);
            }
        }
        None
    }

    pub fn messages(&self) -> &MessageCatalog {
        &self.messages
    }

    pub fn confirmation(&self) -> &ConfirmationRules {
        &self.confirmation
    }

    pub fn registration(&self) -> &RegistrationRules {
        &self.registration
    }
}

fn has_value(values: &HashMap<String, String>, field_id: &str) -> bool {
    values.get(field_id).is_some_and(|v| !v.is_empty())
}

/// Holds the active form snapshot and swaps it atomically on reload.
///
/// In-flight turns keep the `Arc` they took at dispatch time, so a reload
/// never disturbs them.
pub struct FormRegistry {
    current: RwLock<Arc<FormDefinition>>,
}

impl FormRegistry {
    pub fn new(definition: FormDefinition) -> Self {
        Self {
            current: RwLock::new(Arc::new(definition)),
        }
    }

    /// The active snapshot.
    pub fn snapshot(&self) -> Arc<FormDefinition> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new snapshot.
    pub fn swap(&self, definition: FormDefinition) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(definition);
        tracing::info!("Form definition reloaded");
    }

    /// Reload from a YAML file. On failure the active snapshot is kept.
    pub fn reload_from_path(&self, path: &Path) -> Result<(), ConfigError> {
        let definition = crate::form::loader::load_form(path)?;
        self.swap(definition);
        Ok(())
    }
}
