//! Extraction orchestration: primary oracle, deterministic fallback,
//! validate-and-apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::extract::{fallback, ExtractionOutcome, FieldExtractor};
use crate::form::{normalize_and_validate, FieldDescriptor, FormDefinition};
use crate::session::{FieldAction, HistoryEntry, SessionState};

/// A value accepted by validation this turn.
#[derive(Debug, Clone)]
pub struct AcceptedValue {
    pub field_id: String,
    pub label: String,
    pub value: String,
    pub action: FieldAction,
}

/// Outcome of applying an extraction result to the session.
#[derive(Debug, Clone, Default)]
pub struct AppliedChanges {
    pub accepted: Vec<AcceptedValue>,
    /// Field id → rejection reason. Rejections never overwrite an accepted
    /// value — they only surface as validation errors.
    pub rejected: HashMap<String, String>,
}

impl AppliedChanges {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

/// Runs the two-stage extraction and applies validated values.
pub struct ExtractionPipeline {
    extractor: Arc<dyn FieldExtractor>,
    timeout: Duration,
}

impl ExtractionPipeline {
    pub fn new(extractor: Arc<dyn FieldExtractor>, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    /// Produce a raw field map for the message.
    ///
    /// A non-empty primary result, even partial, is authoritative — the
    /// fallback runs only on an empty result, a failed call, or a timeout.
    pub async fn run(
        &self,
        message: &str,
        context: &[&HistoryEntry],
        fields: &[&FieldDescriptor],
    ) -> HashMap<String, String> {
        let primary =
            tokio::time::timeout(self.timeout, self.extractor.extract(message, context, fields))
                .await;
        match primary {
            Ok(Ok(ExtractionOutcome::Found(map))) => map,
            Ok(Ok(ExtractionOutcome::Empty)) => {
                debug!("Primary extraction empty, trying deterministic fallback");
                fallback::extract_simple(message, fields)
            }
            Ok(Err(e)) => {
                warn!("Extraction call failed, using deterministic fallback: {e}");
                fallback::extract_simple(message, fields)
            }
            Err(_) => {
                warn!(
                    "Extraction call exceeded {:?}, using deterministic fallback",
                    self.timeout
                );
                fallback::extract_simple(message, fields)
            }
        }
    }

    /// Validate each raw value and write the accepted ones into the session.
    ///
    /// Unknown field ids are a no-op. File fields never take values through
    /// extraction — documents go through the upload sub-flow.
    pub fn apply(
        form: &FormDefinition,
        session: &mut SessionState,
        extracted: &HashMap<String, String>,
    ) -> AppliedChanges {
        let mut changes = AppliedChanges::default();

        // Walk fields in form order so the reported changes are stable.
        for field in form.all_fields() {
            let Some(raw) = extracted.get(&field.id) else {
                continue;
            };
            if field.field_type.is_file() {
                continue;
            }

            match normalize_and_validate(field, raw) {
                Ok(cleaned) => {
                    let action = session.set_value(&field.id, cleaned.clone(), &field.label);
                    session.clear_validation_error(&field.id);
                    changes.accepted.push(AcceptedValue {
                        field_id: field.id.clone(),
                        label: field.label.clone(),
                        value: cleaned,
                        action,
                    });
                }
                Err(reason) => {
                    session.set_validation_error(&field.id, reason.clone());
                    changes.rejected.insert(field.id.clone(), reason);
                }
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::form::parse_form;
    use async_trait::async_trait;

    fn test_form() -> FormDefinition {
        parse_form(
            r#"
form:
  registration:
    prefix: AZHAR
    classification_field: jenjang
steps:
  - id: siswa
    name: Data Siswa
    order: 1
fields:
  nama:
    label: Nama Lengkap
    step: siswa
    type: text
    is_mandatory: true
    validation:
      min_length: 3
  jenjang:
    label: Jenjang
    step: siswa
    type: select
    is_mandatory: true
    options:
      - value: SD
        aliases: [sekolah dasar]
      - value: SMP
"#,
        )
        .unwrap()
    }

    struct ScriptedExtractor(Result<ExtractionOutcome, ()>);

    #[async_trait]
    impl FieldExtractor for ScriptedExtractor {
        async fn extract(
            &self,
            _message: &str,
            _context: &[&HistoryEntry],
            _fields: &[&FieldDescriptor],
        ) -> Result<ExtractionOutcome, LlmError> {
            match &self.0 {
                Ok(outcome) => Ok(outcome.clone()),
                Err(()) => Err(LlmError::Disabled),
            }
        }
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn primary_result_is_authoritative() {
        let pipeline = ExtractionPipeline::new(
            Arc::new(ScriptedExtractor(Ok(ExtractionOutcome::Found(map(&[("nama", "Ahmad")]))))),
            Duration::from_secs(5),
        );
        let form = test_form();
        let fields = form.fields_for_step("siswa");
        // The message also contains "SMP" — but the fallback must not run.
        let result = pipeline.run("nama Ahmad, mau ke SMP", &[], &fields).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("nama").map(String::as_str), Some("Ahmad"));
    }

    #[tokio::test]
    async fn fallback_runs_on_empty() {
        let pipeline = ExtractionPipeline::new(
            Arc::new(ScriptedExtractor(Ok(ExtractionOutcome::Empty))),
            Duration::from_secs(5),
        );
        let form = test_form();
        let fields = form.fields_for_step("siswa");
        let result = pipeline.run("mau daftar SMP", &[], &fields).await;
        assert_eq!(result.get("jenjang").map(String::as_str), Some("SMP"));
    }

    #[tokio::test]
    async fn fallback_runs_on_failure() {
        let pipeline = ExtractionPipeline::new(
            Arc::new(ScriptedExtractor(Err(()))),
            Duration::from_secs(5),
        );
        let form = test_form();
        let fields = form.fields_for_step("siswa");
        let result = pipeline.run("sekolah dasar saja", &[], &fields).await;
        assert_eq!(result.get("jenjang").map(String::as_str), Some("SD"));
    }

    #[test]
    fn apply_validates_and_isolates_rejections() {
        let form = test_form();
        let mut session = SessionState::new("s1", "siswa");
        session.set_value("nama", "Budi Santoso", "Nama Lengkap");

        // "ab" fails min_length; the previously accepted value must survive.
        let changes =
            ExtractionPipeline::apply(&form, &mut session, &map(&[("nama", "ab"), ("jenjang", "SD")]));

        assert_eq!(changes.accepted.len(), 1);
        assert_eq!(changes.accepted[0].field_id, "jenjang");
        assert_eq!(changes.rejected.len(), 1);
        assert!(changes.rejected.contains_key("nama"));
        assert_eq!(session.value("nama"), Some("Budi Santoso"));
        assert_eq!(session.value("jenjang"), Some("SD"));
        assert!(session.validation_errors.contains_key("nama"));
    }

    #[test]
    fn apply_ignores_unknown_fields() {
        let form = test_form();
        let mut session = SessionState::new("s1", "siswa");
        let changes = ExtractionPipeline::apply(&form, &mut session, &map(&[("hantu", "boo")]));
        assert!(changes.is_empty());
        assert!(session.values.is_empty());
    }
}
