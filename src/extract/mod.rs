//! Field extraction — message → candidate (field, value) pairs.
//!
//! The primary path is an external semantic oracle behind [`FieldExtractor`].
//! Its result is three-way: found, empty, or failed-with-reason. A
//! deterministic fallback runs only when the primary path yields nothing;
//! a non-empty primary result is authoritative and final for the turn.

pub mod fallback;
pub mod llm;
mod pipeline;

pub use llm::LlmFieldExtractor;
pub use pipeline::{AcceptedValue, AppliedChanges, ExtractionPipeline};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::form::FieldDescriptor;
use crate::session::HistoryEntry;

/// Result of a successful extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// At least one candidate (field id → raw value) pair.
    Found(HashMap<String, String>),
    /// The call succeeded but nothing was extracted.
    Empty,
}

impl ExtractionOutcome {
    pub fn from_map(map: HashMap<String, String>) -> Self {
        if map.is_empty() {
            Self::Empty
        } else {
            Self::Found(map)
        }
    }
}

/// The extraction oracle seam.
///
/// Implementations receive the raw message, a short rolling context window,
/// and the ordered candidate field set, and return raw (unvalidated) values.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(
        &self,
        message: &str,
        context: &[&HistoryEntry],
        fields: &[&FieldDescriptor],
    ) -> Result<ExtractionOutcome, LlmError>;
}

/// Extractor used when no LLM provider is configured. Always fails, which
/// routes every turn through the deterministic fallback.
pub struct DisabledExtractor;

#[async_trait]
impl FieldExtractor for DisabledExtractor {
    async fn extract(
        &self,
        _message: &str,
        _context: &[&HistoryEntry],
        _fields: &[&FieldDescriptor],
    ) -> Result<ExtractionOutcome, LlmError> {
        Err(LlmError::Disabled)
    }
}
