//! Error types for Enroll Assist.

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Form-definition and runtime configuration errors.
///
/// These are fatal at load time — a malformed form definition must never
/// serve a live turn.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to read form definition {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse form definition: {0}")]
    Parse(String),

    #[error("Form has no steps")]
    NoSteps,

    #[error("Field {field} references unknown step {step}")]
    UnknownStep { field: String, step: String },

    #[error("Skip condition on step {step} references unknown field {field}")]
    UnknownSkipField { step: String, field: String },

    #[error("Duplicate step id {0}")]
    DuplicateStep(String),

    #[error("Duplicate command {0}")]
    DuplicateCommand(String),

    #[error("Invalid regex for {context}: {message}")]
    InvalidPattern { context: String, message: String },

    #[error("Registration classification field {0} is unknown or not mandatory")]
    BadClassificationField(String),

    #[error("Form declares file fields but no {0} step")]
    MissingStepKind(&'static str),

    #[error("Form declares more than one {0} step")]
    DuplicateStepKind(&'static str),
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors (also used by the extraction oracle seam).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Extraction is disabled (no provider configured)")]
    Disabled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
