//! Form definition — immutable, versioned steps/fields/commands/messages.
//!
//! The definition is loaded from YAML into strongly-typed structures, with
//! every cross-reference checked at load time. Reconfiguration is an atomic
//! snapshot swap through [`FormRegistry`], never an in-place mutation.

mod definition;
mod loader;
mod model;
mod validate;

pub use definition::{FormDefinition, FormRegistry};
pub use loader::{load_form, parse_form};
pub use model::{
    CommandDescriptor, CommandKind, ConfirmationRules, FieldDescriptor, FieldOption, FieldType,
    LevelCode, MessageCatalog, RegistrationRules, SkipCondition, StepDescriptor, StepKind,
    ValidationRules,
};
pub use validate::normalize_and_validate;
