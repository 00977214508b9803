//! Persistence layer: the `Database` trait and its libSQL backend.

mod libsql_backend;
mod migrations;
mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, DocumentRecord, DraftRecord, LogEntry, RegistrationRecord, RegistrationStatus,
};
