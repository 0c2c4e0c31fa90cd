//! w2-schema: versioned layout definitions for the W2 control file.

pub mod def;
pub mod registry;
pub mod schema;

pub use def::*;
pub use registry::SchemaRegistry;
pub use schema::{ColumnSpan, FieldLocation, Schema};

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("Unknown schema version: {version}")]
    UnknownSchemaVersion { version: String },

    #[error("Malformed schema {version}: {what}")]
    Malformed { version: String, what: String },

    #[error("Schema version already registered: {version}")]
    DuplicateVersion { version: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
