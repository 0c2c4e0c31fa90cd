//! w2-config: typed, byte-faithful model of the W2 control file.

pub mod codec;
pub mod diff;
pub mod document;
pub mod inputs;
pub mod report;
pub mod validate;
pub mod value;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use codec::{ParseError, Parsed, parse, parse_with, serialize};
pub use diff::{DocumentDiff, FieldChange, diff};
pub use document::{
    Document, EditError, Entry, Eol, FieldValue, HeaderLine, OpaqueKind, OpaqueLine, Row,
    SectionInstance,
};
pub use inputs::{
    Bathymetry, InputError, InputFileNames, InputSet, Layer, Profile, ProfileBlock,
};
pub use report::{FieldRef, IssueKind, Severity, ValidationIssue, ValidationReport};
pub use validate::validate;
pub use value::Value;

use w2_schema::{Schema, SchemaError};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Edit error: {0}")]
    Edit(#[from] EditError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("Invalid input file {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: InputError,
    },

    #[error("{path} already exists")]
    Exists { path: PathBuf },
}

/// Read and parse a control file.
pub fn load_document(path: &Path, schema: Arc<Schema>) -> ConfigResult<Parsed> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = String::from_utf8(bytes).map_err(|_| ConfigError::NotUtf8 {
        path: path.to_path_buf(),
    })?;
    let parsed = parse(&raw, schema)?;
    tracing::debug!(path = %path.display(), version = parsed.document.version(), "loaded control file");
    Ok(parsed)
}

/// Serialize `document` and write it to `path`.
pub fn save_document(path: &Path, document: &Document) -> ConfigResult<()> {
    std::fs::write(path, serialize(document)).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "saved control file");
    Ok(())
}
