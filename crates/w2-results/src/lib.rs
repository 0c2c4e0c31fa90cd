//! w2-results: content hashing, artifact capture and result bundles.

pub mod capture;
pub mod hash;
pub mod store;
pub mod types;

pub use capture::{CaptureReport, capture_artifacts, pattern_matches};
pub use hash::ContentHash;
pub use store::BundleStore;
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Bundle not found: {run_id}")]
    BundleNotFound { run_id: String },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}
