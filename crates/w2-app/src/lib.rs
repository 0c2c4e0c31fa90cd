//! Run orchestration for the W2 engine.
//!
//! Documents are validated, staged into an isolated working directory,
//! executed through an [`ExecutionBackend`] and captured into a result bundle.

pub mod backend;
pub mod cancel;
pub mod config;
pub mod document_service;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod staging;
pub mod state;

pub use backend::{Execution, ExecutionBackend, ExecutionOutput, ExitInfo, ProcessBackend};
pub use cancel::CancelHandle;
pub use config::OrchestratorConfig;
pub use document_service::{
    SectionSummary, check, list_sections, load_control_file, load_control_file_with,
    load_input_set, load_source, save_control_file,
};
pub use error::{AppError, AppResult};
pub use orchestrator::{DriftReport, Orchestrator, RunRequest, RunResult, generate_run_id};
pub use progress::{RunProgressEvent, RunStage};
pub use state::{RunContext, can_transition};
