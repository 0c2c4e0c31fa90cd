//! Per-run state machine.
//!
//! `Pending -> Staged -> Running -> {Succeeded | Failed | Cancelled}`. A run
//! that fails before it starts goes straight to `Failed`, and any
//! non-terminal state may be cancelled.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use w2_results::{ContentHash, RunId, RunStatus};

use crate::error::{AppError, AppResult};

pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    match (from, to) {
        (Pending, Staged) | (Staged, Running) => true,
        (Running, Succeeded) => true,
        (Pending | Staged | Running, Failed) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub run_id: RunId,
    pub working_dir: PathBuf,
    /// SHA-256 of the control file bytes written at staging.
    pub snapshot_hash: Option<ContentHash>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
}

impl RunContext {
    pub fn new(run_id: RunId, working_dir: PathBuf) -> Self {
        Self {
            run_id,
            working_dir,
            snapshot_hash: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: RunStatus::Pending,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn transition(&mut self, to: RunStatus) -> AppResult<()> {
        if !can_transition(self.status, to) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        tracing::debug!(run_id = %self.run_id, from = ?self.status, to = ?to, "run state");
        match to {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            status if status.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}
