//! Stage, execute and capture engine runs.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use uuid::Uuid;
use w2_config::{Document, DocumentDiff, ValidationReport, diff, parse, serialize, validate};
use w2_results::{
    ArtifactRecord, BundleManifest, BundleStore, ContentHash, DriftSummary, FailureKind,
    FailurePhase, RunFailure, RunId, RunStatus, capture_artifacts,
};

use crate::backend::{Execution, ExecutionBackend, ExecutionOutput, ExitInfo};
use crate::cancel::CancelHandle;
use crate::config::OrchestratorConfig;
use crate::error::{AppError, AppResult};
use crate::progress::{RunProgressEvent, RunStage};
use crate::staging::{self, StagingError};
use crate::state::RunContext;

/// One run of one document against one source directory.
pub struct RunRequest {
    /// Directory holding every input the engine reads, copied per run.
    pub source_dir: PathBuf,
    pub document: Document,
    /// Overrides `OrchestratorConfig::allow_invalid` when set.
    pub allow_invalid: Option<bool>,
    pub cancel: CancelHandle,
    /// Generated when absent.
    pub run_id: Option<RunId>,
}

impl RunRequest {
    pub fn new(source_dir: impl Into<PathBuf>, document: Document) -> Self {
        Self {
            source_dir: source_dir.into(),
            document,
            allow_invalid: None,
            cancel: CancelHandle::new(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn allow_invalid(mut self, allow: bool) -> Self {
        self.allow_invalid = Some(allow);
        self
    }
}

/// Control file changes made by the engine during a run.
#[derive(Debug, Clone)]
pub struct DriftReport {
    pub snapshot_hash: ContentHash,
    /// None when the engine removed the control file.
    pub post_run_hash: Option<ContentHash>,
    pub drifted: bool,
    /// Cell-level changes, when the post-run file still parses.
    pub diff: Option<DocumentDiff>,
    pub parse_error: Option<String>,
}

impl DriftReport {
    fn summary(&self) -> DriftSummary {
        let diff = self.diff.as_ref();
        DriftSummary {
            post_run_hash: self.post_run_hash.clone(),
            drifted: self.drifted,
            changed_fields: diff.map_or(0, |d| d.changes.len()),
            structural: diff.is_some_and(|d| d.structural),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub exit: Option<ExitInfo>,
    pub context: RunContext,
    pub validation: ValidationReport,
    pub artifacts: Vec<ArtifactRecord>,
    pub missing_outputs: Vec<String>,
    pub post_run_document: Option<Document>,
    pub drift: Option<DriftReport>,
    pub stdout: String,
    pub stderr: String,
    /// None when the run was refused before staging.
    pub bundle_dir: Option<PathBuf>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|exit| exit.code)
    }
}

enum Outcome {
    Exited(ExitInfo),
    Stopped(FailureKind, Option<ExitInfo>),
    Lost(io::Error),
}

fn emit_progress(
    progress_cb: &mut Option<&mut dyn FnMut(RunProgressEvent)>,
    run_id: &str,
    stage: RunStage,
    started: Instant,
    message: Option<String>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        cb(RunProgressEvent::stage(
            run_id,
            stage,
            started.elapsed().as_secs_f64(),
            message,
        ));
    }
}

/// Time-ordered, collision-free run id: `20261014T093000Z-1a2b3c4d5e6f`.
pub fn generate_run_id() -> RunId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..12])
}

fn check_run_id(run_id: &str) -> AppResult<()> {
    let bad = run_id.is_empty()
        || run_id == "."
        || run_id == ".."
        || run_id.contains(['/', '\\'])
        || run_id.chars().any(char::is_control);
    if bad {
        return Err(AppError::InvalidRequest(format!(
            "run id {run_id:?} is not a plain directory name"
        )));
    }
    Ok(())
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    backend: Arc<dyn ExecutionBackend>,
    store: BundleStore,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn ExecutionBackend>) -> AppResult<Self> {
        std::fs::create_dir_all(&config.runs_root)?;
        let store = BundleStore::new(config.bundles_root.clone())?;
        Ok(Self {
            config,
            backend,
            store,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    pub fn run(&self, request: RunRequest) -> AppResult<RunResult> {
        self.run_with_progress(request, None)
    }

    /// Run independent requests concurrently. Results keep request order.
    pub fn run_batch(&self, requests: Vec<RunRequest>) -> Vec<AppResult<RunResult>> {
        requests
            .into_par_iter()
            .map(|request| self.run(request))
            .collect()
    }

    /// Execute one run and stream progress events. Stage, execution and
    /// capture failures are reported in the returned `RunResult`.
    pub fn run_with_progress(
        &self,
        request: RunRequest,
        mut progress_cb: Option<&mut dyn FnMut(RunProgressEvent)>,
    ) -> AppResult<RunResult> {
        let started = Instant::now();
        let run_id = match request.run_id.clone() {
            Some(id) => id,
            None => generate_run_id(),
        };
        check_run_id(&run_id)?;

        let working_dir = self.config.runs_root.join(&run_id);
        let mut result = RunResult {
            run_id: run_id.clone(),
            status: RunStatus::Pending,
            failure: None,
            exit: None,
            context: RunContext::new(run_id.clone(), working_dir),
            validation: ValidationReport::default(),
            artifacts: Vec::new(),
            missing_outputs: Vec::new(),
            post_run_document: None,
            drift: None,
            stdout: String::new(),
            stderr: String::new(),
            bundle_dir: None,
        };
        tracing::info!(run_id = %run_id, backend = self.backend.name(), "run requested");

        emit_progress(&mut progress_cb, &run_id, RunStage::Validating, started, None);
        result.validation = validate(&request.document);
        let allow_invalid = request.allow_invalid.unwrap_or(self.config.allow_invalid);
        if !result.validation.is_runnable() {
            let errors = result.validation.error_count();
            if !allow_invalid {
                tracing::warn!(run_id = %run_id, errors, "document rejected");
                let message = format!("{errors} validation error(s)");
                return self.refuse(result, FailureKind::ValidationRejected, message, started, progress_cb);
            }
            tracing::warn!(run_id = %run_id, errors, "staging invalid document on request");
        }

        emit_progress(&mut progress_cb, &run_id, RunStage::Staging, started, None);
        if self.store.has_bundle(&run_id) {
            let message = format!("bundle {run_id} already exists");
            return self.refuse(result, FailureKind::StagingConflict, message, started, progress_cb);
        }
        let snapshot = serialize(&request.document);
        let exclude = [self.config.runs_root.clone(), self.config.bundles_root.clone()];
        let staged = match staging::stage(
            &request.source_dir,
            &self.config.runs_root,
            &run_id,
            &exclude,
            &self.config.control_file,
            &snapshot,
        ) {
            Ok(staged) => staged,
            Err(StagingError::Conflict { path }) => {
                let message = format!("{} already exists", path.display());
                return self.refuse(result, FailureKind::StagingConflict, message, started, progress_cb);
            }
            Err(err) => {
                // A directory we created but could not fill stays for inspection.
                let message = err.to_string();
                return self.refuse(result, FailureKind::Staging, message, started, progress_cb);
            }
        };
        result.context.snapshot_hash = Some(staged.snapshot_hash.clone());
        result.context.transition(RunStatus::Staged)?;

        emit_progress(&mut progress_cb, &run_id, RunStage::Executing, started, None);
        let (status, failure) = self.execute(&request, &staged.working_dir, &mut result)?;
        result.status = status;
        result.failure = failure;

        emit_progress(&mut progress_cb, &run_id, RunStage::CheckingDrift, started, None);
        let (report, post_run) =
            self.check_drift(&request.document, &staged.control_path, &staged.snapshot_hash);
        if report.drifted {
            tracing::warn!(
                run_id = %run_id,
                changed = report.diff.as_ref().map_or(0, |d| d.changes.len()),
                "control file drifted during run"
            );
        }
        result.drift = Some(report);
        result.post_run_document = post_run;

        emit_progress(&mut progress_cb, &run_id, RunStage::Capturing, started, None);
        if let Err(err) = self.capture(&staged.working_dir, &snapshot, &mut result) {
            tracing::warn!(run_id = %run_id, error = %err, "capture failed");
            if result.status == RunStatus::Succeeded {
                result.status = RunStatus::Failed;
                result.failure = Some(RunFailure::new(
                    FailurePhase::Capture,
                    FailureKind::Capture,
                    err.to_string(),
                ));
            }
        }
        result.context.transition(result.status)?;
        if let Err(err) = self.store.save_manifest(&self.manifest(&result)) {
            tracing::warn!(run_id = %run_id, error = %err, "failed to write manifest");
        }

        if result.succeeded()
            && self.config.cleanup_on_success
            && let Err(err) = std::fs::remove_dir_all(&staged.working_dir)
        {
            tracing::warn!(run_id = %run_id, error = %err, "failed to remove working directory");
        }

        tracing::info!(run_id = %run_id, status = ?result.status, "run finished");
        emit_progress(&mut progress_cb, &run_id, RunStage::Completed, started, None);
        Ok(result)
    }

    fn refuse(
        &self,
        mut result: RunResult,
        kind: FailureKind,
        message: String,
        started: Instant,
        mut progress_cb: Option<&mut dyn FnMut(RunProgressEvent)>,
    ) -> AppResult<RunResult> {
        result.context.transition(RunStatus::Failed)?;
        result.status = RunStatus::Failed;
        result.failure = Some(RunFailure::new(FailurePhase::Stage, kind, message.clone()));
        emit_progress(
            &mut progress_cb,
            &result.run_id,
            RunStage::Completed,
            started,
            Some(message),
        );
        Ok(result)
    }

    fn execute(
        &self,
        request: &RunRequest,
        working_dir: &Path,
        result: &mut RunResult,
    ) -> AppResult<(RunStatus, Option<RunFailure>)> {
        if request.cancel.is_cancelled() {
            let failure = RunFailure::new(
                FailurePhase::Execute,
                FailureKind::CancelledByCaller,
                "cancelled before start",
            );
            return Ok((RunStatus::Cancelled, Some(failure)));
        }

        let mut execution = match self.backend.start(working_dir) {
            Ok(execution) => execution,
            Err(err) => {
                let failure = RunFailure::new(
                    FailurePhase::Execute,
                    FailureKind::ExecutionFailure,
                    format!("failed to start engine: {err}"),
                );
                return Ok((RunStatus::Failed, Some(failure)));
            }
        };
        result.context.transition(RunStatus::Running)?;

        let outcome = self.wait(execution.as_mut(), &request.cancel);
        match execution.finish() {
            Ok(ExecutionOutput { stdout, stderr }) => {
                result.stdout = stdout;
                result.stderr = stderr;
            }
            Err(err) => tracing::warn!(run_id = %result.run_id, error = %err, "no engine output"),
        }

        Ok(match outcome {
            Outcome::Exited(exit) => {
                result.exit = Some(exit);
                if exit.success() {
                    (RunStatus::Succeeded, None)
                } else {
                    let failure = RunFailure::new(
                        FailurePhase::Execute,
                        FailureKind::ExecutionFailure,
                        format!("engine finished with {exit}"),
                    );
                    (RunStatus::Failed, Some(failure))
                }
            }
            Outcome::Stopped(kind, exit) => {
                result.exit = exit;
                let message = match kind {
                    FailureKind::TimeoutExceeded => "wall-clock limit reached",
                    _ => "cancelled by caller",
                };
                let failure = RunFailure::new(FailurePhase::Execute, kind, message);
                (RunStatus::Cancelled, Some(failure))
            }
            Outcome::Lost(err) => {
                let failure = RunFailure::new(
                    FailurePhase::Execute,
                    FailureKind::ExecutionFailure,
                    format!("lost track of engine: {err}"),
                );
                (RunStatus::Failed, Some(failure))
            }
        })
    }

    fn wait(&self, execution: &mut dyn Execution, cancel: &CancelHandle) -> Outcome {
        let deadline = self.config.timeout().map(|limit| Instant::now() + limit);
        let interval = self.config.poll_interval();
        loop {
            match execution.poll() {
                Ok(Some(exit)) => return Outcome::Exited(exit),
                Ok(None) => {}
                Err(err) => {
                    if let Err(kill_err) = execution.kill() {
                        tracing::warn!(error = %kill_err, "kill failed");
                    }
                    return Outcome::Lost(err);
                }
            }
            let kind = if cancel.is_cancelled() {
                Some(FailureKind::CancelledByCaller)
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                Some(FailureKind::TimeoutExceeded)
            } else {
                None
            };
            if let Some(kind) = kind {
                tracing::info!(reason = ?kind, "stopping engine");
                let exit = self.stop_with_grace(execution);
                return Outcome::Stopped(kind, exit);
            }
            thread::sleep(interval);
        }
    }

    /// Terminate, wait up to the grace period, then kill.
    fn stop_with_grace(&self, execution: &mut dyn Execution) -> Option<ExitInfo> {
        if let Err(err) = execution.terminate() {
            tracing::warn!(error = %err, "terminate failed");
        }
        let grace = self.config.grace_period();
        if let Some(exit) = self.wait_for_exit(execution, Instant::now() + grace) {
            return Some(exit);
        }
        tracing::warn!("engine ignored terminate, killing");
        if let Err(err) = execution.kill() {
            tracing::warn!(error = %err, "kill failed");
        }
        // A killed child is not necessarily reaped by the next poll.
        let exit = self.wait_for_exit(execution, Instant::now() + grace);
        if exit.is_none() {
            tracing::warn!("no exit status after kill");
        }
        exit
    }

    fn wait_for_exit(&self, execution: &mut dyn Execution, deadline: Instant) -> Option<ExitInfo> {
        let interval = self.config.poll_interval();
        loop {
            match execution.poll() {
                Ok(Some(exit)) => return Some(exit),
                Ok(None) if Instant::now() < deadline => thread::sleep(interval),
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, "poll failed");
                    return None;
                }
            }
        }
    }

    /// Compare the control file left in the working directory with the
    /// staged snapshot. Mutations are reported, never undone.
    fn check_drift(
        &self,
        document: &Document,
        control_path: &Path,
        snapshot_hash: &ContentHash,
    ) -> (DriftReport, Option<Document>) {
        let bytes = match std::fs::read(control_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %control_path.display(), error = %err, "control file gone after run");
                let report = DriftReport {
                    snapshot_hash: snapshot_hash.clone(),
                    post_run_hash: None,
                    drifted: true,
                    diff: None,
                    parse_error: Some(err.to_string()),
                };
                return (report, None);
            }
        };
        let post_run_hash = ContentHash::of_bytes(&bytes);
        let drifted = &post_run_hash != snapshot_hash;
        let mut report = DriftReport {
            snapshot_hash: snapshot_hash.clone(),
            post_run_hash: Some(post_run_hash),
            drifted,
            diff: None,
            parse_error: None,
        };

        let parsed = String::from_utf8(bytes)
            .map_err(|_| "control file is not valid UTF-8".to_string())
            .and_then(|raw| {
                parse(&raw, Arc::clone(document.schema())).map_err(|err| err.to_string())
            });
        match parsed {
            Ok(parsed) => {
                report.diff = Some(diff(document, &parsed.document));
                (report, Some(parsed.document))
            }
            Err(message) => {
                report.parse_error = Some(message);
                (report, None)
            }
        }
    }

    fn capture(
        &self,
        working_dir: &Path,
        snapshot: &str,
        result: &mut RunResult,
    ) -> AppResult<()> {
        let run_id = result.run_id.clone();
        result.bundle_dir = Some(self.store.bundle_dir(&run_id));

        let complete = result.status == RunStatus::Succeeded;
        let report = capture_artifacts(
            working_dir,
            &self.store.artifacts_dir(&run_id),
            &self.config.outputs,
            complete,
        )?;
        result.artifacts = report.artifacts;
        result.missing_outputs = report.missing;

        self.store
            .write_snapshot(&run_id, &self.config.control_file, snapshot)?;
        self.store.write_log(&run_id, &run_log(result))?;
        Ok(())
    }

    fn manifest(&self, result: &RunResult) -> BundleManifest {
        BundleManifest {
            run_id: result.run_id.clone(),
            schema_version: result.validation.schema_version.clone(),
            status: result.status,
            failure: result.failure.clone(),
            exit_code: result.exit_code(),
            exit_signal: result.exit.and_then(|exit| exit.signal),
            created_at: result.context.created_at,
            started_at: result.context.started_at,
            finished_at: result.context.finished_at,
            snapshot_hash: result.context.snapshot_hash.clone(),
            drift: result.drift.as_ref().map(DriftReport::summary),
            artifacts: result.artifacts.clone(),
            missing_outputs: result.missing_outputs.clone(),
            validation: result.validation.clone(),
        }
    }
}

fn run_log(result: &RunResult) -> String {
    let mut log = format!("run {}\nstatus {:?}\n", result.run_id, result.status);
    if let Some(exit) = result.exit {
        log.push_str(&format!("{exit}\n"));
    }
    if let Some(failure) = &result.failure {
        log.push_str(&format!("failure {:?}/{:?}: {}\n", failure.phase, failure.kind, failure.message));
    }
    log.push_str("--- stdout ---\n");
    log.push_str(&result.stdout);
    log.push_str("\n--- stderr ---\n");
    log.push_str(&result.stderr);
    log
}
