#![cfg(unix)]

mod support;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use support::{document, fixture, read};
use w2_app::{Orchestrator, ProcessBackend, RunRequest};
use w2_results::{FailureKind, RunStatus};

#[test]
fn shell_engine_runs_in_the_working_directory() {
    let fx = fixture();
    let backend = ProcessBackend::new("sh")
        .with_args([
            "-c",
            "echo hello; echo oops >&2; test -f bth_wb1.npt && printf '%s' \"$W2_CASE\" > case.opt",
        ])
        .with_env("W2_CASE", "b");
    let orchestrator = Orchestrator::new(fx.config.clone(), Arc::new(backend)).unwrap();

    let result = orchestrator.run(RunRequest::new(&fx.source, document())).unwrap();
    assert_eq!(result.status, RunStatus::Succeeded, "{:?}", result.failure);
    assert_eq!(result.exit_code(), Some(0));
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(result.artifacts.len(), 1);
    let copied = orchestrator.store().artifacts_dir(&result.run_id).join("case.opt");
    assert_eq!(read(&copied), "b");
    assert_eq!(read(&result.context.working_dir.join("w2.stdout.log")), "hello\n");
}

#[test]
fn launcher_runs_the_engine_and_exit_codes_are_kept() {
    let fx = fixture();
    fs::write(fx.source.join("engine.sh"), "echo negative depth >&2\nexit 4\n").unwrap();
    let backend = ProcessBackend::new("engine.sh").with_launcher("sh");
    let orchestrator = Orchestrator::new(fx.config.clone(), Arc::new(backend)).unwrap();

    let result = orchestrator.run(RunRequest::new(&fx.source, document())).unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.exit_code(), Some(4));
    assert_eq!(result.failure.unwrap().kind, FailureKind::ExecutionFailure);
    assert!(result.stderr.contains("negative depth"));
}

#[test]
fn timeout_terminates_a_sleeping_engine() {
    let mut fx = fixture();
    fx.config.timeout_ms = Some(100);
    fx.config.grace_period_ms = 2_000;
    fx.config.poll_interval_ms = 10;
    let backend = ProcessBackend::new("sleep").with_args(["30"]);
    let orchestrator = Orchestrator::new(fx.config.clone(), Arc::new(backend)).unwrap();

    let started = Instant::now();
    let result = orchestrator.run(RunRequest::new(&fx.source, document())).unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.failure.unwrap().kind, FailureKind::TimeoutExceeded);
    assert_eq!(result.exit.and_then(|exit| exit.signal), Some(15));
}

#[test]
fn engine_trapping_terminate_is_killed_and_the_signal_recorded() {
    let mut fx = fixture();
    fx.config.timeout_ms = Some(100);
    fx.config.grace_period_ms = 200;
    fx.config.poll_interval_ms = 10;
    let backend = ProcessBackend::new("sh").with_args(["-c", "trap '' TERM; while :; do sleep 0.05; done"]);
    let orchestrator = Orchestrator::new(fx.config.clone(), Arc::new(backend)).unwrap();

    let result = orchestrator.run(RunRequest::new(&fx.source, document())).unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.exit.and_then(|exit| exit.signal), Some(9));
    let manifest = orchestrator.store().load_manifest(&result.run_id).unwrap();
    assert_eq!(manifest.exit_signal, Some(9));
}

#[test]
fn missing_program_fails_to_start() {
    let fx = fixture();
    let backend = ProcessBackend::new("/nonexistent/w2_v45.exe");
    let orchestrator = Orchestrator::new(fx.config.clone(), Arc::new(backend)).unwrap();

    let result = orchestrator.run(RunRequest::new(&fx.source, document())).unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ExecutionFailure);
    assert!(failure.message.contains("failed to start"));
}
