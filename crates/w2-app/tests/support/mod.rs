#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use w2_app::{CancelHandle, Execution, ExecutionBackend, ExecutionOutput, ExitInfo, OrchestratorConfig};
use w2_config::{Document, parse};
use w2_schema::SchemaRegistry;

pub const NPT: &str = include_str!("../../../w2-config/tests/data/w2_con.npt");
pub const BATHYMETRY: &str = "$BTH   DLX      ELWS\n          1000.0   100.0\n";

pub struct Fixture {
    /// Keeps every directory alive for the test.
    pub root: TempDir,
    pub source: PathBuf,
    pub config: OrchestratorConfig,
}

pub fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(source.join("met")).unwrap();
    fs::write(source.join("w2_con.npt"), NPT).unwrap();
    fs::write(source.join("bth_wb1.npt"), BATHYMETRY).unwrap();
    fs::write(source.join("met").join("met_br1.csv"), "JDAY,TAIR\n60.0,4.5\n").unwrap();

    let mut config = OrchestratorConfig::rooted_at(root.path());
    config.outputs = vec!["*.opt".to_string(), "tsr_*_seg31.csv".to_string()];
    config.poll_interval_ms = 2;
    config.grace_period_ms = 200;
    Fixture {
        root,
        source,
        config,
    }
}

pub fn document() -> Document {
    let schema = SchemaRegistry::builtin().get("w2-v4.5").unwrap();
    parse(NPT, schema).unwrap().document
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

/// What a scripted engine reports when it finishes.
#[derive(Debug, Clone, Default)]
pub struct ScriptExit {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptExit {
    pub fn ok() -> io::Result<Self> {
        Ok(Self::default())
    }
}

/// Runs a closure against the working directory at start and is finished
/// by the first poll.
pub struct ScriptBackend<F> {
    script: F,
    pub starts: Arc<AtomicUsize>,
}

impl<F> ScriptBackend<F>
where
    F: Fn(&Path) -> io::Result<ScriptExit> + Send + Sync,
{
    pub fn new(script: F) -> Self {
        Self {
            script,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<F> ExecutionBackend for ScriptBackend<F>
where
    F: Fn(&Path) -> io::Result<ScriptExit> + Send + Sync,
{
    fn name(&self) -> &str {
        "script"
    }

    fn start(&self, working_dir: &Path) -> io::Result<Box<dyn Execution>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let exit = (self.script)(working_dir)?;
        Ok(Box::new(Finished { exit }))
    }
}

struct Finished {
    exit: ScriptExit,
}

impl Execution for Finished {
    fn poll(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(Some(ExitInfo::code(self.exit.code)))
    }

    fn terminate(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<ExecutionOutput> {
        Ok(ExecutionOutput {
            stdout: self.exit.stdout,
            stderr: self.exit.stderr,
        })
    }
}

/// Never exits on its own. Writes `partial.opt` at start.
#[derive(Default)]
pub struct HangingBackend {
    /// Exit on terminate, otherwise only on kill.
    pub honours_terminate: bool,
    pub starts: Arc<AtomicUsize>,
    pub terminates: Arc<AtomicUsize>,
    pub kills: Arc<AtomicUsize>,
    /// Cancelled as soon as the engine is running.
    pub cancel_on_start: Option<CancelHandle>,
    /// Polls after `kill` that still report the engine running.
    pub reap_after_polls: usize,
}

impl HangingBackend {
    pub fn polite() -> Self {
        Self {
            honours_terminate: true,
            ..Self::default()
        }
    }

    pub fn stubborn() -> Self {
        Self::default()
    }
}

impl ExecutionBackend for HangingBackend {
    fn name(&self) -> &str {
        "hanging"
    }

    fn start(&self, working_dir: &Path) -> io::Result<Box<dyn Execution>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        fs::write(working_dir.join("partial.opt"), "JDAY 60.0\n")?;
        if let Some(cancel) = &self.cancel_on_start {
            cancel.cancel();
        }
        Ok(Box::new(Hanging {
            honours_terminate: self.honours_terminate,
            terminates: Arc::clone(&self.terminates),
            kills: Arc::clone(&self.kills),
            reap_after_polls: self.reap_after_polls,
            killed: false,
            exit: None,
        }))
    }
}

struct Hanging {
    honours_terminate: bool,
    terminates: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
    reap_after_polls: usize,
    killed: bool,
    exit: Option<ExitInfo>,
}

impl Execution for Hanging {
    fn poll(&mut self) -> io::Result<Option<ExitInfo>> {
        if self.killed && self.exit.is_none() {
            match self.reap_after_polls {
                0 => self.exit = Some(ExitInfo::signalled(9)),
                n => self.reap_after_polls = n - 1,
            }
        }
        Ok(self.exit)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.terminates.fetch_add(1, Ordering::SeqCst);
        if self.honours_terminate {
            self.exit = Some(ExitInfo::signalled(15));
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.killed = true;
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<ExecutionOutput> {
        Ok(ExecutionOutput {
            stdout: "time step 1\n".to_string(),
            stderr: String::new(),
        })
    }
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}
