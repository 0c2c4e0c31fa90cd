//! Execution backends: how the engine is started inside a working directory.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal on unix.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signalled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Console output of a finished execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A started engine process.
pub trait Execution: Send {
    /// Non-blocking exit check.
    fn poll(&mut self) -> io::Result<Option<ExitInfo>>;

    /// Ask the process to stop (SIGTERM on unix).
    fn terminate(&mut self) -> io::Result<()>;

    /// Stop the process unconditionally.
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for the process to be gone and collect its output.
    fn finish(self: Box<Self>) -> io::Result<ExecutionOutput>;
}

pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self, working_dir: &Path) -> io::Result<Box<dyn Execution>>;
}

/// Runs a program as a child process with the working directory as its
/// current directory. Console output goes to files inside that directory.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Compatibility layer placed in front of the program, e.g. `wine`.
    pub launcher: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdout_file: String,
    pub stderr_file: String,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            launcher: None,
            env: Vec::new(),
            stdout_file: "w2.stdout.log".to_string(),
            stderr_file: "w2.stderr.log".to_string(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut command = match &self.launcher {
            Some(launcher) => {
                let mut command = Command::new(launcher);
                command.arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        };
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }
}

impl ExecutionBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn start(&self, working_dir: &Path) -> io::Result<Box<dyn Execution>> {
        let stdout_path = working_dir.join(&self.stdout_file);
        let stderr_path = working_dir.join(&self.stderr_file);
        let stdout = File::create(&stdout_path)?;
        let stderr = File::create(&stderr_path)?;

        let child = self
            .command()
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        tracing::debug!(
            pid = child.id(),
            program = %self.program.display(),
            dir = %working_dir.display(),
            "spawned engine"
        );

        Ok(Box::new(ProcessExecution {
            child,
            stdout_path,
            stderr_path,
        }))
    }
}

struct ProcessExecution {
    child: Child,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl Execution for ProcessExecution {
    fn poll(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(ExitInfo::from_status))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: plain signal delivery to a child we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!(pid, "sent SIGTERM");
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        tracing::warn!(pid = self.child.id(), "killing engine");
        self.child.kill()
    }

    fn finish(mut self: Box<Self>) -> io::Result<ExecutionOutput> {
        self.child.wait()?;
        Ok(ExecutionOutput {
            stdout: read_lossy(&self.stdout_path)?,
            stderr: read_lossy(&self.stderr_path)?,
        })
    }
}

fn read_lossy(path: &Path) -> io::Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        // The engine may remove its own log files.
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}
