use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::CommandError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output is still drained after the deadline or a group kill.
const READER_GRACE: Duration = Duration::from_secs(1);

/// External process invocation: an explicit argument vector, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Printable form for logs. Environment values are left out.
    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TimedOut,
    NonZeroExit,
    SpawnFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<FailureKind>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn succeeded(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: stderr.into(),
            failure: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        if code == 0 {
            return Self::succeeded(stdout, stderr);
        }
        Self {
            success: false,
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            failure: Some(FailureKind::NonZeroExit),
            elapsed: Duration::ZERO,
        }
    }

    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            code: None,
            stdout: String::new(),
            stderr: reason.into(),
            failure: Some(FailureKind::SpawnFailed),
            elapsed: Duration::ZERO,
        }
    }

    /// Converts a failed outcome into the error that describes it.
    pub fn check(&self, spec: &CommandSpec) -> Result<(), CommandError> {
        match self.failure {
            None => Ok(()),
            Some(FailureKind::TimedOut) => Err(CommandError::TimedOut {
                command: spec.program.clone(),
                seconds: spec.timeout.as_secs(),
            }),
            Some(FailureKind::NonZeroExit) => Err(CommandError::NonZeroExit {
                command: spec.program.clone(),
                code: self.code.unwrap_or(-1),
            }),
            Some(FailureKind::SpawnFailed) => Err(CommandError::Spawn {
                command: spec.program.clone(),
                reason: self.stderr.trim().to_string(),
            }),
        }
    }
}

/// Runs external processes. Never panics or errors; every result is an [`Outcome`].
pub trait CommandRunner: Send + Sync {
    fn execute(&self, spec: &CommandSpec) -> Outcome;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&self, spec: &CommandSpec) -> Outcome {
        info!(command = %spec.display(), "executing command");
        let started = Instant::now();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // own process group; see `signal_group`
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(command = %spec.program, "spawn failed: {}", e);
                return Outcome::spawn_failed(e.to_string());
            }
        };
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = started + spec.timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        kill_group(&mut child);
                        break None;
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => {
                    error!(command = %spec.program, "wait failed: {}", e);
                    kill_group(&mut child);
                    break None;
                }
            }
        };

        // Descendants may still hold the pipes after the child exits.
        let stdout_text = collect(&stdout, deadline);
        let stderr_text = collect(&stderr, deadline);
        let (stdout, stderr) = match (stdout_text, stderr_text) {
            (Some(out), Some(err)) => (out, err),
            (out, err) => {
                debug!(command = %spec.program, "output still open at deadline; killing process group");
                signal_group(child.id());
                (
                    out.or_else(|| collect(&stdout, Instant::now())).unwrap_or_default(),
                    err.or_else(|| collect(&stderr, Instant::now())).unwrap_or_default(),
                )
            }
        };
        let elapsed = started.elapsed();

        let mut outcome = match status {
            Some(status) => Outcome::exited(status.code().unwrap_or(1), stdout, stderr),
            None if timed_out => Outcome {
                success: false,
                code: None,
                stdout,
                stderr,
                failure: Some(FailureKind::TimedOut),
                elapsed,
            },
            None => Outcome::spawn_failed(stderr),
        };
        outcome.elapsed = elapsed;

        if let Err(err) = outcome.check(spec) {
            error!("{}", err);
            if !outcome.stdout.is_empty() {
                error!("stdout: {}", outcome.stdout.trim_end());
            }
            if !outcome.stderr.is_empty() {
                error!("stderr: {}", outcome.stderr.trim_end());
            }
        } else if !outcome.stdout.is_empty() {
            debug!("command output: {}", outcome.stdout.trim_end());
        }
        outcome
    }
}

fn kill_group(child: &mut Child) {
    signal_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

fn signal_group(pgid: u32) {
    // SAFETY: killpg(2) only takes integers; an unknown group is reported as
    // ESRCH, which is fine once the group has already exited.
    let result = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if result != 0 {
        debug!(pgid, "killpg: {}", io::Error::last_os_error());
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Output of a reader, waiting until `deadline` but at least `READER_GRACE`.
/// `None` when the pipe is still open at that point.
fn collect(reader: &Option<Receiver<String>>, deadline: Instant) -> Option<String> {
    let Some(rx) = reader else {
        return Some(String::new());
    };
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(READER_GRACE);
    match rx.recv_timeout(wait) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}
