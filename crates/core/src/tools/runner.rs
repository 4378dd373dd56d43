//! # Process Runner
//!
//! Runs one shell command to completion with bounded retries, exponential
//! backoff and a per-attempt wall-clock timeout, streaming every non-empty
//! output line to the observer as it is produced.
//!
//! ## Attempt Lifecycle
//!
//! ```text
//! status "Executing ..." → spawn → drain stdout/stderr ─┬─ exit 0    → complete
//!                                  (timeout races all) ├─ exit != 0 → error
//!                                                      ├─ timeout   → kill, reap, error
//!                                                      └─ I/O fault → error
//! failed and attempts remain → status "Retrying in N seconds..." → sleep → next attempt
//! ```
//!
//! Cancellation is honoured at every suspension point: the running process
//! (and its process group on Unix) is killed and reaped, and any output not
//! yet drained is discarded.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::FailureKind;
use crate::swarm::events::{EventChannel, EventEmitter};

/// Default per-attempt timeout (30 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default number of attempts per command
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base of the exponential backoff
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Retry and timeout knobs shared by every command an agent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

/// A fully specified command, immutable once built
#[derive(Debug, Clone)]
pub struct CommandExecution {
    command: String,
    working_dir: PathBuf,
    environment: HashMap<String, String>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl CommandExecution {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            environment: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Variables layered over the inherited process environment
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_settings(self, settings: ExecutionSettings) -> Self {
        self.with_timeout(settings.timeout)
            .with_max_attempts(settings.max_attempts)
            .with_backoff_base(settings.backoff_base)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// At least one attempt is always made
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

/// What happened in one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    /// 1-based attempt number
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    /// Recovered problems that did not fail the attempt
    pub anomalies: Vec<FailureKind>,
}

impl AttemptOutcome {
    fn succeeded(attempt: u32, exit_code: Option<i32>) -> Self {
        Self {
            attempt,
            exit_code,
            failure: None,
            anomalies: Vec::new(),
        }
    }

    fn failed(attempt: u32, exit_code: Option<i32>, failure: FailureKind) -> Self {
        Self {
            attempt,
            exit_code,
            failure: Some(failure),
            anomalies: Vec::new(),
        }
    }

    fn with_lossy_output(mut self, lossy: bool) -> Self {
        if lossy {
            self.anomalies.push(FailureKind::StreamDecodeAnomaly);
        }
        self
    }
}

/// Result of running a command through every attempt it needed
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub attempts: Vec<AttemptOutcome>,
    /// First attempt start to final resolution
    pub duration: Duration,
    /// `None` on success; `RetriesExhausted` or `Cancelled` otherwise
    pub failure: Option<FailureKind>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

enum Resolution {
    /// Exit status, and whether any output needed lossy decoding
    Finished(io::Result<(ExitStatus, bool)>),
    TimedOut,
    Cancelled,
}

/// Runs commands on behalf of one event source
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    emitter: EventEmitter,
}

impl ProcessRunner {
    pub fn new(emitter: EventEmitter) -> Self {
        Self { emitter }
    }

    /// Run `cmd` until it succeeds, attempts run out, or `cancel` fires
    #[tracing::instrument(skip_all, fields(source = %self.emitter.source(), attempts = cmd.max_attempts()))]
    pub async fn execute(
        &self,
        cmd: &CommandExecution,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let max_attempts = cmd.max_attempts();
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                self.emitter.error("Run cancelled before the command could start.");
                return finish(attempts, started, Some(FailureKind::Cancelled));
            }

            self.emitter.status(format!(
                "Executing: {} (Attempt {}/{})",
                cmd.command(),
                attempt,
                max_attempts
            ));

            let outcome = self.attempt(cmd, attempt, cancel).await;
            let failure = outcome.failure;
            attempts.push(outcome);

            match failure {
                None => {
                    self.emitter.complete("Command completed successfully.");
                    return finish(attempts, started, None);
                }
                Some(kind) if !kind.is_retryable() => {
                    return finish(attempts, started, Some(kind));
                }
                Some(kind) => {
                    tracing::debug!(attempt, ?kind, "attempt failed");
                }
            }

            if attempt < max_attempts {
                let delay = cmd.backoff_delay(attempt);
                self.emitter
                    .status(format!("Retrying in {} seconds...", format_secs(delay)));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.emitter.error("Run cancelled while waiting to retry.");
                        return finish(attempts, started, Some(FailureKind::Cancelled));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::warn!(command = %cmd.command(), max_attempts, "retries exhausted");
        finish(attempts, started, Some(FailureKind::RetriesExhausted))
    }

    async fn attempt(
        &self,
        cmd: &CommandExecution,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let mut child = match spawn(cmd) {
            Ok(child) => child,
            Err(e) => {
                self.emitter.error(format!(
                    "An unexpected error occurred: failed to launch command: {}",
                    e
                ));
                return AttemptOutcome::failed(attempt, None, FailureKind::ProcessSpawnFailure);
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child).await;
            self.emitter
                .error("An unexpected error occurred: process pipes were not available");
            return AttemptOutcome::failed(attempt, None, FailureKind::ProcessSpawnFailure);
        };

        let mut stdout_task = tokio::spawn(pump_lines(
            stdout,
            EventChannel::Stdout,
            self.emitter.clone(),
        ));
        let mut stderr_task = tokio::spawn(pump_lines(
            stderr,
            EventChannel::Stderr,
            self.emitter.clone(),
        ));

        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => Resolution::Cancelled,
            res = tokio::time::timeout(
                cmd.timeout(),
                drain_and_wait(&mut child, &mut stdout_task, &mut stderr_task),
            ) => match res {
                Ok(finished) => Resolution::Finished(finished),
                Err(_) => Resolution::TimedOut,
            },
        };

        match resolution {
            Resolution::Finished(Ok((status, lossy))) if status.success() => {
                AttemptOutcome::succeeded(attempt, status.code()).with_lossy_output(lossy)
            }
            Resolution::Finished(Ok((status, lossy))) => {
                match status.code() {
                    Some(code) => self
                        .emitter
                        .error(format!("Command failed with exit code {}.", code)),
                    None => self
                        .emitter
                        .error("Command failed: process was terminated by a signal."),
                }
                AttemptOutcome::failed(attempt, status.code(), FailureKind::NonZeroExit)
                    .with_lossy_output(lossy)
            }
            Resolution::Finished(Err(e)) => {
                discard(&mut child, stdout_task, stderr_task).await;
                self.emitter
                    .error(format!("An unexpected error occurred: {}", e));
                AttemptOutcome::failed(attempt, None, FailureKind::ProcessSpawnFailure)
            }
            Resolution::TimedOut => {
                discard(&mut child, stdout_task, stderr_task).await;
                self.emitter.error(format!(
                    "Command timed out after {} seconds.",
                    format_secs(cmd.timeout())
                ));
                AttemptOutcome::failed(attempt, None, FailureKind::CommandTimeout)
            }
            Resolution::Cancelled => {
                discard(&mut child, stdout_task, stderr_task).await;
                self.emitter
                    .error("Command cancelled; process terminated.");
                AttemptOutcome::failed(attempt, None, FailureKind::Cancelled)
            }
        }
    }
}

fn finish(
    attempts: Vec<AttemptOutcome>,
    started: Instant,
    failure: Option<FailureKind>,
) -> ExecutionOutcome {
    ExecutionOutcome {
        attempts,
        duration: started.elapsed(),
        failure,
    }
}

fn spawn(cmd: &CommandExecution) -> io::Result<Child> {
    let mut command = shell_command(cmd.command());
    command
        .current_dir(cmd.working_dir())
        .envs(cmd.environment())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so timeouts and cancellation reach grandchildren
    #[cfg(unix)]
    command.process_group(0);

    command.spawn()
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

async fn drain_and_wait(
    child: &mut Child,
    stdout_task: &mut JoinHandle<io::Result<bool>>,
    stderr_task: &mut JoinHandle<io::Result<bool>>,
) -> io::Result<(ExitStatus, bool)> {
    let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
    let mut lossy = false;
    for drained in [stdout, stderr] {
        lossy |= drained.map_err(io::Error::other)??;
    }
    if lossy {
        tracing::warn!(
            kind = ?FailureKind::StreamDecodeAnomaly,
            "invalid UTF-8 in process output, replaced lossily"
        );
    }
    Ok((child.wait().await?, lossy))
}

/// Stream `reader` line by line; returns whether any line needed lossy decoding
async fn pump_lines<R>(reader: R, channel: EventChannel, emitter: EventEmitter) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lossy = false;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        if matches!(line, Cow::Owned(_)) {
            lossy = true;
        }

        let text = line.trim();
        if !text.is_empty() {
            emitter.emit(channel, text);
        }
    }

    Ok(lossy)
}

/// Kill and reap the process, then stop the readers without flushing them
async fn discard(
    child: &mut Child,
    stdout_task: JoinHandle<io::Result<bool>>,
    stderr_task: JoinHandle<io::Result<bool>>,
) {
    terminate(child).await;
    for task in [stdout_task, stderr_task] {
        task.abort();
        // Awaiting guarantees no further lines are emitted after this point
        let _ = task.await;
    }
}

async fn terminate(child: &mut Child) {
    kill_process_group(child);
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "start_kill failed (process may have exited)");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "failed to reap terminated process");
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The child leads its own group (process_group(0)), so pgid == pid
        let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if result == -1 {
            tracing::debug!(
                error = %io::Error::last_os_error(),
                pid,
                "killpg failed"
            );
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_: &Child) {}

/// `3` for whole seconds, `0.25` otherwise
pub(crate) fn format_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.2}", duration.as_secs_f64())
    }
}
