// src/runner/executor.rs

//! Streaming executor shared by both backends.
//!
//! One invocation gets:
//! - the child process itself,
//! - a drain task per captured stream (or a copy task per caller sink),
//! - an optional stdin feeder task,
//! - a completion task that waits for exit or cancellation, removes the
//!   script file, and publishes the exit code and terminal outcome.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{FragletError, Result};
use crate::runner::request::{OutputSink, StdinSource, StdioWiring};
use crate::runner::result::StreamingHandle;
use crate::runner::script::ScriptFile;

/// Bytes read from a pipe per chunk.
pub const CHUNK_SIZE: usize = 4096;

const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// ETXTBSY: a freshly written script can still be open for writing in a
/// process forked concurrently by another thread.
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_RETRIES: u32 = 5;

/// How long output may keep draining once the process has exited.
///
/// Background processes started by the program inherit its pipes; whatever
/// they write after this window is not collected.
pub const POST_EXIT_DRAIN: Duration = Duration::from_millis(500);

/// Upper bound for flushing a caller sink after its copy was stopped.
const SINK_FLUSH_WAIT: Duration = Duration::from_secs(1);

/// Upper bound for the cancellation command.
const CANCEL_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully resolved process invocation, ready to spawn.
#[derive(Debug)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment applied on top of the inherited one.
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Script file owned by this invocation, removed once it is over.
    pub script: Option<ScriptFile>,
    /// Run (argv, program first) after the process is killed on cancellation.
    pub on_cancel: Option<Vec<String>>,
}

impl PreparedCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            script: None,
            on_cancel: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn script(mut self, script: ScriptFile) -> Self {
        self.script = Some(script);
        self
    }

    pub fn on_cancel<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        self.on_cancel = (!argv.is_empty()).then_some(argv);
        self
    }

    /// Full argv, program first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn to_command(&self, pipe_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        let stdin = if pipe_stdin { Stdio::piped() } else { Stdio::null() };
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Start `prepared` and return a live handle on it.
///
/// Start failures remove the script before returning and never reach the
/// completion task.
pub async fn spawn_streaming(
    mut prepared: PreparedCommand,
    stdio: StdioWiring,
    cancel: CancellationToken,
) -> Result<StreamingHandle> {
    let script = prepared.script.take();
    let on_cancel = prepared.on_cancel.take();
    let program = prepared.program.clone();

    let pipe_stdin = !matches!(stdio.stdin, StdinSource::Null);

    let mut child = match spawn_with_retry(&prepared, pipe_stdin).await {
        Ok(child) => child,
        Err(source) => {
            if let Some(script) = script {
                script.remove();
            }
            return Err(FragletError::Spawn { program, source });
        }
    };

    let (stdout_pipe, stderr_pipe) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        (out, _) => {
            let stream = if out.is_none() { "stdout" } else { "stderr" };
            if let Err(e) = child.kill().await {
                debug!(program = %program, error = %e, "kill after pipe failure");
            }
            if let Some(script) = script {
                script.remove();
            }
            return Err(FragletError::Pipe { program, stream });
        }
    };

    info!(program = %program, pid = child.id(), "process started");

    feed_stdin(&mut child, stdio.stdin, &program);

    let (stdout_tx, stdout_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let (stderr_tx, stderr_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    let stop_copies = CancellationToken::new();
    let mut sink_copies = Vec::new();
    match stdio.stdout {
        Some(sink) => {
            drop(stdout_tx);
            sink_copies.push(spawn_sink_copy(stdout_pipe, sink, "stdout", stop_copies.clone()));
        }
        None => spawn_drain(stdout_pipe, stdout_tx, "stdout"),
    }
    match stdio.stderr {
        Some(sink) => {
            drop(stderr_tx);
            sink_copies.push(spawn_sink_copy(stderr_pipe, sink, "stderr", stop_copies.clone()));
        }
        None => spawn_drain(stderr_pipe, stderr_tx, "stderr"),
    }

    let (done_tx, done_rx) = oneshot::channel();
    let (code_tx, code_rx) = oneshot::channel();

    tokio::spawn(async move {
        let outcome = wait_or_cancel(&mut child, &cancel, &program).await;

        if let (Err(FragletError::Cancelled), Some(argv)) = (&outcome, &on_cancel) {
            run_cancel_command(argv).await;
        }

        let drain_window = if outcome.is_ok() {
            POST_EXIT_DRAIN
        } else {
            Duration::ZERO
        };
        settle_sink_copies(sink_copies, stop_copies, drain_window).await;

        if let Some(script) = script {
            script.remove();
        }

        let (code, result) = split_outcome(outcome, &program);
        info!(program = %program, exit_code = code, "process finished");

        let _ = code_tx.send(code);
        let _ = done_tx.send(result);
    });

    Ok(StreamingHandle {
        stdout: stdout_rx,
        stderr: stderr_rx,
        done: done_rx,
        exit_code: code_rx,
    })
}

async fn spawn_with_retry(prepared: &PreparedCommand, pipe_stdin: bool) -> std::io::Result<Child> {
    let mut attempt = 0;
    loop {
        match prepared.to_command(pipe_stdin).spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_RETRIES => {
                attempt += 1;
                debug!(program = %prepared.program, attempt, "text file busy; retrying spawn");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

fn feed_stdin(child: &mut Child, source: StdinSource, program: &str) {
    let Some(mut stdin) = child.stdin.take() else {
        return;
    };
    let program = program.to_string();

    tokio::spawn(async move {
        let res = match source {
            StdinSource::Null => Ok(()),
            StdinSource::Buffer(buffer) => stdin.write_all(buffer.as_bytes()).await,
            StdinSource::Reader(mut reader) => tokio::io::copy(&mut reader, &mut stdin).await.map(|_| ()),
        };
        if let Err(e) = res {
            // The program may exit without reading its input.
            debug!(program = %program, error = %e, "stdin feed ended early");
        }
        // Dropping `stdin` closes the pipe so the program sees EOF.
    });
}

fn spawn_drain<R>(mut pipe: R, tx: mpsc::Sender<Vec<u8>>, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let read = tokio::select! {
                read = pipe.read(&mut buf) => read,
                // The consumer stopped listening; a background process may
                // still hold the pipe open.
                _ = tx.closed() => {
                    debug!(stream, "chunk receiver dropped; stopping drain");
                    break;
                }
            };
            match read {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        debug!(stream, "chunk receiver dropped; stopping drain");
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream, error = %e, "pipe read failed; closing stream");
                    break;
                }
            }
        }
    });
}

/// Copy a pipe into the caller's sink until EOF or `stop`, then flush.
fn spawn_sink_copy<R>(
    mut pipe: R,
    mut sink: OutputSink,
    stream: &'static str,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            copied = tokio::io::copy(&mut pipe, &mut sink) => {
                if let Err(e) = copied {
                    warn!(stream, error = %e, "writing to caller sink failed");
                }
            }
            _ = stop.cancelled() => debug!(stream, "stopped copying to caller sink"),
        }
        if let Err(e) = sink.flush().await {
            warn!(stream, error = %e, "flushing caller sink failed");
        }
    })
}

/// Let the sink copies run for at most `window`, then stop the rest and give
/// them a bounded chance to flush what they already wrote.
async fn settle_sink_copies(mut copies: Vec<JoinHandle<()>>, stop: CancellationToken, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    for copy in copies.iter_mut() {
        if tokio::time::timeout_at(deadline, &mut *copy).await.is_err() {
            break;
        }
    }

    stop.cancel();
    for mut copy in copies.into_iter().filter(|c| !c.is_finished()) {
        debug!("output still open after exit; stopping sink copy");
        if tokio::time::timeout(SINK_FLUSH_WAIT, &mut copy).await.is_err() {
            warn!("caller sink did not flush in time; dropping its pending output");
            copy.abort();
        }
    }
}

/// Best-effort cleanup command run after a cancelled process was killed.
async fn run_cancel_command(argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(CANCEL_COMMAND_TIMEOUT, status).await {
        Ok(Ok(status)) if status.success() => debug!(?argv, "cancellation command finished"),
        Ok(Ok(status)) => warn!(?argv, %status, "cancellation command failed"),
        Ok(Err(e)) => warn!(?argv, error = %e, "cancellation command could not start"),
        Err(_) => warn!(?argv, "cancellation command timed out"),
    }
}

async fn wait_or_cancel(
    child: &mut Child,
    cancel: &CancellationToken,
    program: &str,
) -> Result<ExitStatus> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            info!(program = %program, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "failed to kill process on cancellation");
            }
            Err(FragletError::Cancelled)
        }

        status = child.wait() => status.map_err(|source| FragletError::Wait {
            program: program.to_string(),
            source,
        }),
    }
}

/// Split a wait outcome into the published exit code and completion value.
///
/// A non-zero exit is a program result, not an error.
fn split_outcome(outcome: Result<ExitStatus>, program: &str) -> (i32, Result<()>) {
    match outcome {
        Ok(status) => match status.code() {
            Some(code) => (code, Ok(())),
            None => (
                -1,
                Err(FragletError::Terminated {
                    program: program.to_string(),
                }),
            ),
        },
        Err(e) => (-1, Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_starts_with_program() {
        let cmd = PreparedCommand::new("sh").args(["-c", "echo hi"]);
        assert_eq!(cmd.argv(), vec!["sh", "-c", "echo hi"]);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let cmd = PreparedCommand::new("/definitely/not/a/real/program");
        let stdio = StdioWiring {
            stdin: StdinSource::Null,
            stdout: None,
            stderr: None,
        };
        let err = spawn_streaming(cmd, stdio, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FragletError::Spawn { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_precedes_completion() {
        let cmd = PreparedCommand::new("sh").args(["-c", "exit 3"]);
        let stdio = StdioWiring {
            stdin: StdinSource::Null,
            stdout: None,
            stderr: None,
        };
        let handle = spawn_streaming(cmd, stdio, CancellationToken::new())
            .await
            .unwrap();

        assert!(handle.done.await.unwrap().is_ok());
        assert_eq!(handle.exit_code.await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_runs_the_cleanup_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let cmd = PreparedCommand::new("sh")
            .args(["-c", "exec sleep 10"])
            .on_cancel(["touch".to_string(), marker.display().to_string()]);
        let stdio = StdioWiring {
            stdin: StdinSource::Null,
            stdout: None,
            stderr: None,
        };
        let cancel = CancellationToken::new();
        let handle = spawn_streaming(cmd, stdio, cancel.clone()).await.unwrap();

        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.done)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(FragletError::Cancelled)));
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_command_is_skipped_on_normal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let cmd = PreparedCommand::new("sh")
            .args(["-c", "exit 0"])
            .on_cancel(["touch".to_string(), marker.display().to_string()]);
        let stdio = StdioWiring {
            stdin: StdinSource::Null,
            stdout: None,
            stderr: None,
        };
        let handle = spawn_streaming(cmd, stdio, CancellationToken::new()).await.unwrap();

        assert!(handle.done.await.unwrap().is_ok());
        assert!(!marker.exists());
    }
}
