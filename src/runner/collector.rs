// src/runner/collector.rs

//! Drains a [`StreamingHandle`] into one [`AggregateResult`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{FragletError, Result};
use crate::runner::executor::POST_EXIT_DRAIN;
use crate::runner::result::{AggregateResult, StreamingHandle};

/// How long to wait for the exit code once the outcome is known.
pub const EXIT_CODE_WAIT: Duration = Duration::from_millis(100);

/// How long a cancelled or failed run may take to finish draining and
/// cleaning up before the collector gives up on it.
pub const CLEANUP_GRACE: Duration = Duration::from_secs(2);

/// Block until the invocation is over and assemble its result.
///
/// Only infrastructure failures are returned as errors; they carry the
/// output captured so far. A non-zero exit status is reported solely through
/// `exit_code`.
pub async fn collect(cancel: &CancellationToken, handle: StreamingHandle) -> Result<AggregateResult> {
    let start = Instant::now();

    let StreamingHandle {
        stdout,
        stderr,
        mut done,
        exit_code,
    } = handle;

    let stdout = Accumulator::spawn(stdout, "stdout");
    let stderr = Accumulator::spawn(stderr, "stderr");

    let exec_err = tokio::select! {
        outcome = &mut done => match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(FragletError::CompletionLost),
        },
        _ = cancel.cancelled() => {
            // Give the completion task a chance to kill the process and
            // remove its script before we report back.
            if timeout(CLEANUP_GRACE, &mut done).await.is_err() {
                warn!("process did not finish within cleanup grace period after cancellation");
            }
            Some(FragletError::Cancelled)
        }
    };

    let exit_code = match timeout(EXIT_CODE_WAIT, exit_code).await {
        Ok(Ok(code)) => code,
        _ if exec_err.is_some() => -1,
        _ => 0,
    };

    // Background processes may still hold the pipes open after the program
    // itself is gone; keep what arrived within the window.
    let bound = if exec_err.is_some() {
        CLEANUP_GRACE
    } else {
        POST_EXIT_DRAIN
    };
    let (stdout, stderr) = tokio::join!(stdout.finish(bound), stderr.finish(bound));

    let result = AggregateResult {
        stdout,
        stderr,
        exit_code,
        duration: start.elapsed(),
    };

    debug!(
        exit_code = result.exit_code,
        duration_ms = result.duration.as_millis() as u64,
        failed = exec_err.is_some(),
        "collected invocation result"
    );

    match exec_err {
        None => Ok(result),
        Some(source) => Err(FragletError::Incomplete {
            partial: Box::new(result),
            source: Box::new(source),
        }),
    }
}

/// Concatenates the chunks of one stream in arrival order.
struct Accumulator {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
    stream: &'static str,
}

impl Accumulator {
    fn spawn(mut rx: mpsc::Receiver<Vec<u8>>, stream: &'static str) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Ok(mut guard) = sink.lock() {
                    guard.extend_from_slice(&chunk);
                }
            }
        });
        Self { buf, task, stream }
    }

    /// Wait at most `bound` for the stream to close and return everything
    /// received by then.
    async fn finish(mut self, bound: Duration) -> String {
        let finished = match timeout(bound, &mut self.task).await {
            Ok(res) => res.map_err(|e| e.to_string()),
            Err(_) => Err(format!("still open after {bound:?}")),
        };

        let bytes = match self.buf.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Err(reason) = finished {
            // Aborting drops the receiver, which also stops the drain task.
            self.task.abort();
            warn!(
                stream = self.stream,
                kept_bytes = bytes.len(),
                %reason,
                "stopped collecting output; later writes are dropped"
            );
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
