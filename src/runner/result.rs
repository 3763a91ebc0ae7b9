// src/runner/result.rs

//! The two result shapes of an invocation.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::errors::Result;

/// Fully drained summary of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateResult {
    pub stdout: String,
    pub stderr: String,
    /// Real exit status of the program, or `-1` when none could be observed.
    pub exit_code: i32,
    pub duration: Duration,
}

impl AggregateResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Live view of a running invocation.
///
/// - `stdout` / `stderr` yield raw chunks in production order and close when
///   the stream ends (immediately, if the caller supplied a sink). A
///   background process left behind by the program keeps them open until it
///   exits or the receiver is dropped.
/// - `exit_code` receives at most one value.
/// - `done` receives the terminal outcome: `Ok(())` whenever the program ran
///   to completion, whatever its exit status.
#[derive(Debug)]
pub struct StreamingHandle {
    pub stdout: mpsc::Receiver<Vec<u8>>,
    pub stderr: mpsc::Receiver<Vec<u8>>,
    pub done: oneshot::Receiver<Result<()>>,
    pub exit_code: oneshot::Receiver<i32>,
}
