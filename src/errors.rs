// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Errors fall into three groups:
//! - configuration errors, raised before any process is started;
//! - infrastructure errors (temp files, spawning, pulling, cancellation);
//! - program results, which are *not* errors: a non-zero exit status only
//!   ever shows up in [`AggregateResult::exit_code`].

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::AggregateResult;

#[derive(Error, Debug)]
pub enum FragletError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to create temp script in {dir:?}: {source}")]
    TempScript {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create {stream} pipe for {program}")]
    Pipe {
        program: String,
        stream: &'static str,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was terminated by a signal")]
    Terminated { program: String },

    #[error("failed to pull image {image}: {reason}\n{output}")]
    ImagePull {
        image: String,
        reason: String,
        output: String,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("completion channel closed before a result was published")]
    CompletionLost,

    /// An infrastructure failure after the process had started; carries
    /// whatever output was captured up to that point.
    #[error("{source}")]
    Incomplete {
        partial: Box<AggregateResult>,
        #[source]
        source: Box<FragletError>,
    },

    #[error("Vein not found: {0}")]
    VeinNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FragletError {
    pub fn config(msg: impl Into<String>) -> Self {
        FragletError::ConfigError(msg.into())
    }

    /// Partial output captured before an infrastructure failure, if any.
    pub fn partial(&self) -> Option<&AggregateResult> {
        match self {
            FragletError::Incomplete { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// The underlying error, looking through `Incomplete`.
    pub fn root(&self) -> &FragletError {
        match self {
            FragletError::Incomplete { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), FragletError::Cancelled)
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root(), FragletError::ConfigError(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FragletError>;
