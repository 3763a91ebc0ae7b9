// src/runner/local.rs

//! Local-process backend: runs requests directly on the host.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{FragletError, Result};
use crate::runner::executor::{spawn_streaming, PreparedCommand};
use crate::runner::request::{has_shebang, Invocation, InvocationRequest};
use crate::runner::result::StreamingHandle;
use crate::runner::script::{ScriptFile, ScriptKind};
use crate::runner::{Backend, BackendFuture};

/// Build the host command for a request.
///
/// The container image, platform and mounts play no part here; a request
/// that only carries mounts cannot run locally.
pub fn prepare_local(req: &InvocationRequest) -> Result<PreparedCommand> {
    let invocation = req.invocation();

    let mut prepared = match invocation {
        Invocation::MountOnly => {
            return Err(FragletError::config(
                "volume mounts require the container backend",
            ));
        }
        Invocation::ImageDefault => {
            return Err(FragletError::config(
                "no command, entrypoint, or volumes specified",
            ));
        }
        Invocation::EntrypointScript { entrypoint, script } => {
            let script = ScriptFile::write(script, ScriptKind::Data)?;
            let path = script.path().display().to_string();
            PreparedCommand::new(entrypoint)
                .args([path])
                .args(req.args.iter().cloned())
                .script(script)
        }
        Invocation::Entrypoint { entrypoint } => {
            PreparedCommand::new(entrypoint).args(req.args.iter().cloned())
        }
        Invocation::Shell { command } if has_shebang(command) => {
            let script = ScriptFile::write(command.trim_start(), ScriptKind::Executable)?;
            let path = script.path().display().to_string();
            PreparedCommand::new(path)
                .args(req.args.iter().cloned())
                .script(script)
        }
        Invocation::Shell { command } => shell(command),
    };

    prepared.env = parse_env(&req.env);
    prepared.current_dir = req.workdir().map(|d| d.to_path_buf());
    Ok(prepared)
}

fn shell(command: &str) -> PreparedCommand {
    if cfg!(windows) {
        PreparedCommand::new("cmd").args(["/C", command])
    } else {
        PreparedCommand::new("sh").args(["-c", command])
    }
}

/// Split `KEY=VALUE` entries. Entries without `=` are already inherited from
/// the host environment and are skipped.
fn parse_env(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!(entry = %entry, "ignoring environment entry without KEY=VALUE form");
                None
            }
        })
        .collect()
}

/// Runs requests as host subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    async fn start(cancel: CancellationToken, mut req: InvocationRequest) -> Result<StreamingHandle> {
        if req.image().is_some() {
            info!(image = ?req.image, "container backend unavailable; running locally");
        }
        let prepared = prepare_local(&req)?;
        info!(program = %prepared.program, mode = req.invocation().label(), "starting local process");

        let stdio = req.take_stdio();
        spawn_streaming(prepared, stdio, cancel).await
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn run_streaming(&self, cancel: CancellationToken, req: InvocationRequest) -> BackendFuture<'_> {
        Box::pin(Self::start(cancel, req))
    }
}
