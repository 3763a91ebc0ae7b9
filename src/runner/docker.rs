// src/runner/docker.rs

//! Container backend: `docker run` command construction and execution.
//!
//! Flag order is fixed and is part of the contract:
//! base flags → volumes → env → workdir → entry point → image → trailing
//! arguments (or `sh -c <command>` in shell mode).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{FragletError, Result};
use crate::runner::executor::{spawn_streaming, PreparedCommand};
use crate::runner::image::{ensure_image, runtime_available};
use crate::runner::request::{Invocation, InvocationRequest, VolumeMount};
use crate::runner::result::StreamingHandle;
use crate::runner::script::{ScriptFile, ScriptKind};
use crate::runner::{Backend, BackendFuture};

/// Where the entry-point script is mounted inside the container.
pub const SCRIPT_CONTAINER_PATH: &str = "/tmp/script";

/// Default container runtime program.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Accumulates `run` arguments in their fixed order.
///
/// Each stage method appends to its own slot, so callers may invoke stages
/// in any order and still get a correctly ordered argv from [`build`].
///
/// [`build`]: DockerRunBuilder::build
#[derive(Debug, Clone, Default)]
pub struct DockerRunBuilder {
    base: Vec<String>,
    volumes: Vec<String>,
    env: Vec<String>,
    workdir: Vec<String>,
    entrypoint: Vec<String>,
    image: String,
    trailing: Vec<String>,
}

impl DockerRunBuilder {
    pub fn new(platform: &str) -> Self {
        Self {
            base: [
                "run",
                "--rm",
                "-i",
                "--platform",
                platform,
                "--cap-drop=all",
                "--security-opt=no-new-privileges",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            ..Self::default()
        }
    }

    /// Container name; part of the base flags.
    pub fn name(mut self, name: &str) -> Self {
        self.base.push("--name".to_string());
        self.base.push(name.to_string());
        self
    }

    pub fn volume(mut self, mount: &VolumeMount) -> Self {
        self.volumes.push("-v".to_string());
        self.volumes.push(mount.spec());
        self
    }

    pub fn volumes(self, mounts: &[VolumeMount]) -> Self {
        mounts.iter().fold(self, |b, m| b.volume(m))
    }

    pub fn env(mut self, entries: &[String]) -> Self {
        for entry in entries {
            self.env.push("-e".to_string());
            self.env.push(entry.clone());
        }
        self
    }

    pub fn workdir(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            self.workdir = vec!["-w".to_string(), dir.display().to_string()];
        }
        self
    }

    pub fn entrypoint(mut self, entrypoint: &str) -> Self {
        self.entrypoint = vec!["--entrypoint".to_string(), entrypoint.to_string()];
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn trailing<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trailing.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut args = self.base;
        args.extend(self.volumes);
        args.extend(self.env);
        args.extend(self.workdir);
        args.extend(self.entrypoint);
        args.push(self.image);
        args.extend(self.trailing);
        args
    }
}

/// Build the `run` argv (without the runtime program) for one request.
///
/// `script` must be the host path of the entry-point script when the request
/// is in [`Invocation::EntrypointScript`] mode; it is ignored otherwise.
pub fn build_run_args(req: &InvocationRequest, image: &str, script: Option<&Path>) -> Vec<String> {
    run_builder(req, image, script).build()
}

fn run_builder(req: &InvocationRequest, image: &str, script: Option<&Path>) -> DockerRunBuilder {
    let common = |b: DockerRunBuilder| {
        b.volumes(&req.volumes)
            .env(&req.env)
            .workdir(req.workdir())
            .image(image)
    };
    let base = DockerRunBuilder::new(req.platform());

    let builder = match req.invocation() {
        Invocation::MountOnly | Invocation::ImageDefault => {
            common(base).trailing(req.args.iter().cloned())
        }
        Invocation::EntrypointScript { entrypoint, .. } => {
            let base = match script {
                Some(path) => base.volume(&VolumeMount::read_only(path, SCRIPT_CONTAINER_PATH)),
                None => base,
            };
            common(base.entrypoint(entrypoint))
                .trailing([SCRIPT_CONTAINER_PATH])
                .trailing(req.args.iter().cloned())
        }
        Invocation::Entrypoint { entrypoint } => {
            common(base.entrypoint(entrypoint)).trailing(req.args.iter().cloned())
        }
        Invocation::Shell { command } => common(base).trailing(["sh", "-c", command]),
    };
    builder
}

/// A container name unique to this invocation.
pub fn container_name() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!(
        "fraglet-{}-{}-{nanos:08x}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Resolve every mount's host path to an existing absolute path.
pub fn resolve_volumes(volumes: &[VolumeMount]) -> Result<Vec<VolumeMount>> {
    volumes
        .iter()
        .map(|vol| {
            let host_path: PathBuf = std::fs::canonicalize(&vol.host_path).map_err(|e| {
                FragletError::config(format!(
                    "volume host path {} cannot be mounted: {e}",
                    vol.host_path.display()
                ))
            })?;
            Ok(VolumeMount {
                host_path,
                ..vol.clone()
            })
        })
        .collect()
}

/// Runs requests inside containers through a CLI-compatible runtime.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    runtime: String,
}

impl DockerBackend {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Liveness probe of the container runtime.
    pub async fn available(&self) -> bool {
        runtime_available(&self.runtime).await
    }

    async fn start(&self, cancel: CancellationToken, mut req: InvocationRequest) -> Result<StreamingHandle> {
        let image = req
            .image()
            .ok_or_else(|| FragletError::config("container backend requires a container image"))?
            .to_string();

        let platform = req.platform().to_string();
        req.volumes = resolve_volumes(&req.volumes)?;
        let stdio = req.take_stdio();

        ensure_image(&self.runtime, &image, &platform, &cancel).await?;

        let invocation = req.invocation();
        let script = match invocation {
            Invocation::EntrypointScript { script, .. } => Some(ScriptFile::write(script, ScriptKind::Data)?),
            _ => None,
        };

        let name = container_name();
        let args = run_builder(&req, &image, script.as_ref().map(ScriptFile::path))
            .name(&name)
            .build();
        info!(
            runtime = %self.runtime,
            image = %image,
            container = %name,
            platform = %platform,
            mode = invocation.label(),
            "starting container"
        );
        debug!(?args, "container argv");

        // Killing the client alone leaves the container running.
        let mut prepared = PreparedCommand::new(self.runtime.clone())
            .args(args)
            .on_cancel([self.runtime.as_str(), "kill", name.as_str()]);
        if let Some(script) = script {
            prepared = prepared.script(script);
        }

        spawn_streaming(prepared, stdio, cancel).await
    }
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME)
    }
}

impl Backend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn run_streaming(&self, cancel: CancellationToken, req: InvocationRequest) -> BackendFuture<'_> {
        Box::pin(self.start(cancel, req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(platform: &str) -> Vec<String> {
        DockerRunBuilder::new(platform).build()[..7].to_vec()
    }

    #[test]
    fn builder_orders_stages_regardless_of_call_order() {
        let args = DockerRunBuilder::new("linux/arm64")
            .trailing(["x"])
            .image("img")
            .entrypoint("ep")
            .workdir(Some(Path::new("/w")))
            .env(&["A=1".to_string()])
            .volume(&VolumeMount::read_only("/h", "/c"))
            .build();

        let mut expected = base("linux/arm64");
        expected.extend(
            ["-v", "/h:/c:ro", "-e", "A=1", "-w", "/w", "--entrypoint", "ep", "img", "x"]
                .map(String::from),
        );
        assert_eq!(args, expected);
    }

    #[test]
    fn base_flags_include_hardening() {
        let args = DockerRunBuilder::new("linux/amd64").image("img").build();
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "-i",
                "--platform",
                "linux/amd64",
                "--cap-drop=all",
                "--security-opt=no-new-privileges",
                "img",
            ]
        );
    }

    #[test]
    fn container_name_stays_with_base_flags() {
        let req = InvocationRequest::shell("echo hi").with_env("A=1");
        let args = run_builder(&req, "img", None).name("fraglet-x").build();

        let mut expected = base("linux/amd64");
        expected.extend(
            ["--name", "fraglet-x", "-e", "A=1", "img", "sh", "-c", "echo hi"].map(String::from),
        );
        assert_eq!(args, expected);
    }

    #[test]
    fn container_names_are_unique() {
        let a = container_name();
        let b = container_name();
        assert!(a.starts_with("fraglet-"));
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_volumes_rejects_missing_host_path() {
        let err = resolve_volumes(&[VolumeMount::read_only("/no/such/path/for/mount", "/c")]).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn empty_image_fails_before_anything_runs() {
        // The runtime program does not exist: reaching the probe or a spawn
        // would produce a different error.
        let backend = DockerBackend::new("/no/such/container-runtime");
        let req = InvocationRequest::shell("echo hi").with_image("");
        let err = backend
            .run_streaming(CancellationToken::new(), req)
            .await
            .unwrap_err();
        assert!(err.is_config(), "got {err:?}");
    }
}
