// src/runner/request.rs

//! Invocation request model and mode classification.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};

/// Platform used for container runs when the request does not name one.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Caller-supplied stdin stream.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Caller-supplied stdout/stderr sink.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A host path exposed inside the container.
///
/// Mounts are read-only unless `writable` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub writable: bool,
}

impl VolumeMount {
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            writable: false,
        }
    }

    pub fn writable(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            writable: true,
            ..Self::read_only(host_path, container_path)
        }
    }

    /// `-v` value: `host:container`, with `:ro` unless writable.
    pub fn spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host_path.display(), self.container_path);
        if !self.writable {
            spec.push_str(":ro");
        }
        spec
    }
}

/// Everything needed to execute one fragment or command.
///
/// Empty strings are treated the same as absent values.
#[derive(Default)]
pub struct InvocationRequest {
    /// Shell command text, or the script body when an entry point is set.
    pub command: Option<String>,
    /// Container image reference.
    pub image: Option<String>,
    /// Interpreter/binary overriding the image's default entry point.
    pub entrypoint: Option<String>,
    /// Target platform; [`DEFAULT_PLATFORM`] when unset.
    pub platform: Option<String>,
    /// `KEY=VALUE` entries, applied in order (last wins).
    pub env: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub volumes: Vec<VolumeMount>,
    pub args: Vec<String>,
    /// Buffered stdin; ignored when `stdin_reader` is set.
    pub stdin: Option<String>,
    pub stdin_reader: Option<InputStream>,
    /// When set, stdout is written through and not captured.
    pub stdout: Option<OutputSink>,
    /// When set, stderr is written through and not captured.
    pub stderr: Option<OutputSink>,
}

impl fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("command", &self.command)
            .field("image", &self.image)
            .field("entrypoint", &self.entrypoint)
            .field("platform", &self.platform)
            .field("env", &self.env)
            .field("workdir", &self.workdir)
            .field("volumes", &self.volumes)
            .field("args", &self.args)
            .field("stdin", &self.stdin)
            .field("stdin_reader", &self.stdin_reader.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl InvocationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a plain shell command.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new().with_command(command)
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_stdin_reader(mut self, reader: InputStream) -> Self {
        self.stdin_reader = Some(reader);
        self
    }

    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    pub fn command(&self) -> Option<&str> {
        non_empty(self.command.as_deref())
    }

    pub fn image(&self) -> Option<&str> {
        non_empty(self.image.as_deref())
    }

    pub fn entrypoint(&self) -> Option<&str> {
        non_empty(self.entrypoint.as_deref())
    }

    pub fn platform(&self) -> &str {
        non_empty(self.platform.as_deref()).unwrap_or(DEFAULT_PLATFORM)
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    /// Classify the request into exactly one execution mode.
    pub fn invocation(&self) -> Invocation<'_> {
        match (self.entrypoint(), self.command()) {
            (None, None) if !self.volumes.is_empty() => Invocation::MountOnly,
            (Some(entrypoint), Some(script)) => Invocation::EntrypointScript { entrypoint, script },
            (Some(entrypoint), None) => Invocation::Entrypoint { entrypoint },
            (None, Some(command)) => Invocation::Shell { command },
            (None, None) => Invocation::ImageDefault,
        }
    }

    /// Detach the stdio wiring from the request, resolving stdin precedence.
    pub(crate) fn take_stdio(&mut self) -> StdioWiring {
        let stdin = match (self.stdin_reader.take(), self.stdin.take()) {
            (Some(reader), _) => StdinSource::Reader(reader),
            (None, Some(buffer)) if !buffer.is_empty() => StdinSource::Buffer(buffer),
            _ => StdinSource::Null,
        };

        StdioWiring {
            stdin,
            stdout: self.stdout.take(),
            stderr: self.stderr.take(),
        }
    }
}

/// The five ways a request can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    /// Volumes only: the image's own entry point runs the mounted code.
    MountOnly,
    /// Script body written to a temp file and handed to the entry point.
    EntrypointScript { entrypoint: &'a str, script: &'a str },
    /// Entry point invoked directly with the positional arguments.
    Entrypoint { entrypoint: &'a str },
    /// Command text run through `sh -c`.
    Shell { command: &'a str },
    /// Nothing to override: image default entry point plus arguments.
    ImageDefault,
}

impl Invocation<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Invocation::MountOnly => "mount-only",
            Invocation::EntrypointScript { .. } => "entrypoint-script",
            Invocation::Entrypoint { .. } => "entrypoint",
            Invocation::Shell { .. } => "shell",
            Invocation::ImageDefault => "image-default",
        }
    }
}

pub(crate) enum StdinSource {
    Null,
    Buffer(String),
    Reader(InputStream),
}

pub(crate) struct StdioWiring {
    pub stdin: StdinSource,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
}

/// True when the text starts with `#!`, ignoring leading whitespace.
pub fn has_shebang(command: &str) -> bool {
    command.trim_start().starts_with("#!")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_all_five_modes() {
        let mount = InvocationRequest::new().with_volume(VolumeMount::read_only("/a", "/b"));
        assert_eq!(mount.invocation(), Invocation::MountOnly);

        let script = InvocationRequest::shell("print(1)").with_entrypoint("python");
        assert_eq!(
            script.invocation(),
            Invocation::EntrypointScript {
                entrypoint: "python",
                script: "print(1)"
            }
        );

        let ep = InvocationRequest::new().with_entrypoint("ls");
        assert_eq!(ep.invocation(), Invocation::Entrypoint { entrypoint: "ls" });

        let shell = InvocationRequest::shell("echo hi");
        assert_eq!(shell.invocation(), Invocation::Shell { command: "echo hi" });

        assert_eq!(InvocationRequest::new().invocation(), Invocation::ImageDefault);
    }

    #[test]
    fn volumes_do_not_win_over_command() {
        let req = InvocationRequest::shell("echo hi").with_volume(VolumeMount::read_only("/a", "/b"));
        assert_eq!(req.invocation(), Invocation::Shell { command: "echo hi" });
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let req = InvocationRequest::shell("").with_entrypoint("").with_platform("");
        assert_eq!(req.invocation(), Invocation::ImageDefault);
        assert_eq!(req.platform(), DEFAULT_PLATFORM);
        assert!(req.image().is_none());
    }

    #[test]
    fn reader_takes_precedence_over_buffered_stdin() {
        let mut req = InvocationRequest::new()
            .with_stdin("buffered")
            .with_stdin_reader(Box::new(&b"stream"[..]));
        let wiring = req.take_stdio();
        assert!(matches!(wiring.stdin, StdinSource::Reader(_)));
    }

    #[test]
    fn empty_buffered_stdin_is_null() {
        let mut req = InvocationRequest::new().with_stdin("");
        assert!(matches!(req.take_stdio().stdin, StdinSource::Null));
    }

    #[test]
    fn mount_spec_is_read_only_by_default() {
        assert_eq!(VolumeMount::read_only("/h", "/c").spec(), "/h:/c:ro");
        assert_eq!(VolumeMount::writable("/h", "/c").spec(), "/h:/c");
    }

    #[test]
    fn shebang_detection_ignores_leading_whitespace() {
        assert!(has_shebang("#!/bin/sh\necho"));
        assert!(has_shebang("\n  #!/bin/sh"));
        assert!(!has_shebang("echo '#!'"));
    }
}
