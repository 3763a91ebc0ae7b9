// src/runner/script.rs

//! Short-lived script files backing a single invocation.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

use crate::errors::{FragletError, Result};

const SCRIPT_PREFIX: &str = "fraglet-script-";

/// How the file is going to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Read by an interpreter or mounted into a container (0644).
    Data,
    /// Executed directly so the kernel honours its shebang (0755).
    Executable,
}

impl ScriptKind {
    #[cfg(unix)]
    fn mode(self) -> u32 {
        match self {
            ScriptKind::Data => 0o644,
            ScriptKind::Executable => 0o755,
        }
    }
}

/// A uniquely named file in the platform temp directory.
///
/// The file is removed by [`ScriptFile::remove`], or on drop as a fallback.
#[derive(Debug)]
pub struct ScriptFile {
    path: TempPath,
}

impl ScriptFile {
    /// Write `contents` to a fresh temp file and close it.
    ///
    /// The write handle is closed before returning so the file can be
    /// executed straight away.
    pub fn write(contents: &str, kind: ScriptKind) -> Result<Self> {
        let dir = temp_dir();
        let wrap = |source| FragletError::TempScript {
            dir: dir.clone(),
            source,
        };

        let mut file = Builder::new()
            .prefix(SCRIPT_PREFIX)
            .tempfile_in(&dir)
            .map_err(wrap)?;
        file.write_all(contents.as_bytes()).map_err(wrap)?;
        file.as_file().sync_all().map_err(wrap)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(kind.mode());
            file.as_file().set_permissions(perms).map_err(wrap)?;
        }

        let path = file.into_temp_path();
        debug!(path = %path.display(), ?kind, "wrote temp script");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Failures are logged, never returned.
    pub fn remove(self) {
        let shown = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!(path = %shown.display(), "removed temp script"),
            Err(e) => warn!(path = %shown.display(), error = %e, "failed to remove temp script"),
        }
    }
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir();
    std::path::absolute(&dir).unwrap_or(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_contents_under_temp_dir_with_prefix() {
        let script = ScriptFile::write("echo hi\n", ScriptKind::Data).unwrap();
        let path = script.path().to_path_buf();

        assert!(path.is_absolute());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(SCRIPT_PREFIX));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hi\n");

        script.remove();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn applies_mode_for_kind() {
        use std::os::unix::fs::PermissionsExt;

        let data = ScriptFile::write("x", ScriptKind::Data).unwrap();
        let exec = ScriptFile::write("x", ScriptKind::Executable).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(data.path()), 0o644);
        assert_eq!(mode(exec.path()), 0o755);

        data.remove();
        exec.remove();
    }

    #[test]
    fn dropping_also_removes_the_file() {
        let script = ScriptFile::write("x", ScriptKind::Data).unwrap();
        let path = script.path().to_path_buf();
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn names_are_unique() {
        let a = ScriptFile::write("a", ScriptKind::Data).unwrap();
        let b = ScriptFile::write("b", ScriptKind::Data).unwrap();
        assert_ne!(a.path(), b.path());
        a.remove();
        b.remove();
    }
}
