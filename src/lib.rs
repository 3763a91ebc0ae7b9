// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod runner;
pub mod vein;

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{load_or_default, ConfigFile};
use crate::runner::image::{pull_image, runtime_available};
use crate::runner::script::{ScriptFile, ScriptKind};
use crate::runner::{InvocationRequest, Runner, VolumeMount};
use crate::vein::{ExtensionMap, VeinRegistry};

/// Exit status reported when the run was interrupted.
pub const EXIT_CANCELLED: i32 = 130;

/// High-level entry point used by `main.rs`.
///
/// Returns the exit code the process should terminate with: the program's
/// own exit code for runs, 0/1 for `refresh`.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(args.config.as_deref())?;
    let registry = VeinRegistry::load(&cfg)?;
    debug!(veins = registry.len(), "vein registry loaded");

    // Ctrl-C → cancel whatever is running.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("interrupt received; cancelling");
            cancel.cancel();
        });
    }

    match args.command.clone() {
        Some(Command::Refresh { all, veins }) => refresh(&cfg, &registry, all, &veins, &cancel).await,
        Some(Command::Guide { mode, vein }) => guide(&cfg, &registry, &vein, mode.as_deref(), &cancel).await,
        None => run_fragment(&cfg, &registry, args, &cancel).await,
    }
}

async fn run_fragment(
    cfg: &ConfigFile,
    registry: &VeinRegistry,
    args: CliArgs,
    cancel: &CancellationToken,
) -> Result<i32> {
    let (vein_name, vein_mode) = match args.vein.as_deref() {
        Some(spec) => {
            let (name, mode) = parse_vein_spec(spec);
            (Some(name), mode)
        }
        None => (None, None),
    };
    let mode = merge_mode(vein_mode, args.mode)?;

    let script_path = args.script.as_deref().filter(|s| *s != "-").map(Path::new);
    let image = resolve_image(registry, args.image.as_deref(), vein_name.as_deref(), script_path)?;

    let code = read_code(script_path, tokio::io::stdin()).await?;

    let fraglet_path = args
        .fraglet_path
        .unwrap_or_else(|| cfg.runner.fraglet_path.clone());

    ensure_runtime(cfg).await?;

    let script = ScriptFile::write(&code, ScriptKind::Data)?;
    let mut req = container_request(cfg, &image, mode.as_deref())
        .with_volume(VolumeMount::read_only(script.path(), fraglet_path))
        .with_args(args.args);

    // Code from a file leaves stdin free for the program.
    let stdin = std::io::stdin();
    if script_path.is_some() && !stdin.is_terminal() {
        req = req.with_stdin_reader(Box::new(tokio::io::stdin()));
    }

    info!(image = %image, mode = ?mode, "running fragment");
    let outcome = Runner::new(&cfg.runner.container_runtime).run(cancel, req).await;
    script.remove();
    finish(outcome)
}

async fn guide(
    cfg: &ConfigFile,
    registry: &VeinRegistry,
    vein: &str,
    mode: Option<&str>,
    cancel: &CancellationToken,
) -> Result<i32> {
    let vein = registry.require(vein)?;
    ensure_runtime(cfg).await?;

    let req = container_request(cfg, &vein.container, mode).with_args(["guide"]);
    let outcome = Runner::new(&cfg.runner.container_runtime).run(cancel, req).await;
    finish(outcome)
}

async fn refresh(
    cfg: &ConfigFile,
    registry: &VeinRegistry,
    all: bool,
    names: &[String],
    cancel: &CancellationToken,
) -> Result<i32> {
    let names: Vec<String> = if all {
        registry.list().into_iter().map(str::to_string).collect()
    } else {
        names.to_vec()
    };
    if names.is_empty() {
        bail!("no veins to refresh (name some or pass --all)");
    }

    ensure_runtime(cfg).await?;

    let mut failures = 0usize;
    for name in &names {
        let vein = match registry.require(name) {
            Ok(vein) => vein,
            Err(e) => {
                eprintln!("{name}: {e}");
                failures += 1;
                continue;
            }
        };

        match pull_image(
            &cfg.runner.container_runtime,
            &vein.container,
            &cfg.runner.platform,
            cancel,
        )
        .await
        {
            Ok(()) => println!("refreshed {name} ({})", vein.container),
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                eprintln!("{name}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        warn!(failures, total = names.len(), "some images failed to refresh");
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Container request with the program's output streamed to our own stdio.
fn container_request(cfg: &ConfigFile, image: &str, mode: Option<&str>) -> InvocationRequest {
    let mut req = InvocationRequest::new()
        .with_image(image)
        .with_platform(cfg.runner.platform.clone())
        .with_stdout(Box::new(tokio::io::stdout()))
        .with_stderr(Box::new(tokio::io::stderr()));
    if let Some(mode) = mode {
        req = req.with_env(mode_env(mode));
    }
    req
}

async fn ensure_runtime(cfg: &ConfigFile) -> Result<()> {
    let runtime = &cfg.runner.container_runtime;
    if !runtime_available(runtime).await {
        bail!("container runtime '{runtime}' is not available");
    }
    Ok(())
}

fn finish(outcome: errors::Result<runner::AggregateResult>) -> Result<i32> {
    match outcome {
        Ok(result) => {
            debug!(exit_code = result.exit_code, duration = ?result.duration, "fragment finished");
            Ok(result.exit_code)
        }
        Err(e) if e.is_cancelled() => {
            warn!("execution cancelled");
            Ok(EXIT_CANCELLED)
        }
        Err(e) => Err(e.into()),
    }
}

/// Split `name[:mode]`. An empty mode counts as none.
pub fn parse_vein_spec(spec: &str) -> (String, Option<String>) {
    match spec.split_once(':') {
        Some((name, mode)) if !mode.is_empty() => (name.to_string(), Some(mode.to_string())),
        Some((name, _)) => (name.to_string(), None),
        None => (spec.to_string(), None),
    }
}

/// The mode may come from `--vein name:mode` or `--mode`, not both.
pub fn merge_mode(from_vein: Option<String>, from_flag: Option<String>) -> Result<Option<String>> {
    match (from_vein, from_flag) {
        (Some(a), Some(b)) => Err(anyhow!(
            "mode given twice ('{a}' in --vein and '{b}' in --mode)"
        )),
        (a, b) => Ok(a.or(b).filter(|m| !m.is_empty())),
    }
}

/// `FRAGLET_CONFIG` entry selecting the mode's config inside the container.
pub fn mode_env(mode: &str) -> String {
    format!("FRAGLET_CONFIG=/fraglet-{mode}.yml")
}

/// Image for a run: explicit `--image`, else the named vein's, else the vein
/// owning the script's extension.
pub fn resolve_image(
    registry: &VeinRegistry,
    image: Option<&str>,
    vein: Option<&str>,
    script: Option<&Path>,
) -> Result<String> {
    if let Some(image) = image.filter(|i| !i.is_empty()) {
        return Ok(image.to_string());
    }
    if let Some(name) = vein {
        return Ok(registry.require(name)?.container.clone());
    }
    let Some(script) = script else {
        bail!("--vein or --image is required when reading code from stdin");
    };
    let extensions = ExtensionMap::new(registry);
    let name = extensions.vein_for_file(script)?;
    Ok(registry.require(name)?.container.clone())
}

/// Fragment code from the script file (its shebang line dropped) or, when
/// there is no file, verbatim from `stdin`.
pub async fn read_code<R>(script: Option<&Path>, mut stdin: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    match script {
        Some(path) => {
            let code = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(strip_shebang(&code).to_string())
        }
        None => {
            let mut code = String::new();
            stdin
                .read_to_string(&mut code)
                .await
                .context("reading code from stdin")?;
            Ok(code)
        }
    }
}

/// Drop a leading `#!` line; the vein decides how the code runs.
pub fn strip_shebang(code: &str) -> &str {
    if !code.starts_with("#!") {
        return code;
    }
    match code.find('\n') {
        Some(idx) => &code[idx + 1..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vein::Vein;

    fn registry() -> VeinRegistry {
        let mut reg = VeinRegistry::new();
        reg.add(Vein::new("python", "example/python:3").with_extension(".py"))
            .unwrap();
        reg
    }

    #[test]
    fn vein_spec_splits_mode() {
        assert_eq!(parse_vein_spec("python"), ("python".to_string(), None));
        assert_eq!(
            parse_vein_spec("python:main"),
            ("python".to_string(), Some("main".to_string()))
        );
        assert_eq!(parse_vein_spec("python:"), ("python".to_string(), None));
    }

    #[test]
    fn mode_from_both_places_is_rejected() {
        assert!(merge_mode(Some("a".into()), Some("b".into())).is_err());
        assert_eq!(merge_mode(None, Some("b".into())).unwrap().as_deref(), Some("b"));
        assert_eq!(merge_mode(None, None).unwrap(), None);
    }

    #[test]
    fn mode_env_names_config_file() {
        assert_eq!(mode_env("main"), "FRAGLET_CONFIG=/fraglet-main.yml");
    }

    #[test]
    fn shebang_line_is_stripped() {
        assert_eq!(strip_shebang("#!/usr/bin/env python\nprint(1)\n"), "print(1)\n");
        assert_eq!(strip_shebang("#!/bin/sh"), "");
        assert_eq!(strip_shebang("print(1)"), "print(1)");
    }

    #[tokio::test]
    async fn shebang_is_stripped_from_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.py");
        std::fs::write(&path, "#!/usr/bin/env python\nprint(1)\n").unwrap();

        let from_file = read_code(Some(path.as_path()), &b"unused"[..]).await.unwrap();
        assert_eq!(from_file, "print(1)\n");

        let from_stdin = read_code(None, &b"#!/bin/sh\necho hi\n"[..]).await.unwrap();
        assert_eq!(from_stdin, "#!/bin/sh\necho hi\n");
    }

    #[test]
    fn image_resolution_order() {
        let reg = registry();
        let script = Path::new("hello.py");
        assert_eq!(
            resolve_image(&reg, Some("alpine"), Some("python"), Some(script)).unwrap(),
            "alpine"
        );
        assert_eq!(
            resolve_image(&reg, None, Some("python"), None).unwrap(),
            "example/python:3"
        );
        assert_eq!(
            resolve_image(&reg, None, None, Some(script)).unwrap(),
            "example/python:3"
        );
        assert!(resolve_image(&reg, None, None, None).is_err());
        assert!(resolve_image(&reg, None, Some("ruby"), None).is_err());
    }
}
