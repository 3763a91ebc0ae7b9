// src/runner/image.rs

//! Container image availability: liveness probe, inspect, pull.
//!
//! The inspect-then-pull sequence is not synchronised across invocations.
//! Two runs asking for the same missing image may both pull it; the second
//! pull is redundant but harmless.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{FragletError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// True when `<runtime> version` exits successfully.
pub async fn runtime_available(runtime: &str) -> bool {
    let status = Command::new(runtime)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match timeout(PROBE_TIMEOUT, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(runtime, error = %e, "container runtime probe failed to start");
            false
        }
        Err(_) => {
            debug!(runtime, "container runtime probe timed out");
            false
        }
    }
}

/// True when the image is already in the local cache.
///
/// Any inspect failure counts as "not present".
pub async fn image_present(runtime: &str, image: &str) -> bool {
    let status = Command::new(runtime)
        .args(["image", "inspect", image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(runtime, image, error = %e, "image inspect failed to start");
            false
        }
    }
}

/// Pull `image` for `platform`.
///
/// On failure the error carries the combined stdout/stderr of the pull.
pub async fn pull_image(
    runtime: &str,
    image: &str,
    platform: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(runtime, image, platform, "pulling image");

    let output = Command::new(runtime)
        .args(["pull", "--platform", platform, image])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(FragletError::Cancelled),
        output = output => output,
    };

    match output {
        Ok(out) if out.status.success() => {
            info!(image, platform, "image pulled");
            Ok(())
        }
        Ok(out) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            Err(FragletError::ImagePull {
                image: image.to_string(),
                reason: out.status.to_string(),
                output: combined,
            })
        }
        Err(e) => Err(FragletError::ImagePull {
            image: image.to_string(),
            reason: format!("could not run {runtime}: {e}"),
            output: String::new(),
        }),
    }
}

/// Make sure `image` is available locally, pulling it if needed.
pub async fn ensure_image(
    runtime: &str,
    image: &str,
    platform: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if image_present(runtime, image).await {
        debug!(image, "image already present");
        return Ok(());
    }
    pull_image(runtime, image, platform, cancel).await
}
