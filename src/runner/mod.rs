// src/runner/mod.rs

//! Execution core.
//!
//! - [`request`] holds the invocation model and mode classification.
//! - [`docker`] and [`local`] are the two backends; both build a
//!   [`executor::PreparedCommand`] and hand it to the streaming executor.
//! - [`executor`] starts the process and exposes a [`StreamingHandle`].
//! - [`collector`] drains a handle into an [`AggregateResult`].
//! - [`image`] checks for and pulls container images.
//! - [`script`] owns the temp files some modes need.
//!
//! [`Runner`] is the entry point: it picks a backend per request and offers
//! both the streaming and the synchronous call.

pub mod collector;
pub mod docker;
pub mod executor;
pub mod image;
pub mod local;
pub mod request;
pub mod result;
pub mod script;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::Result;

pub use collector::collect;
pub use docker::{DockerBackend, DockerRunBuilder, SCRIPT_CONTAINER_PATH};
pub use local::LocalBackend;
pub use request::{Invocation, InvocationRequest, VolumeMount, DEFAULT_PLATFORM};
pub use result::{AggregateResult, StreamingHandle};

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<StreamingHandle>> + Send + 'a>>;

/// One way of executing an invocation.
///
/// Production code uses [`DockerBackend`] and [`LocalBackend`]; tests can
/// drive either directly.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start the invocation and return its live handle.
    ///
    /// Cancelling `cancel` kills the process at any point.
    fn run_streaming(&self, cancel: CancellationToken, req: InvocationRequest) -> BackendFuture<'_>;
}

/// Picks a backend for each request and runs it.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    docker: DockerBackend,
    local: LocalBackend,
}

impl Runner {
    /// Runner using `runtime` (e.g. `docker`, `podman`) for container runs.
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            docker: DockerBackend::new(runtime),
            local: LocalBackend,
        }
    }

    /// Container backend when an image is requested and the runtime answers
    /// its liveness probe; the local backend otherwise.
    pub async fn select_backend(&self, wants_container: bool) -> &dyn Backend {
        if wants_container && self.docker.available().await {
            debug!(runtime = %self.docker.runtime(), "selected container backend");
            &self.docker
        } else {
            debug!(wants_container, "selected local backend");
            &self.local
        }
    }

    pub async fn run_streaming(
        &self,
        cancel: &CancellationToken,
        req: InvocationRequest,
    ) -> Result<StreamingHandle> {
        let backend = self.select_backend(req.image().is_some()).await;
        debug!(backend = backend.name(), "dispatching invocation");
        backend.run_streaming(cancel.clone(), req).await
    }

    /// Run to completion and return the aggregate result.
    ///
    /// A non-zero exit code is not an error.
    pub async fn run(&self, cancel: &CancellationToken, req: InvocationRequest) -> Result<AggregateResult> {
        let handle = self.run_streaming(cancel, req).await?;
        collect(cancel, handle).await
    }
}
