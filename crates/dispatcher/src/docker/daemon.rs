//! Capability interface over a container daemon.
//!
//! The dispatcher never talks to bollard directly: every lifecycle call goes
//! through this trait so that production wires [`super::DockerClient`] and
//! tests wire a fake with the same surface.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DaemonError {
    /// Transport fault: refused, reset, or timed out talking to the daemon.
    /// Counts toward the host's circuit breaker.
    #[error("{0}")]
    Connection(String),

    /// The daemon answered with an error (missing image, name conflict,
    /// unknown container, ...). Propagated unchanged, never circuit-counted.
    #[error("{0}")]
    Api(String),
}

impl DaemonError {
    pub fn is_connection(&self) -> bool {
        matches!(self, DaemonError::Connection(_))
    }
}

/// One row of the daemon's container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Snapshot of a single container as reported by inspect.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw daemon status string ("created", "running", "exited", ...).
    pub status: String,
    pub exit_code: Option<i64>,
    /// RFC3339 timestamps as reported; Docker's zero time is normalized to
    /// `None` by the adapter.
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Application-written error annotation (`State.Error`).
    pub custom_error: String,
}

pub type LogChunkStream = BoxStream<'static, Result<Bytes, DaemonError>>;

#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    /// Pull `image:tag` onto the host, waiting for the pull to finish.
    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), DaemonError>;

    /// Create a container (and start it when `detach` is set). Returns the
    /// daemon-assigned container id.
    async fn run_container(
        &self,
        image: &str,
        environment: &HashMap<String, String>,
        command: &str,
        detach: bool,
        name: &str,
    ) -> Result<String, DaemonError>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerDetails, DaemonError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DaemonError>;

    /// Collected output for the selected streams, `None` when the daemon has
    /// recorded nothing for the container.
    async fn container_logs(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Option<String>, DaemonError>;

    /// Follow the container's output as a stream of raw chunks.
    async fn stream_logs(&self, container_id: &str) -> Result<LogChunkStream, DaemonError>;

    async fn stop_container(&self, container_id: &str) -> Result<(), DaemonError>;

    async fn rename_container(&self, container_id: &str, new_name: &str)
        -> Result<(), DaemonError>;

    async fn remove_container(&self, container_id: &str) -> Result<(), DaemonError>;
}
