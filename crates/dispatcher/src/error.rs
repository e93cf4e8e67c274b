use thiserror::Error;

use crate::blacklist::StoreError;
use crate::docker::daemon::DaemonError;

/// Standard Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Connection-level failure talking to a daemon. By the time this
    /// surfaces, the host circuit has been updated and the execution has
    /// been unbound from the host, so the caller can reschedule elsewhere.
    #[error("Connection to host {host}:{port} failed with error: {message}")]
    HostUnavailable {
        host: String,
        port: u16,
        message: String,
    },

    /// Selection could not satisfy the request against the current
    /// blacklist and circuit state.
    #[error("Failed to find a docker host for task id {task_id}.")]
    NoAvailableHosts { task_id: String },

    /// The operation needs execution metadata that is missing. Not
    /// retryable without caller intervention.
    #[error("{0}")]
    InvalidState(String),

    /// Semantic daemon failure (missing image, name conflict, ...),
    /// propagated with its original message.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ExecutorError {
    pub(crate) fn host_unavailable(
        host: impl Into<String>,
        port: u16,
        message: impl Into<String>,
    ) -> Self {
        ExecutorError::HostUnavailable {
            host: host.into(),
            port,
            message: message.into(),
        }
    }
}
