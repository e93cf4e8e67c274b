//! Minimal job model the dispatcher operates on.
//!
//! The queue, retry scheduler and persistence of these records belong to the
//! embedding service; the dispatcher only reads the identifiers and mutates
//! the host-binding fields of the execution metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
}

impl Task {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub task_id: String,
}

/// One attempt at running a job. Carries the host binding and the container
/// identifier once the container has been created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub execution_id: String,
    pub job_id: String,
    pub metadata: ExecutionMetadata,
}

impl JobExecution {
    pub fn new(execution_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            job_id: job_id.into(),
            metadata: ExecutionMetadata::default(),
        }
    }
}

/// Open metadata bag on an execution. The dispatcher only touches the named
/// fields; everything else the job system stores rides along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ExecutionMetadata {
    /// The host this execution is bound to, if both fields are recorded.
    pub fn bound_host(&self) -> Option<(&str, u16)> {
        match (&self.docker_host, self.docker_port) {
            (Some(host), Some(port)) => Some((host.as_str(), port)),
            _ => None,
        }
    }

    /// Record the selected host. A bound execution always revisits its
    /// original host, so an existing binding is left untouched.
    pub fn bind_host(&mut self, host: &str, port: u16) {
        if self.docker_host.is_none() {
            self.docker_host = Some(host.to_string());
            self.docker_port = Some(port);
        }
    }

    /// Drop the host binding so the next attempt re-selects.
    pub fn clear_host(&mut self) {
        self.docker_host = None;
        self.docker_port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_host_records_both_fields() {
        let mut metadata = ExecutionMetadata::default();
        metadata.bind_host("localhost", 2375);
        assert_eq!(metadata.bound_host(), Some(("localhost", 2375)));
    }

    #[test]
    fn bind_host_never_overwrites_existing_binding() {
        let mut metadata = ExecutionMetadata::default();
        metadata.bind_host("host-a", 1234);
        metadata.bind_host("host-b", 4567);
        assert_eq!(metadata.bound_host(), Some(("host-a", 1234)));
    }

    #[test]
    fn clear_host_removes_the_binding() {
        let mut metadata = ExecutionMetadata::default();
        metadata.bind_host("localhost", 2375);
        metadata.clear_host();
        assert_eq!(metadata.bound_host(), None);
        assert!(metadata.docker_host.is_none());
        assert!(metadata.docker_port.is_none());
    }

    #[test]
    fn extra_fields_round_trip_through_serde() {
        let raw = r#"{"docker_host":"localhost","docker_port":2375,"retries":3}"#;
        let metadata: ExecutionMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(metadata.bound_host(), Some(("localhost", 2375)));
        assert_eq!(metadata.extra["retries"], serde_json::json!(3));
    }
}
