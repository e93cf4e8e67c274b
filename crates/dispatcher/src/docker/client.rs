//! Bollard-backed production adapter for [`ContainerDaemon`].

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RenameContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;

use super::daemon::{
    ContainerDaemon, ContainerDetails, ContainerSummary, DaemonError, LogChunkStream,
};

/// Daemon client for one `host:port` entry of the pool.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
    address: String,
}

impl DockerClient {
    /// Connect to a TCP daemon. `timeout_secs` caps every call issued
    /// through this client; timeouts surface as connection faults.
    pub fn connect(host: &str, port: u16, timeout_secs: u64) -> Result<Self, DaemonError> {
        let address = format!("{host}:{port}");
        let client = Docker::connect_with_http(
            &format!("tcp://{address}"),
            timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| DaemonError::Connection(e.to_string()))?;

        Ok(DockerClient { client, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Split a daemon fault into the two classes the circuit breaker cares
/// about. Server responses and payload decoding problems are semantic;
/// everything else (refused, reset, timed out, I/O) is a connection fault.
fn classify_bollard_error(err: bollard::errors::Error) -> DaemonError {
    use bollard::errors::Error;
    match err {
        e @ (Error::DockerResponseServerError { .. }
        | Error::JsonDataError { .. }
        | Error::DockerStreamError { .. }
        | Error::DockerContainerWaitError { .. }) => DaemonError::Api(e.to_string()),
        e => DaemonError::Connection(e.to_string()),
    }
}

fn container_name(name: Option<&str>) -> String {
    name.map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

/// Docker reports unfinished timestamps as the zero time.
fn normalize_timestamp(ts: Option<String>) -> Option<String> {
    ts.filter(|t| !t.is_empty() && !t.starts_with("0001-01-01"))
}

fn details_from_inspect(response: ContainerInspectResponse) -> ContainerDetails {
    let state = response.state.as_ref();
    let config_image = response.config.as_ref().and_then(|c| c.image.clone());

    ContainerDetails {
        id: response.id.clone().unwrap_or_default(),
        name: container_name(response.name.as_deref()),
        image: config_image.or(response.image).unwrap_or_default(),
        status: state
            .and_then(|s| s.status.as_ref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        exit_code: state.and_then(|s| s.exit_code),
        started_at: normalize_timestamp(state.and_then(|s| s.started_at.clone())),
        finished_at: normalize_timestamp(state.and_then(|s| s.finished_at.clone())),
        custom_error: state.and_then(|s| s.error.clone()).unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerDaemon for DockerClient {
    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), DaemonError> {
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    tracing::debug!(host = %self.address, status = ?info.status, "image pull progress");
                }
                Err(e) => return Err(classify_bollard_error(e)),
            }
        }

        Ok(())
    }

    async fn run_container(
        &self,
        image: &str,
        environment: &HashMap<String, String>,
        command: &str,
        detach: bool,
        name: &str,
    ) -> Result<String, DaemonError> {
        let env: Vec<String> = environment.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let cmd: Vec<String> = command.split_whitespace().map(str::to_string).collect();

        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            env: Some(env),
            cmd: Some(cmd),
            ..Default::default()
        };
        let options = Some(CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, body)
            .await
            .map_err(classify_bollard_error)?;

        if detach {
            self.client
                .start_container(&created.id, None)
                .await
                .map_err(classify_bollard_error)?;
        }

        Ok(created.id)
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerDetails, DaemonError> {
        let response = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(classify_bollard_error)?;
        Ok(details_from_inspect(response))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DaemonError> {
        let options = Some(ListContainersOptions {
            all: true,
            ..Default::default()
        });

        let containers = self
            .client
            .list_containers(options)
            .await
            .map_err(classify_bollard_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: container_name(c.names.as_deref().and_then(|n| n.first()).map(String::as_str)),
                image: c.image.unwrap_or_default(),
            })
            .collect())
    }

    async fn container_logs(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Option<String>, DaemonError> {
        let options = Some(LogsOptions {
            follow: false,
            stdout,
            stderr,
            since: 0,
            until: 0,
            timestamps: false,
            tail: "all".to_string(),
        });

        let mut stream = self.client.logs(container_id, options);
        let mut collected = String::new();
        let mut any = false;

        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(classify_bollard_error)?;
            any = true;
            collected.push_str(&String::from_utf8_lossy(&output.into_bytes()));
        }

        Ok(any.then_some(collected))
    }

    async fn stream_logs(&self, container_id: &str) -> Result<LogChunkStream, DaemonError> {
        let options = Some(LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: false,
            tail: "all".to_string(),
        });

        let stream = self
            .client
            .logs(container_id, options)
            .map(|result| match result {
                Ok(output) => Ok(output.into_bytes()),
                Err(e) => Err(classify_bollard_error(e)),
            });

        Ok(stream.boxed())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), DaemonError> {
        self.client
            .stop_container(container_id, None)
            .await
            .map_err(classify_bollard_error)
    }

    async fn rename_container(
        &self,
        container_id: &str,
        new_name: &str,
    ) -> Result<(), DaemonError> {
        self.client
            .rename_container(
                container_id,
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(classify_bollard_error)
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DaemonError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: false,
            ..Default::default()
        });

        self.client
            .remove_container(container_id, options)
            .await
            .map_err(classify_bollard_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_classify_as_semantic() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        };
        let classified = classify_bollard_error(err);
        assert!(!classified.is_connection());
        assert!(classified.to_string().contains("No such container: abc"));
    }

    #[test]
    fn io_errors_classify_as_connection() {
        let err = bollard::errors::Error::IOError {
            err: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(classify_bollard_error(err).is_connection());
    }

    #[test]
    fn timeouts_classify_as_connection() {
        assert!(classify_bollard_error(bollard::errors::Error::RequestTimeoutError).is_connection());
    }

    #[test]
    fn zero_timestamps_normalize_to_none() {
        assert_eq!(normalize_timestamp(Some("0001-01-01T00:00:00Z".into())), None);
        assert_eq!(normalize_timestamp(Some(String::new())), None);
        assert_eq!(
            normalize_timestamp(Some("2018-08-27T17:14:14.1951232Z".into())),
            Some("2018-08-27T17:14:14.1951232Z".to_string())
        );
    }

    #[test]
    fn container_names_drop_the_leading_slash() {
        assert_eq!(container_name(Some("/fastlane-job-123")), "fastlane-job-123");
        assert_eq!(container_name(None), "");
    }
}
