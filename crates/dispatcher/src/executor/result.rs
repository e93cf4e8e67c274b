//! Job result assembly — container inspection normalized for the job system.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Executor;
use crate::docker::daemon::ContainerDetails;
use crate::error::{ExecutorError, Result};
use crate::job::{Job, JobExecution, Task};

/// Normalized container status. Daemon status strings outside the known
/// domain map to `Unknown` rather than guessing a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Created,
    Running,
    Done,
    Failed,
    Unknown,
}

impl ExecutionStatus {
    /// Map a daemon status string onto the normalized domain. Transitional
    /// states (`restarting`, `paused`, `removing`) count as still running;
    /// only `exited` and `dead` are terminal.
    pub fn from_daemon(status: &str) -> Self {
        match status {
            "created" => ExecutionStatus::Created,
            "running" | "restarting" | "paused" | "removing" => ExecutionStatus::Running,
            "exited" => ExecutionStatus::Done,
            "dead" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i64>,
    /// Container stdout, empty when the daemon recorded nothing.
    pub log: String,
    /// Custom error annotation and/or stderr, composed per the job-system
    /// contract.
    pub error: String,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub finished_at: Option<DateTime<FixedOffset>>,
}

impl JobResult {
    fn assemble(
        details: ContainerDetails,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Self {
        JobResult {
            status: ExecutionStatus::from_daemon(&details.status),
            exit_code: details.exit_code,
            log: stdout.unwrap_or_default(),
            error: compose_error(&details.custom_error, stderr.as_deref()),
            started_at: parse_timestamp(details.started_at.as_deref()),
            finished_at: parse_timestamp(details.finished_at.as_deref()),
        }
    }
}

fn compose_error(custom_error: &str, stderr: Option<&str>) -> String {
    let stderr = stderr.unwrap_or("");
    if !custom_error.is_empty() && !stderr.is_empty() {
        format!("{custom_error}\n\nstderr:\n{stderr}")
    } else if !stderr.is_empty() {
        stderr.to_string()
    } else {
        custom_error.to_string()
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(timestamp = raw, "daemon reported an unparseable timestamp: {}", err);
            None
        }
    }
}

impl Executor {
    /// Inspect the execution's container and collect its output into a
    /// normalized [`JobResult`].
    pub async fn get_result(
        &self,
        task: &Task,
        _job: &Job,
        execution: &mut JobExecution,
    ) -> Result<JobResult> {
        let container_id = execution.metadata.container_id.clone().ok_or_else(|| {
            ExecutorError::InvalidState(
                "Can't fetch results without container_id in execution metadata.".to_string(),
            )
        })?;

        let bound = self.acquire_client(task, execution, None).await?;
        let client = bound.client.clone();

        let details = self
            .call_daemon(&bound, execution, client.inspect_container(&container_id))
            .await?;
        let stdout = self
            .call_daemon(
                &bound,
                execution,
                client.container_logs(&container_id, true, false),
            )
            .await?;
        let stderr = self
            .call_daemon(
                &bound,
                execution,
                client.container_logs(&container_id, false, true),
            )
            .await?;

        Ok(JobResult::assemble(details, stdout, stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::daemon::DaemonError;
    use crate::testing::{execution_fixture, test_executor, FakeContainer};

    fn result_container(
        status: &str,
        exit_code: Option<i64>,
        stdout: Option<&str>,
        stderr: Option<&str>,
        custom_error: &str,
        started_at: Option<&str>,
        finished_at: Option<&str>,
    ) -> FakeContainer {
        FakeContainer {
            id: "fastlane-job-123".to_string(),
            name: "fastlane-job-123".to_string(),
            image: "ubuntu:latest".to_string(),
            status: status.to_string(),
            exit_code,
            started_at: started_at.map(str::to_string),
            finished_at: finished_at.map(str::to_string),
            custom_error: custom_error.to_string(),
            stdout: stdout.map(str::to_string),
            stderr: stderr.map(str::to_string),
            ..Default::default()
        }
    }

    async fn fetch_result(container: FakeContainer) -> JobResult {
        let (executor, daemons) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        daemons["host:1234"].containers.lock().push(container);
        let (task, job, mut execution) =
            execution_fixture("test-123", Some(("host", 1234)), Some("fastlane-job-123"));
        executor.get_result(&task, &job, &mut execution).await.unwrap()
    }

    #[tokio::test]
    async fn exited_container_maps_to_done_with_logs_and_stderr() {
        let result = fetch_result(result_container(
            "exited",
            Some(0),
            Some("some log"),
            Some("some error"),
            "",
            Some("2018-08-27T17:14:14.1951232Z"),
            Some("2018-08-27T17:14:17.1951232Z"),
        ))
        .await;

        assert_eq!(result.status, ExecutionStatus::Done);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.log, "some log");
        assert_eq!(result.error, "some error");
        assert_eq!(
            result.started_at,
            Some(DateTime::parse_from_rfc3339("2018-08-27T17:14:14.1951232Z").unwrap())
        );
        assert_eq!(
            result.finished_at,
            Some(DateTime::parse_from_rfc3339("2018-08-27T17:14:17.1951232Z").unwrap())
        );
    }

    #[tokio::test]
    async fn running_container_has_no_finish_data() {
        let result = fetch_result(result_container(
            "running",
            None,
            None,
            None,
            "custom error",
            Some("2018-08-27T17:14:14.1951232Z"),
            None,
        ))
        .await;

        assert_eq!(result.status, ExecutionStatus::Running);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.log, "");
        assert_eq!(result.error, "custom error");
        assert!(result.started_at.is_some());
        assert_eq!(result.finished_at, None);
    }

    #[tokio::test]
    async fn dead_container_maps_to_failed() {
        let result = fetch_result(result_container(
            "dead",
            Some(1),
            Some("some log"),
            Some("some error"),
            "",
            Some("2018-08-27T17:14:14.1951232Z"),
            Some("2018-08-27T17:14:17.1951232Z"),
        ))
        .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.error, "some error");
    }

    #[tokio::test]
    async fn custom_error_and_stderr_compose() {
        let result = fetch_result(result_container(
            "dead",
            Some(1),
            Some("some log"),
            Some("some error"),
            "previous",
            Some("2018-08-27T17:14:14.1951232Z"),
            Some("2018-08-27T17:14:17.1951232Z"),
        ))
        .await;

        assert_eq!(result.error, "previous\n\nstderr:\nsome error");
    }

    #[tokio::test]
    async fn connection_failure_while_fetching_is_host_unavailable() {
        let (executor, daemons) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        daemons["host:1234"].fail("inspect_container", DaemonError::Connection("failed".into()));
        let (task, job, mut execution) =
            execution_fixture("test-123", Some(("host", 1234)), Some("fastlane-job-123"));

        let err = executor
            .get_result(&task, &job, &mut execution)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Connection to host host:1234 failed with error: failed"
        );
    }

    #[tokio::test]
    async fn missing_container_id_is_an_invalid_state() {
        let (executor, _) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        let (task, job, mut execution) = execution_fixture("test-123", Some(("host", 1234)), None);

        let err = executor
            .get_result(&task, &job, &mut execution)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidState(_)));
    }

    #[test]
    fn unknown_daemon_statuses_normalize_conservatively() {
        assert_eq!(ExecutionStatus::from_daemon("created"), ExecutionStatus::Created);
        assert_eq!(ExecutionStatus::from_daemon("running"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_daemon("restarting"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_daemon("paused"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_daemon("removing"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_daemon("exited"), ExecutionStatus::Done);
        assert_eq!(ExecutionStatus::from_daemon("dead"), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_daemon("warming-up"), ExecutionStatus::Unknown);
    }

    #[test]
    fn error_composition_covers_all_shapes() {
        assert_eq!(compose_error("", None), "");
        assert_eq!(compose_error("custom", None), "custom");
        assert_eq!(compose_error("", Some("stderr")), "stderr");
        assert_eq!(compose_error("custom", Some("")), "custom");
        assert_eq!(compose_error("custom", Some("stderr")), "custom\n\nstderr:\nstderr");
    }
}
