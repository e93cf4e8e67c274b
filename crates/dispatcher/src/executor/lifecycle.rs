//! Container lifecycle tail — stopping jobs, retiring finished containers
//! and reaping the retired ones.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Executor, DEFUNCT_PREFIX};
use crate::error::{ExecutorError, Result};
use crate::job::{Job, JobExecution, Task};

/// One container removed by [`Executor::remove_done`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedContainer {
    /// Host identifier (`host:port`) the container was removed from.
    pub host: String,
    pub name: String,
    pub id: String,
    pub image: String,
}

impl Executor {
    /// Stop the execution's container. Returns `false` without touching the
    /// daemon when the execution never recorded a container.
    pub async fn stop_job(
        &self,
        task: &Task,
        job: &Job,
        execution: &mut JobExecution,
    ) -> Result<bool> {
        let Some(container_id) = execution.metadata.container_id.clone() else {
            debug!(job_id = %job.job_id, "execution has no container to stop");
            return Ok(false);
        };

        let bound = self.acquire_client(task, execution, None).await?;
        let client = bound.client.clone();

        self.call_daemon(&bound, execution, client.inspect_container(&container_id))
            .await?;
        self.call_daemon(&bound, execution, client.stop_container(&container_id))
            .await?;

        info!(job_id = %job.job_id, host = %bound.host_id, container_id = %container_id, "stopped job container");
        Ok(true)
    }

    /// Retire the execution's container by renaming it out of the running
    /// namespace (`fastlane-job-*` -> `defunct-fastlane-job-*`). The
    /// container stays on the host until [`Executor::remove_done`] reaps it.
    pub async fn mark_as_done(
        &self,
        task: &Task,
        job: &Job,
        execution: &mut JobExecution,
    ) -> Result<()> {
        let container_id = execution.metadata.container_id.clone().ok_or_else(|| {
            ExecutorError::InvalidState(
                "Can't mark execution as done without container_id in execution metadata."
                    .to_string(),
            )
        })?;

        let bound = self.acquire_client(task, execution, None).await?;
        let client = bound.client.clone();

        let details = self
            .call_daemon(&bound, execution, client.inspect_container(&container_id))
            .await?;
        let new_name = format!("defunct-{}", details.name);
        self.call_daemon(
            &bound,
            execution,
            client.rename_container(&container_id, &new_name),
        )
        .await?;

        info!(
            job_id = %job.job_id,
            host = %bound.host_id,
            container_id = %container_id,
            "retired job container as {}",
            new_name
        );
        Ok(())
    }

    /// Reap retired containers across the whole pool. Hosts or containers
    /// that fail are skipped; the aggregate list reports what was removed.
    pub async fn remove_done(&self) -> Result<Vec<RemovedContainer>> {
        let mut removed = Vec::new();

        for entry in self.pool().clients() {
            let containers = match entry.client.list_containers().await {
                Ok(containers) => containers,
                Err(err) => {
                    warn!(host = %entry.id, error = %err, "skipping host while reaping defunct containers");
                    continue;
                }
            };

            for container in containers
                .into_iter()
                .filter(|c| c.name.starts_with(DEFUNCT_PREFIX))
            {
                if let Err(err) = entry.client.remove_container(&container.id).await {
                    warn!(
                        host = %entry.id,
                        container = %container.name,
                        error = %err,
                        "failed to remove defunct container"
                    );
                    continue;
                }

                info!(host = %entry.id, container = %container.name, "removed defunct container");
                removed.push(RemovedContainer {
                    host: entry.id.clone(),
                    name: container.name,
                    id: container.id,
                    image: container.image,
                });
            }
        }

        Ok(removed)
    }
}
