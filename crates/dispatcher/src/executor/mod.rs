//! Dispatcher core — binds executions to hosts and drives every daemon
//! lifecycle call through the host's circuit breaker.
//!
//! Sibling modules add `impl Executor` blocks per domain: `result` (job
//! results), `lifecycle` (stop/retire/reap), `logs` (log streaming) and
//! `fleet` (pool-wide observation).

pub mod fleet;
pub mod lifecycle;
pub mod logs;
pub mod result;

pub use fleet::{FleetSnapshot, HostReport, RunningContainer};
pub use lifecycle::RemovedContainer;
pub use logs::LogStream;
pub use result::{ExecutionStatus, JobResult};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::blacklist::BlacklistStore;
use crate::circuit::{Circuit, CircuitRegistry, CIRCUIT_OPEN_MSG};
use crate::config::DispatcherConfig;
use crate::docker::daemon::{ContainerDaemon, DaemonError};
use crate::error::{ExecutorError, Result};
use crate::job::{Job, JobExecution, Task};
use crate::pool::DockerHostPool;

/// Name prefix of containers running a job execution.
pub const JOB_PREFIX: &str = "fastlane-job-";

/// Name prefix of retired containers awaiting batch removal.
pub const DEFUNCT_PREFIX: &str = "defunct-fastlane-job-";

/// Resolved target of one operation: the host an execution is (now) bound
/// to and the daemon client that reaches it.
pub(crate) struct BoundClient {
    pub(crate) host_id: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) client: Arc<dyn ContainerDaemon>,
}

pub struct Executor {
    pool: DockerHostPool,
    circuits: CircuitRegistry,
    blacklist: Arc<dyn BlacklistStore>,
    call_timeout: Duration,
}

impl Executor {
    pub fn new(
        config: &DispatcherConfig,
        pool: DockerHostPool,
        blacklist: Arc<dyn BlacklistStore>,
    ) -> Self {
        Self {
            pool,
            circuits: CircuitRegistry::new(
                config.circuit_breaker_max_fails,
                Duration::from_secs(config.circuit_breaker_reset_timeout_secs),
            ),
            blacklist,
            call_timeout: Duration::from_secs(config.docker_timeout_secs),
        }
    }

    /// Build an executor with real daemon clients from configuration.
    pub fn from_config(
        config: &DispatcherConfig,
        blacklist: Arc<dyn BlacklistStore>,
    ) -> Result<Self> {
        config.validate().map_err(ExecutorError::InvalidConfig)?;
        let pool = DockerHostPool::connect(config)?;
        Ok(Self::new(config, pool, blacklist))
    }

    pub fn pool(&self) -> &DockerHostPool {
        &self.pool
    }

    /// The circuit guarding a host, materialized on first reference.
    pub fn get_circuit(&self, host_id: &str) -> Arc<Circuit> {
        self.circuits.get_circuit(host_id)
    }

    pub(crate) fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Read-through to the blacklist store.
    pub async fn get_blacklisted_hosts(&self) -> Result<HashSet<String>> {
        Ok(self.blacklist.blacklisted_hosts().await?)
    }

    /// Pull `image:tag` on the execution's host, selecting one first if the
    /// execution is not yet bound.
    pub async fn update_image(
        &self,
        task: &Task,
        job: &Job,
        execution: &mut JobExecution,
        image: &str,
        tag: &str,
        blacklisted_hosts: Option<&HashSet<String>>,
    ) -> Result<()> {
        let bound = self
            .acquire_client(task, execution, blacklisted_hosts)
            .await?;
        info!(
            job_id = %job.job_id,
            host = %bound.host_id,
            "pulling image {}:{}",
            image,
            tag
        );

        let client = bound.client.clone();
        self.call_daemon(&bound, execution, client.pull_image(image, tag))
            .await
    }

    /// Create and start the job container on the execution's bound host.
    /// The host must already be recorded in the execution metadata (bound
    /// by a preceding `update_image`).
    pub async fn run(
        &self,
        task: &Task,
        job: &Job,
        execution: &mut JobExecution,
        image: &str,
        tag: &str,
        command: &str,
        blacklisted_hosts: Option<&HashSet<String>>,
    ) -> Result<String> {
        if execution.metadata.bound_host().is_none() {
            return Err(ExecutorError::InvalidState(
                "Can't run job without docker_host and docker_port in execution metadata."
                    .to_string(),
            ));
        }

        let bound = self
            .acquire_client(task, execution, blacklisted_hosts)
            .await?;
        let name = format!("{JOB_PREFIX}{}", execution.execution_id);
        let reference = format!("{image}:{tag}");
        let environment = HashMap::new();

        let client = bound.client.clone();
        let container_id = self
            .call_daemon(
                &bound,
                execution,
                client.run_container(&reference, &environment, command, true, &name),
            )
            .await?;

        info!(
            job_id = %job.job_id,
            host = %bound.host_id,
            container_id = %container_id,
            "started job container {}",
            name
        );
        execution.metadata.container_id = Some(container_id.clone());
        Ok(container_id)
    }

    /// Whether the partition claiming `task_id` still has room for another
    /// job container. Tasks no partition claims are uncapped.
    pub async fn validate_max_running_executions(&self, task_id: &str) -> Result<bool> {
        let Some(partition) = self.pool.matching_partition(task_id) else {
            return Ok(true);
        };

        let mut total = 0usize;
        for host_id in partition.hosts() {
            let Some(entry) = self.pool.client_by_id(host_id) else {
                continue;
            };
            let containers = match entry.client.list_containers().await {
                Ok(containers) => containers,
                Err(err) => {
                    warn!(host = %host_id, error = %err, "skipping host while counting running jobs");
                    continue;
                }
            };
            total += containers
                .iter()
                .filter(|c| c.name.starts_with(JOB_PREFIX))
                .count();
        }

        Ok(total < partition.max_running())
    }

    /// Resolve the daemon client for an operation. Bound executions always
    /// revisit their recorded host; unbound ones get a freshly selected host
    /// written into the metadata before any I/O happens.
    pub(crate) async fn acquire_client(
        &self,
        task: &Task,
        execution: &mut JobExecution,
        blacklisted_hosts: Option<&HashSet<String>>,
    ) -> Result<BoundClient> {
        if let Some((host, port)) = execution.metadata.bound_host() {
            let host = host.to_string();
            return match self.pool.client_for(&host, port) {
                Some(entry) => Ok(BoundClient {
                    host_id: entry.id.clone(),
                    host: entry.host.clone(),
                    port: entry.port,
                    client: entry.client.clone(),
                }),
                None => {
                    warn!(host = %host, port, "bound host has left the pool, unbinding execution");
                    execution.metadata.clear_host();
                    Err(ExecutorError::host_unavailable(
                        host,
                        port,
                        "host is no longer registered in the pool",
                    ))
                }
            };
        }

        let blacklist = match blacklisted_hosts {
            Some(hosts) => hosts.clone(),
            None => self.get_blacklisted_hosts().await?,
        };

        let entry = self.pool.select(&self.circuits, &task.task_id, &blacklist)?;
        execution.metadata.bind_host(&entry.host, entry.port);
        debug!(
            task_id = %task.task_id,
            execution_id = %execution.execution_id,
            host = %entry.id,
            "bound execution to docker host"
        );

        Ok(BoundClient {
            host_id: entry.id.clone(),
            host: entry.host.clone(),
            port: entry.port,
            client: entry.client.clone(),
        })
    }

    /// Run one daemon call through the target host's circuit, capped at the
    /// configured call timeout. Connection faults and timeouts count toward
    /// the breaker, unbind the execution and surface as host-unavailable;
    /// semantic daemon errors pass through untouched. Dropping the returned
    /// future before completion records nothing.
    pub(crate) async fn call_daemon<T, F>(
        &self,
        target: &BoundClient,
        execution: &mut JobExecution,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DaemonError>>,
    {
        let circuit = self.circuits.get_circuit(&target.host_id);
        if !circuit.try_acquire() {
            debug!(host = %target.host_id, "circuit open, rejecting call");
            execution.metadata.clear_host();
            return Err(ExecutorError::host_unavailable(
                target.host.clone(),
                target.port,
                CIRCUIT_OPEN_MSG,
            ));
        }

        let message = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => {
                circuit.record_success();
                return Ok(value);
            }
            Ok(Err(err)) if !err.is_connection() => return Err(ExecutorError::Daemon(err)),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("call timed out after {}s", self.call_timeout.as_secs()),
        };

        circuit.record_failure();
        warn!(
            host = %target.host_id,
            state = circuit.current_state().as_str(),
            failures = circuit.consecutive_failures(),
            "connection to docker host failed: {}",
            message
        );
        execution.metadata.clear_host();
        Err(ExecutorError::HostUnavailable {
            host: target.host.clone(),
            port: target.port,
            message,
        })
    }
}
