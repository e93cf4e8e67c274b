//! Shared test tooling: an in-memory [`ContainerDaemon`] fake plus fixture
//! builders used by the module tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::blacklist::{BlacklistStore, MemoryBlacklistStore};
use crate::config::{DispatcherConfig, PartitionConfig};
use crate::docker::daemon::{
    ContainerDaemon, ContainerDetails, ContainerSummary, DaemonError, LogChunkStream,
};
use crate::executor::Executor;
use crate::job::{Job, JobExecution, Task};
use crate::pool::DockerHostPool;

pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub exit_code: Option<i64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub custom_error: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// When set, the log stream ends with this error after the stdout chunk.
    pub log_error: Option<DaemonError>,
}

impl FakeContainer {
    pub fn named(id: &str, name: &str) -> Self {
        FakeContainer {
            id: id.to_string(),
            name: name.to_string(),
            image: "ubuntu:latest".to_string(),
            status: "running".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCall {
    pub image: String,
    pub environment: HashMap<String, String>,
    pub command: String,
    pub detach: bool,
    pub name: String,
}

/// Scriptable daemon double. Per-operation failures persist until cleared,
/// mirroring how an unreachable host fails every call.
#[derive(Debug)]
pub(crate) struct FakeDaemon {
    pub containers: Mutex<Vec<FakeContainer>>,
    pub pulls: Mutex<Vec<(String, String)>>,
    pub runs: Mutex<Vec<RunCall>>,
    pub stopped: Mutex<Vec<String>>,
    pub renames: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<String>>,
    pub run_result_id: Mutex<String>,
    /// Artificial latency applied to `pull_image`, for timeout tests.
    pub pull_delay: Mutex<Option<std::time::Duration>>,
    failures: Mutex<HashMap<String, DaemonError>>,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        FakeDaemon {
            containers: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            renames: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            run_result_id: Mutex::new("mock-container-id".to_string()),
            pull_delay: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeDaemon {
    /// Make `operation` fail with `err` on every call until cleared.
    pub fn fail(&self, operation: &str, err: DaemonError) {
        self.failures.lock().insert(operation.to_string(), err);
    }

    fn check(&self, operation: &str) -> Result<(), DaemonError> {
        match self.failures.lock().get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn find(&self, container_id: &str) -> Result<FakeContainer, DaemonError> {
        self.containers
            .lock()
            .iter()
            .find(|c| c.id == container_id || c.name == container_id)
            .cloned()
            .ok_or_else(|| DaemonError::Api(format!("No such container: {container_id}")))
    }
}

#[async_trait]
impl ContainerDaemon for FakeDaemon {
    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), DaemonError> {
        let delay = *self.pull_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check("pull_image")?;
        self.pulls.lock().push((image.to_string(), tag.to_string()));
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
        self.check("run_container")?;
        self.runs.lock().push(RunCall {
            image: image.to_string(),
            environment: environment.clone(),
            command: command.to_string(),
            detach,
            name: name.to_string(),
        });
        let container_id = self.run_result_id.lock().clone();
        self.containers.lock().push(FakeContainer::named(&container_id, name));
        Ok(container_id)
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerDetails, DaemonError> {
        self.check("inspect_container")?;
        let container = self.find(container_id)?;
        Ok(ContainerDetails {
            id: container.id,
            name: container.name,
            image: container.image,
            status: container.status,
            exit_code: container.exit_code,
            started_at: container.started_at,
            finished_at: container.finished_at,
            custom_error: container.custom_error,
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DaemonError> {
        self.check("list_containers")?;
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
            })
            .collect())
    }

    async fn container_logs(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Option<String>, DaemonError> {
        self.check("container_logs")?;
        let container = self.find(container_id)?;
        Ok(match (stdout, stderr) {
            (true, true) => match (container.stdout, container.stderr) {
                (None, None) => None,
                (out, err) => Some(format!(
                    "{}{}",
                    out.unwrap_or_default(),
                    err.unwrap_or_default()
                )),
            },
            (true, false) => container.stdout,
            (false, true) => container.stderr,
            (false, false) => None,
        })
    }

    async fn stream_logs(&self, container_id: &str) -> Result<LogChunkStream, DaemonError> {
        self.check("stream_logs")?;
        let container = self.find(container_id)?;
        let mut chunks: Vec<Result<Bytes, DaemonError>> = container
            .stdout
            .map(Bytes::from)
            .map(Ok)
            .into_iter()
            .collect();
        if let Some(err) = container.log_error {
            chunks.push(Err(err));
        }
        Ok(stream::iter(chunks).boxed())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), DaemonError> {
        self.check("stop_container")?;
        self.find(container_id)?;
        self.stopped.lock().push(container_id.to_string());
        Ok(())
    }

    async fn rename_container(
        &self,
        container_id: &str,
        new_name: &str,
    ) -> Result<(), DaemonError> {
        self.check("rename_container")?;
        let mut containers = self.containers.lock();
        let container = containers
            .iter_mut()
            .find(|c| c.id == container_id || c.name == container_id)
            .ok_or_else(|| DaemonError::Api(format!("No such container: {container_id}")))?;
        let old_name = std::mem::replace(&mut container.name, new_name.to_string());
        drop(containers);
        self.renames.lock().push((old_name, new_name.to_string()));
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DaemonError> {
        self.check("remove_container")?;
        let mut containers = self.containers.lock();
        let before = containers.len();
        containers.retain(|c| c.id != container_id && c.name != container_id);
        if containers.len() == before {
            return Err(DaemonError::Api(format!(
                "No such container: {container_id}"
            )));
        }
        drop(containers);
        self.removed.lock().push(container_id.to_string());
        Ok(())
    }
}

/// Build a pool whose hosts are each backed by their own [`FakeDaemon`].
/// Partition spec entries are `(task_regex, hosts, max_running)`.
pub(crate) fn fake_pool(
    spec: &[(Option<&str>, &[&str], usize)],
) -> (DockerHostPool, BTreeMap<String, Arc<FakeDaemon>>) {
    init_tracing();

    let partitions: Vec<PartitionConfig> = spec
        .iter()
        .map(|(task_regex, hosts, max_running)| PartitionConfig {
            task_regex: task_regex.map(str::to_string),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            max_running: *max_running,
        })
        .collect();

    let mut daemons: BTreeMap<String, Arc<FakeDaemon>> = BTreeMap::new();
    let pool = DockerHostPool::new(&partitions, |host, port| {
        let daemon = daemons
            .entry(format!("{host}:{port}"))
            .or_insert_with(|| Arc::new(FakeDaemon::default()))
            .clone();
        Ok(daemon as Arc<dyn ContainerDaemon>)
    })
    .expect("fake pool construction");

    (pool, daemons)
}

pub(crate) fn test_executor(
    max_fails: u32,
    spec: &[(Option<&str>, &[&str], usize)],
) -> (Executor, BTreeMap<String, Arc<FakeDaemon>>) {
    test_executor_with_store(max_fails, spec, Arc::new(MemoryBlacklistStore::new()))
}

pub(crate) fn test_executor_with_store(
    max_fails: u32,
    spec: &[(Option<&str>, &[&str], usize)],
    store: Arc<dyn BlacklistStore>,
) -> (Executor, BTreeMap<String, Arc<FakeDaemon>>) {
    let (pool, daemons) = fake_pool(spec);
    let config = DispatcherConfig {
        circuit_breaker_max_fails: max_fails,
        ..Default::default()
    };
    (Executor::new(&config, pool, store), daemons)
}

/// Task/job/execution triple, optionally pre-bound to a host and container.
pub(crate) fn execution_fixture(
    task_id: &str,
    bound: Option<(&str, u16)>,
    container_id: Option<&str>,
) -> (Task, Job, JobExecution) {
    let task = Task::new(task_id);
    let job = Job {
        job_id: "job-1".to_string(),
        task_id: task_id.to_string(),
    };
    let mut execution = JobExecution::new("123", "job-1");
    if let Some((host, port)) = bound {
        execution.metadata.bind_host(host, port);
    }
    execution.metadata.container_id = container_id.map(str::to_string);
    (task, job, execution)
}
