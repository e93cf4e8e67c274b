//! Partitioned pool of daemon clients and host selection.
//!
//! The pool is built once from configuration and read-only afterwards: the
//! client map and partition list never change, only the circuit registry and
//! blacklist vary between selections.

use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::circuit::CircuitRegistry;
use crate::config::{DispatcherConfig, PartitionConfig};
use crate::docker::client::DockerClient;
use crate::docker::daemon::{ContainerDaemon, DaemonError};
use crate::error::{ExecutorError, Result};

/// One `host:port` entry of the pool's client map.
#[derive(Clone)]
pub struct HostClient {
    /// Canonical `host:port` identifier.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub client: Arc<dyn ContainerDaemon>,
}

impl std::fmt::Debug for HostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostClient")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// A class of task ids bound to a set of hosts and a running-container cap.
pub struct HostPartition {
    matcher: Option<Regex>,
    hosts: Vec<String>,
    max_running: usize,
}

impl HostPartition {
    /// Whether this partition claims the task id. A partition without a
    /// regex matches anything that reaches it.
    pub fn matches(&self, task_id: &str) -> bool {
        self.matcher
            .as_ref()
            .map_or(true, |re| re.is_match(task_id))
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }
}

pub struct DockerHostPool {
    clients: BTreeMap<String, HostClient>,
    partitions: Vec<HostPartition>,
}

impl DockerHostPool {
    /// Build the pool from partition declarations, instantiating exactly one
    /// client per distinct host identifier via `connect`.
    pub fn new<F>(partitions: &[PartitionConfig], mut connect: F) -> Result<Self>
    where
        F: FnMut(&str, u16) -> std::result::Result<Arc<dyn ContainerDaemon>, DaemonError>,
    {
        let mut clients = BTreeMap::new();
        let mut compiled = Vec::with_capacity(partitions.len());

        for partition in partitions {
            let matcher = partition
                .task_regex
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| ExecutorError::InvalidConfig(format!("invalid task regex: {e}")))?;

            for host_id in &partition.hosts {
                if clients.contains_key(host_id) {
                    continue;
                }
                let (host, port) = split_host_id(host_id)?;
                let client = connect(&host, port)?;
                clients.insert(
                    host_id.clone(),
                    HostClient {
                        id: host_id.clone(),
                        host,
                        port,
                        client,
                    },
                );
            }

            compiled.push(HostPartition {
                matcher,
                hosts: partition.hosts.clone(),
                max_running: partition.max_running,
            });
        }

        Ok(Self {
            clients,
            partitions: compiled,
        })
    }

    /// Wire real daemon clients for every configured host.
    pub fn connect(config: &DispatcherConfig) -> Result<Self> {
        let timeout = config.docker_timeout_secs;
        Self::new(&config.docker_hosts, |host, port| {
            DockerClient::connect(host, port, timeout)
                .map(|client| Arc::new(client) as Arc<dyn ContainerDaemon>)
        })
    }

    /// Select one eligible host for the task: first partition whose regex
    /// matches, minus blacklisted hosts and hosts with an open circuit,
    /// chosen uniformly at random.
    pub fn select(
        &self,
        circuits: &CircuitRegistry,
        task_id: &str,
        blacklist: &HashSet<String>,
    ) -> Result<&HostClient> {
        let partition = self
            .matching_partition(task_id)
            .ok_or_else(|| ExecutorError::NoAvailableHosts {
                task_id: task_id.to_string(),
            })?;

        let eligible: Vec<&HostClient> = partition
            .hosts
            .iter()
            .filter(|host_id| !blacklist.contains(host_id.as_str()))
            .filter(|host_id| circuits.get_circuit(host_id).is_selectable())
            .filter_map(|host_id| self.clients.get(host_id))
            .collect();

        let chosen = eligible
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| ExecutorError::NoAvailableHosts {
                task_id: task_id.to_string(),
            })?;

        debug!(task_id, host = %chosen.id, "selected docker host");
        Ok(chosen)
    }

    /// Exact lookup for an already-bound execution. `None` means the host
    /// has left the pool; the dispatcher treats that as unavailable.
    pub fn client_for(&self, host: &str, port: u16) -> Option<&HostClient> {
        self.clients.get(&format!("{host}:{port}"))
    }

    pub fn client_by_id(&self, host_id: &str) -> Option<&HostClient> {
        self.clients.get(host_id)
    }

    /// All pool clients in host-identifier order.
    pub fn clients(&self) -> impl Iterator<Item = &HostClient> {
        self.clients.values()
    }

    /// First partition claiming the task id, if any.
    pub fn matching_partition(&self, task_id: &str) -> Option<&HostPartition> {
        self.partitions.iter().find(|p| p.matches(task_id))
    }

    /// Running-container cap of the matching partition; `None` means no
    /// partition claims the task (treated as uncapped).
    pub fn max_running_for(&self, task_id: &str) -> Option<usize> {
        self.matching_partition(task_id).map(|p| p.max_running)
    }
}

fn split_host_id(host_id: &str) -> Result<(String, u16)> {
    let invalid = || {
        ExecutorError::InvalidConfig(format!(
            "invalid host identifier '{host_id}', expected host:port"
        ))
    };
    let (host, port) = host_id.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
