//! Fleet observation — pool-wide snapshot of host disposition and running
//! job containers. Read-only; host-level faults degrade into `unavailable`
//! entries instead of raising.

use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

use super::{Executor, JOB_PREFIX};
use crate::circuit::{CircuitState, CIRCUIT_OPEN_MSG};
use crate::error::Result;

const BLACKLISTED_MSG: &str = "server is blacklisted";

/// Disposition of one pool host at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReport {
    pub host: String,
    pub port: u16,
    pub available: bool,
    pub blacklisted: bool,
    /// Circuit state string: "closed", "open" or "half-open".
    pub circuit: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningContainer {
    pub host: String,
    pub port: u16,
    pub container_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSnapshot {
    pub available: Vec<HostReport>,
    pub unavailable: Vec<HostReport>,
    pub running: Vec<RunningContainer>,
}

impl Executor {
    /// Snapshot every pool host and the job containers running on the
    /// reachable ones. Classification precedence per host: blacklisted,
    /// then open circuit, then listing failure, then available.
    pub async fn get_running_containers(
        &self,
        blacklisted_hosts: Option<&HashSet<String>>,
    ) -> Result<FleetSnapshot> {
        let blacklist = match blacklisted_hosts {
            Some(hosts) => hosts.clone(),
            None => self.get_blacklisted_hosts().await?,
        };

        let mut snapshot = FleetSnapshot::default();

        for entry in self.pool().clients() {
            let circuit = self.circuits().get_circuit(&entry.id);
            let state = circuit.current_state();

            if blacklist.contains(&entry.id) {
                snapshot.unavailable.push(HostReport {
                    host: entry.host.clone(),
                    port: entry.port,
                    available: false,
                    blacklisted: true,
                    circuit: state.as_str().to_string(),
                    error: Some(BLACKLISTED_MSG.to_string()),
                });
                continue;
            }

            if state == CircuitState::Open {
                snapshot.unavailable.push(HostReport {
                    host: entry.host.clone(),
                    port: entry.port,
                    available: false,
                    blacklisted: false,
                    circuit: state.as_str().to_string(),
                    error: Some(CIRCUIT_OPEN_MSG.to_string()),
                });
                continue;
            }

            match entry.client.list_containers().await {
                Err(err) => {
                    warn!(host = %entry.id, error = %err, "host excluded from fleet snapshot");
                    snapshot.unavailable.push(HostReport {
                        host: entry.host.clone(),
                        port: entry.port,
                        available: false,
                        blacklisted: false,
                        circuit: state.as_str().to_string(),
                        error: Some(err.to_string()),
                    });
                }
                Ok(containers) => {
                    snapshot.available.push(HostReport {
                        host: entry.host.clone(),
                        port: entry.port,
                        available: true,
                        blacklisted: false,
                        circuit: state.as_str().to_string(),
                        error: None,
                    });
                    snapshot.running.extend(
                        containers
                            .into_iter()
                            .filter(|c| c.name.starts_with(JOB_PREFIX))
                            .map(|c| RunningContainer {
                                host: entry.host.clone(),
                                port: entry.port,
                                container_id: c.id,
                            }),
                    );
                }
            }
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::daemon::DaemonError;
    use crate::testing::{test_executor, FakeContainer};

    fn available_report(host: &str, port: u16) -> HostReport {
        HostReport {
            host: host.to_string(),
            port,
            available: true,
            blacklisted: false,
            circuit: "closed".to_string(),
            error: None,
        }
    }

    #[tokio::test]
    async fn reports_running_job_containers_on_available_hosts() {
        let (executor, daemons) = test_executor(5, &[(Some("test.+"), &["host:1234"], 2)]);
        {
            let mut containers = daemons["host:1234"].containers.lock();
            containers.push(FakeContainer::named("fastlane-job-123", "fastlane-job-123"));
            containers.push(FakeContainer::named("other-id", "not-a-job"));
        }

        let snapshot = executor.get_running_containers(None).await.unwrap();

        assert_eq!(snapshot.available, vec![available_report("host", 1234)]);
        assert!(snapshot.unavailable.is_empty());
        assert_eq!(
            snapshot.running,
            vec![RunningContainer {
                host: "host".to_string(),
                port: 1234,
                container_id: "fastlane-job-123".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn listing_failures_degrade_into_unavailable_entries() {
        let (executor, daemons) =
            test_executor(5, &[(Some("test-.+"), &["host:1234", "host:4567"], 2)]);
        daemons["host:1234"].containers.lock().push(FakeContainer::named(
            "fastlane-job-123",
            "fastlane-job-123",
        ));
        daemons["host:4567"].fail("list_containers", DaemonError::Api("failed".into()));

        let snapshot = executor.get_running_containers(None).await.unwrap();

        assert_eq!(snapshot.available, vec![available_report("host", 1234)]);
        assert_eq!(
            snapshot.unavailable,
            vec![HostReport {
                host: "host".to_string(),
                port: 4567,
                available: false,
                blacklisted: false,
                circuit: "closed".to_string(),
                error: Some("failed".to_string()),
            }]
        );
        assert_eq!(
            snapshot.running,
            vec![RunningContainer {
                host: "host".to_string(),
                port: 1234,
                container_id: "fastlane-job-123".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn blacklisted_hosts_are_reported_and_not_listed() {
        let (executor, daemons) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        daemons["host:1234"].containers.lock().push(FakeContainer::named(
            "fastlane-job-123",
            "fastlane-job-123",
        ));
        let blacklist: HashSet<String> = ["host:1234".to_string()].into_iter().collect();

        let snapshot = executor
            .get_running_containers(Some(&blacklist))
            .await
            .unwrap();

        assert!(snapshot.available.is_empty());
        assert_eq!(
            snapshot.unavailable,
            vec![HostReport {
                host: "host".to_string(),
                port: 1234,
                available: false,
                blacklisted: true,
                circuit: "closed".to_string(),
                error: Some("server is blacklisted".to_string()),
            }]
        );
        assert!(snapshot.running.is_empty());
    }

    #[tokio::test]
    async fn open_circuits_are_reported_and_not_listed() {
        let (executor, daemons) =
            test_executor(5, &[(Some("test-.+"), &["host:1234", "host:4567"], 2)]);
        daemons["host:1234"].containers.lock().push(FakeContainer::named(
            "fastlane-job-123",
            "fastlane-job-123",
        ));
        daemons["host:4567"].containers.lock().push(FakeContainer::named(
            "fastlane-job-456",
            "fastlane-job-456",
        ));
        executor.get_circuit("host:4567").open();

        let snapshot = executor.get_running_containers(None).await.unwrap();

        assert_eq!(snapshot.available, vec![available_report("host", 1234)]);
        assert_eq!(
            snapshot.unavailable,
            vec![HostReport {
                host: "host".to_string(),
                port: 4567,
                available: false,
                blacklisted: false,
                circuit: "open".to_string(),
                error: Some("Timeout not elapsed yet, circuit breaker still open".to_string()),
            }]
        );
        assert_eq!(snapshot.running.len(), 1);
        assert_eq!(snapshot.running[0].container_id, "fastlane-job-123");
    }

    #[tokio::test]
    async fn blacklist_takes_precedence_over_open_circuit() {
        let (executor, _) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        executor.get_circuit("host:1234").open();
        let blacklist: HashSet<String> = ["host:1234".to_string()].into_iter().collect();

        let snapshot = executor
            .get_running_containers(Some(&blacklist))
            .await
            .unwrap();

        assert_eq!(snapshot.unavailable.len(), 1);
        assert!(snapshot.unavailable[0].blacklisted);
        assert_eq!(
            snapshot.unavailable[0].error.as_deref(),
            Some("server is blacklisted")
        );
        assert_eq!(snapshot.unavailable[0].circuit, "open");
    }

    #[tokio::test]
    async fn half_open_hosts_count_as_available() {
        let (executor, _) = test_executor(5, &[(Some("test-.+"), &["host:1234"], 2)]);
        executor.get_circuit("host:1234").half_open();

        let snapshot = executor.get_running_containers(None).await.unwrap();

        assert_eq!(snapshot.available.len(), 1);
        assert_eq!(snapshot.available[0].circuit, "half-open");
    }
}
