use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub(crate) const DEFAULT_MAX_FAILS: u32 = 5;
pub(crate) const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_DOCKER_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ordered partitions of daemon hosts. The first partition whose regex
    /// matches a task id decides which hosts may run it.
    pub docker_hosts: Vec<PartitionConfig>,
    /// Consecutive connection failures before a host circuit trips.
    pub circuit_breaker_max_fails: u32,
    /// Seconds an open circuit waits before letting a probe call through.
    pub circuit_breaker_reset_timeout_secs: u64,
    /// Per-call timeout applied by each daemon client.
    pub docker_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Task-id affinity; `None` matches any task not claimed earlier.
    pub task_regex: Option<String>,
    /// `host:port` identifiers, tried as one uniform selection set.
    pub hosts: Vec<String>,
    /// Inclusive cap on running job containers across the partition.
    pub max_running: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            docker_hosts: vec![PartitionConfig {
                task_regex: None,
                hosts: vec!["localhost:2375".to_string()],
                max_running: 2,
            }],
            circuit_breaker_max_fails: DEFAULT_MAX_FAILS,
            circuit_breaker_reset_timeout_secs: DEFAULT_RESET_TIMEOUT_SECS,
            docker_timeout_secs: DEFAULT_DOCKER_TIMEOUT_SECS,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("DISPATCHER_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/fastlane/dispatcher.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using environment variables",
                config_path
            );
            Self::default()
        };

        if let Ok(raw) = std::env::var("DOCKER_HOSTS") {
            config.docker_hosts = parse_docker_hosts(&raw)?;
        }
        if let Ok(raw) = std::env::var("DOCKER_CIRCUIT_BREAKER_MAX_FAILS") {
            config.circuit_breaker_max_fails = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("DOCKER_CIRCUIT_BREAKER_RESET_TIMEOUT") {
            config.circuit_breaker_reset_timeout_secs = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("DOCKER_TIMEOUT") {
            config.docker_timeout_secs = raw.parse()?;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: DispatcherConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values before wiring clients.
    pub fn validate(&self) -> Result<(), String> {
        if self.circuit_breaker_max_fails < 1 {
            return Err("circuit_breaker_max_fails must be at least 1".to_string());
        }
        if self.docker_hosts.is_empty() {
            return Err("docker_hosts must declare at least one partition".to_string());
        }

        for partition in &self.docker_hosts {
            if partition.hosts.is_empty() {
                return Err("every partition must list at least one host".to_string());
            }
            if let Some(pattern) = &partition.task_regex {
                regex::Regex::new(pattern)
                    .map_err(|e| format!("invalid task regex '{pattern}': {e}"))?;
            }
            for host_id in &partition.hosts {
                let Some((host, port)) = host_id.rsplit_once(':') else {
                    return Err(format!(
                        "invalid host identifier '{host_id}', expected host:port"
                    ));
                };
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(format!(
                        "invalid host identifier '{host_id}', expected host:port"
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Parse the `DOCKER_HOSTS` environment value: a JSON list of
/// `[regex|null, [host:port, ...], max_running]` triples.
pub(crate) fn parse_docker_hosts(raw: &str) -> Result<Vec<PartitionConfig>, serde_json::Error> {
    let triples: Vec<(Option<String>, Vec<String>, usize)> = serde_json::from_str(raw)?;
    Ok(triples
        .into_iter()
        .map(|(task_regex, hosts, max_running)| PartitionConfig {
            task_regex,
            hosts,
            max_running,
        })
        .collect())
}
