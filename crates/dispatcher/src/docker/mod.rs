//! Daemon capability interface and the bollard-backed production adapter.

pub mod client;
pub mod daemon;

pub use client::DockerClient;
pub use daemon::{ContainerDaemon, ContainerDetails, ContainerSummary, DaemonError};
