//! Operator-controlled host blacklist.
//!
//! The blacklist lives in the shared key/value store under [`BLACKLIST_KEY`]
//! so every dispatcher replica sees the same set. Queries are read-through;
//! nothing is cached in-process.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use thiserror::Error;

/// Key under which the blacklisted host set is stored in the shared store.
pub const BLACKLIST_KEY: &str = "rq:dogu:blacklisted-hosts";

#[derive(Debug, Error)]
#[error("blacklist store error: {0}")]
pub struct StoreError(pub String);

/// Set abstraction over the shared store. Production injects a binding to
/// the service's key/value store; tests and single-node deployments use
/// [`MemoryBlacklistStore`].
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    /// Current set of blacklisted host identifiers.
    async fn blacklisted_hosts(&self) -> Result<HashSet<String>, StoreError>;
}

/// In-process store. Mutations take effect on the next read, matching the
/// read-through behavior of the shared store.
#[derive(Debug, Default)]
pub struct MemoryBlacklistStore {
    hosts: RwLock<HashSet<String>>,
}

impl MemoryBlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host_id: impl Into<String>) {
        self.hosts.write().insert(host_id.into());
    }

    pub fn remove(&self, host_id: &str) {
        self.hosts.write().remove(host_id);
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklistStore {
    async fn blacklisted_hosts(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.hosts.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_reflect_mutations_immediately() {
        let store = MemoryBlacklistStore::new();
        assert!(store.blacklisted_hosts().await.unwrap().is_empty());

        store.add("localhost:5678");
        let hosts = store.blacklisted_hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts.contains("localhost:5678"));

        store.remove("localhost:5678");
        assert!(store.blacklisted_hosts().await.unwrap().is_empty());
    }
}
