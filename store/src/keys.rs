use crate::errors::Result;
use crate::types::ProjectKey;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read-only credential lookup consumed by the auth layer.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Resolves a public key to its credential, or `None` when the key is
    /// not provisioned.
    async fn lookup(&self, public_key: &str) -> Result<Option<ProjectKey>>;
}

/// In-memory key store, seeded from configuration at startup.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, ProjectKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ProjectKey) {
        self.keys.write().insert(key.public_key.clone(), key);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn lookup(&self, public_key: &str) -> Result<Option<ProjectKey>> {
        Ok(self.keys.read().get(public_key).cloned())
    }
}
