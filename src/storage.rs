//! Persistent key/value storage for decryption signatures.
//!
//! The store holds opaque serialized signature objects under caller-defined
//! string keys; it has no schema beyond that.

use crate::errors::VotingResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// String key/value store used solely for signature caching.
#[async_trait]
pub trait SignatureStorage: Send + Sync {
    async fn get(&self, key: &str) -> VotingResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> VotingResult<()>;
}

/// Simple in-memory storage for testing.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl SignatureStorage for MemoryStorage {
    async fn get(&self, key: &str) -> VotingResult<Option<String>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> VotingResult<()> {
        self.inner.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
