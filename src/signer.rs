//! Signer abstraction over the account-controlling wallet.
//!
//! Signing may suspend for an unbounded wall-clock duration while the user
//! decides; the component imposes no timeout of its own. A rejected prompt is
//! `None`, not an error.

use crate::types::Address;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An account-controlling signer: address lookup plus arbitrary-payload
/// signing.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The account this signer controls.
    fn address(&self) -> Address;

    /// Prompt the user to sign an arbitrary payload. Returns `None` if the
    /// user rejects the prompt.
    async fn sign(&self, payload: &[u8]) -> Option<Vec<u8>>;
}

/// Simple in-memory signer for testing.
///
/// Signs deterministically by hashing the account and payload together, and
/// counts prompts so tests can assert how often the user was asked.
pub struct LocalSigner {
    address: Address,
    reject: AtomicBool,
    prompts: AtomicUsize,
}

impl LocalSigner {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            reject: AtomicBool::new(false),
            prompts: AtomicUsize::new(0),
        }
    }

    /// Make subsequent prompts behave as if the user rejected them.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Number of signing prompts observed so far.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, payload: &[u8]) -> Option<Vec<u8>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(payload);
        Some(hasher.finalize().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_signer_signs_and_counts() {
        let signer = LocalSigner::new(Address::new([9u8; 20]));
        let sig = signer.sign(b"payload").await.unwrap();
        assert_eq!(sig.len(), 32);
        assert_eq!(signer.prompt_count(), 1);

        // Deterministic over the same payload
        assert_eq!(signer.sign(b"payload").await.unwrap(), sig);
        assert_eq!(signer.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_local_signer_rejection() {
        let signer = LocalSigner::new(Address::new([9u8; 20]));
        signer.set_reject(true);
        assert!(signer.sign(b"payload").await.is_none());
        assert_eq!(signer.prompt_count(), 1);
    }
}
