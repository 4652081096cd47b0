//! Decryption signature: a time-boxed credential authorizing one account to
//! decrypt values held by a specific set of contracts.
//!
//! The credential is created lazily on the first decrypt request per
//! (coprocessor instance, contract set, account) triple, persisted in the
//! caller-supplied storage, and reused without re-prompting until it expires.
//! Expiry always forces a fresh signing prompt; nothing is renewed silently.

use crate::instance::FheInstance;
use crate::signer::Signer;
use crate::storage::SignatureStorage;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const SECONDS_PER_DAY: u64 = 86_400;

/// A decryption credential bound to (coprocessor instance, sorted contract
/// set, account, start timestamp, duration in days).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionSignature {
    /// Ephemeral public key the service re-encrypts towards.
    pub public_key: String,
    /// Matching ephemeral private key, held client-side only.
    pub private_key: String,
    /// The account's signature over the authorization payload, hex-encoded.
    pub signature: String,
    /// The account this credential belongs to.
    pub user_address: Address,
    /// Exactly the contract set the credential was signed for, sorted.
    pub contract_addresses: Vec<Address>,
    /// Validity window start, epoch seconds.
    pub start_timestamp: u64,
    /// Validity window length in whole days.
    pub duration_days: u64,
}

/// Authorization payload the user signs. Serialized deterministically from
/// sorted contract addresses.
#[derive(Serialize)]
struct AuthorizationPayload<'a> {
    contract_addresses: &'a [Address],
    public_key: &'a str,
    start_timestamp: u64,
    duration_days: u64,
}

impl DecryptionSignature {
    /// Whether the credential is still inside its validity window.
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.start_timestamp + self.duration_days * SECONDS_PER_DAY
    }

    /// Whether the credential covers exactly this sorted contract set. A
    /// superset or different set requires a new signature.
    pub fn matches_contracts(&self, sorted: &[Address]) -> bool {
        self.contract_addresses == sorted
    }

    /// Storage key for the (instance fingerprint, sorted contract set,
    /// account) triple.
    fn storage_key(fingerprint: &str, sorted: &[Address], user: Address) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        for addr in sorted {
            hasher.update(addr.as_bytes());
        }
        hasher.update(user.as_bytes());
        format!("fhe-decryption-signature:{}", hex::encode(hasher.finalize()))
    }

    /// Load a cached credential for (instance, contract set, account) or
    /// prompt the signer for a fresh one.
    ///
    /// Returns `None` when the instance cannot produce an ephemeral key pair
    /// or the user rejects the prompt. Callers treat `None` as "decryption
    /// unavailable now", not a fatal condition.
    pub async fn load_or_sign(
        instance: &dyn FheInstance,
        contract_addresses: &[Address],
        signer: &dyn Signer,
        storage: &dyn SignatureStorage,
        validity_days: u64,
    ) -> Option<DecryptionSignature> {
        Self::load_or_sign_at(
            instance,
            contract_addresses,
            signer,
            storage,
            validity_days,
            unix_now(),
        )
        .await
    }

    /// Clock-injected variant of [`load_or_sign`](Self::load_or_sign).
    pub async fn load_or_sign_at(
        instance: &dyn FheInstance,
        contract_addresses: &[Address],
        signer: &dyn Signer,
        storage: &dyn SignatureStorage,
        validity_days: u64,
        now: u64,
    ) -> Option<DecryptionSignature> {
        if contract_addresses.is_empty() {
            warn!("decryption signature requested for empty contract set");
            return None;
        }
        let mut sorted: Vec<Address> = contract_addresses.to_vec();
        sorted.sort();
        sorted.dedup();

        let user = signer.address();
        let key = Self::storage_key(&instance.public_key_fingerprint(), &sorted, user);

        if let Some(sig) = Self::load_cached(storage, &key, &sorted, now).await {
            debug!(user = %user, "reusing cached decryption signature");
            return Some(sig);
        }

        let keypair = match instance.generate_keypair() {
            Some(kp) => kp,
            None => {
                warn!("instance failed to produce an ephemeral key pair");
                return None;
            }
        };

        let payload = AuthorizationPayload {
            contract_addresses: &sorted,
            public_key: &keypair.public_key,
            start_timestamp: now,
            duration_days: validity_days,
        };
        let payload_bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to encode authorization payload: {e}");
                return None;
            }
        };

        // May suspend for as long as the user takes to approve or reject.
        let raw_signature = match signer.sign(&payload_bytes).await {
            Some(s) => s,
            None => {
                debug!(user = %user, "user rejected decryption signature prompt");
                return None;
            }
        };

        let sig = DecryptionSignature {
            public_key: keypair.public_key,
            private_key: keypair.private_key,
            signature: format!("0x{}", hex::encode(raw_signature)),
            user_address: user,
            contract_addresses: sorted,
            start_timestamp: now,
            duration_days: validity_days,
        };

        match serde_json::to_string(&sig) {
            Ok(serialized) => {
                if let Err(e) = storage.set(&key, &serialized).await {
                    // A persistence failure costs a future re-prompt, not
                    // this decryption.
                    warn!("failed to persist decryption signature: {e}");
                }
            }
            Err(e) => warn!("failed to serialize decryption signature: {e}"),
        }

        Some(sig)
    }

    async fn load_cached(
        storage: &dyn SignatureStorage,
        key: &str,
        sorted: &[Address],
        now: u64,
    ) -> Option<DecryptionSignature> {
        let raw = match storage.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("signature storage read failed: {e}");
                return None;
            }
        };
        let sig: DecryptionSignature = match serde_json::from_str(&raw) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("discarding undecodable cached signature: {e}");
                return None;
            }
        };
        if !sig.matches_contracts(sorted) {
            debug!("cached signature covers a different contract set");
            return None;
        }
        if !sig.is_valid_at(now) {
            debug!("cached signature expired");
            return None;
        }
        Some(sig)
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InMemoryCoprocessor, InMemoryFheInstance};
    use crate::signer::LocalSigner;
    use crate::storage::MemoryStorage;

    fn fixtures() -> (InMemoryFheInstance, LocalSigner, MemoryStorage) {
        let copro = InMemoryCoprocessor::new();
        (
            InMemoryFheInstance::new(copro),
            LocalSigner::new(Address::new([5u8; 20])),
            MemoryStorage::new(),
        )
    }

    #[tokio::test]
    async fn test_second_call_reuses_cached_signature() {
        let (instance, signer, storage) = fixtures();
        let contracts = [Address::new([1u8; 20])];

        let first =
            DecryptionSignature::load_or_sign_at(&instance, &contracts, &signer, &storage, 7, 1000)
                .await
                .unwrap();
        assert_eq!(signer.prompt_count(), 1);

        let second =
            DecryptionSignature::load_or_sign_at(&instance, &contracts, &signer, &storage, 7, 2000)
                .await
                .unwrap();
        assert_eq!(first, second);
        // No second prompt within the validity window
        assert_eq!(signer.prompt_count(), 1);
        assert_eq!(instance.keypair_request_count(), 1);
    }

    #[tokio::test]
    async fn test_expiry_forces_new_prompt() {
        let (instance, signer, storage) = fixtures();
        let contracts = [Address::new([1u8; 20])];

        let first =
            DecryptionSignature::load_or_sign_at(&instance, &contracts, &signer, &storage, 1, 1000)
                .await
                .unwrap();
        assert_eq!(signer.prompt_count(), 1);

        // One day later the credential has lapsed
        let later = 1000 + SECONDS_PER_DAY;
        assert!(!first.is_valid_at(later));
        let second = DecryptionSignature::load_or_sign_at(
            &instance, &contracts, &signer, &storage, 1, later,
        )
        .await
        .unwrap();
        assert_eq!(signer.prompt_count(), 2);
        assert_eq!(second.start_timestamp, later);
    }

    #[tokio::test]
    async fn test_different_contract_set_is_a_miss() {
        let (instance, signer, storage) = fixtures();
        let a = Address::new([1u8; 20]);
        let b = Address::new([2u8; 20]);

        DecryptionSignature::load_or_sign_at(&instance, &[a], &signer, &storage, 7, 1000)
            .await
            .unwrap();
        assert_eq!(signer.prompt_count(), 1);

        // A superset requires a new signature
        let sig = DecryptionSignature::load_or_sign_at(&instance, &[a, b], &signer, &storage, 7, 1000)
            .await
            .unwrap();
        assert_eq!(signer.prompt_count(), 2);
        assert_eq!(sig.contract_addresses, vec![a, b]);
    }

    #[tokio::test]
    async fn test_contract_order_does_not_matter() {
        let (instance, signer, storage) = fixtures();
        let a = Address::new([1u8; 20]);
        let b = Address::new([2u8; 20]);

        DecryptionSignature::load_or_sign_at(&instance, &[b, a], &signer, &storage, 7, 1000)
            .await
            .unwrap();
        DecryptionSignature::load_or_sign_at(&instance, &[a, b], &signer, &storage, 7, 1000)
            .await
            .unwrap();
        assert_eq!(signer.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_returns_none_without_persisting() {
        let (instance, signer, storage) = fixtures();
        signer.set_reject(true);

        let result = DecryptionSignature::load_or_sign_at(
            &instance,
            &[Address::new([1u8; 20])],
            &signer,
            &storage,
            7,
            1000,
        )
        .await;
        assert!(result.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_missing_keypair_returns_none() {
        let (instance, signer, storage) = fixtures();
        instance.set_keypair_available(false);

        let result = DecryptionSignature::load_or_sign_at(
            &instance,
            &[Address::new([1u8; 20])],
            &signer,
            &storage,
            7,
            1000,
        )
        .await;
        assert!(result.is_none());
        // No prompt was shown at all
        assert_eq!(signer.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_contract_set_returns_none() {
        let (instance, signer, storage) = fixtures();
        let result =
            DecryptionSignature::load_or_sign_at(&instance, &[], &signer, &storage, 7, 1000).await;
        assert!(result.is_none());
    }
}
