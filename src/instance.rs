//! FHE client instance abstraction.
//!
//! The instance is the client's handle to the FHE coprocessor: it builds
//! encrypted inputs bound to a (contract, account) pair and performs
//! user-side batch decryption under a decryption signature.
//!
//! `InMemoryCoprocessor` is a shared plaintext registry standing in for the
//! coprocessor in tests: the in-memory instance and the in-memory contract
//! both resolve handles against it, so an end-to-end vote/decrypt flow works
//! without any real cryptography.

use crate::errors::{classify_failure, VotingError, VotingResult};
use crate::signature::DecryptionSignature;
use crate::types::{Address, CiphertextHandle};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A ciphertext plus inclusion proof, bound to the (contract, account) pair
/// it was built for. The contract rejects inputs whose binding does not match
/// the submitting transaction.
#[derive(Clone, Debug)]
pub struct EncryptedInput {
    pub handles: Vec<CiphertextHandle>,
    pub input_proof: Vec<u8>,
}

/// Ephemeral key pair generated per decryption signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralKeypair {
    pub public_key: String,
    pub private_key: String,
}

/// One handle queued for batch decryption, together with the contract that
/// owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecryptRequest {
    pub handle: CiphertextHandle,
    pub contract_address: Address,
}

/// Builder for an encrypted input bound to one (contract, account) pair.
#[async_trait]
pub trait EncryptedInputBuilder: Send {
    /// Append a 32-bit unsigned magnitude to the input.
    fn add32(&mut self, value: u32);

    /// Encrypt the accumulated values, yielding one handle per value plus a
    /// single inclusion proof.
    async fn encrypt(self: Box<Self>) -> VotingResult<EncryptedInput>;
}

/// Client handle to the FHE coprocessor.
#[async_trait]
pub trait FheInstance: Send + Sync {
    /// Stable fingerprint of the coprocessor public key, used to scope
    /// cached decryption signatures to one coprocessor instance.
    fn public_key_fingerprint(&self) -> String;

    /// Begin building an encrypted input bound to (contract, account).
    fn create_encrypted_input(
        &self,
        contract: Address,
        account: Address,
    ) -> Box<dyn EncryptedInputBuilder>;

    /// Generate an ephemeral key pair for a decryption signature. `None`
    /// means the instance cannot produce key material right now.
    fn generate_keypair(&self) -> Option<EphemeralKeypair>;

    /// Batch-decrypt handles under a decryption signature. Handles the
    /// service declines to decrypt may be omitted from the result; omission
    /// is not an error.
    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        signature: &DecryptionSignature,
    ) -> VotingResult<HashMap<CiphertextHandle, u64>>;
}

/// Shared plaintext registry backing the in-memory instance and contract.
pub struct InMemoryCoprocessor {
    values: RwLock<HashMap<CiphertextHandle, u64>>,
    counter: AtomicU64,
}

impl InMemoryCoprocessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            values: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(1),
        })
    }

    fn mint(&self, value: u64) -> CiphertextHandle {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(b"in-memory-coprocessor-handle");
        hasher.update(n.to_be_bytes());
        hasher.update(value.to_be_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        let handle = CiphertextHandle::new(digest);
        self.values.write().insert(handle, value);
        handle
    }

    /// Register a fresh ciphertext for a plaintext value.
    pub fn register(&self, value: u64) -> CiphertextHandle {
        self.mint(value)
    }

    /// Resolve a handle to its plaintext value, if known.
    pub fn value_of(&self, handle: CiphertextHandle) -> Option<u64> {
        self.values.read().get(&handle).copied()
    }

    /// Homomorphic add: `acc + operand` as a fresh handle. The sentinel
    /// handle reads as zero.
    pub fn add(
        &self,
        acc: CiphertextHandle,
        operand: CiphertextHandle,
    ) -> Option<CiphertextHandle> {
        let a = if acc.is_sentinel() {
            0
        } else {
            self.value_of(acc)?
        };
        let b = self.value_of(operand)?;
        Some(self.mint(a + b))
    }

    /// Scalar add: `acc + value` as a fresh handle.
    pub fn add_plain(&self, acc: CiphertextHandle, value: u64) -> Option<CiphertextHandle> {
        let a = if acc.is_sentinel() {
            0
        } else {
            self.value_of(acc)?
        };
        Some(self.mint(a + value))
    }

    /// Compute the inclusion proof binding a handle set to (contract,
    /// account).
    pub fn bind_proof(
        contract: Address,
        account: Address,
        handles: &[CiphertextHandle],
    ) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"in-memory-input-proof");
        hasher.update(contract.as_bytes());
        hasher.update(account.as_bytes());
        for h in handles {
            hasher.update(h.as_bytes());
        }
        hasher.finalize().to_vec()
    }

    /// Verify an inclusion proof against the binding it claims.
    pub fn verify_proof(
        contract: Address,
        account: Address,
        handles: &[CiphertextHandle],
        proof: &[u8],
    ) -> bool {
        Self::bind_proof(contract, account, handles) == proof
    }
}

/// Two-phase gate for holding an in-flight decryption open, so tests can
/// change the active session while a request is suspended.
pub struct DecryptGate {
    entered: Notify,
    release: Notify,
}

impl DecryptGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Wait until a decryption call has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the suspended decryption call proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Simple in-memory FHE instance for testing.
///
/// Encryption registers plaintext values in the shared coprocessor and binds
/// a proof over (contract, account, handles). Decryption resolves handles
/// against the coprocessor, honoring injected failures, denied accounts, and
/// the optional in-flight gate.
pub struct InMemoryFheInstance {
    coprocessor: Arc<InMemoryCoprocessor>,
    fingerprint: String,
    keypair_available: AtomicBool,
    input_builds: AtomicUsize,
    keypair_requests: AtomicUsize,
    decrypt_calls: AtomicUsize,
    fail_handles: RwLock<HashMap<CiphertextHandle, String>>,
    denied_users: RwLock<HashSet<Address>>,
    gate: RwLock<Option<Arc<DecryptGate>>>,
}

impl InMemoryFheInstance {
    pub fn new(coprocessor: Arc<InMemoryCoprocessor>) -> Self {
        Self {
            coprocessor,
            fingerprint: "in-memory-coprocessor-v1".to_string(),
            keypair_available: AtomicBool::new(true),
            input_builds: AtomicUsize::new(0),
            keypair_requests: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            fail_handles: RwLock::new(HashMap::new()),
            denied_users: RwLock::new(HashSet::new()),
            gate: RwLock::new(None),
        }
    }

    /// Number of encrypted-input builders handed out.
    pub fn input_build_count(&self) -> usize {
        self.input_builds.load(Ordering::SeqCst)
    }

    /// Number of ephemeral key-pair requests observed.
    pub fn keypair_request_count(&self) -> usize {
        self.keypair_requests.load(Ordering::SeqCst)
    }

    /// Number of batch decryption calls observed.
    pub fn decrypt_call_count(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Make key-pair generation fail.
    pub fn set_keypair_available(&self, available: bool) {
        self.keypair_available.store(available, Ordering::SeqCst);
    }

    /// Fail any batch that includes this handle with the given message.
    pub fn fail_handle(&self, handle: CiphertextHandle, message: impl Into<String>) {
        self.fail_handles.write().insert(handle, message.into());
    }

    /// Deny decryption for an account.
    pub fn deny_user(&self, account: Address) {
        self.denied_users.write().insert(account);
    }

    /// Install a gate holding the next decryption calls open.
    pub fn set_decrypt_gate(&self, gate: Arc<DecryptGate>) {
        *self.gate.write() = Some(gate);
    }

    pub fn clear_decrypt_gate(&self) {
        *self.gate.write() = None;
    }
}

struct InMemoryInputBuilder {
    coprocessor: Arc<InMemoryCoprocessor>,
    contract: Address,
    account: Address,
    values: Vec<u32>,
}

#[async_trait]
impl EncryptedInputBuilder for InMemoryInputBuilder {
    fn add32(&mut self, value: u32) {
        self.values.push(value);
    }

    async fn encrypt(self: Box<Self>) -> VotingResult<EncryptedInput> {
        if self.values.is_empty() {
            return Err(VotingError::Unclassified(
                "encrypted input has no values".to_string(),
            ));
        }
        let handles: Vec<CiphertextHandle> = self
            .values
            .iter()
            .map(|v| self.coprocessor.register(u64::from(*v)))
            .collect();
        let input_proof =
            InMemoryCoprocessor::bind_proof(self.contract, self.account, &handles);
        Ok(EncryptedInput {
            handles,
            input_proof,
        })
    }
}

#[async_trait]
impl FheInstance for InMemoryFheInstance {
    fn public_key_fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    fn create_encrypted_input(
        &self,
        contract: Address,
        account: Address,
    ) -> Box<dyn EncryptedInputBuilder> {
        self.input_builds.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryInputBuilder {
            coprocessor: self.coprocessor.clone(),
            contract,
            account,
            values: Vec::new(),
        })
    }

    fn generate_keypair(&self) -> Option<EphemeralKeypair> {
        self.keypair_requests.fetch_add(1, Ordering::SeqCst);
        if !self.keypair_available.load(Ordering::SeqCst) {
            return None;
        }
        let mut public = [0u8; 32];
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut public);
        rand::thread_rng().fill_bytes(&mut private);
        Some(EphemeralKeypair {
            public_key: format!("0x{}", hex::encode(public)),
            private_key: format!("0x{}", hex::encode(private)),
        })
    }

    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        signature: &DecryptionSignature,
    ) -> VotingResult<HashMap<CiphertextHandle, u64>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.read().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.denied_users.read().contains(&signature.user_address) {
            return Err(classify_failure(
                "User is not authorized to decrypt this handle",
            ));
        }

        // The credential only covers the contract set it was signed for.
        for req in requests {
            if !signature.contract_addresses.contains(&req.contract_address) {
                return Err(classify_failure(
                    "User is not authorized to decrypt this handle: contract not in signed set",
                ));
            }
        }

        {
            let failing = self.fail_handles.read();
            for req in requests {
                if let Some(msg) = failing.get(&req.handle) {
                    return Err(classify_failure(msg));
                }
            }
        }

        let values = self.coprocessor.values.read();
        let mut out = HashMap::new();
        for req in requests {
            // Unknown handles are omitted, not errors.
            if let Some(v) = values.get(&req.handle) {
                out.insert(req.handle, *v);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_for(account: Address, contracts: Vec<Address>) -> DecryptionSignature {
        DecryptionSignature {
            public_key: "0xpub".into(),
            private_key: "0xpriv".into(),
            signature: "0xsig".into(),
            user_address: account,
            contract_addresses: contracts,
            start_timestamp: 0,
            duration_days: 7,
        }
    }

    #[test]
    fn test_coprocessor_add() {
        let copro = InMemoryCoprocessor::new();
        let a = copro.register(3);
        let b = copro.register(4);
        let sum = copro.add(a, b).unwrap();
        assert_eq!(copro.value_of(sum), Some(7));

        // Sentinel accumulator reads as zero
        let from_zero = copro.add(CiphertextHandle::ZERO, a).unwrap();
        assert_eq!(copro.value_of(from_zero), Some(3));
    }

    #[test]
    fn test_proof_binding() {
        let contract = Address::new([1u8; 20]);
        let account = Address::new([2u8; 20]);
        let copro = InMemoryCoprocessor::new();
        let h = copro.register(5);

        let proof = InMemoryCoprocessor::bind_proof(contract, account, &[h]);
        assert!(InMemoryCoprocessor::verify_proof(contract, account, &[h], &proof));
        // Wrong account: binding fails
        assert!(!InMemoryCoprocessor::verify_proof(
            contract,
            Address::new([3u8; 20]),
            &[h],
            &proof
        ));
    }

    #[tokio::test]
    async fn test_encrypt_and_decrypt_roundtrip() {
        let copro = InMemoryCoprocessor::new();
        let instance = InMemoryFheInstance::new(copro.clone());
        let contract = Address::new([1u8; 20]);
        let account = Address::new([2u8; 20]);

        let mut builder = instance.create_encrypted_input(contract, account);
        builder.add32(42);
        let enc = builder.encrypt().await.unwrap();
        assert_eq!(enc.handles.len(), 1);
        assert!(!enc.handles[0].is_sentinel());

        let sig = signature_for(account, vec![contract]);
        let res = instance
            .user_decrypt(
                &[DecryptRequest {
                    handle: enc.handles[0],
                    contract_address: contract,
                }],
                &sig,
            )
            .await
            .unwrap();
        assert_eq!(res.get(&enc.handles[0]), Some(&42));
    }

    #[tokio::test]
    async fn test_decrypt_rejects_unsigned_contract() {
        let copro = InMemoryCoprocessor::new();
        let instance = InMemoryFheInstance::new(copro.clone());
        let account = Address::new([2u8; 20]);
        let h = copro.register(1);

        let sig = signature_for(account, vec![Address::new([1u8; 20])]);
        let err = instance
            .user_decrypt(
                &[DecryptRequest {
                    handle: h,
                    contract_address: Address::new([9u8; 20]),
                }],
                &sig,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VotingError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_unknown_handles_omitted() {
        let copro = InMemoryCoprocessor::new();
        let instance = InMemoryFheInstance::new(copro);
        let contract = Address::new([1u8; 20]);
        let account = Address::new([2u8; 20]);

        let sig = signature_for(account, vec![contract]);
        let res = instance
            .user_decrypt(
                &[DecryptRequest {
                    handle: CiphertextHandle::new([0xee; 32]),
                    contract_address: contract,
                }],
                &sig,
            )
            .await
            .unwrap();
        assert!(res.is_empty());
    }
}
