//! Tally decryption orchestration.
//!
//! Reads cached ciphertext handles, short-circuits the all-zero sentinel to
//! plaintext zero, batches the rest into one decryption request under a
//! cached (or freshly signed) decryption credential, and drops any result
//! whose (contract, account) identity went stale while the request was in
//! flight. A stale result is superseded work, not a failure; it is discarded
//! silently.

use crate::errors::{VotingError, VotingResult};
use crate::instance::{DecryptRequest, FheInstance};
use crate::signature::DecryptionSignature;
use crate::signer::Signer;
use crate::state::VotingState;
use crate::storage::SignatureStorage;
use crate::types::{Address, CiphertextHandle, ClearValue};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

/// The (contract, account) pair a decryption was issued under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveIdentity {
    pub contract_address: Option<Address>,
    pub account: Option<Address>,
}

/// Re-reads the currently active identity after a suspension point, so
/// results computed under a superseded account or network can be detected.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn active_identity(&self) -> ActiveIdentity;
}

/// Outcome of a [`decrypt_all`] sweep.
#[derive(Debug, Default)]
pub struct DecryptAllReport {
    pub attempted: usize,
    pub decrypted: usize,
    /// Per-proposal failures; one proposal failing never aborts the others.
    pub failures: Vec<(u64, VotingError)>,
}

fn sentinel_zero(handle: Option<CiphertextHandle>) -> Option<ClearValue> {
    match handle {
        Some(h) if h.is_sentinel() => Some(ClearValue { handle: h, value: 0 }),
        _ => None,
    }
}

fn resolve_side(
    handle: Option<CiphertextHandle>,
    immediate: Option<ClearValue>,
    response: &HashMap<CiphertextHandle, u64>,
) -> Option<ClearValue> {
    match handle {
        None => None,
        Some(h) if h.is_sentinel() => immediate,
        // A handle the service declined to decrypt stays "not decrypted".
        Some(h) => response.get(&h).map(|v| ClearValue { handle: h, value: *v }),
    }
}

/// Decrypt the cached yes/no tallies of one proposal.
///
/// No-op if no handles are cached. Sentinel handles resolve to zero without
/// contacting the service; if both sides are sentinels no signature is
/// requested at all, so the "nobody has voted yet" path never prompts.
pub(crate) async fn decrypt_proposal(
    state: &VotingState,
    instance: &dyn FheInstance,
    signer: &dyn Signer,
    storage: &dyn SignatureStorage,
    probe: &dyn IdentityProbe,
    contract_address: Address,
    proposal_id: u64,
    validity_days: u64,
) -> VotingResult<()> {
    let Some(tally) = state.tallies(proposal_id).await else {
        return Ok(());
    };
    if tally.yes.is_none() && tally.no.is_none() {
        return Ok(());
    }

    let issued = ActiveIdentity {
        contract_address: Some(contract_address),
        account: Some(signer.address()),
    };

    let immediate_yes = sentinel_zero(tally.yes);
    let immediate_no = sentinel_zero(tally.no);

    let mut queue = Vec::new();
    for handle in [tally.yes, tally.no].into_iter().flatten() {
        if !handle.is_sentinel() {
            queue.push(DecryptRequest {
                handle,
                contract_address,
            });
        }
    }

    if queue.is_empty() {
        state
            .commit_clear_tally(proposal_id, immediate_yes, immediate_no)
            .await;
        return Ok(());
    }

    let signature = DecryptionSignature::load_or_sign(
        instance,
        &[contract_address],
        signer,
        storage,
        validity_days,
    )
    .await
    .ok_or(VotingError::SignatureUnavailable)?;

    let response = instance
        .user_decrypt(&queue, &signature)
        .await
        .map_err(VotingError::classified)?;

    // The decryption may have been suspended for a long time; a result
    // computed under a superseded account or network must never land in the
    // store.
    let current = probe.active_identity().await;
    if current != issued {
        debug!(
            proposal_id,
            "discarding decryption result issued under a stale identity"
        );
        return Ok(());
    }

    state
        .commit_clear_tally(
            proposal_id,
            resolve_side(tally.yes, immediate_yes, &response),
            resolve_side(tally.no, immediate_no, &response),
        )
        .await;
    debug!(proposal_id, "committed decrypted tally");
    Ok(())
}

/// Decrypt the tallies of every known proposal, isolating failures per
/// proposal.
pub(crate) async fn decrypt_all(
    state: &VotingState,
    instance: &dyn FheInstance,
    signer: &dyn Signer,
    storage: &dyn SignatureStorage,
    probe: &dyn IdentityProbe,
    contract_address: Address,
    validity_days: u64,
) -> DecryptAllReport {
    let mut report = DecryptAllReport::default();
    for proposal_id in state.proposal_ids().await {
        report.attempted += 1;
        match decrypt_proposal(
            state,
            instance,
            signer,
            storage,
            probe,
            contract_address,
            proposal_id,
            validity_days,
        )
        .await
        {
            Ok(()) => report.decrypted += 1,
            Err(e) => {
                warn!(proposal_id, "tally decryption failed: {e}");
                report.failures.push((proposal_id, e));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{InMemoryVotingContract, VotingContract};
    use crate::instance::{InMemoryCoprocessor, InMemoryFheInstance};
    use crate::signer::LocalSigner;
    use crate::storage::MemoryStorage;
    use parking_lot::RwLock;
    use std::sync::Arc;

    struct FixedProbe {
        identity: RwLock<ActiveIdentity>,
    }

    impl FixedProbe {
        fn new(contract_address: Address, account: Address) -> Self {
            Self {
                identity: RwLock::new(ActiveIdentity {
                    contract_address: Some(contract_address),
                    account: Some(account),
                }),
            }
        }

        fn switch_account(&self, account: Address) {
            self.identity.write().account = Some(account);
        }
    }

    #[async_trait]
    impl IdentityProbe for FixedProbe {
        async fn active_identity(&self) -> ActiveIdentity {
            *self.identity.read()
        }
    }

    struct Fixture {
        coprocessor: Arc<InMemoryCoprocessor>,
        contract: InMemoryVotingContract,
        instance: InMemoryFheInstance,
        signer: LocalSigner,
        storage: MemoryStorage,
        state: VotingState,
        probe: FixedProbe,
    }

    impl Fixture {
        fn new() -> Self {
            let coprocessor = InMemoryCoprocessor::new();
            let contract_address = Address::new([0xc0; 20]);
            let account = Address::new([5u8; 20]);
            Self {
                contract: InMemoryVotingContract::new(contract_address, coprocessor.clone()),
                instance: InMemoryFheInstance::new(coprocessor.clone()),
                coprocessor,
                signer: LocalSigner::new(account),
                storage: MemoryStorage::new(),
                state: VotingState::new(),
                probe: FixedProbe::new(contract_address, account),
            }
        }

        async fn decrypt(&self, proposal_id: u64) -> VotingResult<()> {
            decrypt_proposal(
                &self.state,
                &self.instance,
                &self.signer,
                &self.storage,
                &self.probe,
                self.contract.address(),
                proposal_id,
                7,
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_no_cached_handles_is_a_noop() {
        let f = Fixture::new();
        f.decrypt(0).await.unwrap();
        assert!(f.state.clear_tally(0).await.is_none());
        assert_eq!(f.instance.decrypt_call_count(), 0);
    }

    #[tokio::test]
    async fn test_sentinel_handles_resolve_to_zero_without_signature() {
        let f = Fixture::new();
        f.contract
            .create_proposal(f.signer.address(), "T", "D", 0, u64::MAX)
            .await
            .unwrap();
        f.state.refresh_tallies(&f.contract, 0).await.unwrap();

        f.decrypt(0).await.unwrap();

        let tally = f.state.clear_tally(0).await.unwrap();
        assert_eq!(tally.yes.unwrap().value, 0);
        assert_eq!(tally.no.unwrap().value, 0);
        // Neither a key pair nor a prompt nor a service call happened
        assert_eq!(f.instance.keypair_request_count(), 0);
        assert_eq!(f.signer.prompt_count(), 0);
        assert_eq!(f.instance.decrypt_call_count(), 0);
    }

    #[tokio::test]
    async fn test_mixed_sentinel_and_real_handles() {
        let f = Fixture::new();
        let voter = f.signer.address();
        f.contract
            .create_proposal(voter, "T", "D", 0, u64::MAX)
            .await
            .unwrap();
        // Yes side gets weight 4, no side stays sentinel
        let handle = f.coprocessor.register(4);
        let proof = InMemoryCoprocessor::bind_proof(f.contract.address(), voter, &[handle]);
        f.contract.vote(voter, 0, true, handle, &proof).await.unwrap();
        f.state.refresh_tallies(&f.contract, 0).await.unwrap();

        f.decrypt(0).await.unwrap();

        let tally = f.state.clear_tally(0).await.unwrap();
        assert_eq!(tally.yes.unwrap().value, 4);
        assert_eq!(tally.no.unwrap().value, 0);
        assert_eq!(f.instance.decrypt_call_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_signature_leaves_state_untouched() {
        let f = Fixture::new();
        let voter = f.signer.address();
        f.contract
            .create_proposal(voter, "T", "D", 0, u64::MAX)
            .await
            .unwrap();
        f.contract.vote_simple(voter, 0, true).await.unwrap();
        f.state.refresh_tallies(&f.contract, 0).await.unwrap();

        f.signer.set_reject(true);
        let err = f.decrypt(0).await.unwrap_err();
        assert_eq!(err, VotingError::SignatureUnavailable);
        assert!(f.state.clear_tally(0).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_identity_drops_result() {
        let f = Fixture::new();
        let voter = f.signer.address();
        f.contract
            .create_proposal(voter, "T", "D", 0, u64::MAX)
            .await
            .unwrap();
        f.contract.vote_simple(voter, 0, true).await.unwrap();
        f.state.refresh_tallies(&f.contract, 0).await.unwrap();

        // The active account changes while the request is in flight; the
        // probe already reports the new account by the time the result lands.
        f.probe.switch_account(Address::new([9u8; 20]));

        f.decrypt(0).await.unwrap();
        assert!(f.state.clear_tally(0).await.is_none());
        // The service call did happen; only the commit was dropped
        assert_eq!(f.instance.decrypt_call_count(), 1);
    }

    #[tokio::test]
    async fn test_decrypt_all_isolates_failures() {
        let f = Fixture::new();
        let voter = f.signer.address();
        for title in ["A", "B", "C"] {
            f.contract
                .create_proposal(voter, title, "D", 0, u64::MAX)
                .await
                .unwrap();
        }
        for id in 0..3 {
            let other = Address::new([10 + id as u8; 20]);
            f.contract.vote_simple(other, id, true).await.unwrap();
        }
        f.state.refresh_proposals(&f.contract, None).await.unwrap();
        for id in 0..3 {
            f.state.refresh_tallies(&f.contract, id).await.unwrap();
        }

        // Proposal 1's yes handle fails at the service
        let bad = f.state.tallies(1).await.unwrap().yes.unwrap();
        f.instance.fail_handle(bad, "Internal JSON-RPC error.");

        let report = decrypt_all(
            &f.state,
            &f.instance,
            &f.signer,
            &f.storage,
            &f.probe,
            f.contract.address(),
            7,
        )
        .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.decrypted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert!(matches!(report.failures[0].1, VotingError::RpcTransient(_)));

        assert_eq!(f.state.clear_tally(0).await.unwrap().yes.unwrap().value, 1);
        assert!(f.state.clear_tally(1).await.is_none());
        assert_eq!(f.state.clear_tally(2).await.unwrap().yes.unwrap().value, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_decrypt_is_classified() {
        let f = Fixture::new();
        let voter = f.signer.address();
        f.contract
            .create_proposal(voter, "T", "D", 0, u64::MAX)
            .await
            .unwrap();
        f.contract.vote_simple(voter, 0, true).await.unwrap();
        f.state.refresh_tallies(&f.contract, 0).await.unwrap();

        f.instance.deny_user(voter);
        let err = f.decrypt(0).await.unwrap_err();
        assert!(matches!(err, VotingError::Unauthorized(_)));
        assert!(f.state.clear_tally(0).await.is_none());
    }
}
