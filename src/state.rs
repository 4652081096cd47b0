//! Proposal and vote state store.
//!
//! Holds the locally cached view of proposals, raw ciphertext handles,
//! decrypted tallies, and the active account's vote history. Each refresh
//! fully replaces its slice of state rather than patching it, so later reads
//! are idempotent and overwrite-safe. Derived views (proposals by creator)
//! are computed on read, never stored.

use crate::contract::VotingContract;
use crate::errors::VotingResult;
use crate::types::{
    Address, ClearTally, ClearValue, EncryptedTally, Proposal, VoteRecord,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Locally cached voting state. Mutated only through refreshes and clear
/// tally commits.
#[derive(Default)]
pub struct VotingState {
    proposal_count: RwLock<u64>,
    proposals: RwLock<Vec<Proposal>>,
    tallies: RwLock<HashMap<u64, EncryptedTally>>,
    clear_tallies: RwLock<HashMap<u64, ClearTally>>,
    vote_records: RwLock<Vec<VoteRecord>>,
}

impl VotingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the proposal list from the contract, replacing the cached
    /// count and list wholesale.
    ///
    /// `has_voted` flags are filled only when an account is connected; with
    /// no account they are left `None`, never defaulted.
    pub async fn refresh_proposals(
        &self,
        contract: &dyn VotingContract,
        account: Option<Address>,
    ) -> VotingResult<()> {
        let count = contract.proposal_count().await?;
        let mut items = Vec::with_capacity(count as usize);
        for id in 0..count {
            let mut proposal = contract.get_proposal(id).await?;
            if let Some(addr) = account {
                proposal.has_voted = Some(contract.has_voted(id, addr).await?);
            }
            items.push(proposal);
        }
        *self.proposal_count.write().await = count;
        *self.proposals.write().await = items;
        debug!(count, "refreshed proposal list");
        Ok(())
    }

    /// Re-read one proposal's ciphertext handles, replacing the cached pair.
    pub async fn refresh_tallies(
        &self,
        contract: &dyn VotingContract,
        proposal_id: u64,
    ) -> VotingResult<()> {
        let (yes, no) = contract.get_tallies(proposal_id).await?;
        self.tallies.write().await.insert(
            proposal_id,
            EncryptedTally {
                yes: Some(yes),
                no: Some(no),
            },
        );
        Ok(())
    }

    /// Re-derive the account's vote history from emitted events, replacing
    /// the cached list.
    ///
    /// Uses the structured event filter when the provider supports it and
    /// falls back to the raw log scan otherwise (or when the filter query
    /// fails at runtime).
    pub async fn refresh_vote_records(
        &self,
        contract: &dyn VotingContract,
        account: Address,
    ) -> VotingResult<()> {
        let records = if contract.supports_event_filters() {
            match contract.voted_events(account).await {
                Ok(records) => records,
                Err(e) => {
                    debug!("event filter query failed, falling back to log scan: {e}");
                    contract.scan_vote_logs(account).await?
                }
            }
        } else {
            contract.scan_vote_logs(account).await?
        };
        *self.vote_records.write().await = records;
        Ok(())
    }

    /// Drop the cached vote history (no account connected).
    pub async fn clear_vote_records(&self) {
        self.vote_records.write().await.clear();
    }

    /// Merge decrypted values into a proposal's clear tally. A side passed as
    /// `None` keeps its previous value ("not decrypted"), it is not erased.
    pub async fn commit_clear_tally(
        &self,
        proposal_id: u64,
        yes: Option<ClearValue>,
        no: Option<ClearValue>,
    ) {
        let mut clear = self.clear_tallies.write().await;
        let entry = clear.entry(proposal_id).or_default();
        if yes.is_some() {
            entry.yes = yes;
        }
        if no.is_some() {
            entry.no = no;
        }
    }

    /// Discard all decrypted tallies, e.g. after an account or network
    /// switch invalidates them.
    pub async fn clear_decrypted(&self) {
        self.clear_tallies.write().await.clear();
    }

    pub async fn proposal_count(&self) -> u64 {
        *self.proposal_count.read().await
    }

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.proposals.read().await.clone()
    }

    pub async fn proposal_ids(&self) -> Vec<u64> {
        self.proposals.read().await.iter().map(|p| p.id).collect()
    }

    pub async fn tallies(&self, proposal_id: u64) -> Option<EncryptedTally> {
        self.tallies.read().await.get(&proposal_id).copied()
    }

    pub async fn clear_tally(&self, proposal_id: u64) -> Option<ClearTally> {
        self.clear_tallies.read().await.get(&proposal_id).copied()
    }

    pub async fn vote_records(&self) -> Vec<VoteRecord> {
        self.vote_records.read().await.clone()
    }

    /// Derived view: proposals created by `creator`, computed on read from
    /// the single source of truth.
    pub async fn proposals_created_by(&self, creator: Address) -> Vec<Proposal> {
        self.proposals
            .read()
            .await
            .iter()
            .filter(|p| p.creator == creator)
            .cloned()
            .collect()
    }
}
