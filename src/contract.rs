//! Voting contract binding.
//!
//! The trait mirrors the on-chain ABI: read methods for proposals, voted
//! flags, and ciphertext tallies; write methods that resolve once the
//! transaction is mined; and the `Voted` event in two flavors (structured
//! filter and raw log scan) selected by capability probing.
//!
//! `InMemoryVotingContract` reproduces the contract's observable behavior
//! over the shared in-memory coprocessor, including the exact revert phrases
//! the failure classifier recognizes.

use crate::errors::{VotingError, VotingResult};
use crate::instance::InMemoryCoprocessor;
use crate::types::{Address, CiphertextHandle, Proposal, TxReceipt, VoteRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Read/write binding to the voting contract.
#[async_trait]
pub trait VotingContract: Send + Sync {
    async fn proposal_count(&self) -> VotingResult<u64>;

    /// Proposal metadata; `has_voted` is always `None` at this layer.
    async fn get_proposal(&self, id: u64) -> VotingResult<Proposal>;

    async fn has_voted(&self, id: u64, account: Address) -> VotingResult<bool>;

    /// The (yes, no) ciphertext handles for a proposal. Either may be the
    /// all-zero sentinel when no vote has been recorded on that side.
    async fn get_tallies(
        &self,
        id: u64,
    ) -> VotingResult<(CiphertextHandle, CiphertextHandle)>;

    async fn create_proposal(
        &self,
        creator: Address,
        title: &str,
        description: &str,
        start_time: u64,
        end_time: u64,
    ) -> VotingResult<TxReceipt>;

    /// Submit an encrypted vote; resolves once mined.
    async fn vote(
        &self,
        voter: Address,
        id: u64,
        is_yes: bool,
        handle: CiphertextHandle,
        proof: &[u8],
    ) -> VotingResult<TxReceipt>;

    /// Unencrypted test-only vote path with implicit weight 1.
    async fn vote_simple(&self, voter: Address, id: u64, is_yes: bool)
        -> VotingResult<TxReceipt>;

    /// Whether the underlying provider supports structured event filters.
    fn supports_event_filters(&self) -> bool;

    /// Structured `Voted` event query for one account.
    async fn voted_events(&self, account: Address) -> VotingResult<Vec<VoteRecord>>;

    /// Raw log scan keyed by the `Voted(uint256,address,bool,uint256)` topic,
    /// for providers without structured filtering.
    async fn scan_vote_logs(&self, account: Address) -> VotingResult<Vec<VoteRecord>>;
}

struct StoredProposal {
    creator: Address,
    title: String,
    description: String,
    start_time: u64,
    end_time: u64,
    yes_handle: CiphertextHandle,
    no_handle: CiphertextHandle,
    voters: Vec<Address>,
}

struct EmittedVote {
    account: Address,
    record: VoteRecord,
}

/// Simple in-memory voting contract for testing.
pub struct InMemoryVotingContract {
    address: Address,
    coprocessor: Arc<InMemoryCoprocessor>,
    proposals: RwLock<Vec<StoredProposal>>,
    events: RwLock<Vec<EmittedVote>>,
    block_number: AtomicU64,
    event_filters: AtomicBool,
    filtered_queries: AtomicUsize,
    raw_scans: AtomicUsize,
    clock_override: RwLock<Option<u64>>,
}

impl InMemoryVotingContract {
    pub fn new(address: Address, coprocessor: Arc<InMemoryCoprocessor>) -> Self {
        Self {
            address,
            coprocessor,
            proposals: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            block_number: AtomicU64::new(0),
            event_filters: AtomicBool::new(true),
            filtered_queries: AtomicUsize::new(0),
            raw_scans: AtomicUsize::new(0),
            clock_override: RwLock::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Simulate a provider without structured event filter support.
    pub fn set_event_filters(&self, supported: bool) {
        self.event_filters.store(supported, Ordering::SeqCst);
    }

    pub fn filtered_query_count(&self) -> usize {
        self.filtered_queries.load(Ordering::SeqCst)
    }

    pub fn raw_scan_count(&self) -> usize {
        self.raw_scans.load(Ordering::SeqCst)
    }

    /// Pin the contract clock for window tests. `None` restores wall time.
    pub fn set_clock(&self, now: Option<u64>) {
        *self.clock_override.write() = now;
    }

    fn now(&self) -> u64 {
        (*self.clock_override.read()).unwrap_or_else(crate::signature::unix_now)
    }

    fn next_receipt(&self, tag: &[u8]) -> TxReceipt {
        let block_number = self.block_number.fetch_add(1, Ordering::SeqCst) + 1;
        let mut hasher = Sha256::new();
        hasher.update(b"in-memory-tx");
        hasher.update(block_number.to_be_bytes());
        hasher.update(tag);
        TxReceipt {
            tx_hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number,
        }
    }

    fn revert(msg: &str) -> VotingError {
        VotingError::Contract(format!("execution reverted: {msg}"))
    }

    fn apply_vote(
        &self,
        voter: Address,
        id: u64,
        is_yes: bool,
        weight: u64,
    ) -> VotingResult<TxReceipt> {
        let now = self.now();
        let mut proposals = self.proposals.write();
        let proposal = proposals
            .get_mut(id as usize)
            .ok_or_else(|| Self::revert("invalid proposal"))?;
        if now < proposal.start_time {
            return Err(Self::revert("voting not started"));
        }
        if now > proposal.end_time {
            return Err(Self::revert("voting ended"));
        }
        if proposal.voters.contains(&voter) {
            return Err(Self::revert("already voted"));
        }

        let tally = if is_yes {
            &mut proposal.yes_handle
        } else {
            &mut proposal.no_handle
        };
        *tally = self
            .coprocessor
            .add_plain(*tally, weight)
            .ok_or_else(|| Self::revert("unknown ciphertext"))?;
        proposal.voters.push(voter);
        drop(proposals);

        let receipt = self.next_receipt(voter.as_bytes());
        self.events.write().push(EmittedVote {
            account: voter,
            record: VoteRecord {
                proposal_id: id,
                is_yes,
                tx_hash: receipt.tx_hash.clone(),
                block_number: receipt.block_number,
            },
        });
        Ok(receipt)
    }

    fn events_for(&self, account: Address) -> Vec<VoteRecord> {
        self.events
            .read()
            .iter()
            .filter(|e| e.account == account)
            .map(|e| e.record.clone())
            .collect()
    }
}

#[async_trait]
impl VotingContract for InMemoryVotingContract {
    async fn proposal_count(&self) -> VotingResult<u64> {
        Ok(self.proposals.read().len() as u64)
    }

    async fn get_proposal(&self, id: u64) -> VotingResult<Proposal> {
        let proposals = self.proposals.read();
        let p = proposals
            .get(id as usize)
            .ok_or_else(|| Self::revert("invalid proposal"))?;
        Ok(Proposal {
            id,
            creator: p.creator,
            title: p.title.clone(),
            description: p.description.clone(),
            start_time: p.start_time,
            end_time: p.end_time,
            has_voted: None,
        })
    }

    async fn has_voted(&self, id: u64, account: Address) -> VotingResult<bool> {
        let proposals = self.proposals.read();
        let p = proposals
            .get(id as usize)
            .ok_or_else(|| Self::revert("invalid proposal"))?;
        Ok(p.voters.contains(&account))
    }

    async fn get_tallies(
        &self,
        id: u64,
    ) -> VotingResult<(CiphertextHandle, CiphertextHandle)> {
        let proposals = self.proposals.read();
        let p = proposals
            .get(id as usize)
            .ok_or_else(|| Self::revert("invalid proposal"))?;
        Ok((p.yes_handle, p.no_handle))
    }

    async fn create_proposal(
        &self,
        creator: Address,
        title: &str,
        description: &str,
        start_time: u64,
        end_time: u64,
    ) -> VotingResult<TxReceipt> {
        if start_time > end_time {
            return Err(Self::revert("start after end"));
        }
        self.proposals.write().push(StoredProposal {
            creator,
            title: title.to_string(),
            description: description.to_string(),
            start_time,
            end_time,
            yes_handle: CiphertextHandle::ZERO,
            no_handle: CiphertextHandle::ZERO,
            voters: Vec::new(),
        });
        Ok(self.next_receipt(title.as_bytes()))
    }

    async fn vote(
        &self,
        voter: Address,
        id: u64,
        is_yes: bool,
        handle: CiphertextHandle,
        proof: &[u8],
    ) -> VotingResult<TxReceipt> {
        if !InMemoryCoprocessor::verify_proof(self.address, voter, &[handle], proof) {
            return Err(Self::revert("invalid input proof"));
        }
        let weight = self
            .coprocessor
            .value_of(handle)
            .ok_or_else(|| Self::revert("unknown ciphertext"))?;
        self.apply_vote(voter, id, is_yes, weight)
    }

    async fn vote_simple(
        &self,
        voter: Address,
        id: u64,
        is_yes: bool,
    ) -> VotingResult<TxReceipt> {
        self.apply_vote(voter, id, is_yes, 1)
    }

    fn supports_event_filters(&self) -> bool {
        self.event_filters.load(Ordering::SeqCst)
    }

    async fn voted_events(&self, account: Address) -> VotingResult<Vec<VoteRecord>> {
        if !self.supports_event_filters() {
            return Err(VotingError::Contract(
                "provider does not support event filters".to_string(),
            ));
        }
        self.filtered_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.events_for(account))
    }

    async fn scan_vote_logs(&self, account: Address) -> VotingResult<Vec<VoteRecord>> {
        self.raw_scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.events_for(account))
    }
}
