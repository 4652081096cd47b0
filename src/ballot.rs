//! Encrypted ballot construction and submission.
//!
//! Turns a plaintext vote intent into a bound ciphertext plus inclusion
//! proof and submits it. All preconditions are checked before any
//! cryptographic work so a doomed vote never triggers a wallet prompt, and
//! proposal existence and the voted flag are re-checked against the contract
//! rather than the local cache, which may be stale.

use crate::contract::VotingContract;
use crate::errors::{VotingError, VotingResult};
use crate::instance::FheInstance;
use crate::types::{Address, TxReceipt};
use tracing::{debug, info};

/// Build an encrypted ballot for (proposal, account) and submit it, awaiting
/// inclusion.
///
/// Overlapping submissions for the same (proposal, account) are the caller's
/// responsibility to serialize; this function does not deduplicate.
pub(crate) async fn build_and_submit(
    instance: &dyn FheInstance,
    contract: &dyn VotingContract,
    contract_address: Address,
    account: Address,
    proposal_id: u64,
    is_yes: bool,
    value_abs: u32,
) -> VotingResult<TxReceipt> {
    if value_abs == 0 {
        return Err(VotingError::InvalidWeight);
    }

    // Authoritative re-checks against the contract, not the local cache.
    let count = contract
        .proposal_count()
        .await
        .map_err(VotingError::classified)?;
    if proposal_id >= count {
        return Err(VotingError::InvalidProposal);
    }
    if contract
        .has_voted(proposal_id, account)
        .await
        .map_err(VotingError::classified)?
    {
        return Err(VotingError::AlreadyVoted);
    }

    debug!(proposal_id, is_yes, value_abs, "building encrypted ballot");
    let mut builder = instance.create_encrypted_input(contract_address, account);
    builder.add32(value_abs);
    let encrypted = builder.encrypt().await?;
    let handle = encrypted
        .handles
        .first()
        .copied()
        .ok_or_else(|| VotingError::Unclassified("encrypted input produced no handle".into()))?;

    let receipt = contract
        .vote(account, proposal_id, is_yes, handle, &encrypted.input_proof)
        .await
        .map_err(VotingError::classified)?;
    info!(proposal_id, tx_hash = %receipt.tx_hash, "vote mined");
    Ok(receipt)
}
