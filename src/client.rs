//! Voting client facade.
//!
//! Ties the collaborators together behind one handle: the contract binding,
//! the FHE instance, the signature storage, and the currently active session
//! (chain id + signer). The session is the single source of the "active
//! identity" that in-flight decryptions are checked against, so wiring
//! account/network change notifications into [`VotingClient::set_session`]
//! is all an embedder needs to do for staleness to work.

use crate::ballot;
use crate::config::{ClientConfig, Deployment};
use crate::contract::VotingContract;
use crate::decrypt::{self, ActiveIdentity, DecryptAllReport, IdentityProbe};
use crate::errors::{VotingError, VotingResult};
use crate::instance::FheInstance;
use crate::signer::Signer;
use crate::state::VotingState;
use crate::storage::{MemoryStorage, SignatureStorage};
use crate::types::{
    Address, ClearTally, EncryptedTally, Proposal, TxReceipt, VoteRecord,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The active (network, account) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub chain_id: Option<u64>,
    pub account: Option<Address>,
}

/// Client for the FHE voting contract.
pub struct VotingClient {
    config: ClientConfig,
    contract: Arc<dyn VotingContract>,
    instance: Arc<dyn FheInstance>,
    storage: Arc<dyn SignatureStorage>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    session: RwLock<Session>,
    state: VotingState,
}

impl VotingClient {
    pub fn builder(
        contract: Arc<dyn VotingContract>,
        instance: Arc<dyn FheInstance>,
    ) -> VotingClientBuilder {
        VotingClientBuilder::new(contract, instance)
    }

    /// Update the active chain and signer.
    ///
    /// This is the account/network change notification point. Decrypted
    /// tallies and the vote history belong to the previous identity and are
    /// discarded when it changes.
    pub async fn set_session(&self, chain_id: Option<u64>, signer: Option<Arc<dyn Signer>>) {
        let account = signer.as_ref().map(|s| s.address());
        let new_session = Session { chain_id, account };

        let changed = {
            let mut session = self.session.write().await;
            let changed = *session != new_session;
            *session = new_session;
            changed
        };
        *self.signer.write().await = signer;

        if changed {
            debug!(?chain_id, ?account, "session changed, dropping decrypted view");
            self.state.clear_decrypted().await;
            self.state.clear_vote_records().await;
        }
    }

    pub async fn session(&self) -> Session {
        *self.session.read().await
    }

    /// The contract deployment for the active chain, if any.
    pub async fn deployment(&self) -> Option<Deployment> {
        let session = self.session.read().await;
        session
            .chain_id
            .and_then(|id| self.config.deployments.deployment_for(id))
            .cloned()
    }

    pub async fn is_deployed(&self) -> bool {
        self.deployment().await.is_some()
    }

    pub async fn active_account(&self) -> Option<Address> {
        self.session.read().await.account
    }

    async fn current_signer(&self) -> Option<Arc<dyn Signer>> {
        self.signer.read().await.clone()
    }

    async fn require_deployment(&self) -> VotingResult<Deployment> {
        match self.deployment().await {
            Some(d) => Ok(d),
            None => Err(VotingError::NoDeployment {
                chain_id: self.session.read().await.chain_id.unwrap_or_default(),
            }),
        }
    }

    // ---- Read-only refreshes -------------------------------------------

    /// Refresh the proposal list and per-account voted flags.
    pub async fn refresh_proposals(&self) -> VotingResult<()> {
        if !self.is_deployed().await {
            return Ok(());
        }
        let account = self.active_account().await;
        self.state
            .refresh_proposals(self.contract.as_ref(), account)
            .await
            .map_err(VotingError::classified)
    }

    /// Refresh one proposal's ciphertext handles.
    pub async fn refresh_tallies(&self, proposal_id: u64) -> VotingResult<()> {
        if !self.is_deployed().await {
            return Ok(());
        }
        self.state
            .refresh_tallies(self.contract.as_ref(), proposal_id)
            .await
            .map_err(VotingError::classified)
    }

    /// Refresh the active account's vote history from event logs.
    pub async fn refresh_my_votes(&self) -> VotingResult<()> {
        let Some(account) = self.active_account().await else {
            self.state.clear_vote_records().await;
            return Ok(());
        };
        if !self.is_deployed().await {
            return Ok(());
        }
        self.state
            .refresh_vote_records(self.contract.as_ref(), account)
            .await
            .map_err(VotingError::classified)
    }

    // ---- Writes --------------------------------------------------------

    /// Create a proposal and refresh the list once mined.
    pub async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        start_time: u64,
        end_time: u64,
    ) -> VotingResult<TxReceipt> {
        self.require_deployment().await?;
        let signer = self.current_signer().await.ok_or(VotingError::NoSigner)?;
        let receipt = self
            .contract
            .create_proposal(signer.address(), title, description, start_time, end_time)
            .await
            .map_err(VotingError::classified)?;
        info!(tx_hash = %receipt.tx_hash, "proposal created");
        self.refresh_proposals().await?;
        Ok(receipt)
    }

    /// Cast an encrypted vote with the given magnitude.
    ///
    /// Preconditions are checked before any cryptographic work; see
    /// [`ballot`]. On success the proposal's tally handles and the proposal
    /// list (for the voted flag) are refreshed.
    pub async fn cast_vote(
        &self,
        proposal_id: u64,
        is_yes: bool,
        value_abs: u32,
    ) -> VotingResult<TxReceipt> {
        let deployment = self.require_deployment().await?;
        let signer = self.current_signer().await.ok_or(VotingError::NoSigner)?;

        let receipt = ballot::build_and_submit(
            self.instance.as_ref(),
            self.contract.as_ref(),
            deployment.address,
            signer.address(),
            proposal_id,
            is_yes,
            value_abs,
        )
        .await?;

        self.refresh_tallies(proposal_id).await?;
        self.refresh_proposals().await?;
        Ok(receipt)
    }

    /// Unencrypted test-only vote path with implicit weight 1.
    pub async fn vote_simple(&self, proposal_id: u64, is_yes: bool) -> VotingResult<TxReceipt> {
        self.require_deployment().await?;
        let signer = self.current_signer().await.ok_or(VotingError::NoSigner)?;
        let receipt = self
            .contract
            .vote_simple(signer.address(), proposal_id, is_yes)
            .await
            .map_err(VotingError::classified)?;
        self.refresh_proposals().await?;
        Ok(receipt)
    }

    // ---- Decryption ----------------------------------------------------

    /// Decrypt the cached tallies of one proposal.
    ///
    /// A no-op when no deployment or signer is active; a doomed decryption
    /// must not produce wallet prompts.
    pub async fn decrypt_tallies(&self, proposal_id: u64) -> VotingResult<()> {
        let Some(deployment) = self.deployment().await else {
            debug!("decrypt skipped: no deployment on active chain");
            return Ok(());
        };
        let Some(signer) = self.current_signer().await else {
            debug!("decrypt skipped: no signer connected");
            return Ok(());
        };
        decrypt::decrypt_proposal(
            &self.state,
            self.instance.as_ref(),
            signer.as_ref(),
            self.storage.as_ref(),
            self,
            deployment.address,
            proposal_id,
            self.config.signature_validity_days,
        )
        .await
    }

    /// Decrypt the tallies of every known proposal, isolating per-proposal
    /// failures.
    pub async fn decrypt_all(&self) -> DecryptAllReport {
        let Some(deployment) = self.deployment().await else {
            return DecryptAllReport::default();
        };
        let Some(signer) = self.current_signer().await else {
            return DecryptAllReport::default();
        };
        decrypt::decrypt_all(
            &self.state,
            self.instance.as_ref(),
            signer.as_ref(),
            self.storage.as_ref(),
            self,
            deployment.address,
            self.config.signature_validity_days,
        )
        .await
    }

    // ---- Cached reads --------------------------------------------------

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.state.proposals().await
    }

    pub async fn proposal_count(&self) -> u64 {
        self.state.proposal_count().await
    }

    pub async fn tallies(&self, proposal_id: u64) -> Option<EncryptedTally> {
        self.state.tallies(proposal_id).await
    }

    pub async fn clear_tally(&self, proposal_id: u64) -> Option<ClearTally> {
        self.state.clear_tally(proposal_id).await
    }

    pub async fn vote_records(&self) -> Vec<VoteRecord> {
        self.state.vote_records().await
    }

    /// Proposals created by the active account, derived on read.
    pub async fn my_proposals(&self) -> Vec<Proposal> {
        match self.active_account().await {
            Some(account) => self.state.proposals_created_by(account).await,
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl IdentityProbe for VotingClient {
    async fn active_identity(&self) -> ActiveIdentity {
        let session = self.session.read().await;
        let contract_address = session
            .chain_id
            .and_then(|id| self.config.deployments.deployment_for(id))
            .map(|d| d.address);
        ActiveIdentity {
            contract_address,
            account: session.account,
        }
    }
}

/// Builder for [`VotingClient`].
pub struct VotingClientBuilder {
    contract: Arc<dyn VotingContract>,
    instance: Arc<dyn FheInstance>,
    storage: Option<Arc<dyn SignatureStorage>>,
    config: ClientConfig,
}

impl VotingClientBuilder {
    pub fn new(contract: Arc<dyn VotingContract>, instance: Arc<dyn FheInstance>) -> Self {
        Self {
            contract,
            instance,
            storage: None,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a contract deployment for a chain id.
    pub fn with_deployment(
        mut self,
        chain_id: u64,
        address: Address,
        chain_name: impl Into<String>,
    ) -> Self {
        self.config.deployments = std::mem::take(&mut self.config.deployments)
            .with_deployment(chain_id, address, chain_name);
        self
    }

    /// Persistent store for decryption signatures. Defaults to an in-memory
    /// store, which costs a fresh prompt per process.
    pub fn with_storage(mut self, storage: Arc<dyn SignatureStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn signature_validity_days(mut self, days: u64) -> Self {
        self.config.signature_validity_days = days;
        self
    }

    pub fn build(self) -> VotingClient {
        VotingClient {
            config: self.config,
            contract: self.contract,
            instance: self.instance,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            signer: RwLock::new(None),
            session: RwLock::new(Session::default()),
            state: VotingState::new(),
        }
    }
}
