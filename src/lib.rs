//! FHE Voting Client
//!
//! Client orchestration layer for a voting contract that stores tallies as
//! ciphertexts under a fully homomorphic encryption scheme. Users create
//! proposals, cast encrypted votes, and obtain decrypted tallies; the
//! interesting work is everything between the plaintext intent and the
//! contract.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VotingClient                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │  Encrypted │  │  Decryption  │  │  Tally Decryption   │  │
//! │  │  Ballot    │  │  Signature   │──│  Orchestrator       │  │
//! │  │  Builder   │  │  Cache       │  │  (+staleness check) │  │
//! │  └─────┬──────┘  └──────┬───────┘  └──────────┬──────────┘  │
//! │        │                │                     │             │
//! │  ┌─────▼────────────────▼─────────────────────▼──────────┐  │
//! │  │          Proposal & Vote State Store                  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └──────┬──────────────┬───────────────┬──────────────┬───────┘
//!        │              │               │              │
//!   VotingContract  FheInstance      Signer    SignatureStorage
//!   (trait)         (trait)          (trait)   (trait)
//! ```
//!
//! # Key behaviors
//!
//! - **Encrypted ballots**: a vote magnitude is encrypted into a ciphertext
//!   handle plus inclusion proof bound to (contract, account); preconditions
//!   are re-checked against the contract before any cryptographic work so a
//!   doomed vote never prompts the wallet.
//! - **Decryption signatures**: a time-boxed credential per (coprocessor,
//!   contract set, account), cached in caller-supplied storage and reused
//!   without re-prompting until expiry.
//! - **Sentinel short-circuit**: the all-zero ciphertext handle means "no
//!   value produced yet" and resolves to plaintext zero locally; a proposal
//!   nobody has voted on decrypts without any signing prompt.
//! - **Staleness**: a decryption result that completes after the active
//!   account or network changed is discarded, never merged.

pub mod ballot;
pub mod client;
pub mod config;
pub mod contract;
pub mod decrypt;
pub mod errors;
pub mod instance;
pub mod signature;
pub mod signer;
pub mod state;
pub mod storage;
pub mod types;

pub use client::{Session, VotingClient, VotingClientBuilder};
pub use config::{ClientConfig, Deployment, DeploymentMap};
pub use contract::{InMemoryVotingContract, VotingContract};
pub use decrypt::{ActiveIdentity, DecryptAllReport, IdentityProbe};
pub use errors::{classify_failure, VotingError, VotingResult};
pub use instance::{
    DecryptGate, DecryptRequest, EncryptedInput, EncryptedInputBuilder, EphemeralKeypair,
    FheInstance, InMemoryCoprocessor, InMemoryFheInstance,
};
pub use signature::DecryptionSignature;
pub use signer::{LocalSigner, Signer};
pub use state::VotingState;
pub use storage::{MemoryStorage, SignatureStorage};
pub use types::{
    Address, CiphertextHandle, ClearTally, ClearValue, EncryptedTally, Proposal, TxReceipt,
    VoteRecord,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::{Session, VotingClient, VotingClientBuilder};
    pub use crate::config::{ClientConfig, DeploymentMap};
    pub use crate::contract::VotingContract;
    pub use crate::errors::{VotingError, VotingResult};
    pub use crate::instance::FheInstance;
    pub use crate::signature::DecryptionSignature;
    pub use crate::signer::Signer;
    pub use crate::storage::SignatureStorage;
    pub use crate::types::{Address, CiphertextHandle, ClearTally, Proposal};
}
