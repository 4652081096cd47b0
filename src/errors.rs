//! Voting Client Error Types

use thiserror::Error;

/// Result type for voting client operations
pub type VotingResult<T> = Result<T, VotingError>;

/// Errors surfaced by the voting client
///
/// Expected conditions (already voted, voting window closed, unauthorized
/// decryption) are plain `Err` values, never panics. `Unclassified` carries
/// the original failure message verbatim so nothing is silently swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VotingError {
    // Precondition errors, rejected before any network or cryptographic work
    #[error("no contract deployment for chain id {chain_id}")]
    NoDeployment { chain_id: u64 },

    #[error("no signer connected")]
    NoSigner,

    #[error("vote weight must be positive")]
    InvalidWeight,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid ciphertext handle: {0}")]
    InvalidHandle(String),

    // Contract revert taxonomy
    #[error("proposal does not exist")]
    InvalidProposal,

    #[error("account has already voted on this proposal")]
    AlreadyVoted,

    #[error("voting has not started yet")]
    NotStarted,

    #[error("voting has already ended")]
    Ended,

    // Transport / service errors
    #[error("transient RPC failure: {0}")]
    RpcTransient(String),

    #[error("decryption not authorized: {0}")]
    Unauthorized(String),

    #[error("unable to build decryption signature")]
    SignatureUnavailable,

    #[error("contract call failed: {0}")]
    Contract(String),

    #[error("signature storage failed: {0}")]
    Storage(String),

    #[error("{0}")]
    Unclassified(String),
}

impl VotingError {
    /// Re-classify free-text contract or service failures into the taxonomy.
    ///
    /// Errors that already carry a classification pass through unchanged.
    pub fn classified(self) -> VotingError {
        match self {
            VotingError::Contract(msg) | VotingError::Unclassified(msg) => classify_failure(&msg),
            other => other,
        }
    }

    /// Short user-facing status string for this error.
    pub fn user_message(&self) -> String {
        match self {
            VotingError::NoDeployment { chain_id } => {
                format!("Voting contract is not deployed on chain {chain_id}")
            }
            VotingError::NoSigner => "Connect a wallet to continue".to_string(),
            VotingError::InvalidWeight => "Vote weight must be greater than zero".to_string(),
            VotingError::InvalidAddress(_) => "Invalid address".to_string(),
            VotingError::InvalidHandle(_) => "Invalid ciphertext handle".to_string(),
            VotingError::InvalidProposal => "Proposal does not exist".to_string(),
            VotingError::AlreadyVoted => "You have already voted on this proposal".to_string(),
            VotingError::NotStarted => "Voting has not started yet".to_string(),
            VotingError::Ended => "Voting has already ended".to_string(),
            VotingError::RpcTransient(_) => {
                "RPC error: try resetting your wallet account or restarting the node".to_string()
            }
            VotingError::Unauthorized(_) => {
                "Not authorized to decrypt. Vote on the proposal first, or use an account with decryption standing".to_string()
            }
            VotingError::SignatureUnavailable => {
                "Unable to build a decryption signature".to_string()
            }
            VotingError::Contract(msg) => format!("Contract call failed: {msg}"),
            VotingError::Storage(msg) => format!("Signature storage failed: {msg}"),
            VotingError::Unclassified(msg) => msg.clone(),
        }
    }
}

/// Map the free-text failure message of a contract or decryption call into
/// the error taxonomy.
///
/// Classification is substring-based against known contract revert phrases
/// and known decryption-service phrases. Anything unmatched falls through to
/// `Unclassified` carrying the original message verbatim.
pub fn classify_failure(message: &str) -> VotingError {
    let lower = message.to_lowercase();
    if lower.contains("not started") {
        VotingError::NotStarted
    } else if lower.contains("already voted") {
        VotingError::AlreadyVoted
    } else if lower.contains("invalid proposal") || lower.contains("proposal does not exist") {
        VotingError::InvalidProposal
    } else if lower.contains("ended") {
        VotingError::Ended
    } else if lower.contains("not authorized")
        || lower.contains("not authorised")
        || lower.contains("user is not allowed")
    {
        VotingError::Unauthorized(message.to_string())
    } else if lower.contains("internal json-rpc error")
        || lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        VotingError::RpcTransient(message.to_string())
    } else {
        VotingError::Unclassified(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_contract_reverts() {
        assert_eq!(
            classify_failure("execution reverted: voting not started"),
            VotingError::NotStarted
        );
        assert_eq!(
            classify_failure("execution reverted: voting ended"),
            VotingError::Ended
        );
        assert_eq!(
            classify_failure("execution reverted: already voted"),
            VotingError::AlreadyVoted
        );
        assert_eq!(
            classify_failure("execution reverted: invalid proposal"),
            VotingError::InvalidProposal
        );
    }

    #[test]
    fn test_classify_service_failures() {
        assert!(matches!(
            classify_failure("User is not authorized to reencrypt this handle"),
            VotingError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure("ACL check failed: user is not authorised"),
            VotingError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure("Internal JSON-RPC error."),
            VotingError::RpcTransient(_)
        ));
        assert!(matches!(
            classify_failure("request timed out after 30s"),
            VotingError::RpcTransient(_)
        ));
    }

    #[test]
    fn test_unmatched_message_preserved_verbatim() {
        let msg = "something completely unexpected happened (code 7)";
        match classify_failure(msg) {
            VotingError::Unclassified(m) => assert_eq!(m, msg),
            other => panic!("expected Unclassified, got {other:?}"),
        }
    }

    #[test]
    fn test_not_started_wins_over_ended() {
        // "voting not started" must not be mistaken for the ended case even
        // though both phrases mention voting.
        assert_eq!(
            classify_failure("voting not started"),
            VotingError::NotStarted
        );
    }

    #[test]
    fn test_classified_passthrough() {
        assert_eq!(
            VotingError::AlreadyVoted.classified(),
            VotingError::AlreadyVoted
        );
        assert_eq!(
            VotingError::Contract("execution reverted: invalid proposal".into()).classified(),
            VotingError::InvalidProposal
        );
    }

    #[test]
    fn test_user_messages_nonempty() {
        let errors = [
            VotingError::NoSigner,
            VotingError::InvalidWeight,
            VotingError::InvalidProposal,
            VotingError::AlreadyVoted,
            VotingError::SignatureUnavailable,
            VotingError::Unclassified("boom".into()),
        ];
        for e in errors {
            assert!(!e.user_message().is_empty());
        }
    }
}
