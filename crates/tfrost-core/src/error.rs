//! Error types for threshold signing operations

use crate::ParticipantId;
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during DKG or signing
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed point or scalar encoding; fatal to the message only
    #[error("Decode error: {0}")]
    Decode(String),

    /// Scalar that cannot be used (e.g. inverting zero)
    #[error("Invalid scalar")]
    InvalidScalar,

    /// A dealer's share failed verification against its commitment
    #[error("Invalid share from participant {0}")]
    InvalidShare(ParticipantId),

    /// A dealer's proof of knowledge of its secret did not verify
    #[error("Invalid proof of knowledge from participant {0}")]
    InvalidProof(ParticipantId),

    /// A partial signature failed verification
    #[error("Invalid partial signature from participant {0}")]
    InvalidPartialSignature(ParticipantId),

    /// Quorum not reached
    #[error("Insufficient participants: required {required}, got {actual} (missing {missing:?})")]
    InsufficientParticipants {
        required: usize,
        actual: usize,
        missing: Vec<ParticipantId>,
    },

    /// Invalid participant set or threshold
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Final signature could not be produced or did not verify
    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    /// Round deadline passed with a quorum but without every participant
    #[error("Timeout in {round} round (missing {missing:?})")]
    Timeout {
        round: &'static str,
        missing: Vec<ParticipantId>,
    },

    /// Session identifier was already used
    #[error("Session already used: {0}")]
    SessionReused(String),

    /// Session was aborted explicitly
    #[error("Session aborted: {0}")]
    SessionAborted(String),

    /// Illegal state machine transition
    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    /// A nonce pair was already issued for this session
    #[error("Nonce already issued for session {0}")]
    NonceReuse(String),

    /// No live nonce pair for this session
    #[error("No nonce available for session {0}")]
    NonceUnavailable(String),

    /// Participant is excluded by the configured fault policy
    #[error("Participant {0} is banned")]
    Banned(ParticipantId),

    /// Message not expected in the current protocol
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Share encryption or decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Network/relay error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Participant blamed by this error, if any
    pub fn culprit(&self) -> Option<ParticipantId> {
        match self {
            Error::InvalidShare(id)
            | Error::InvalidProof(id)
            | Error::InvalidPartialSignature(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_culprit() {
        assert_eq!(Error::InvalidShare(4).culprit(), Some(4));
        assert_eq!(Error::InvalidPartialSignature(2).culprit(), Some(2));
        assert_eq!(Error::InvalidScalar.culprit(), None);
    }

    #[test]
    fn test_insufficient_participants_message() {
        let err = Error::InsufficientParticipants {
            required: 3,
            actual: 2,
            missing: vec![4, 5],
        };
        assert_eq!(
            err.to_string(),
            "Insufficient participants: required 3, got 2 (missing [4, 5])"
        );
    }
}
