//! DKG message types

use crate::curve::{self, point_from_bytes, scalar_from_bytes};
use crate::polynomial::PolynomialCommitment;
use crate::{Error, ParticipantId, Result};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

/// Round 1 message: Commitment to secret polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgCommitment {
    /// Sender participant ID
    pub participant_id: ParticipantId,
    /// Commitments to polynomial coefficients (Feldman VSS)
    pub coefficient_points: Vec<Vec<u8>>,
    /// Proof of knowledge nonce commitment `R`
    pub proof_r: Vec<u8>,
    /// Proof of knowledge response `mu`
    pub proof_mu: Vec<u8>,
    /// Ephemeral X25519 key shares are sealed to
    pub encryption_key: Vec<u8>,
}

/// Decoded round 1 payload
#[derive(Debug, Clone)]
pub struct DealerCommitment {
    pub participant_id: ParticipantId,
    pub commitment: PolynomialCommitment,
    pub proof: ProofOfKnowledge,
    pub encryption_key: x25519_dalek::PublicKey,
}

impl DkgCommitment {
    pub fn decode(&self) -> Result<DealerCommitment> {
        let encryption_key: [u8; 32] = self
            .encryption_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Decode("encryption key must be 32 bytes".into()))?;

        Ok(DealerCommitment {
            participant_id: self.participant_id,
            commitment: PolynomialCommitment::decode(&self.coefficient_points)?,
            proof: ProofOfKnowledge {
                r: point_from_bytes(&self.proof_r)?,
                mu: scalar_from_bytes(&self.proof_mu)?,
            },
            encryption_key: x25519_dalek::PublicKey::from(encryption_key),
        })
    }
}

/// Schnorr proof that a dealer knows its constant term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfKnowledge {
    pub r: ProjectivePoint,
    pub mu: Scalar,
}

/// Round 2 message: Secret share, sealed to the recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgShare {
    /// Dealer
    pub sender_id: ParticipantId,
    /// Receiver
    pub recipient_id: ParticipantId,
    /// AEAD nonce
    pub nonce: Vec<u8>,
    /// Encrypted 32-byte share value
    pub ciphertext: Vec<u8>,
}

/// Reason a participant complains about a dealer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Share did not match the published commitment, or could not be opened
    InvalidShare,
    /// Proof of knowledge of the constant term failed
    InvalidProof,
    /// Partial signature failed verification
    InvalidPartialSignature,
}

/// A detected fault attributed to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Misbehaving participant
    pub participant: ParticipantId,
    pub kind: FaultKind,
}

impl Fault {
    /// Error reported when a session aborts on this fault
    pub fn into_error(self) -> Error {
        match self.kind {
            FaultKind::InvalidShare => Error::InvalidShare(self.participant),
            FaultKind::InvalidProof => Error::InvalidProof(self.participant),
            FaultKind::InvalidPartialSignature => {
                Error::InvalidPartialSignature(self.participant)
            }
        }
    }

    /// Fault carried by an error, if it blames someone
    pub fn from_error(error: &Error) -> Option<Self> {
        let kind = match error {
            Error::InvalidShare(_) => FaultKind::InvalidShare,
            Error::InvalidProof(_) => FaultKind::InvalidProof,
            Error::InvalidPartialSignature(_) => FaultKind::InvalidPartialSignature,
            _ => return None,
        };
        error.culprit().map(|participant| Fault { participant, kind })
    }
}

/// Round 3 message: Complaints against dealers (empty when all shares verified)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgConfirmation {
    /// Sender participant ID
    pub participant_id: ParticipantId,
    /// Faults detected by the sender
    pub complaints: Vec<Fault>,
}

/// Share a dealer publishes to answer a complaint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealedShare {
    /// Complaining participant the share was dealt to
    pub recipient_id: ParticipantId,
    /// Share value, 32-byte big-endian scalar
    pub value: Vec<u8>,
}

/// Round 4 message: Disputed shares in the clear (broadcast)
///
/// Only dealers named in an `InvalidShare` complaint send one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgJustification {
    /// Accused dealer
    pub participant_id: ParticipantId,
    pub revealed: Vec<RevealedShare>,
}

impl DkgJustification {
    /// Revealed share for `recipient`, if present and well-formed
    pub fn share_for(&self, recipient: ParticipantId) -> Option<Scalar> {
        self.revealed
            .iter()
            .find(|share| share.recipient_id == recipient)
            .and_then(|share| scalar_from_bytes(&share.value).ok())
    }
}

pub(crate) fn encode_proof(proof: &ProofOfKnowledge) -> (Vec<u8>, Vec<u8>) {
    (
        curve::point_to_bytes(&proof.r),
        curve::scalar_to_bytes(&proof.mu).to_vec(),
    )
}
