//! Signing message types

use super::{PartialSignature, SigningCommitment};
use crate::curve::{point_from_bytes, point_to_bytes, scalar_from_bytes, scalar_to_bytes};
use crate::{ParticipantId, Result};
use serde::{Deserialize, Serialize};

/// Round 1 message: Nonce commitments `(D, E)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceCommitmentMessage {
    /// Sender participant ID
    pub participant_id: ParticipantId,
    /// Hiding commitment `D = d*G`
    pub hiding: Vec<u8>,
    /// Binding commitment `E = e*G`
    pub binding: Vec<u8>,
}

impl NonceCommitmentMessage {
    pub fn decode(&self) -> Result<SigningCommitment> {
        Ok(SigningCommitment {
            participant_id: self.participant_id,
            hiding: point_from_bytes(&self.hiding)?,
            binding: point_from_bytes(&self.binding)?,
        })
    }
}

impl From<&SigningCommitment> for NonceCommitmentMessage {
    fn from(commitment: &SigningCommitment) -> Self {
        Self {
            participant_id: commitment.participant_id,
            hiding: point_to_bytes(&commitment.hiding),
            binding: point_to_bytes(&commitment.binding),
        }
    }
}

/// Round 2 message: Partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialSignatureMessage {
    /// Sender participant ID
    pub participant_id: ParticipantId,
    /// Response share `z_i`
    pub z: Vec<u8>,
}

impl PartialSignatureMessage {
    pub fn decode(&self) -> Result<PartialSignature> {
        Ok(PartialSignature {
            participant_id: self.participant_id,
            z: scalar_from_bytes(&self.z)?,
        })
    }
}

impl From<&PartialSignature> for PartialSignatureMessage {
    fn from(partial: &PartialSignature) -> Self {
        Self {
            participant_id: partial.participant_id,
            z: scalar_to_bytes(&partial.z).to_vec(),
        }
    }
}
