//! Threshold signing module
//!
//! Two-round FROST signing:
//! 1. each signer publishes nonce commitments `(D_i, E_i)`;
//! 2. each signer derives binding factors from the message and every
//!    commitment, and publishes its partial signature `z_i`.
//!
//! Any party holding the public key package can then verify and aggregate the
//! partial signatures into a single Schnorr signature.

mod aggregate;
mod dsg;
mod messages;
mod nonce;

pub use aggregate::aggregate;
pub use dsg::{
    binding_factors, challenge, group_commitment, sign, verify_partial_signature, BindingFactors,
};
pub use messages::*;
pub use nonce::{NonceManager, SigningNonces};

use crate::{validate_participant_set, Error, KeyShare, ParticipantId, Result};
use k256::{ProjectivePoint, Scalar};
use std::collections::BTreeMap;

/// Public nonce commitments of one signer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningCommitment {
    pub participant_id: ParticipantId,
    /// `D_i`
    pub hiding: ProjectivePoint,
    /// `E_i`
    pub binding: ProjectivePoint,
}

/// Partial signature from one signer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialSignature {
    pub participant_id: ParticipantId,
    pub z: Scalar,
}

/// Message plus every signer's commitments; identical for all signers
#[derive(Debug, Clone)]
pub struct SigningPackage {
    message: Vec<u8>,
    commitments: BTreeMap<ParticipantId, SigningCommitment>,
}

impl SigningPackage {
    pub fn new(
        message: &[u8],
        commitments: impl IntoIterator<Item = SigningCommitment>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for commitment in commitments {
            if map.insert(commitment.participant_id, commitment).is_some() {
                return Err(Error::Configuration(format!(
                    "Duplicate commitment from participant {}",
                    commitment.participant_id
                )));
            }
        }
        validate_participant_set(&map.keys().copied().collect::<Vec<_>>())?;

        Ok(Self {
            message: message.to_vec(),
            commitments: map,
        })
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Signing set, sorted
    pub fn signers(&self) -> Vec<ParticipantId> {
        self.commitments.keys().copied().collect()
    }

    pub fn commitment(&self, id: ParticipantId) -> Option<&SigningCommitment> {
        self.commitments.get(&id)
    }

    pub fn commitments(&self) -> impl Iterator<Item = &SigningCommitment> {
        self.commitments.values()
    }
}

/// Check a requested signing set against a key share before any round starts
///
/// Returns the sorted signer set.
pub fn validate_signers(
    key_share: &KeyShare,
    signers: &[ParticipantId],
) -> Result<Vec<ParticipantId>> {
    let signers = validate_participant_set(signers)?;

    if let Some(unknown) = signers
        .iter()
        .find(|id| !key_share.participants.contains(id))
    {
        return Err(Error::Configuration(format!(
            "Participant {} does not hold a share of this key",
            unknown
        )));
    }
    if !signers.contains(&key_share.participant_id) {
        return Err(Error::Configuration(format!(
            "Participant {} is not in the signing set",
            key_share.participant_id
        )));
    }
    if signers.len() < key_share.threshold {
        return Err(Error::InsufficientParticipants {
            required: key_share.threshold,
            actual: signers.len(),
            missing: Vec::new(),
        });
    }

    Ok(signers)
}
