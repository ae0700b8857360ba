//! Core types shared by key generation and signing

use crate::curve::{self, POINT_LEN, SCALAR_LEN};
use crate::keygen::{DkgCommitment, DkgConfirmation, DkgJustification, DkgShare};
use crate::sign::{NonceCommitmentMessage, PartialSignatureMessage};
use crate::{Error, Result};
use k256::{elliptic_curve::sec1::ToEncodedPoint, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Unique identifier for a participant; doubles as its x-coordinate
pub type ParticipantId = u32;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// Derive a session ID from a label all participants agree on
pub fn session_id_from_label(label: &str) -> SessionId {
    Sha256::new()
        .chain_update(curve::CONTEXT_STRING.as_bytes())
        .chain_update(b"session")
        .chain_update(label.as_bytes())
        .finalize()
        .into()
}

/// Hex serialization for scalars in persisted structures
pub(crate) mod scalar_serde {
    use k256::Scalar;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(crate::curve::scalar_to_bytes(scalar)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
        crate::curve::scalar_from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Hex serialization for points in persisted structures
pub(crate) mod point_serde {
    use k256::ProjectivePoint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(point: &ProjectivePoint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(crate::curve::point_to_bytes(point)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ProjectivePoint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
        crate::curve::point_from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// The group's public key, fixed once DKG completes
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPublicKey(#[serde(with = "point_serde")] ProjectivePoint);

impl GroupPublicKey {
    pub fn new(point: ProjectivePoint) -> Self {
        Self(point)
    }

    pub fn to_point(&self) -> ProjectivePoint {
        self.0
    }

    /// Compressed encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        curve::point_to_bytes(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        curve::point_from_bytes(bytes).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupPublicKey").field(&self.to_hex()).finish()
    }
}

/// Public image `x_j * G` of a participant's private key share
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingShare(#[serde(with = "point_serde")] ProjectivePoint);

impl VerifyingShare {
    pub fn new(point: ProjectivePoint) -> Self {
        Self(point)
    }

    pub fn to_point(&self) -> ProjectivePoint {
        self.0
    }
}

impl fmt::Debug for VerifyingShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VerifyingShare")
            .field(&hex::encode(curve::point_to_bytes(&self.0)))
            .finish()
    }
}

/// Public material every participant can use to check partial signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyPackage {
    /// Minimum number of signers
    pub threshold: usize,
    /// Group public key
    pub group_public_key: GroupPublicKey,
    /// Verifying share of every key holder
    pub verifying_shares: BTreeMap<ParticipantId, VerifyingShare>,
}

/// Private key share held by one participant after DKG
///
/// The core hands this to the caller and never persists it; storage at rest is
/// the caller's responsibility.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// This participant's ID
    #[zeroize(skip)]
    pub participant_id: ParticipantId,

    /// Minimum number of signers
    #[zeroize(skip)]
    pub threshold: usize,

    /// Every key holder, sorted
    #[zeroize(skip)]
    pub participants: Vec<ParticipantId>,

    /// Secret share `x_i`
    #[serde(with = "scalar_serde")]
    pub(crate) secret_share: Scalar,

    /// Group public key
    #[zeroize(skip)]
    pub group_public_key: GroupPublicKey,

    /// Verifying shares of all key holders
    #[zeroize(skip)]
    pub verifying_shares: BTreeMap<ParticipantId, VerifyingShare>,
}

impl KeyShare {
    /// Secret share scalar
    pub fn secret_share(&self) -> &Scalar {
        &self.secret_share
    }

    /// Public half of the key material
    pub fn public_key_package(&self) -> PublicKeyPackage {
        PublicKeyPackage {
            threshold: self.threshold,
            group_public_key: self.group_public_key,
            verifying_shares: self.verifying_shares.clone(),
        }
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("participant_id", &self.participant_id)
            .field("threshold", &self.threshold)
            .field("participants", &self.participants)
            .field("secret_share", &"<redacted>")
            .field("group_public_key", &self.group_public_key)
            .finish()
    }
}

/// Schnorr signature `(R, z)`
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Aggregate commitment point
    #[serde(with = "point_serde")]
    r: ProjectivePoint,
    /// Aggregate response scalar
    #[serde(with = "scalar_serde")]
    z: Scalar,
}

impl Signature {
    /// Encoded length: compressed `R` followed by `z`
    pub const LEN: usize = POINT_LEN + SCALAR_LEN;

    pub fn new(r: ProjectivePoint, z: Scalar) -> Self {
        Self { r, z }
    }

    pub fn r(&self) -> &ProjectivePoint {
        &self.r
    }

    pub fn z(&self) -> &Scalar {
        &self.z
    }

    /// Convert to bytes (R || z)
    pub fn to_bytes(&self) -> [u8; Signature::LEN] {
        let mut bytes = [0u8; Signature::LEN];
        // An identity R encodes as one byte and is left zero-padded, which
        // `from_bytes` rejects.
        let r = self.r.to_affine().to_encoded_point(true);
        bytes[..r.len()].copy_from_slice(r.as_bytes());
        bytes[POINT_LEN..].copy_from_slice(&curve::scalar_to_bytes(&self.z));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Signature::LEN {
            return Err(Error::Decode(format!(
                "signature must be {} bytes, got {}",
                Signature::LEN,
                bytes.len()
            )));
        }
        let r = curve::point_from_bytes(&bytes[..POINT_LEN])?;
        let z = curve::scalar_from_bytes(&bytes[POINT_LEN..])?;
        Ok(Self { r, z })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Schnorr verification: `z*G == R + c*Y`
    pub fn verify(&self, group_public_key: &GroupPublicKey, message: &[u8]) -> bool {
        let challenge = crate::sign::challenge(&self.r, group_public_key, message);
        curve::base_mul(&self.z) == self.r + group_public_key.to_point() * challenge
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}

/// Configuration for a DKG session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier
    pub session_id: SessionId,

    /// Threshold (t-of-n)
    pub threshold: usize,

    /// This participant's ID
    pub participant_id: ParticipantId,

    /// Participating IDs, sorted
    pub participants: Vec<ParticipantId>,
}

impl SessionConfig {
    /// Create a new session configuration
    ///
    /// Rejects zero or duplicate IDs, a threshold below 2 and a threshold that
    /// is not strictly smaller than the participant count.
    pub fn new(
        session_id: SessionId,
        participants: &[ParticipantId],
        threshold: usize,
        participant_id: ParticipantId,
    ) -> Result<Self> {
        let participants = validate_participant_set(participants)?;

        if threshold < 2 {
            return Err(Error::Configuration("Threshold must be at least 2".into()));
        }
        if threshold >= participants.len() {
            return Err(Error::Configuration(format!(
                "Threshold {} must be smaller than the participant count {}",
                threshold,
                participants.len()
            )));
        }
        if !participants.contains(&participant_id) {
            return Err(Error::Configuration(format!(
                "Participant {} is not in the participant set",
                participant_id
            )));
        }

        Ok(Self {
            session_id,
            threshold,
            participant_id,
            participants,
        })
    }

    /// Every participant except this one
    pub fn peers(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.participants
            .iter()
            .copied()
            .filter(move |id| *id != self.participant_id)
    }
}

/// Sort a participant set, rejecting zero and duplicate IDs
pub fn validate_participant_set(participants: &[ParticipantId]) -> Result<Vec<ParticipantId>> {
    let mut seen = BTreeSet::new();
    for &id in participants {
        if id == 0 {
            return Err(Error::Configuration("Participant ID 0 is reserved".into()));
        }
        if !seen.insert(id) {
            return Err(Error::Configuration(format!(
                "Duplicate participant ID {}",
                id
            )));
        }
    }
    Ok(seen.into_iter().collect())
}

/// Message kinds exchanged during protocol execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// DKG round 1: polynomial commitment (broadcast)
    DkgCommitment(DkgCommitment),
    /// DKG round 2: encrypted share (point-to-point)
    DkgShare(DkgShare),
    /// DKG round 3: complaint list (broadcast)
    DkgConfirmation(DkgConfirmation),
    /// DKG round 4: disputed shares revealed by the accused dealer (broadcast)
    DkgJustification(DkgJustification),
    /// Signing round 1: nonce commitments (broadcast)
    NonceCommitment(NonceCommitmentMessage),
    /// Signing round 2: partial signature (broadcast)
    PartialSignature(PartialSignatureMessage),
}

impl ProtocolMessage {
    /// Participant that claims to have produced this message
    pub fn sender(&self) -> ParticipantId {
        match self {
            ProtocolMessage::DkgCommitment(msg) => msg.participant_id,
            ProtocolMessage::DkgShare(msg) => msg.sender_id,
            ProtocolMessage::DkgConfirmation(msg) => msg.participant_id,
            ProtocolMessage::DkgJustification(msg) => msg.participant_id,
            ProtocolMessage::NonceCommitment(msg) => msg.participant_id,
            ProtocolMessage::PartialSignature(msg) => msg.participant_id,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::DkgCommitment(_) => "dkg_commitment",
            ProtocolMessage::DkgShare(_) => "dkg_share",
            ProtocolMessage::DkgConfirmation(_) => "dkg_confirmation",
            ProtocolMessage::DkgJustification(_) => "dkg_justification",
            ProtocolMessage::NonceCommitment(_) => "nonce_commitment",
            ProtocolMessage::PartialSignature(_) => "partial_signature",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
