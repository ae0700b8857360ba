//! secp256k1 scalar and point arithmetic
//!
//! Thin layer over `k256` fixing the canonical encodings used on the wire:
//! scalars are 32-byte big-endian values below the group order, points are
//! 33-byte SEC1 compressed encodings of non-identity points.

use crate::{Error, ParticipantId, Result};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar,
};
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

/// Length of an encoded scalar
pub const SCALAR_LEN: usize = 32;

/// Length of an encoded (compressed) point
pub const POINT_LEN: usize = 33;

/// Domain separation prefix for every hash in the protocol
pub const CONTEXT_STRING: &str = "TFROST-secp256k1-SHA256-v1";

/// Encode a scalar as 32 big-endian bytes
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_LEN] {
    scalar.to_bytes().into()
}

/// Decode a canonical 32-byte scalar
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != SCALAR_LEN {
        return Err(Error::Decode(format!(
            "scalar must be {} bytes, got {}",
            SCALAR_LEN,
            bytes.len()
        )));
    }
    let repr = *FieldBytes::from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr))
        .ok_or_else(|| Error::Decode("scalar is not reduced modulo the group order".into()))
}

/// Encode a point in compressed SEC1 form
///
/// The identity encodes to a single byte and is rejected by [`point_from_bytes`].
pub fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decode a compressed, on-curve, non-identity point
pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    if bytes.len() != POINT_LEN {
        return Err(Error::Decode(format!(
            "point must be {} bytes, got {}",
            POINT_LEN,
            bytes.len()
        )));
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Decode("point is not on the curve".into()))?;
    let point = ProjectivePoint::from(affine);
    if point == ProjectivePoint::IDENTITY {
        return Err(Error::Decode("identity point".into()));
    }
    Ok(point)
}

/// Multiplicative inverse modulo the group order
pub fn invert(scalar: &Scalar) -> Result<Scalar> {
    Option::<Scalar>::from(scalar.invert()).ok_or(Error::InvalidScalar)
}

/// Participant ID as a field element (its x-coordinate on the polynomial)
pub fn scalar_from_id(id: ParticipantId) -> Scalar {
    Scalar::from(u64::from(id))
}

/// Uniformly random non-zero scalar
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    loop {
        let scalar = Scalar::random(&mut *rng);
        if scalar != Scalar::ZERO {
            return scalar;
        }
    }
}

/// `scalar * G`
pub fn base_mul(scalar: &Scalar) -> ProjectivePoint {
    ProjectivePoint::GENERATOR * scalar
}

/// BIP-340 style tagged hash: `SHA256(SHA256(tag) || SHA256(tag) || parts...)`
pub fn tagged_hash(tag: &str, parts: &[&[u8]]) -> [u8; 32] {
    let tag_hash = Sha256::new()
        .chain_update(CONTEXT_STRING.as_bytes())
        .chain_update(tag.as_bytes())
        .finalize();

    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash arbitrary input to a scalar under a domain tag
pub fn hash_to_scalar(tag: &str, parts: &[&[u8]]) -> Scalar {
    let digest = tagged_hash(tag, parts);
    <Scalar as Reduce<U256>>::reduce_bytes(&digest.into())
}
