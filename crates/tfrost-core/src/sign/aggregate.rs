//! Signature aggregation

use super::{binding_factors, group_commitment, verify_partial_signature};
use super::{PartialSignature, SigningPackage};
use crate::{Error, PublicKeyPackage, Result, Signature};
use k256::Scalar;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Combine partial signatures into a Schnorr signature `(R, z = Σ z_i)`
///
/// Every signer of `package` must contribute exactly one partial and each one
/// is checked against its verifying share first, so a bad contribution is
/// attributed to its sender instead of surfacing as an invalid aggregate.
#[instrument(skip_all, fields(signers = partials.len()))]
pub fn aggregate(
    package: &SigningPackage,
    partials: &[PartialSignature],
    public_key_package: &PublicKeyPackage,
) -> Result<Signature> {
    let signers = package.signers();
    if signers.len() < public_key_package.threshold {
        return Err(Error::InsufficientParticipants {
            required: public_key_package.threshold,
            actual: signers.len(),
            missing: Vec::new(),
        });
    }

    let mut by_signer = BTreeMap::new();
    for partial in partials {
        if package.commitment(partial.participant_id).is_none() {
            return Err(Error::Aggregation(format!(
                "Partial signature from {} who is not in the signing set",
                partial.participant_id
            )));
        }
        if by_signer.insert(partial.participant_id, partial).is_some() {
            return Err(Error::Aggregation(format!(
                "Duplicate partial signature from {}",
                partial.participant_id
            )));
        }
    }
    let missing: Vec<_> = signers
        .iter()
        .copied()
        .filter(|id| !by_signer.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Aggregation(format!(
            "Missing partial signatures from {:?}",
            missing
        )));
    }

    for partial in by_signer.values() {
        verify_partial_signature(partial, package, public_key_package)?;
    }

    let group_public_key = &public_key_package.group_public_key;
    let factors = binding_factors(package, group_public_key);
    let r = group_commitment(package, &factors)?;
    let z = by_signer
        .values()
        .fold(Scalar::ZERO, |acc, partial| acc + partial.z);

    let signature = Signature::new(r, z);
    if !signature.verify(group_public_key, package.message()) {
        return Err(Error::Aggregation(
            "Aggregate signature failed verification".into(),
        ));
    }

    info!(signers = ?signers, "Aggregated signature");
    Ok(signature)
}
