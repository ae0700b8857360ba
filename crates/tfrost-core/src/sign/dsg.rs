//! Round 2: binding factors, partial signatures and their verification

use super::{PartialSignature, SigningNonces, SigningPackage};
use crate::curve::{self, point_to_bytes};
use crate::polynomial::lagrange_coefficient;
use crate::{Error, GroupPublicKey, KeyShare, ParticipantId, PublicKeyPackage, Result};
use k256::{ProjectivePoint, Scalar};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Binding factor `rho_i` of every signer in a package
pub type BindingFactors = BTreeMap<ParticipantId, Scalar>;

/// Derive every signer's binding factor
///
/// `rho_i = H(Y || H(msg) || H(commitment list) || i)`, so each factor depends
/// on the message, the full signing set and all of its commitments.
pub fn binding_factors(
    package: &SigningPackage,
    group_public_key: &GroupPublicKey,
) -> BindingFactors {
    let message_hash = curve::tagged_hash("msg", &[package.message()]);

    let mut encoded_commitments = Vec::new();
    for commitment in package.commitments() {
        encoded_commitments.extend_from_slice(&commitment.participant_id.to_be_bytes());
        encoded_commitments.extend_from_slice(&point_to_bytes(&commitment.hiding));
        encoded_commitments.extend_from_slice(&point_to_bytes(&commitment.binding));
    }
    let commitments_hash = curve::tagged_hash("com", &[&encoded_commitments]);
    let key_bytes = group_public_key.to_bytes();

    package
        .signers()
        .into_iter()
        .map(|id| {
            let rho = curve::hash_to_scalar(
                "rho",
                &[&key_bytes, &message_hash, &commitments_hash, &id.to_be_bytes()],
            );
            (id, rho)
        })
        .collect()
}

/// Aggregate nonce commitment `R = Σ (D_i + rho_i * E_i)`
pub fn group_commitment(
    package: &SigningPackage,
    factors: &BindingFactors,
) -> Result<ProjectivePoint> {
    package
        .commitments()
        .try_fold(ProjectivePoint::IDENTITY, |acc, commitment| {
            let rho = factors.get(&commitment.participant_id).ok_or_else(|| {
                Error::Internal(format!(
                    "missing binding factor for {}",
                    commitment.participant_id
                ))
            })?;
            Ok(acc + commitment.hiding + commitment.binding * rho)
        })
}

/// Fiat-Shamir challenge `c = H(R || Y || msg)`
pub fn challenge(
    r: &ProjectivePoint,
    group_public_key: &GroupPublicKey,
    message: &[u8],
) -> Scalar {
    curve::hash_to_scalar(
        "chal",
        &[&point_to_bytes(r), &group_public_key.to_bytes(), message],
    )
}

/// Compute this signer's partial signature
///
/// `z_i = d_i + e_i * rho_i + lambda_i * x_i * c`. The nonce pair is consumed
/// and zeroed on return.
#[instrument(skip_all, fields(participant_id = key_share.participant_id))]
pub fn sign(
    key_share: &KeyShare,
    nonces: SigningNonces,
    package: &SigningPackage,
) -> Result<PartialSignature> {
    let me = key_share.participant_id;
    let own = package.commitment(me).ok_or_else(|| {
        Error::Configuration(format!("Participant {} is not in the signing package", me))
    })?;
    if *own != nonces.commitment(me) {
        return Err(Error::Configuration(
            "Signing package does not carry this participant's nonce commitment".into(),
        ));
    }
    let signers = package.signers();
    if signers.len() < key_share.threshold {
        return Err(Error::InsufficientParticipants {
            required: key_share.threshold,
            actual: signers.len(),
            missing: Vec::new(),
        });
    }

    let factors = binding_factors(package, &key_share.group_public_key);
    let r = group_commitment(package, &factors)?;
    let c = challenge(&r, &key_share.group_public_key, package.message());
    let lambda = lagrange_coefficient(me, &signers)?;
    let rho = factors[&me];

    let z = nonces.hiding() + nonces.binding() * &rho + lambda * key_share.secret_share() * c;

    debug!(signers = ?signers, "Computed partial signature");
    Ok(PartialSignature {
        participant_id: me,
        z,
    })
}

/// Check one partial signature against the signer's verifying share
///
/// `z_i * G == D_i + rho_i * E_i + c * lambda_i * Y_i`
pub fn verify_partial_signature(
    partial: &PartialSignature,
    package: &SigningPackage,
    public_key_package: &PublicKeyPackage,
) -> Result<()> {
    let id = partial.participant_id;
    let commitment = package
        .commitment(id)
        .ok_or(Error::InvalidPartialSignature(id))?;
    let verifying_share = public_key_package
        .verifying_shares
        .get(&id)
        .ok_or(Error::InvalidPartialSignature(id))?;

    let factors = binding_factors(package, &public_key_package.group_public_key);
    let r = group_commitment(package, &factors)?;
    let c = challenge(&r, &public_key_package.group_public_key, package.message());
    let lambda = lagrange_coefficient(id, &package.signers())?;

    let r_i = commitment.hiding + commitment.binding * factors[&id];
    let expected = r_i + verifying_share.to_point() * (c * lambda);

    if curve::base_mul(&partial.z) != expected {
        warn!(participant_id = id, "Partial signature failed verification");
        return Err(Error::InvalidPartialSignature(id));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keygen::{harness::run_honest, DkgOutput};
    use crate::sign::SigningCommitment;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    /// Run both signing rounds for `signers` without a transport
    pub(crate) fn sign_locally(
        outputs: &[DkgOutput],
        signers: &[ParticipantId],
        message: &[u8],
        rng: &mut ChaCha20Rng,
    ) -> (SigningPackage, Vec<PartialSignature>) {
        let shares: Vec<&KeyShare> = signers
            .iter()
            .map(|id| {
                &outputs
                    .iter()
                    .find(|o| o.key_share.participant_id == *id)
                    .unwrap()
                    .key_share
            })
            .collect();

        let nonces: Vec<SigningNonces> = shares
            .iter()
            .map(|share| SigningNonces::generate(share.secret_share(), rng))
            .collect();
        let commitments: Vec<SigningCommitment> = shares
            .iter()
            .zip(&nonces)
            .map(|(share, n)| n.commitment(share.participant_id))
            .collect();
        let package = SigningPackage::new(message, commitments).unwrap();

        let partials = shares
            .into_iter()
            .zip(nonces)
            .map(|(share, n)| sign(share, n, &package).unwrap())
            .collect();
        (package, partials)
    }

    #[test]
    fn test_partial_signatures_verify() {
        let outputs = run_honest(&[1, 2, 3, 4, 5], 3, 40);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let (package, partials) = sign_locally(&outputs, &[1, 3, 5], b"transfer:100", &mut rng);

        for partial in &partials {
            verify_partial_signature(partial, &package, &outputs[0].public_key_package).unwrap();
        }
    }

    #[test]
    fn test_tampered_partial_identifies_signer() {
        let outputs = run_honest(&[1, 2, 3, 4, 5], 3, 41);
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let (package, mut partials) = sign_locally(&outputs, &[2, 3, 4], b"msg", &mut rng);

        partials[1].z += Scalar::ONE;
        let result =
            verify_partial_signature(&partials[1], &package, &outputs[0].public_key_package);
        assert!(matches!(result, Err(Error::InvalidPartialSignature(3))));
    }

    #[test]
    fn test_binding_factors_depend_on_inputs() {
        let outputs = run_honest(&[1, 2, 3], 2, 42);
        let key = outputs[0].key_share.group_public_key;
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let (package, _) = sign_locally(&outputs, &[1, 2], b"one", &mut rng);

        let base = binding_factors(&package, &key);
        assert_ne!(base[&1], base[&2]);

        let other_message =
            SigningPackage::new(b"two", package.commitments().copied()).unwrap();
        assert_ne!(binding_factors(&other_message, &key)[&1], base[&1]);

        let mut swapped: Vec<SigningCommitment> = package.commitments().copied().collect();
        let (first, rest) = swapped.split_at_mut(1);
        std::mem::swap(&mut first[0].binding, &mut rest[0].binding);
        let swapped = SigningPackage::new(b"one", swapped).unwrap();
        assert_ne!(binding_factors(&swapped, &key)[&1], base[&1]);
    }

    #[test]
    fn test_sign_rejects_foreign_package() {
        let outputs = run_honest(&[1, 2, 3], 2, 43);
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let (package, _) = sign_locally(&outputs, &[1, 2], b"m", &mut rng);

        let fresh = SigningNonces::generate(outputs[0].key_share.secret_share(), &mut rng);
        assert!(matches!(
            sign(&outputs[0].key_share, fresh, &package),
            Err(Error::Configuration(_))
        ));
    }
}
