//! Shamir secret sharing with Feldman commitments

use crate::curve::{self, point_from_bytes, point_to_bytes};
use crate::{Error, ParticipantId, Result};
use k256::{ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use std::collections::BTreeSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret polynomial `f(x) = a_0 + a_1 x + ... + a_{t-1} x^{t-1}`
///
/// Owned by the dealer for the duration of one DKG session and zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretPolynomial {
    #[zeroize(skip)]
    owner: ParticipantId,
    coefficients: Vec<Scalar>,
}

impl SecretPolynomial {
    /// Generate a random polynomial of the given degree
    pub fn generate<R: RngCore + CryptoRng>(
        degree: usize,
        owner: ParticipantId,
        rng: &mut R,
    ) -> Self {
        let coefficients = (0..=degree).map(|_| curve::random_scalar(rng)).collect();
        Self {
            owner,
            coefficients,
        }
    }

    /// Dealer that owns this polynomial
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Constant term, the dealer's secret contribution
    pub fn secret(&self) -> &Scalar {
        &self.coefficients[0]
    }

    /// Feldman commitment `[a_k * G]`
    pub fn commit(&self) -> PolynomialCommitment {
        PolynomialCommitment(self.coefficients.iter().map(curve::base_mul).collect())
    }

    /// Evaluate at a participant's x-coordinate using Horner's method
    pub fn evaluate(&self, at: ParticipantId) -> Result<Scalar> {
        if at == 0 {
            return Err(Error::Configuration(
                "Refusing to evaluate a share at x = 0".into(),
            ));
        }
        let x = curve::scalar_from_id(at);
        Ok(self
            .coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient))
    }
}

/// Public commitment to a polynomial's coefficients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolynomialCommitment(Vec<ProjectivePoint>);

impl PolynomialCommitment {
    pub fn new(points: Vec<ProjectivePoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Decode("empty commitment".into()));
        }
        Ok(Self(points))
    }

    pub fn points(&self) -> &[ProjectivePoint] {
        &self.0
    }

    pub fn degree(&self) -> usize {
        self.0.len() - 1
    }

    /// Commitment to the dealer's secret, `a_0 * G`
    pub fn constant_term(&self) -> ProjectivePoint {
        self.0[0]
    }

    /// Public image `f(x) * G` of the share at `at`
    pub fn evaluate(&self, at: ParticipantId) -> ProjectivePoint {
        let x = curve::scalar_from_id(at);
        self.0
            .iter()
            .rev()
            .fold(ProjectivePoint::IDENTITY, |acc, point| acc * x + point)
    }

    pub fn encode(&self) -> Vec<Vec<u8>> {
        self.0.iter().map(point_to_bytes).collect()
    }

    pub fn decode(encoded: &[Vec<u8>]) -> Result<Self> {
        let points = encoded
            .iter()
            .map(|bytes| point_from_bytes(bytes))
            .collect::<Result<Vec<_>>>()?;
        Self::new(points)
    }
}

/// A share `f_sender(recipient)` in transit between two participants
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    #[zeroize(skip)]
    pub sender: ParticipantId,
    #[zeroize(skip)]
    pub recipient: ParticipantId,
    pub value: Scalar,
}

/// Check a share against the dealer's commitment
///
/// Fails with [`Error::InvalidShare`] naming the dealer on mismatch.
pub fn verify_share(share: &SecretShare, commitment: &PolynomialCommitment) -> Result<()> {
    if curve::base_mul(&share.value) != commitment.evaluate(share.recipient) {
        return Err(Error::InvalidShare(share.sender));
    }
    Ok(())
}

/// Lagrange coefficient for `id` at `x = 0` over the set `ids`
///
/// Repeated x-coordinates fail with [`Error::InvalidScalar`].
pub fn lagrange_coefficient(id: ParticipantId, ids: &[ParticipantId]) -> Result<Scalar> {
    let distinct: BTreeSet<ParticipantId> = ids.iter().copied().collect();
    if distinct.len() != ids.len() {
        return Err(Error::InvalidScalar);
    }
    if !ids.contains(&id) {
        return Err(Error::Configuration(format!(
            "Participant {} is not in the interpolation set",
            id
        )));
    }
    let x_i = curve::scalar_from_id(id);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &other in ids {
        if other == id {
            continue;
        }
        let x_j = curve::scalar_from_id(other);
        numerator *= x_j;
        denominator *= x_j - x_i;
    }

    Ok(numerator * curve::invert(&denominator)?)
}

/// Interpolate `f(0)` from `(x, f(x))` pairs
pub fn interpolate_at_zero(shares: &[(ParticipantId, Scalar)]) -> Result<Scalar> {
    let ids: Vec<ParticipantId> = shares.iter().map(|(id, _)| *id).collect();
    if ids.iter().collect::<BTreeSet<_>>().len() != ids.len() {
        return Err(Error::InvalidScalar);
    }
    shares.iter().try_fold(Scalar::ZERO, |acc, (id, value)| {
        Ok(acc + lagrange_coefficient(*id, &ids)? * value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[test]
    fn test_honest_shares_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let polynomial = SecretPolynomial::generate(2, 1, &mut rng);
        let commitment = polynomial.commit();

        for recipient in 1..=5 {
            let share = SecretShare {
                sender: 1,
                recipient,
                value: polynomial.evaluate(recipient).unwrap(),
            };
            verify_share(&share, &commitment).unwrap();
        }
    }

    #[test]
    fn test_tampered_share_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let polynomial = SecretPolynomial::generate(2, 4, &mut rng);
        let commitment = polynomial.commit();

        let share = SecretShare {
            sender: 4,
            recipient: 2,
            value: polynomial.evaluate(2).unwrap() + Scalar::ONE,
        };
        assert!(matches!(
            verify_share(&share, &commitment),
            Err(Error::InvalidShare(4))
        ));
    }

    #[test]
    fn test_horner_matches_naive_evaluation() {
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let polynomial = SecretPolynomial::generate(3, 1, &mut rng);
        let x = Scalar::from(6u64);
        let mut expected = Scalar::ZERO;
        let mut power = Scalar::ONE;
        for coefficient in &polynomial.coefficients {
            expected += *coefficient * power;
            power *= x;
        }
        assert_eq!(polynomial.evaluate(6).unwrap(), expected);
        assert!(polynomial.evaluate(0).is_err());
    }

    #[test]
    fn test_any_threshold_subset_reconstructs() {
        let mut rng = ChaCha20Rng::seed_from_u64(10);
        let polynomial = SecretPolynomial::generate(2, 1, &mut rng);

        for subset in [[1u32, 2, 3], [1, 3, 5], [2, 4, 5]] {
            let shares: Vec<_> = subset
                .iter()
                .map(|&id| (id, polynomial.evaluate(id).unwrap()))
                .collect();
            assert_eq!(interpolate_at_zero(&shares).unwrap(), *polynomial.secret());
        }

        // Below threshold the interpolation lands elsewhere
        let shares: Vec<_> = [1u32, 2]
            .iter()
            .map(|&id| (id, polynomial.evaluate(id).unwrap()))
            .collect();
        assert_ne!(interpolate_at_zero(&shares).unwrap(), *polynomial.secret());
    }

    #[test]
    fn test_repeated_x_coordinates_rejected() {
        let one = Scalar::ONE;
        let shares = [(1u32, one), (1, Scalar::from(5u64)), (2, Scalar::from(3u64))];
        assert!(matches!(interpolate_at_zero(&shares), Err(Error::InvalidScalar)));
        assert!(matches!(lagrange_coefficient(2, &[1, 1, 2]), Err(Error::InvalidScalar)));
        assert!(lagrange_coefficient(2, &[1, 2]).is_ok());
    }

    #[test]
    fn test_commitment_encoding() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let commitment = SecretPolynomial::generate(2, 1, &mut rng).commit();
        let decoded = PolynomialCommitment::decode(&commitment.encode()).unwrap();
        assert_eq!(decoded, commitment);
        assert!(PolynomialCommitment::decode(&[]).is_err());
    }
}
