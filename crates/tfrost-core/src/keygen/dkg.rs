//! DKG participant state machine
//!
//! Transport-free: the session coordinator feeds it messages in any order per
//! round and asks it for the next outgoing messages.

use super::encryption::ShareCipher;
use super::messages::{encode_proof, DealerCommitment, ProofOfKnowledge};
use super::{
    DkgCommitment, DkgConfirmation, DkgJustification, DkgShare, Fault, FaultKind, RevealedShare,
};
use crate::curve::{self, point_to_bytes, scalar_from_bytes, scalar_to_bytes};
use crate::polynomial::{self, PolynomialCommitment, SecretPolynomial, SecretShare};
use crate::session::DkgFaultPolicy;
use crate::{
    Error, GroupPublicKey, KeyShare, ParticipantId, PublicKeyPackage, Result, SessionConfig,
    VerifyingShare,
};
use k256::{ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;

/// Result of a completed DKG
#[derive(Debug)]
pub struct DkgOutput {
    /// This participant's private key share
    pub key_share: KeyShare,
    /// Public key material shared by all participants
    pub public_key_package: PublicKeyPackage,
    /// Faults detected and excluded during this session
    pub faults: Vec<Fault>,
}

/// Verified shares received from dealers, zeroed on drop
#[derive(Default)]
struct ReceivedShares(BTreeMap<ParticipantId, Scalar>);

impl Drop for ReceivedShares {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

/// One participant's view of a DKG session
pub struct DkgParticipant {
    config: SessionConfig,
    polynomial: SecretPolynomial,
    cipher: ShareCipher,
    dealers: BTreeMap<ParticipantId, DealerCommitment>,
    shares: ReceivedShares,
    faults: BTreeMap<ParticipantId, FaultKind>,
}

impl DkgParticipant {
    /// Generate this participant's polynomial and its round 1 broadcast
    pub fn new<R: RngCore + CryptoRng>(
        config: SessionConfig,
        rng: &mut R,
    ) -> Result<(Self, DkgCommitment)> {
        let polynomial =
            SecretPolynomial::generate(config.threshold - 1, config.participant_id, rng);
        let commitment = polynomial.commit();
        let proof = prove_knowledge(&config, &polynomial, &commitment, rng);
        let cipher = ShareCipher::generate(rng);

        let (proof_r, proof_mu) = encode_proof(&proof);
        let message = DkgCommitment {
            participant_id: config.participant_id,
            coefficient_points: commitment.encode(),
            proof_r,
            proof_mu,
            encryption_key: cipher.public_key().as_bytes().to_vec(),
        };

        let own = DealerCommitment {
            participant_id: config.participant_id,
            commitment,
            proof,
            encryption_key: *cipher.public_key(),
        };

        let mut dealers = BTreeMap::new();
        dealers.insert(config.participant_id, own);

        let mut shares = ReceivedShares::default();
        shares
            .0
            .insert(config.participant_id, polynomial.evaluate(config.participant_id)?);

        debug!(
            participant_id = config.participant_id,
            degree = polynomial.degree(),
            "Generated secret polynomial"
        );

        Ok((
            Self {
                config,
                polynomial,
                cipher,
                dealers,
                shares,
                faults: BTreeMap::new(),
            },
            message,
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Faults this participant detected so far
    pub fn faults(&self) -> Vec<Fault> {
        self.faults
            .iter()
            .map(|(&participant, &kind)| Fault { participant, kind })
            .collect()
    }

    fn record_fault(&mut self, participant: ParticipantId, kind: FaultKind) {
        warn!(
            participant_id = self.config.participant_id,
            culprit = participant,
            ?kind,
            "Dealer misbehaved"
        );
        self.faults.entry(participant).or_insert(kind);
    }

    /// Accept a dealer's decoded round 1 commitment
    ///
    /// A failed proof of knowledge is recorded as a fault against the dealer;
    /// only structural problems are returned as errors.
    pub fn receive_commitment(&mut self, dealer: DealerCommitment) -> Result<()> {
        let from = dealer.participant_id;
        if from == self.config.participant_id || !self.config.participants.contains(&from) {
            return Err(Error::UnexpectedMessage(format!(
                "commitment from participant {}",
                from
            )));
        }
        if self.dealers.contains_key(&from) {
            return Err(Error::UnexpectedMessage(format!(
                "duplicate commitment from participant {}",
                from
            )));
        }
        if dealer.commitment.degree() != self.config.threshold - 1 {
            return Err(Error::Decode(format!(
                "commitment from participant {} has degree {}, expected {}",
                from,
                dealer.commitment.degree(),
                self.config.threshold - 1
            )));
        }

        if !verify_knowledge(&self.config, from, &dealer.commitment, &dealer.proof) {
            self.record_fault(from, FaultKind::InvalidProof);
        }

        self.dealers.insert(from, dealer);
        Ok(())
    }

    /// Whether every participant's commitment has been received
    pub fn has_all_commitments(&self) -> bool {
        self.dealers.len() == self.config.participants.len()
    }

    /// Round 2 outgoing shares, one per peer
    pub fn share_messages<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<Vec<DkgShare>> {
        if !self.has_all_commitments() {
            return Err(Error::Internal(
                "shares requested before all commitments arrived".into(),
            ));
        }

        self.config
            .peers()
            .map(|recipient| {
                let value = self.polynomial.evaluate(recipient)?;
                let message = self.seal_share(rng, recipient, &value);
                let mut value = value;
                value.zeroize();
                message
            })
            .collect()
    }

    /// Encrypt one share value for `recipient`
    pub(crate) fn seal_share<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        recipient: ParticipantId,
        value: &Scalar,
    ) -> Result<DkgShare> {
        let recipient_key = self
            .dealers
            .get(&recipient)
            .map(|dealer| dealer.encryption_key)
            .ok_or_else(|| Error::Internal(format!("no key for participant {}", recipient)))?;

        let (nonce, ciphertext) = self.cipher.seal(
            rng,
            &recipient_key,
            &self.config.session_id,
            self.config.participant_id,
            recipient,
            &scalar_to_bytes(value),
        )?;

        Ok(DkgShare {
            sender_id: self.config.participant_id,
            recipient_id: recipient,
            nonce,
            ciphertext,
        })
    }

    /// Open and verify an incoming share
    ///
    /// A share that cannot be opened or does not match the dealer's commitment
    /// is recorded as an `InvalidShare` fault against the dealer.
    pub fn receive_share(&mut self, message: &DkgShare) -> Result<()> {
        let from = message.sender_id;
        if message.recipient_id != self.config.participant_id {
            return Err(Error::UnexpectedMessage(format!(
                "share addressed to participant {}",
                message.recipient_id
            )));
        }
        if from == self.config.participant_id || self.shares.0.contains_key(&from) {
            return Err(Error::UnexpectedMessage(format!(
                "duplicate share from participant {}",
                from
            )));
        }
        let dealer = self
            .dealers
            .get(&from)
            .ok_or_else(|| {
                Error::UnexpectedMessage(format!("share from unknown dealer {}", from))
            })?;

        let opened = self.cipher.open(
            &dealer.encryption_key,
            &self.config.session_id,
            from,
            self.config.participant_id,
            &message.nonce,
            &message.ciphertext,
        );
        let value = match opened.and_then(|plaintext| scalar_from_bytes(&plaintext)) {
            Ok(value) => value,
            Err(e) => {
                debug!(culprit = from, error = %e, "Could not open share");
                self.record_fault(from, FaultKind::InvalidShare);
                return Ok(());
            }
        };

        let share = SecretShare {
            sender: from,
            recipient: self.config.participant_id,
            value,
        };
        match polynomial::verify_share(&share, &dealer.commitment) {
            Ok(()) => {
                self.shares.0.insert(from, share.value);
            }
            Err(_) => self.record_fault(from, FaultKind::InvalidShare),
        }
        Ok(())
    }

    /// Whether every peer's share has been processed (verified or faulted)
    pub fn has_all_shares(&self) -> bool {
        self.config
            .participants
            .iter()
            .all(|id| self.shares.0.contains_key(id) || self.faults.contains_key(id))
    }

    /// Round 3 broadcast listing every fault detected locally
    pub fn confirmation(&self) -> DkgConfirmation {
        DkgConfirmation {
            participant_id: self.config.participant_id,
            complaints: self.faults(),
        }
    }

    /// Share complaints that need a public answer from the accused dealer
    ///
    /// Keyed by dealer, with the set of accusers for each. Only `InvalidShare`
    /// complaints are disputes: proofs of knowledge are broadcast, so every
    /// participant checks them itself. Dealers whose proof already failed are
    /// faulted regardless and are left out.
    pub fn share_disputes(
        &self,
        confirmations: &[DkgConfirmation],
    ) -> BTreeMap<ParticipantId, BTreeSet<ParticipantId>> {
        let participants = &self.config.participants;
        let mut disputes: BTreeMap<ParticipantId, BTreeSet<ParticipantId>> = BTreeMap::new();

        for confirmation in confirmations {
            let accuser = confirmation.participant_id;
            if !participants.contains(&accuser) {
                continue;
            }
            for complaint in &confirmation.complaints {
                let dealer = complaint.participant;
                if complaint.kind != FaultKind::InvalidShare
                    || dealer == accuser
                    || !participants.contains(&dealer)
                    || self.proof_failed(dealer)
                {
                    continue;
                }
                disputes.entry(dealer).or_default().insert(accuser);
            }
        }
        disputes
    }

    fn proof_failed(&self, dealer: ParticipantId) -> bool {
        self.faults.get(&dealer) == Some(&FaultKind::InvalidProof)
    }

    /// Round 4 broadcast: the disputed shares this participant dealt
    ///
    /// `None` when nobody complained about this participant.
    pub fn justification(
        &self,
        disputes: &BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,
    ) -> Result<Option<DkgJustification>> {
        let me = self.config.participant_id;
        let Some(accusers) = disputes.get(&me) else {
            return Ok(None);
        };

        let revealed = accusers
            .iter()
            .map(|&recipient| {
                let mut value = self.polynomial.evaluate(recipient)?;
                let encoded = scalar_to_bytes(&value).to_vec();
                value.zeroize();
                Ok(RevealedShare {
                    recipient_id: recipient,
                    value: encoded,
                })
            })
            .collect::<Result<_>>()?;

        info!(participant_id = me, accusers = ?accusers, "Revealing disputed shares");
        Ok(Some(DkgJustification {
            participant_id: me,
            revealed,
        }))
    }

    /// Combine verified shares into the final key material
    ///
    /// `confirmations` must hold every participant's round 3 message,
    /// including this participant's own, and `justifications` every round 4
    /// message the disputes called for. A dealer is faulted only on evidence
    /// every participant can check: a failed proof of knowledge, or a
    /// disputed share it did not reveal or revealed off its commitment. A
    /// revealed share that checks out settles the complaint; the accuser
    /// takes it in place of the one it could not use.
    pub fn finalize(
        mut self,
        confirmations: &[DkgConfirmation],
        justifications: &[DkgJustification],
        policy: DkgFaultPolicy,
    ) -> Result<DkgOutput> {
        let me = self.config.participant_id;
        let disputes = self.share_disputes(confirmations);

        let mut proven: BTreeMap<ParticipantId, FaultKind> = self
            .faults
            .iter()
            .filter(|&(_, &kind)| kind == FaultKind::InvalidProof)
            .map(|(&participant, &kind)| (participant, kind))
            .collect();

        let answers: BTreeMap<ParticipantId, &DkgJustification> = justifications
            .iter()
            .map(|justification| (justification.participant_id, justification))
            .collect();

        for (&dealer, accusers) in &disputes {
            let commitment = &self
                .dealers
                .get(&dealer)
                .ok_or_else(|| Error::Internal(format!("missing commitment from {}", dealer)))?
                .commitment;

            for &accuser in accusers {
                let revealed = answers
                    .get(&dealer)
                    .and_then(|justification| justification.share_for(accuser));
                let settled = revealed.filter(|&value| {
                    let share = SecretShare {
                        sender: dealer,
                        recipient: accuser,
                        value,
                    };
                    polynomial::verify_share(&share, commitment).is_ok()
                });

                match settled {
                    Some(value) => {
                        debug!(dealer, accuser, "Complaint answered with a valid share");
                        if accuser == me {
                            self.shares.0.insert(dealer, value);
                        }
                    }
                    None => {
                        warn!(
                            participant_id = me,
                            culprit = dealer,
                            accuser,
                            "Dealer failed to justify a disputed share"
                        );
                        proven.entry(dealer).or_insert(FaultKind::InvalidShare);
                    }
                }
            }
        }

        let faults: Vec<Fault> = proven
            .iter()
            .map(|(&participant, &kind)| Fault { participant, kind })
            .collect();

        if let Some(first) = faults.first() {
            if policy == DkgFaultPolicy::Abort {
                warn!(
                    participant_id = me,
                    faults = ?faults,
                    "Aborting DKG on detected faults"
                );
                return Err(first.into_error());
            }
        }

        let config = &self.config;
        let qualified: BTreeSet<ParticipantId> = config
            .participants
            .iter()
            .copied()
            .filter(|id| !proven.contains_key(id))
            .collect();

        if qualified.len() < config.threshold {
            return Err(Error::InsufficientParticipants {
                required: config.threshold,
                actual: qualified.len(),
                missing: proven.keys().copied().collect(),
            });
        }

        let mut secret_share = Scalar::ZERO;
        for dealer in &qualified {
            let share = self.shares.0.get(dealer).ok_or_else(|| {
                Error::Internal(format!("missing verified share from {}", dealer))
            })?;
            secret_share += share;
        }

        let commitments: Vec<&PolynomialCommitment> = qualified
            .iter()
            .map(|id| {
                self.dealers
                    .get(id)
                    .map(|dealer| &dealer.commitment)
                    .ok_or_else(|| Error::Internal(format!("missing commitment from {}", id)))
            })
            .collect::<Result<_>>()?;

        let group_point = commitments
            .iter()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc + c.constant_term());
        let group_public_key = GroupPublicKey::new(group_point);
        let verifying_shares = compute_verifying_shares(&commitments, &config.participants);

        let own_verifying = verifying_shares
            .get(&config.participant_id)
            .map(VerifyingShare::to_point);
        if own_verifying != Some(curve::base_mul(&secret_share)) {
            secret_share.zeroize();
            return Err(Error::Internal(
                "secret share does not match its verifying share".into(),
            ));
        }

        let key_share = KeyShare {
            participant_id: config.participant_id,
            threshold: config.threshold,
            participants: config.participants.clone(),
            secret_share,
            group_public_key,
            verifying_shares,
        };
        let public_key_package = key_share.public_key_package();

        info!(
            participant_id = config.participant_id,
            group_public_key = %group_public_key.to_hex(),
            excluded = ?proven.keys().collect::<Vec<_>>(),
            "DKG key material derived"
        );

        Ok(DkgOutput {
            key_share,
            public_key_package,
            faults,
        })
    }
}

/// `Y_j = Σ_i C_i(j)` for every participant `j`
fn compute_verifying_shares(
    commitments: &[&PolynomialCommitment],
    participants: &[ParticipantId],
) -> BTreeMap<ParticipantId, VerifyingShare> {
    let evaluate = |&id: &ParticipantId| {
        let point = commitments
            .iter()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc + c.evaluate(id));
        (id, VerifyingShare::new(point))
    };

    #[cfg(feature = "multi-thread")]
    let shares = participants.par_iter().map(evaluate).collect();
    #[cfg(not(feature = "multi-thread"))]
    let shares = participants.iter().map(evaluate).collect();

    shares
}

fn proof_challenge(
    config: &SessionConfig,
    dealer: ParticipantId,
    constant_term: &ProjectivePoint,
    r: &ProjectivePoint,
) -> Scalar {
    curve::hash_to_scalar(
        "dkg-pok",
        &[
            &config.session_id,
            &dealer.to_be_bytes(),
            &point_to_bytes(constant_term),
            &point_to_bytes(r),
        ],
    )
}

fn prove_knowledge<R: RngCore + CryptoRng>(
    config: &SessionConfig,
    polynomial: &SecretPolynomial,
    commitment: &PolynomialCommitment,
    rng: &mut R,
) -> ProofOfKnowledge {
    let mut k = curve::random_scalar(rng);
    let r = curve::base_mul(&k);
    let c = proof_challenge(config, polynomial.owner(), &commitment.constant_term(), &r);
    let mu = k + *polynomial.secret() * c;
    k.zeroize();
    ProofOfKnowledge { r, mu }
}

fn verify_knowledge(
    config: &SessionConfig,
    dealer: ParticipantId,
    commitment: &PolynomialCommitment,
    proof: &ProofOfKnowledge,
) -> bool {
    let constant_term = commitment.constant_term();
    let c = proof_challenge(config, dealer, &constant_term, &proof.r);
    curve::base_mul(&proof.mu) == proof.r + constant_term * c
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::polynomial::interpolate_at_zero;
    use crate::session_id_from_label;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    pub(crate) struct Harness {
        pub participants: Vec<DkgParticipant>,
        pub commitments: Vec<DkgCommitment>,
    }

    pub(crate) fn setup(ids: &[ParticipantId], threshold: usize, rng: &mut ChaCha20Rng) -> Harness {
        let sid = session_id_from_label("dkg-test");
        let mut participants = Vec::new();
        let mut commitments = Vec::new();
        for &id in ids {
            let config = SessionConfig::new(sid, ids, threshold, id).unwrap();
            let (participant, commitment) = DkgParticipant::new(config, rng).unwrap();
            participants.push(participant);
            commitments.push(commitment);
        }
        for participant in participants.iter_mut() {
            for commitment in &commitments {
                if commitment.participant_id != participant.config().participant_id {
                    participant
                        .receive_commitment(commitment.decode().unwrap())
                        .unwrap();
                }
            }
            assert!(participant.has_all_commitments());
        }
        Harness {
            participants,
            commitments,
        }
    }

    pub(crate) fn deliver_shares(participants: &mut [DkgParticipant], shares: Vec<DkgShare>) {
        for share in shares {
            let recipient = participants
                .iter_mut()
                .find(|p| p.config().participant_id == share.recipient_id)
                .unwrap();
            recipient.receive_share(&share).unwrap();
        }
    }

    /// Rounds 3 and 4 then finalize for everyone
    ///
    /// `complain` may rewrite the broadcast complaint lists and `answer` a
    /// dealer's broadcast justification.
    fn finish_with(
        participants: Vec<DkgParticipant>,
        policy: DkgFaultPolicy,
        complain: impl FnOnce(&mut Vec<DkgConfirmation>),
        answer: impl Fn(&mut DkgJustification),
    ) -> Vec<Result<DkgOutput>> {
        let mut confirmations: Vec<_> = participants.iter().map(|p| p.confirmation()).collect();
        complain(&mut confirmations);

        let justifications: Vec<DkgJustification> = participants
            .iter()
            .filter_map(|p| {
                let disputes = p.share_disputes(&confirmations);
                p.justification(&disputes).unwrap()
            })
            .map(|mut justification| {
                answer(&mut justification);
                justification
            })
            .collect();

        participants
            .into_iter()
            .map(|p| p.finalize(&confirmations, &justifications, policy))
            .collect()
    }

    fn finish(
        participants: Vec<DkgParticipant>,
        policy: DkgFaultPolicy,
    ) -> Vec<Result<DkgOutput>> {
        finish_with(participants, policy, |_| {}, |_| {})
    }

    /// Five honest participants with all shares delivered
    fn honest_harness(seed: u64) -> Vec<DkgParticipant> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut harness = setup(&[1, 2, 3, 4, 5], 3, &mut rng);
        let shares: Vec<_> = harness
            .participants
            .iter()
            .flat_map(|p| p.share_messages(&mut rng).unwrap())
            .collect();
        deliver_shares(&mut harness.participants, shares);
        harness.participants
    }

    pub(crate) fn run_honest(ids: &[ParticipantId], threshold: usize, seed: u64) -> Vec<DkgOutput> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut harness = setup(ids, threshold, &mut rng);
        let shares: Vec<_> = harness
            .participants
            .iter()
            .flat_map(|p| p.share_messages(&mut rng).unwrap())
            .collect();
        deliver_shares(&mut harness.participants, shares);
        finish(harness.participants, DkgFaultPolicy::Abort)
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_honest_dkg_agrees_on_group_key() {
        let outputs = run_honest(&[1, 2, 3, 4, 5], 3, 1);
        let group_key = outputs[0].key_share.group_public_key;
        for output in &outputs {
            assert_eq!(output.key_share.group_public_key, group_key);
            assert_eq!(output.public_key_package, outputs[0].public_key_package);
            assert!(output.faults.is_empty());
        }
    }

    #[test]
    fn test_group_key_is_sum_of_constant_terms() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut harness = setup(&[1, 2, 3, 4], 2, &mut rng);
        let expected = harness
            .commitments
            .iter()
            .map(|c| c.decode().unwrap().commitment.constant_term())
            .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);

        let shares: Vec<_> = harness
            .participants
            .iter()
            .flat_map(|p| p.share_messages(&mut rng).unwrap())
            .collect();
        deliver_shares(&mut harness.participants, shares);
        for output in finish(harness.participants, DkgFaultPolicy::Abort) {
            assert_eq!(output.unwrap().key_share.group_public_key.to_point(), expected);
        }
    }

    #[test]
    fn test_threshold_subsets_reconstruct_group_secret() {
        let outputs = run_honest(&[1, 2, 3, 4, 5], 3, 3);
        let share_of = |id: ParticipantId| {
            let output = outputs
                .iter()
                .find(|o| o.key_share.participant_id == id)
                .unwrap();
            (id, *output.key_share.secret_share())
        };

        let first = interpolate_at_zero(&[share_of(1), share_of(2), share_of(3)]).unwrap();
        let second = interpolate_at_zero(&[share_of(1), share_of(3), share_of(5)]).unwrap();
        let third = interpolate_at_zero(&[share_of(2), share_of(4), share_of(5)]).unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(
            curve::base_mul(&first),
            outputs[0].key_share.group_public_key.to_point()
        );
    }

    /// Participant 4 deals participant 1 a share off its polynomial
    ///
    /// With `stands_by` it reveals that same share when challenged;
    /// otherwise it reveals the correct one.
    fn run_with_bad_dealer(policy: DkgFaultPolicy, stands_by: bool) -> Vec<Result<DkgOutput>> {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let mut harness = setup(&[1, 2, 3, 4, 5], 3, &mut rng);
        let wrong_value = curve::random_scalar(&mut rng);

        let mut shares = Vec::new();
        for participant in &harness.participants {
            let mut outgoing = participant.share_messages(&mut rng).unwrap();
            if participant.config().participant_id == 4 {
                let bad = participant.seal_share(&mut rng, 1, &wrong_value).unwrap();
                outgoing.retain(|s| s.recipient_id != 1);
                outgoing.push(bad);
            }
            shares.extend(outgoing);
        }
        deliver_shares(&mut harness.participants, shares);

        let detector = &harness.participants[0];
        assert_eq!(
            detector.faults(),
            vec![Fault {
                participant: 4,
                kind: FaultKind::InvalidShare
            }]
        );
        assert!(detector.has_all_shares());

        finish_with(
            harness.participants,
            policy,
            |_| {},
            |justification| {
                if stands_by && justification.participant_id == 4 {
                    justification.revealed = vec![RevealedShare {
                        recipient_id: 1,
                        value: scalar_to_bytes(&wrong_value).to_vec(),
                    }];
                }
            },
        )
    }

    #[test]
    fn test_invalid_share_aborts_under_abort_policy() {
        for result in run_with_bad_dealer(DkgFaultPolicy::Abort, true) {
            assert!(matches!(result, Err(Error::InvalidShare(4))));
        }
    }

    #[test]
    fn test_invalid_share_excluded_under_exclude_policy() {
        let outputs: Vec<DkgOutput> = run_with_bad_dealer(DkgFaultPolicy::ExcludeFaulty, true)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let group_key = outputs[0].key_share.group_public_key;
        for output in &outputs {
            assert_eq!(output.key_share.group_public_key, group_key);
            assert_eq!(
                output.faults,
                vec![Fault {
                    participant: 4,
                    kind: FaultKind::InvalidShare
                }]
            );
        }

        // Participant 4 still holds a usable share of the new key
        let shares: Vec<_> = [1u32, 4, 5]
            .iter()
            .map(|&id| {
                let o = outputs
                    .iter()
                    .find(|o| o.key_share.participant_id == id)
                    .unwrap();
                (id, *o.key_share.secret_share())
            })
            .collect();
        let secret = interpolate_at_zero(&shares).unwrap();
        assert_eq!(curve::base_mul(&secret), group_key.to_point());
    }

    #[test]
    fn test_exclusion_below_threshold_fails() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let harness = setup(&[1, 2, 3], 2, &mut rng);
        let confirmations = vec![
            DkgConfirmation {
                participant_id: 1,
                complaints: vec![
                    Fault {
                        participant: 2,
                        kind: FaultKind::InvalidShare,
                    },
                    Fault {
                        participant: 3,
                        kind: FaultKind::InvalidShare,
                    },
                ],
            },
            DkgConfirmation {
                participant_id: 2,
                complaints: vec![],
            },
            DkgConfirmation {
                participant_id: 3,
                complaints: vec![],
            },
        ];
        let participant = harness.participants.into_iter().next().unwrap();
        let result = participant.finalize(&confirmations, &[], DkgFaultPolicy::ExcludeFaulty);
        // Neither accused dealer answered, so both are out
        match result {
            Err(Error::InsufficientParticipants {
                required,
                actual,
                missing,
            }) => {
                assert_eq!((required, actual), (2, 1));
                assert_eq!(missing, vec![2, 3]);
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.faults)),
        }
    }

    #[test]
    fn test_bad_share_replaced_by_valid_justification() {
        let outputs: Vec<DkgOutput> = run_with_bad_dealer(DkgFaultPolicy::Abort, false)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let group_key = outputs[0].key_share.group_public_key;
        for output in &outputs {
            assert_eq!(output.key_share.group_public_key, group_key);
            assert!(output.faults.is_empty());
        }

        // Participant 1 holds the revealed share, so its key share is sound
        let shares: Vec<_> = outputs[..3]
            .iter()
            .map(|o| (o.key_share.participant_id, *o.key_share.secret_share()))
            .collect();
        let secret = interpolate_at_zero(&shares).unwrap();
        assert_eq!(curve::base_mul(&secret), group_key.to_point());
    }

    #[test]
    fn test_false_complaint_faults_nobody() {
        for policy in [DkgFaultPolicy::Abort, DkgFaultPolicy::ExcludeFaulty] {
            let participants = honest_harness(12);
            let outputs: Vec<DkgOutput> = finish_with(
                participants,
                policy,
                |confirmations| {
                    confirmations[0].complaints.push(Fault {
                        participant: 3,
                        kind: FaultKind::InvalidShare,
                    })
                },
                |_| {},
            )
            .into_iter()
            .map(Result::unwrap)
            .collect();

            let group_key = outputs[0].key_share.group_public_key;
            for output in &outputs {
                assert_eq!(output.key_share.group_public_key, group_key);
                assert!(output.faults.is_empty());
            }
        }
    }

    #[test]
    fn test_withheld_justification_faults_dealer() {
        let participants = honest_harness(13);
        let mut confirmations: Vec<_> = participants.iter().map(|p| p.confirmation()).collect();
        confirmations[1].complaints.push(Fault {
            participant: 5,
            kind: FaultKind::InvalidShare,
        });

        for participant in participants {
            assert!(matches!(
                participant.finalize(&confirmations, &[], DkgFaultPolicy::Abort),
                Err(Error::InvalidShare(5))
            ));
        }
    }

    #[test]
    fn test_unverifiable_complaints_are_not_disputes() {
        let participants = honest_harness(14);
        let mut confirmations: Vec<_> = participants.iter().map(|p| p.confirmation()).collect();
        confirmations[0].complaints.extend([
            // Proofs are checked locally by everyone
            Fault {
                participant: 2,
                kind: FaultKind::InvalidProof,
            },
            Fault {
                participant: 3,
                kind: FaultKind::InvalidPartialSignature,
            },
            // Self-accusation and a stranger
            Fault {
                participant: 1,
                kind: FaultKind::InvalidShare,
            },
            Fault {
                participant: 9,
                kind: FaultKind::InvalidShare,
            },
        ]);

        assert!(participants[2].share_disputes(&confirmations).is_empty());
        for participant in participants {
            let output = participant
                .finalize(&confirmations, &[], DkgFaultPolicy::Abort)
                .unwrap();
            assert!(output.faults.is_empty());
        }
    }

    #[test]
    fn test_forged_proof_is_a_fault() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let sid = session_id_from_label("dkg-test");
        let ids = [1u32, 2, 3];
        let (mut alice, _) =
            DkgParticipant::new(SessionConfig::new(sid, &ids, 2, 1).unwrap(), &mut rng).unwrap();
        let (_, bob_msg) =
            DkgParticipant::new(SessionConfig::new(sid, &ids, 2, 2).unwrap(), &mut rng).unwrap();

        let mut forged = bob_msg.decode().unwrap();
        forged.proof.mu += Scalar::ONE;
        alice.receive_commitment(forged).unwrap();
        assert_eq!(
            alice.faults(),
            vec![Fault {
                participant: 2,
                kind: FaultKind::InvalidProof
            }]
        );
    }

    #[test]
    fn test_commitment_replayed_across_sessions_fails_proof() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let ids = [1u32, 2, 3];
        let (mut alice, _) = DkgParticipant::new(
            SessionConfig::new(session_id_from_label("one"), &ids, 2, 1).unwrap(),
            &mut rng,
        )
        .unwrap();
        let (_, bob_msg) = DkgParticipant::new(
            SessionConfig::new(session_id_from_label("two"), &ids, 2, 2).unwrap(),
            &mut rng,
        )
        .unwrap();
        alice.receive_commitment(bob_msg.decode().unwrap()).unwrap();
        assert_eq!(alice.faults().len(), 1);
    }

    #[test]
    fn test_wrong_degree_commitment_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let sid = session_id_from_label("dkg-test");
        let ids = [1u32, 2, 3, 4];
        let (mut alice, _) =
            DkgParticipant::new(SessionConfig::new(sid, &ids, 2, 1).unwrap(), &mut rng).unwrap();
        let (_, bob_msg) =
            DkgParticipant::new(SessionConfig::new(sid, &ids, 3, 2).unwrap(), &mut rng).unwrap();
        assert!(matches!(
            alice.receive_commitment(bob_msg.decode().unwrap()),
            Err(Error::Decode(_))
        ));
    }
}
