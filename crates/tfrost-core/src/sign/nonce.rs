//! Round 1: single-use signing nonces

use super::SigningCommitment;
use crate::curve::{self, scalar_to_bytes};
use crate::{Error, KeyShare, ParticipantId, Result, SessionId};
use dashmap::{DashMap, DashSet};
use k256::Scalar;
use rand_core::{CryptoRng, RngCore};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Private nonce pair `(d, e)` for one signing session
///
/// Not `Clone`: a pair is moved into exactly one partial signature and zeroed
/// when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SigningNonces {
    hiding: Scalar,
    binding: Scalar,
}

impl SigningNonces {
    /// Draw a fresh pair, hedged with the signer's secret share
    pub fn generate<R: RngCore + CryptoRng>(secret: &Scalar, rng: &mut R) -> Self {
        Self {
            hiding: hedged_nonce(secret, rng),
            binding: hedged_nonce(secret, rng),
        }
    }

    pub(crate) fn hiding(&self) -> &Scalar {
        &self.hiding
    }

    pub(crate) fn binding(&self) -> &Scalar {
        &self.binding
    }

    /// Public commitments `(D, E)`
    pub fn commitment(&self, participant_id: ParticipantId) -> SigningCommitment {
        SigningCommitment {
            participant_id,
            hiding: curve::base_mul(&self.hiding),
            binding: curve::base_mul(&self.binding),
        }
    }
}

fn hedged_nonce<R: RngCore + CryptoRng>(secret: &Scalar, rng: &mut R) -> Scalar {
    let mut random = [0u8; 32];
    rng.fill_bytes(&mut random);
    let mut secret_bytes = scalar_to_bytes(secret);
    let nonce = curve::hash_to_scalar("nonce", &[&random, &secret_bytes]);
    random.zeroize();
    secret_bytes.zeroize();
    nonce
}

/// Single-use nonce pool keyed by session
///
/// A session ID can be committed to at most once for the lifetime of the
/// manager, so a pair can never be re-issued even after the session aborts.
/// The issued set grows by one session ID per signing session and is never
/// pruned; long-running nodes are expected to restart with a fresh manager,
/// and the CLI keeps its own on-disk record of used session IDs.
#[derive(Default)]
pub struct NonceManager {
    live: DashMap<SessionId, SigningNonces>,
    issued: DashSet<SessionId>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and retain a nonce pair for `session_id`, returning its commitment
    pub fn commit<R: RngCore + CryptoRng>(
        &self,
        session_id: &SessionId,
        key_share: &KeyShare,
        rng: &mut R,
    ) -> Result<SigningCommitment> {
        if !self.issued.insert(*session_id) {
            return Err(Error::NonceReuse(hex::encode(session_id)));
        }

        let nonces = SigningNonces::generate(key_share.secret_share(), rng);
        let commitment = nonces.commitment(key_share.participant_id);
        self.live.insert(*session_id, nonces);

        debug!(
            participant_id = key_share.participant_id,
            session_id = %hex::encode(session_id),
            "Issued signing nonces"
        );
        Ok(commitment)
    }

    /// Remove the pair for `session_id`; a second call fails
    pub fn take(&self, session_id: &SessionId) -> Result<SigningNonces> {
        self.live
            .remove(session_id)
            .map(|(_, nonces)| nonces)
            .ok_or_else(|| Error::NonceUnavailable(hex::encode(session_id)))
    }

    /// Drop (and zero) any pair still held for `session_id`
    pub fn discard(&self, session_id: &SessionId) {
        if self.live.remove(session_id).is_some() {
            debug!(session_id = %hex::encode(session_id), "Discarded unused nonces");
        }
    }

    /// Whether a pair was ever issued for `session_id`
    pub fn was_issued(&self, session_id: &SessionId) -> bool {
        self.issued.contains(session_id)
    }

    /// Number of pairs waiting to be consumed
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
