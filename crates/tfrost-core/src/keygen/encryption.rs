//! Point-to-point share encryption
//!
//! Each dealer publishes an ephemeral X25519 key in round 1. A share from
//! `sender` to `recipient` is sealed with ChaCha20-Poly1305 under a key derived
//! from the X25519 shared secret and bound to the session and both IDs.

use crate::{Error, ParticipantId, Result, SessionId};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, ReusableSecret};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const KDF_LABEL: &[u8] = b"tfrost/dkg-share";

/// Session-scoped encryption keypair
pub struct ShareCipher {
    secret: ReusableSecret,
    public: PublicKey,
}

impl ShareCipher {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = ReusableSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    fn channel_key(
        &self,
        peer: &PublicKey,
        session_id: &SessionId,
        sender: ParticipantId,
        recipient: ParticipantId,
    ) -> Result<Zeroizing<[u8; 32]>> {
        let shared = self.secret.diffie_hellman(peer);
        if !shared.was_contributory() {
            return Err(Error::Encryption("non-contributory peer key".into()));
        }

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(shared.as_bytes())
            .map_err(|e| Error::Encryption(e.to_string()))?;
        mac.update(KDF_LABEL);
        mac.update(session_id);
        mac.update(&sender.to_be_bytes());
        mac.update(&recipient.to_be_bytes());

        Ok(Zeroizing::new(mac.finalize().into_bytes().into()))
    }

    /// Seal `plaintext` for `recipient`; returns `(nonce, ciphertext)`
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        recipient_key: &PublicKey,
        session_id: &SessionId,
        sender: ParticipantId,
        recipient: ParticipantId,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let key = self.channel_key(recipient_key, session_id, sender, recipient)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let aad = associated_data(session_id, sender, recipient);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok((nonce.to_vec(), ciphertext))
    }

    /// Open a share sealed by `sender` for us
    pub fn open(
        &self,
        sender_key: &PublicKey,
        session_id: &SessionId,
        sender: ParticipantId,
        recipient: ParticipantId,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::Decode(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }
        let key = self.channel_key(sender_key, session_id, sender, recipient)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

        let aad = associated_data(session_id, sender, recipient);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|e| Error::Encryption(e.to_string()))
    }
}

fn associated_data(
    session_id: &SessionId,
    sender: ParticipantId,
    recipient: ParticipantId,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(40);
    aad.extend_from_slice(session_id);
    aad.extend_from_slice(&sender.to_be_bytes());
    aad.extend_from_slice(&recipient.to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[test]
    fn test_seal_and_open() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let alice = ShareCipher::generate(&mut rng);
        let bob = ShareCipher::generate(&mut rng);
        let sid = [7u8; 32];

        let (nonce, ciphertext) = alice
            .seal(&mut rng, bob.public_key(), &sid, 1, 2, b"share bytes")
            .unwrap();
        let opened = bob
            .open(alice.public_key(), &sid, 1, 2, &nonce, &ciphertext)
            .unwrap();
        assert_eq!(opened.as_slice(), b"share bytes");
    }

    #[test]
    fn test_open_bound_to_context() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let alice = ShareCipher::generate(&mut rng);
        let bob = ShareCipher::generate(&mut rng);
        let sid = [7u8; 32];

        let (nonce, ciphertext) = alice
            .seal(&mut rng, bob.public_key(), &sid, 1, 2, b"share bytes")
            .unwrap();

        // Wrong session, wrong claimed sender
        assert!(bob
            .open(alice.public_key(), &[8u8; 32], 1, 2, &nonce, &ciphertext)
            .is_err());
        assert!(bob
            .open(alice.public_key(), &sid, 3, 2, &nonce, &ciphertext)
            .is_err());

        let mut tampered = ciphertext.clone();
        tampered[0] ^= 1;
        assert!(bob
            .open(alice.public_key(), &sid, 1, 2, &nonce, &tampered)
            .is_err());
    }
}
