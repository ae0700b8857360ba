//! # TFROST Core
//!
//! Core protocol engine for FROST threshold Schnorr signatures over secp256k1.
//!
//! This crate provides:
//! - Distributed Key Generation (DKG) with verifiable secret sharing
//! - Two-round threshold signing with single-use nonces
//! - Partial signature verification and aggregation
//! - A session coordinator that drives both protocols over a [`mpc::Relay`]
//!
//! ## Protocol Overview
//!
//! Any `t` of the `n` key holders can produce a plain Schnorr signature
//! `(R, z)` under the group public key. The group secret is never
//! reconstructed; each holder only ever uses its own share.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tfrost_core::{mpc::MemoryRelay, session::{Coordinator, ProtocolConfig}};
//!
//! let node = Coordinator::new(1, relay, ProtocolConfig::default());
//!
//! // Run distributed key generation
//! let output = node.start_dkg(session_id, &[1, 2, 3], 2).await?;
//!
//! // Sign a message with participants 1 and 3
//! let signature = node
//!     .start_signing(sign_session_id, &output.key_share, &[1, 3], message)
//!     .await?;
//! assert!(tfrost_core::verify(&output.key_share.group_public_key, message, &signature));
//! ```

pub mod curve;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod polynomial;
pub mod session;
pub mod sign;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    session_id_from_label, validate_participant_set, GroupPublicKey, KeyShare, ParticipantId,
    ProtocolMessage, PublicKeyPackage, SessionConfig, SessionId, Signature, VerifyingShare,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: usize = 2;

/// Default number of parties
pub const DEFAULT_PARTIES: usize = 3;

/// Default per-round timeout in seconds
pub const DEFAULT_ROUND_TIMEOUT_SECS: u64 = 30;

/// Verify a Schnorr signature against the group public key
pub fn verify(group_public_key: &GroupPublicKey, message: &[u8], signature: &Signature) -> bool {
    signature.verify(group_public_key, message)
}
