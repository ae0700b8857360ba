//! Distributed Key Generation (DKG) module
//!
//! Pedersen-style DKG with Feldman commitments, as used by FROST:
//!
//! 1. every participant broadcasts a commitment to a random degree `t-1`
//!    polynomial, a proof of knowledge of its constant term and an ephemeral
//!    encryption key;
//! 2. every participant sends each peer an encrypted evaluation of its
//!    polynomial;
//! 3. every participant verifies the shares it received and broadcasts its
//!    complaints;
//! 4. a dealer named in a share complaint reveals the disputed shares, and
//!    everyone checks them against its commitment.
//!
//! Complaints are never taken on trust: after round 4 all honest
//! participants agree on which dealers are provably faulty.

mod dkg;
mod encryption;
mod messages;

pub use dkg::{DkgOutput, DkgParticipant};
pub use encryption::ShareCipher;
pub use messages::*;

#[cfg(test)]
pub(crate) use dkg::tests as harness;
