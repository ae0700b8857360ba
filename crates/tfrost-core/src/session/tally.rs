//! Per-round message buffers
//!
//! Each round has a [`Tally`] with one slot per expected sender. Messages may
//! arrive in any order and for rounds that have not started yet; they are
//! slotted as they come and read only once the coordinator sees the round is
//! complete.

use crate::keygen::{DealerCommitment, DkgConfirmation, DkgJustification, DkgShare};
use crate::sign::{PartialSignature, SigningCommitment};
use crate::{Error, ParticipantId, ProtocolMessage, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Rounds that wait on peer messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    DkgCommitments,
    DkgShares,
    DkgConfirmations,
    DkgJustifications,
    NonceCommitments,
    PartialSignatures,
}

impl Round {
    pub fn name(&self) -> &'static str {
        match self {
            Round::DkgCommitments => "dkg_commitments",
            Round::DkgShares => "dkg_shares",
            Round::DkgConfirmations => "dkg_confirmations",
            Round::DkgJustifications => "dkg_justifications",
            Round::NonceCommitments => "nonce_commitments",
            Round::PartialSignatures => "partial_signatures",
        }
    }
}

/// Arena of slots indexed by participant ID; each sender fills only its own
#[derive(Debug)]
pub struct Tally<T> {
    slots: BTreeMap<ParticipantId, Option<T>>,
}

impl<T> Tally<T> {
    pub fn new(expected: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            slots: expected.into_iter().map(|id| (id, None)).collect(),
        }
    }

    /// Fill `from`'s slot; unknown senders and second messages are refused
    pub fn insert(&mut self, from: ParticipantId, value: T) -> Result<()> {
        match self.slots.get_mut(&from) {
            None => Err(Error::UnexpectedMessage(format!(
                "participant {} is not expected in this round",
                from
            ))),
            Some(Some(_)) => Err(Error::UnexpectedMessage(format!(
                "duplicate message from participant {}",
                from
            ))),
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.values().all(Option::is_some)
    }

    /// Expected senders whose slot is still empty
    pub fn missing(&self) -> Vec<ParticipantId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    /// Empty every slot, returning the filled ones in participant order
    pub fn take(&mut self) -> Vec<T> {
        self.slots.values_mut().filter_map(Option::take).collect()
    }
}

/// Buffers for all rounds of one session
pub trait Inbox: Send {
    /// Slot a decoded message; an error means the message is dropped
    fn accept(&mut self, message: ProtocolMessage) -> Result<()>;

    /// Senders still missing for `round`
    fn missing(&self, round: Round) -> Vec<ParticipantId>;
}

/// DKG round buffers
pub struct DkgInbox {
    me: ParticipantId,
    degree: usize,
    pub commitments: Tally<DealerCommitment>,
    pub shares: Tally<DkgShare>,
    pub confirmations: Tally<DkgConfirmation>,
    pub justifications: Tally<DkgJustification>,
    /// Dealers that owe a justification; empty until complaints are known
    justifiers: BTreeSet<ParticipantId>,
}

impl DkgInbox {
    pub fn new(me: ParticipantId, threshold: usize, peers: &[ParticipantId]) -> Self {
        Self {
            me,
            degree: threshold - 1,
            commitments: Tally::new(peers.iter().copied()),
            shares: Tally::new(peers.iter().copied()),
            confirmations: Tally::new(peers.iter().copied()),
            justifications: Tally::new(peers.iter().copied()),
            justifiers: BTreeSet::new(),
        }
    }

    /// Wait on justifications from `dealers`, other than this participant
    pub fn expect_justifications(&mut self, dealers: impl IntoIterator<Item = ParticipantId>) {
        let me = self.me;
        self.justifiers = dealers.into_iter().filter(|&id| id != me).collect();
    }
}

impl Inbox for DkgInbox {
    fn accept(&mut self, message: ProtocolMessage) -> Result<()> {
        match message {
            ProtocolMessage::DkgCommitment(msg) => {
                let dealer = msg.decode()?;
                if dealer.commitment.degree() != self.degree {
                    return Err(Error::Decode(format!(
                        "commitment from participant {} has degree {}, expected {}",
                        dealer.participant_id,
                        dealer.commitment.degree(),
                        self.degree
                    )));
                }
                self.commitments.insert(dealer.participant_id, dealer)
            }
            ProtocolMessage::DkgShare(msg) => {
                if msg.recipient_id != self.me {
                    return Err(Error::UnexpectedMessage(format!(
                        "share addressed to participant {}",
                        msg.recipient_id
                    )));
                }
                self.shares.insert(msg.sender_id, msg)
            }
            ProtocolMessage::DkgConfirmation(msg) => {
                self.confirmations.insert(msg.participant_id, msg)
            }
            ProtocolMessage::DkgJustification(msg) => {
                self.justifications.insert(msg.participant_id, msg)
            }
            ProtocolMessage::NonceCommitment(_) | ProtocolMessage::PartialSignature(_) => Err(
                Error::UnexpectedMessage("signing message in a DKG session".into()),
            ),
        }
    }

    fn missing(&self, round: Round) -> Vec<ParticipantId> {
        match round {
            Round::DkgCommitments => self.commitments.missing(),
            Round::DkgShares => self.shares.missing(),
            Round::DkgConfirmations => self.confirmations.missing(),
            Round::DkgJustifications => self
                .justifications
                .missing()
                .into_iter()
                .filter(|id| self.justifiers.contains(id))
                .collect(),
            Round::NonceCommitments | Round::PartialSignatures => Vec::new(),
        }
    }
}

/// Signing round buffers
pub struct SigningInbox {
    pub commitments: Tally<SigningCommitment>,
    pub partials: Tally<PartialSignature>,
}

impl SigningInbox {
    pub fn new(peers: &[ParticipantId]) -> Self {
        Self {
            commitments: Tally::new(peers.iter().copied()),
            partials: Tally::new(peers.iter().copied()),
        }
    }
}

impl Inbox for SigningInbox {
    fn accept(&mut self, message: ProtocolMessage) -> Result<()> {
        match message {
            ProtocolMessage::NonceCommitment(msg) => {
                let commitment = msg.decode()?;
                self.commitments.insert(commitment.participant_id, commitment)
            }
            ProtocolMessage::PartialSignature(msg) => {
                let partial = msg.decode()?;
                self.partials.insert(partial.participant_id, partial)
            }
            ProtocolMessage::DkgCommitment(_)
            | ProtocolMessage::DkgShare(_)
            | ProtocolMessage::DkgConfirmation(_)
            | ProtocolMessage::DkgJustification(_) => Err(Error::UnexpectedMessage(
                "DKG message in a signing session".into(),
            )),
        }
    }

    fn missing(&self, round: Round) -> Vec<ParticipantId> {
        match round {
            Round::NonceCommitments => self.commitments.missing(),
            Round::PartialSignatures => self.partials.missing(),
            Round::DkgCommitments
            | Round::DkgShares
            | Round::DkgConfirmations
            | Round::DkgJustifications => Vec::new(),
        }
    }
}
