//! Participant node driving DKG and signing sessions over a relay

use super::tally::{DkgInbox, Inbox, Round, SigningInbox};
use super::{FaultRegistry, ProtocolConfig, SessionKind, SessionRegistry, SessionState};
use crate::keygen::{DkgConfirmation, DkgOutput, DkgParticipant, Fault};
use crate::mpc::Relay;
use crate::sign::{
    self, NonceCommitmentMessage, NonceManager, PartialSignatureMessage, SigningPackage,
};
use crate::{
    Error, KeyShare, ParticipantId, ProtocolMessage, Result, SessionConfig, SessionId, Signature,
};
use rand::rngs::OsRng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// One participant's protocol node
pub struct Coordinator<R: Relay> {
    participant_id: ParticipantId,
    relay: R,
    config: ProtocolConfig,
    sessions: SessionRegistry,
    nonces: NonceManager,
    faults: FaultRegistry,
}

impl<R: Relay> Coordinator<R> {
    pub fn new(participant_id: ParticipantId, relay: R, config: ProtocolConfig) -> Self {
        Self {
            participant_id,
            relay,
            config,
            sessions: SessionRegistry::new(),
            nonces: NonceManager::new(),
            faults: FaultRegistry::new(config.exclusion_policy),
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn session_state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.state(session_id)
    }

    pub fn fault_registry(&self) -> &FaultRegistry {
        &self.faults
    }

    pub fn nonce_manager(&self) -> &NonceManager {
        &self.nonces
    }

    /// Abort a running session and discard its nonces
    pub fn abort(&self, session_id: &SessionId) -> bool {
        self.nonces.discard(session_id);
        self.sessions.abort(session_id)
    }

    /// Run a DKG session to completion
    ///
    /// Configuration and ban checks happen before anything is sent.
    #[instrument(
        skip_all,
        fields(participant_id = self.participant_id, session_id = %hex::encode(session_id))
    )]
    pub async fn start_dkg(
        &self,
        session_id: SessionId,
        participants: &[ParticipantId],
        threshold: usize,
    ) -> Result<DkgOutput> {
        let config = SessionConfig::new(session_id, participants, threshold, self.participant_id)?;
        self.faults.check(&config.participants)?;
        self.sessions.register(&session_id, SessionKind::Dkg)?;

        info!(
            participants = ?config.participants,
            threshold,
            policy = %self.config.dkg_fault_policy,
            "Starting DKG"
        );

        match self.run_dkg(&config).await {
            Ok(output) => {
                for fault in output.faults.iter().filter(|f| f.participant != self.participant_id) {
                    self.faults.record(&session_id, *fault);
                }
                self.sessions.transition(&session_id, SessionState::Complete)?;
                info!(
                    group_public_key = %output.key_share.group_public_key.to_hex(),
                    "DKG complete"
                );
                Ok(output)
            }
            Err(e) => Err(self.fail(&session_id, e)),
        }
    }

    async fn run_dkg(&self, config: &SessionConfig) -> Result<DkgOutput> {
        let session_id = &config.session_id;
        let me = self.participant_id;
        let peers: Vec<ParticipantId> = config.peers().collect();
        let mut inbox = DkgInbox::new(me, config.threshold, &peers);

        self.sessions
            .transition(session_id, SessionState::AwaitingCommitments)?;
        let (mut participant, commitment) = DkgParticipant::new(config.clone(), &mut OsRng)?;
        self.relay
            .broadcast(
                session_id,
                me,
                ProtocolMessage::DkgCommitment(commitment).encode()?,
            )
            .await?;
        self.collect(config, &mut inbox, Round::DkgCommitments).await?;
        for dealer in inbox.commitments.take() {
            participant.receive_commitment(dealer)?;
        }

        self.sessions
            .transition(session_id, SessionState::AwaitingShares)?;
        for share in participant.share_messages(&mut OsRng)? {
            let to = share.recipient_id;
            self.relay
                .send(session_id, me, to, ProtocolMessage::DkgShare(share).encode()?)
                .await?;
        }
        self.collect(config, &mut inbox, Round::DkgShares).await?;
        for share in inbox.shares.take() {
            participant.receive_share(&share)?;
        }

        self.sessions
            .transition(session_id, SessionState::AwaitingConfirmations)?;
        let own: DkgConfirmation = participant.confirmation();
        self.relay
            .broadcast(
                session_id,
                me,
                ProtocolMessage::DkgConfirmation(own.clone()).encode()?,
            )
            .await?;
        self.collect(config, &mut inbox, Round::DkgConfirmations).await?;
        let mut confirmations = inbox.confirmations.take();
        confirmations.push(own);

        let disputes = participant.share_disputes(&confirmations);
        let mut justifications = Vec::new();
        if !disputes.is_empty() {
            self.sessions
                .transition(session_id, SessionState::AwaitingJustifications)?;
            info!(disputes = ?disputes, "Share complaints raised, waiting for dealers");
            if let Some(own) = participant.justification(&disputes)? {
                self.relay
                    .broadcast(
                        session_id,
                        me,
                        ProtocolMessage::DkgJustification(own.clone()).encode()?,
                    )
                    .await?;
                justifications.push(own);
            }
            inbox.expect_justifications(disputes.keys().copied());
            self.collect(config, &mut inbox, Round::DkgJustifications).await?;
            justifications.extend(inbox.justifications.take());
        }

        self.sessions
            .transition(session_id, SessionState::Aggregating)?;
        participant.finalize(&confirmations, &justifications, self.config.dkg_fault_policy)
    }

    /// Run a signing session to completion
    ///
    /// `signers` is fixed for the whole session. Below-threshold sets, unknown
    /// signers and banned signers are refused before anything is sent.
    #[instrument(
        skip_all,
        fields(participant_id = self.participant_id, session_id = %hex::encode(session_id))
    )]
    pub async fn start_signing(
        &self,
        session_id: SessionId,
        key_share: &KeyShare,
        signers: &[ParticipantId],
        message: &[u8],
    ) -> Result<Signature> {
        if key_share.participant_id != self.participant_id {
            return Err(Error::Configuration(format!(
                "Key share belongs to participant {}, node is {}",
                key_share.participant_id, self.participant_id
            )));
        }
        let signers = sign::validate_signers(key_share, signers)?;
        self.faults.check(&signers)?;
        self.sessions.register(&session_id, SessionKind::Signing)?;

        info!(signers = ?signers, "Starting signing");

        let config = SessionConfig {
            session_id,
            threshold: key_share.threshold,
            participant_id: self.participant_id,
            participants: signers,
        };
        match self.run_signing(&config, key_share, message).await {
            Ok(signature) => {
                self.sessions.transition(&session_id, SessionState::Complete)?;
                info!(signature = %signature.to_hex(), "Signing complete");
                Ok(signature)
            }
            Err(e) => {
                self.nonces.discard(&session_id);
                Err(self.fail(&session_id, e))
            }
        }
    }

    async fn run_signing(
        &self,
        config: &SessionConfig,
        key_share: &KeyShare,
        message: &[u8],
    ) -> Result<Signature> {
        let session_id = &config.session_id;
        let me = self.participant_id;
        let peers: Vec<ParticipantId> = config.peers().collect();
        let mut inbox = SigningInbox::new(&peers);

        self.sessions
            .transition(session_id, SessionState::AwaitingCommitments)?;
        let own_commitment = self.nonces.commit(session_id, key_share, &mut OsRng)?;
        self.relay
            .broadcast(
                session_id,
                me,
                ProtocolMessage::NonceCommitment(NonceCommitmentMessage::from(&own_commitment))
                    .encode()?,
            )
            .await?;
        self.collect(config, &mut inbox, Round::NonceCommitments).await?;

        let mut commitments = inbox.commitments.take();
        commitments.push(own_commitment);
        let package = SigningPackage::new(message, commitments)?;

        self.sessions
            .transition(session_id, SessionState::AwaitingPartialSignatures)?;
        let nonces = self.nonces.take(session_id)?;
        let own_partial = sign::sign(key_share, nonces, &package)?;
        self.relay
            .broadcast(
                session_id,
                me,
                ProtocolMessage::PartialSignature(PartialSignatureMessage::from(&own_partial))
                    .encode()?,
            )
            .await?;
        self.collect(config, &mut inbox, Round::PartialSignatures).await?;

        let mut partials = inbox.partials.take();
        partials.push(own_partial);

        self.sessions
            .transition(session_id, SessionState::Aggregating)?;
        sign::aggregate(&package, &partials, &key_share.public_key_package())
    }

    /// Wait until every peer has filled its slot for `round`
    ///
    /// Malformed, misattributed or unexpected messages are dropped with a
    /// warning; the session goes on waiting for a valid one.
    async fn collect<I: Inbox>(
        &self,
        config: &SessionConfig,
        inbox: &mut I,
        round: Round,
    ) -> Result<()> {
        let session_id = &config.session_id;
        let signal = self.sessions.abort_signal(session_id).ok_or_else(|| {
            Error::Internal(format!("session {} is not registered", hex::encode(session_id)))
        })?;
        let deadline = Instant::now() + self.config.round_timeout;

        loop {
            let missing = inbox.missing(round);
            if missing.is_empty() {
                debug!(round = round.name(), "Round complete");
                return Ok(());
            }

            let aborted = signal.notified();
            if self.sessions.is_aborted(session_id) {
                return Err(Error::SessionAborted(hex::encode(session_id)));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(round_failure(config, round, missing));
            }

            let received = tokio::select! {
                received = self.relay.receive(session_id, self.participant_id, deadline - now) => {
                    received?
                }
                _ = aborted => continue,
            };
            let Some(envelope) = received else {
                continue;
            };

            let message = match ProtocolMessage::decode(&envelope.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(from = envelope.from, error = %e, "Dropping undecodable message");
                    continue;
                }
            };
            if message.sender() != envelope.from {
                warn!(
                    from = envelope.from,
                    claimed = message.sender(),
                    kind = message.kind(),
                    "Dropping message with mismatched sender"
                );
                continue;
            }

            let kind = message.kind();
            if let Err(e) = inbox.accept(message) {
                warn!(from = envelope.from, kind, error = %e, "Dropping message");
            }
        }
    }

    /// Abort bookkeeping for a failed session
    fn fail(&self, session_id: &SessionId, error: Error) -> Error {
        if let Some(fault) = Fault::from_error(&error) {
            if fault.participant != self.participant_id {
                self.faults.record(session_id, fault);
            }
        }
        self.sessions.abort(session_id);
        warn!(error = %error, "Session failed");
        error
    }
}

/// Error for a round whose deadline passed with `missing` peers silent
///
/// The participant set is fixed, so a round never proceeds without them.
/// Counting this participant, fewer than `t` responders means quorum is lost.
fn round_failure(config: &SessionConfig, round: Round, missing: Vec<ParticipantId>) -> Error {
    let responded = config.participants.len() - missing.len();
    warn!(
        round = round.name(),
        missing = ?missing,
        responded,
        "Round timed out"
    );
    if responded < config.threshold {
        Error::InsufficientParticipants {
            required: config.threshold,
            actual: responded,
            missing,
        }
    } else {
        Error::Timeout {
            round: round.name(),
            missing,
        }
    }
}
