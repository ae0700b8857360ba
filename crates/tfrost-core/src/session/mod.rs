//! Session coordination
//!
//! A [`Coordinator`] is one participant's node. It drives DKG and signing
//! sessions over a [`Relay`](crate::mpc::Relay), buffers each round's
//! messages in a per-round tally and moves every session through the
//! [`SessionState`] machine recorded in a [`SessionRegistry`].

mod coordinator;
mod policy;
mod tally;

pub use coordinator::Coordinator;
pub use policy::{
    DkgFaultPolicy, ExclusionPolicy, FaultRecord, FaultRegistry, ProtocolConfig,
    DEFAULT_ROUND_TIMEOUT,
};
pub use tally::{DkgInbox, Inbox, Round, SigningInbox, Tally};

use crate::{Error, Result, SessionId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Protocol a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Dkg,
    Signing,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingCommitments,
    /// DKG only
    AwaitingShares,
    /// DKG only
    AwaitingConfirmations,
    /// DKG only, when a share was disputed
    AwaitingJustifications,
    /// Signing only
    AwaitingPartialSignatures,
    Aggregating,
    Complete,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Aborted)
    }

    /// Whether `self -> next` is legal for a session of `kind`
    pub fn can_transition_to(&self, kind: SessionKind, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Aborted {
            return true;
        }
        match (kind, self, next) {
            (_, Idle, AwaitingCommitments) => true,
            (SessionKind::Dkg, AwaitingCommitments, AwaitingShares) => true,
            (SessionKind::Dkg, AwaitingShares, AwaitingConfirmations) => true,
            (SessionKind::Dkg, AwaitingConfirmations, AwaitingJustifications) => true,
            (SessionKind::Dkg, AwaitingConfirmations, Aggregating) => true,
            (SessionKind::Dkg, AwaitingJustifications, Aggregating) => true,
            (SessionKind::Signing, AwaitingCommitments, AwaitingPartialSignatures) => true,
            (SessionKind::Signing, AwaitingPartialSignatures, Aggregating) => true,
            (_, Aggregating, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingCommitments => "awaiting_commitments",
            SessionState::AwaitingShares => "awaiting_shares",
            SessionState::AwaitingConfirmations => "awaiting_confirmations",
            SessionState::AwaitingJustifications => "awaiting_justifications",
            SessionState::AwaitingPartialSignatures => "awaiting_partial_signatures",
            SessionState::Aggregating => "aggregating",
            SessionState::Complete => "complete",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

struct SessionEntry {
    kind: SessionKind,
    state: SessionState,
    abort_signal: Arc<Notify>,
}

/// Every session this node has ever started
///
/// Entries are never removed, so a session ID cannot be reused even after the
/// session completed or aborted. Memory grows with the number of sessions run
/// by this node.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` in state `Idle`
    pub fn register(&self, session_id: &SessionId, kind: SessionKind) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(*session_id) {
            Entry::Occupied(_) => Err(Error::SessionReused(hex::encode(session_id))),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    kind,
                    state: SessionState::Idle,
                    abort_signal: Arc::new(Notify::new()),
                });
                debug!(session_id = %hex::encode(session_id), ?kind, "Session registered");
                Ok(())
            }
        }
    }

    pub fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.get(session_id).map(|entry| entry.state)
    }

    pub fn kind(&self, session_id: &SessionId) -> Option<SessionKind> {
        self.sessions.get(session_id).map(|entry| entry.kind)
    }

    /// Move a session to `next`; an aborted session reports `SessionAborted`
    pub fn transition(&self, session_id: &SessionId, next: SessionState) -> Result<()> {
        let mut entry = self.sessions.get_mut(session_id).ok_or_else(|| {
            Error::InvalidTransition(format!("unknown session {}", hex::encode(session_id)))
        })?;

        if entry.state == SessionState::Aborted {
            return Err(Error::SessionAborted(hex::encode(session_id)));
        }
        if !entry.state.can_transition_to(entry.kind, next) {
            return Err(Error::InvalidTransition(format!(
                "{} -> {} in {:?} session",
                entry.state, next, entry.kind
            )));
        }

        debug!(
            session_id = %hex::encode(session_id),
            from = %entry.state,
            to = %next,
            "Session transition"
        );
        entry.state = next;
        Ok(())
    }

    /// Abort a session that has not reached a terminal state
    ///
    /// Wakes any task waiting on the session's messages. Returns whether the
    /// session was aborted by this call.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        let signal = match self.sessions.get_mut(session_id) {
            Some(mut entry) if !entry.state.is_terminal() => {
                entry.state = SessionState::Aborted;
                Arc::clone(&entry.abort_signal)
            }
            _ => return false,
        };
        signal.notify_waiters();
        info!(session_id = %hex::encode(session_id), "Session aborted");
        true
    }

    pub fn is_aborted(&self, session_id: &SessionId) -> bool {
        self.state(session_id) == Some(SessionState::Aborted)
    }

    /// Signal fired when the session is aborted
    pub(crate) fn abort_signal(&self, session_id: &SessionId) -> Option<Arc<Notify>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(&entry.abort_signal))
    }
}
