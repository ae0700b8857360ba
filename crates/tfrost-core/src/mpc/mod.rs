//! Transport abstraction used by the session coordinator

use crate::{ParticipantId, Result, SessionId};
use std::time::Duration;

pub use ::async_trait::async_trait;

/// A payload delivered to one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Claimed sender; the payload itself names the protocol sender too
    pub from: ParticipantId,
    pub payload: Vec<u8>,
}

/// Message relay for protocol communication
///
/// Delivery is per session: a participant only ever receives payloads posted
/// to the session it asks for, never its own broadcasts, and each payload at
/// most once.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Post a payload to every other participant of the session
    async fn broadcast(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()>;

    /// Post a payload to a single participant
    async fn send(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        to: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()>;

    /// Next payload for `me`, or `None` once `timeout` passes without one
    async fn receive(
        &self,
        session_id: &SessionId,
        me: ParticipantId,
        timeout: Duration,
    ) -> Result<Option<Envelope>>;
}

/// In-memory relay for testing
pub mod memory;

pub use memory::MemoryRelay;
