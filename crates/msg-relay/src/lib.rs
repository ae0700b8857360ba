//! Message Relay Library
//!
//! Session-scoped, append-only message logs backing the relay service.
//! Each session keeps its messages in posting order with a sequence number, so
//! a participant can poll for everything after the last sequence it saw.
//! Re-posting an identical message is idempotent and expired messages are
//! dropped by [`MessageStore::cleanup`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Participant identifier as carried on the wire
pub type ParticipantId = u32;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Position in the session log, starting at 1
    pub seq: u64,
    /// Sender
    pub from: ParticipantId,
    /// Recipient (None for broadcasts)
    pub to: Option<ParticipantId>,
    /// Message payload
    pub payload: Vec<u8>,
    /// blake3 digest of sender, recipient and payload
    pub digest: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Direct messages go to their recipient, broadcasts to everyone but the sender
    pub fn is_for(&self, recipient: ParticipantId) -> bool {
        match self.to {
            Some(to) => to == recipient,
            None => self.from != recipient,
        }
    }
}

fn message_digest(from: ParticipantId, to: Option<ParticipantId>, payload: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&from.to_be_bytes());
    match to {
        Some(to) => {
            hasher.update(&[1]);
            hasher.update(&to.to_be_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hasher.update(payload);
    hex::encode(hasher.finalize().as_bytes())
}

/// Outcome of storing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    /// Sequence number of the stored (or previously stored) message
    pub seq: u64,
    /// Whether an identical message was already in the log
    pub duplicate: bool,
}

#[derive(Default)]
struct SessionLog {
    messages: Vec<StoredMessage>,
    digests: HashSet<String>,
    next_seq: u64,
}

/// Message relay store
#[derive(Clone)]
pub struct MessageStore {
    /// Session logs indexed by hex session ID
    sessions: Arc<DashMap<String, SessionLog>>,
    /// Last sequence number handed out in sessions that cleanup dropped
    ///
    /// One entry per dropped session, kept for the life of the store.
    high_water: Arc<DashMap<String, u64>>,
    /// Default TTL in seconds
    ttl_seconds: i64,
}

/// Session IDs are 32 bytes, hex encoded
pub fn validate_session_id(session_id: &str) -> Result<()> {
    match hex::decode(session_id) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(RelayError::InvalidFormat(format!(
            "session id must be 64 hex characters: {}",
            session_id
        ))),
    }
}

impl MessageStore {
    /// Create a new message store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            high_water: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Append a message to a session log
    pub fn put(
        &self,
        session_id: &str,
        from: ParticipantId,
        to: Option<ParticipantId>,
        payload: Vec<u8>,
    ) -> Result<PutOutcome> {
        validate_session_id(session_id)?;
        if from == 0 || to == Some(0) {
            return Err(RelayError::InvalidFormat(
                "participant id 0 is reserved".into(),
            ));
        }

        let digest = message_digest(from, to, &payload);
        let mut log = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                next_seq: self.high_water.get(session_id).map(|seq| *seq).unwrap_or(0),
                ..SessionLog::default()
            });

        if log.digests.contains(&digest) {
            let seq = log
                .messages
                .iter()
                .find(|m| m.digest == digest)
                .map(|m| m.seq)
                .ok_or_else(|| RelayError::Internal("digest without message".into()))?;
            return Ok(PutOutcome {
                seq,
                duplicate: true,
            });
        }

        let now = Utc::now();
        log.next_seq += 1;
        let seq = log.next_seq;
        log.digests.insert(digest.clone());
        log.messages.push(StoredMessage {
            seq,
            from,
            to,
            payload,
            digest,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.ttl_seconds),
        });

        debug!(session_id, seq, from, to = ?to, "Message stored");
        Ok(PutOutcome {
            seq,
            duplicate: false,
        })
    }

    /// Messages for `recipient` with a sequence number above `after`
    pub fn fetch(
        &self,
        session_id: &str,
        recipient: ParticipantId,
        after: u64,
    ) -> Result<Vec<StoredMessage>> {
        validate_session_id(session_id)?;
        Ok(self
            .sessions
            .get(session_id)
            .map(|log| {
                log.messages
                    .iter()
                    .filter(|m| m.seq > after && m.is_for(recipient))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of messages held for a session
    pub fn message_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|log| log.messages.len())
            .unwrap_or(0)
    }

    /// Remove expired messages and empty sessions, returning how many messages went
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for mut log in self.sessions.iter_mut() {
            let before = log.messages.len();
            log.messages.retain(|m| m.expires_at > now);
            if log.messages.len() != before {
                let live: HashSet<String> =
                    log.messages.iter().map(|m| m.digest.clone()).collect();
                log.digests = live;
                removed += before - log.messages.len();
            }
        }
        // Emptied sessions go, but their sequence numbers carry on if reused
        self.sessions.retain(|session_id, log| {
            if log.messages.is_empty() {
                self.high_water.insert(session_id.clone(), log.next_seq);
                false
            } else {
                true
            }
        });
        removed
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(3600) // 1 hour default TTL
    }
}

/// `POST /v1/sessions/{sid}/messages` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub from: ParticipantId,
    /// Recipient (None for broadcasts)
    pub to: Option<ParticipantId>,
    /// base64 encoded
    pub payload: String,
}

/// `GET /v1/sessions/{sid}/messages` query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesQuery {
    pub recipient: ParticipantId,
    #[serde(default)]
    pub after: u64,
}

/// A message as returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub seq: u64,
    pub from: ParticipantId,
    pub to: Option<ParticipantId>,
    /// base64 encoded
    pub payload: String,
}

impl From<&StoredMessage> for WireMessage {
    fn from(message: &StoredMessage) -> Self {
        Self {
            seq: message.seq,
            from: message.from,
            to: message.to,
            payload: b64::encode(&message.payload),
        }
    }
}

/// `GET /v1/sessions/{sid}/messages` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<WireMessage>,
}

pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[test]
    fn test_message_store() {
        let store = MessageStore::new(3600);
        let session = sid(1);

        let first = store.put(&session, 1, None, vec![1, 2, 3]).unwrap();
        let second = store.put(&session, 2, Some(3), vec![4]).unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));

        let for_three = store.fetch(&session, 3, 0).unwrap();
        assert_eq!(for_three.len(), 2);
        assert_eq!(for_three[0].payload, vec![1, 2, 3]);

        let for_one = store.fetch(&session, 1, 0).unwrap();
        assert!(for_one.is_empty());

        let for_two = store.fetch(&session, 2, 0).unwrap();
        assert_eq!(for_two.len(), 1);
        assert!(store.fetch(&session, 3, 2).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_post_is_idempotent() {
        let store = MessageStore::new(3600);
        let session = sid(2);

        let first = store.put(&session, 1, Some(2), b"share".to_vec()).unwrap();
        let again = store.put(&session, 1, Some(2), b"share".to_vec()).unwrap();
        assert!(!first.duplicate);
        assert_eq!(again, PutOutcome { seq: 1, duplicate: true });

        // Same payload to someone else is a different message
        let other = store.put(&session, 1, Some(3), b"share".to_vec()).unwrap();
        assert_eq!(other.seq, 2);
        assert_eq!(store.message_count(&session), 2);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = MessageStore::default();
        store.put(&sid(3), 1, None, vec![9]).unwrap();

        assert!(store.fetch(&sid(4), 2, 0).unwrap().is_empty());
        assert_eq!(store.fetch(&sid(3), 2, 0).unwrap().len(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_invalid_input_rejected() {
        let store = MessageStore::default();
        assert!(matches!(
            store.put("not-hex", 1, None, vec![]),
            Err(RelayError::InvalidFormat(_))
        ));
        assert!(matches!(
            store.put(&sid(5), 0, None, vec![]),
            Err(RelayError::InvalidFormat(_))
        ));
        assert!(matches!(
            store.fetch("abcd", 1, 0),
            Err(RelayError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let store = MessageStore::new(60);
        store.put(&sid(6), 1, None, vec![1]).unwrap();
        store.put(&sid(7), 1, None, vec![2]).unwrap();

        assert_eq!(store.cleanup(), 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(store.cleanup_at(later), 2);
        assert_eq!(store.session_count(), 0);

        // An expired message can be posted again
        let outcome = store.put(&sid(6), 1, None, vec![1]).unwrap();
        assert!(!outcome.duplicate);
    }

    #[test]
    fn test_sequence_continues_after_cleanup() {
        let store = MessageStore::new(60);
        let session = sid(9);
        store.put(&session, 1, None, vec![1]).unwrap();
        store.put(&session, 2, None, vec![2]).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(store.cleanup_at(later), 2);
        assert_eq!(store.session_count(), 0);

        // A reader whose cursor sits at 2 still sees the next message
        let outcome = store.put(&session, 1, None, vec![3]).unwrap();
        assert_eq!(outcome.seq, 3);
        let fresh = store.fetch(&session, 2, 2).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].payload, vec![3]);
    }

    #[test]
    fn test_wire_message_encoding() {
        let store = MessageStore::default();
        store.put(&sid(8), 4, Some(1), vec![0xde, 0xad]).unwrap();
        let stored = &store.fetch(&sid(8), 1, 0).unwrap()[0];

        let wire = WireMessage::from(stored);
        assert_eq!(wire.seq, 1);
        assert_eq!(wire.to, Some(1));
        assert_eq!(b64::decode(&wire.payload).unwrap(), vec![0xde, 0xad]);
    }
}
