//! In-memory relay implementation for testing and single-process runs

use super::{async_trait, Envelope, Relay};
use crate::{ParticipantId, Result, SessionId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Posted {
    from: ParticipantId,
    /// `None` for broadcasts
    to: Option<ParticipantId>,
    payload: Vec<u8>,
}

impl Posted {
    fn is_for(&self, me: ParticipantId) -> bool {
        match self.to {
            Some(to) => to == me,
            None => self.from != me,
        }
    }
}

/// In-memory message relay
///
/// Cloning shares the underlying logs, so one relay can be handed to every
/// participant of a local run.
#[derive(Clone)]
pub struct MemoryRelay {
    /// Per-session append-only log
    logs: Arc<DashMap<SessionId, Vec<Posted>>>,
    /// Read position of each participant in each session log
    cursors: Arc<DashMap<(SessionId, ParticipantId), usize>>,
    /// Notification channel
    notify: broadcast::Sender<()>,
}

impl MemoryRelay {
    /// Create a new in-memory relay
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(100);
        Self {
            logs: Arc::new(DashMap::new()),
            cursors: Arc::new(DashMap::new()),
            notify,
        }
    }

    /// Number of payloads posted to a session so far
    pub fn posted(&self, session_id: &SessionId) -> usize {
        self.logs.get(session_id).map(|log| log.len()).unwrap_or(0)
    }

    fn post(&self, session_id: &SessionId, posted: Posted) {
        self.logs.entry(*session_id).or_default().push(posted);
        let _ = self.notify.send(());
    }

    /// Advance `me`'s cursor to the next payload addressed to it
    fn next_for(&self, session_id: &SessionId, me: ParticipantId) -> Option<Envelope> {
        let log = self.logs.get(session_id)?;
        let mut cursor = self.cursors.entry((*session_id, me)).or_insert(0);

        while *cursor < log.len() {
            let posted = &log[*cursor];
            *cursor += 1;
            if posted.is_for(me) {
                return Some(Envelope {
                    from: posted.from,
                    payload: posted.payload.clone(),
                });
            }
        }
        None
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn broadcast(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.post(
            session_id,
            Posted {
                from,
                to: None,
                payload,
            },
        );
        Ok(())
    }

    async fn send(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        to: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.post(
            session_id,
            Posted {
                from,
                to: Some(to),
                payload,
            },
        );
        Ok(())
    }

    async fn receive(
        &self,
        session_id: &SessionId,
        me: ParticipantId,
        timeout: Duration,
    ) -> Result<Option<Envelope>> {
        let deadline = Instant::now() + timeout;
        let mut rx = self.notify.subscribe();

        loop {
            if let Some(envelope) = self.next_for(session_id, me) {
                return Ok(Some(envelope));
            }

            // Wait for notification with timeout; a lagged receiver just rescans
            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(self.next_for(session_id, me));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let relay = MemoryRelay::new();
        let session_id = [0u8; 32];

        relay.broadcast(&session_id, 1, b"a".to_vec()).await.unwrap();
        relay.broadcast(&session_id, 2, b"b".to_vec()).await.unwrap();

        let timeout = Duration::from_millis(50);
        let first = relay.receive(&session_id, 1, timeout).await.unwrap().unwrap();
        assert_eq!(first.from, 2);
        assert_eq!(first.payload, b"b");
        assert!(relay.receive(&session_id, 1, timeout).await.unwrap().is_none());

        let first = relay.receive(&session_id, 3, timeout).await.unwrap().unwrap();
        let second = relay.receive(&session_id, 3, timeout).await.unwrap().unwrap();
        assert_eq!((first.from, second.from), (1, 2));
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let relay = MemoryRelay::new();
        let session_id = [0u8; 32];

        relay.send(&session_id, 1, 3, b"secret".to_vec()).await.unwrap();

        let timeout = Duration::from_millis(50);
        assert!(relay.receive(&session_id, 2, timeout).await.unwrap().is_none());
        let envelope = relay.receive(&session_id, 3, timeout).await.unwrap().unwrap();
        assert_eq!(envelope.from, 1);
        assert_eq!(envelope.payload, b"secret");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let relay = MemoryRelay::new();

        relay.broadcast(&[1u8; 32], 1, b"x".to_vec()).await.unwrap();
        let timeout = Duration::from_millis(20);
        assert!(relay.receive(&[2u8; 32], 2, timeout).await.unwrap().is_none());
        assert!(relay.receive(&[1u8; 32], 2, timeout).await.unwrap().is_some());
        assert_eq!(relay.posted(&[1u8; 32]), 1);
        assert_eq!(relay.posted(&[2u8; 32]), 0);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_post() {
        let relay = MemoryRelay::new();
        let session_id = [7u8; 32];

        let sender = relay.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.broadcast(&session_id, 2, b"late".to_vec()).await.unwrap();
        });

        let envelope = relay
            .receive(&session_id, 1, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.payload, b"late");
        handle.await.unwrap();
    }
}
