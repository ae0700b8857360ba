//! Message Relay Client
//!
//! HTTP implementation of the core [`Relay`] trait. Posting is a single
//! request; receiving polls the service for messages after the last sequence
//! number seen and hands them out one at a time.

use dashmap::DashMap;
use msg_relay::{b64, MessagesResponse, PostMessageRequest, PutOutcome};
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use tfrost_core::mpc::{async_trait, Envelope, Relay};
use tfrost_core::{Error, ParticipantId, Result, SessionId};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Per (session, recipient) read state
#[derive(Default)]
struct Mailbox {
    /// Highest sequence number fetched
    cursor: u64,
    /// Fetched but not yet handed out
    pending: VecDeque<Envelope>,
}

/// HTTP-based relay client
pub struct RelayClient {
    /// HTTP client
    client: Client,
    /// Relay service URL
    url: String,
    /// Request timeout
    timeout: Duration,
    /// Delay between empty polls
    poll_interval: Duration,
    mailboxes: DashMap<(SessionId, ParticipantId), Mailbox>,
}

impl RelayClient {
    /// Create a new relay client
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            mailboxes: DashMap::new(),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between polls that return nothing
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn messages_url(&self, session_id: &SessionId) -> String {
        format!("{}/v1/sessions/{}/messages", self.url, hex::encode(session_id))
    }

    /// Post a message to the relay
    #[instrument(skip(self, session_id, payload), fields(session_id = %hex::encode(session_id)))]
    async fn post_message(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        to: Option<ParticipantId>,
        payload: &[u8],
    ) -> Result<()> {
        let req = PostMessageRequest {
            from,
            to,
            payload: b64::encode(payload),
        };

        let response = self
            .client
            .post(self.messages_url(session_id))
            .json(&req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Relay(format!(
                "POST failed with status: {}",
                response.status()
            )));
        }

        let outcome: PutOutcome = response
            .json()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;
        debug!(seq = outcome.seq, duplicate = outcome.duplicate, "Message posted");
        Ok(())
    }

    /// Fetch everything for `me` after `after`
    async fn fetch(
        &self,
        session_id: &SessionId,
        me: ParticipantId,
        after: u64,
    ) -> Result<MessagesResponse> {
        let response = self
            .client
            .get(self.messages_url(session_id))
            .query(&[("recipient", me as u64), ("after", after)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Relay(format!(
                "GET failed with status: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Relay(e.to_string()))
    }

    fn pop(&self, key: &(SessionId, ParticipantId)) -> Option<Envelope> {
        self.mailboxes
            .get_mut(key)
            .and_then(|mut mailbox| mailbox.pending.pop_front())
    }

    fn cursor(&self, key: &(SessionId, ParticipantId)) -> u64 {
        self.mailboxes.get(key).map(|m| m.cursor).unwrap_or(0)
    }

    /// Queue fetched messages, returning how many were new
    fn enqueue(&self, key: (SessionId, ParticipantId), response: MessagesResponse) -> usize {
        let mut mailbox = self.mailboxes.entry(key).or_default();
        let mut queued = 0;
        for message in response.messages {
            if message.seq <= mailbox.cursor {
                continue;
            }
            mailbox.cursor = message.seq;
            match b64::decode(&message.payload) {
                Ok(payload) => {
                    mailbox.pending.push_back(Envelope {
                        from: message.from,
                        payload,
                    });
                    queued += 1;
                }
                Err(e) => warn!(seq = message.seq, error = %e, "Dropping undecodable payload"),
            }
        }
        queued
    }
}

#[async_trait]
impl Relay for RelayClient {
    async fn broadcast(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.post_message(session_id, from, None, &payload).await
    }

    async fn send(
        &self,
        session_id: &SessionId,
        from: ParticipantId,
        to: ParticipantId,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.post_message(session_id, from, Some(to), &payload).await
    }

    async fn receive(
        &self,
        session_id: &SessionId,
        me: ParticipantId,
        timeout: Duration,
    ) -> Result<Option<Envelope>> {
        let key = (*session_id, me);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(envelope) = self.pop(&key) {
                return Ok(Some(envelope));
            }

            let response = self.fetch(session_id, me, self.cursor(&key)).await?;
            if self.enqueue(key, response) > 0 {
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_relay::WireMessage;

    #[test]
    fn test_urls() {
        let client = RelayClient::new("http://relay.local:8080/");
        assert_eq!(client.url(), "http://relay.local:8080");
        assert_eq!(
            client.messages_url(&[0u8; 32]),
            format!("http://relay.local:8080/v1/sessions/{}/messages", "00".repeat(32))
        );
    }

    #[test]
    fn test_enqueue_advances_cursor() {
        let client = RelayClient::new("http://localhost");
        let key = ([1u8; 32], 2);
        let wire = |seq, payload: &[u8]| WireMessage {
            seq,
            from: 1,
            to: None,
            payload: b64::encode(payload),
        };

        let response = MessagesResponse {
            messages: vec![wire(1, b"a"), wire(2, b"b")],
        };
        assert_eq!(client.enqueue(key, response), 2);
        assert_eq!(client.cursor(&key), 2);

        // A repeated poll result is ignored
        let response = MessagesResponse {
            messages: vec![wire(2, b"b")],
        };
        assert_eq!(client.enqueue(key, response), 0);

        assert_eq!(client.pop(&key).unwrap().payload, b"a");
        assert_eq!(client.pop(&key).unwrap().payload, b"b");
        assert!(client.pop(&key).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_an_error() {
        let client = RelayClient::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2));
        let result = client.broadcast(&[0u8; 32], 1, b"x".to_vec()).await;
        assert!(matches!(result, Err(Error::Relay(_))));
    }
}
