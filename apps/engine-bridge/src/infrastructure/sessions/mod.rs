//! Channel-backed session registry.
//!
//! Each registered session owns a bounded payload queue; the bridge side
//! holds the sender. A push never waits: a full queue is treated the same
//! as a vanished session, and the caller drops the subscriber rather than
//! letting one slow consumer stall the fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::application::ports::{SessionGone, SessionPayload, SessionRegistry};
use crate::domain::market_data::Topic;
use crate::domain::subscription::SessionId;

/// Registry of live sessions keyed by id.
pub struct ChannelSessionRegistry {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<SessionPayload>>>,
    /// The session layer's own view of who is subscribed to what; kept
    /// consistent with the router through `subscriber_dropped`.
    topics: RwLock<HashMap<SessionId, HashSet<Topic>>>,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl ChannelSessionRegistry {
    /// Create a registry whose per-session queues hold `queue_capacity`
    /// payloads.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            queue_capacity,
            next_id: AtomicU64::new(1),
        })
    }

    /// Record that a session subscribed to a topic.
    pub fn record_subscription(&self, session: SessionId, topic: Topic) {
        self.topics.write().entry(session).or_default().insert(topic);
    }

    /// Record that a session unsubscribed from a topic.
    pub fn record_unsubscription(&self, session: SessionId, topic: &Topic) {
        let mut topics = self.topics.write();
        if let Some(set) = topics.get_mut(&session) {
            set.remove(topic);
            if set.is_empty() {
                topics.remove(&session);
            }
        }
    }

    /// Register a new session and hand back its payload stream.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<SessionPayload>) {
        let session = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.sessions.write().insert(session, tx);
        tracing::info!(session, "Session registered");
        (session, rx)
    }

    /// Remove a session. Subsequent pushes to it report [`SessionGone`].
    pub fn unregister(&self, session: SessionId) {
        if self.sessions.write().remove(&session).is_some() {
            self.topics.write().remove(&session);
            tracing::info!(session, "Session unregistered");
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether any session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionRegistry for ChannelSessionRegistry {
    async fn push(&self, session: SessionId, payload: SessionPayload) -> Result<(), SessionGone> {
        let sender = self
            .sessions
            .read()
            .get(&session)
            .cloned()
            .ok_or(SessionGone(session))?;

        // A full queue means the consumer is not keeping up. The contract
        // is at-most-once with no retry, so report the session gone and
        // let the caller unsubscribe it.
        sender.try_send(payload).map_err(|_| SessionGone(session))
    }

    fn list_subscribers(&self, topic: &Topic) -> Vec<SessionId> {
        self.topics
            .read()
            .iter()
            .filter(|(_, topics)| topics.contains(topic))
            .map(|(session, _)| *session)
            .collect()
    }

    async fn subscriber_dropped(&self, session: SessionId, topic: &Topic) {
        tracing::warn!(session, %topic, "Subscriber dropped after failed push");
        self.record_unsubscription(session, topic);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::AnomalyNotice;

    fn payload(n: u64) -> SessionPayload {
        SessionPayload::Anomaly(AnomalyNotice {
            order_id: format!("ord-{n}"),
            message: "test".to_string(),
        })
    }

    #[tokio::test]
    async fn push_delivers_to_the_registered_session() {
        let registry = ChannelSessionRegistry::new(4);
        let (session, mut rx) = registry.register();

        registry.push(session, payload(1)).await.unwrap();
        assert_eq!(rx.recv().await, Some(payload(1)));
    }

    #[tokio::test]
    async fn unknown_session_is_gone() {
        let registry = ChannelSessionRegistry::new(4);
        let err = registry.push(99, payload(1)).await.unwrap_err();
        assert_eq!(err.0, 99);
    }

    #[tokio::test]
    async fn unregistered_session_is_gone() {
        let registry = ChannelSessionRegistry::new(4);
        let (session, _rx) = registry.register();
        registry.unregister(session);

        assert!(registry.push(session, payload(1)).await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn full_queue_counts_as_gone() {
        let registry = ChannelSessionRegistry::new(1);
        let (session, _rx) = registry.register();

        registry.push(session, payload(1)).await.unwrap();
        let err = registry.push(session, payload(2)).await.unwrap_err();
        assert_eq!(err.0, session);
    }

    #[tokio::test]
    async fn dropped_subscriber_leaves_the_topic_view() {
        let registry = ChannelSessionRegistry::new(4);
        let (session, _rx) = registry.register();
        let topic = Topic::new("AAPL", "XNAS");

        registry.record_subscription(session, topic.clone());
        assert_eq!(registry.list_subscribers(&topic), vec![session]);

        registry.subscriber_dropped(session, &topic).await;
        assert!(registry.list_subscribers(&topic).is_empty());
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids() {
        let registry = ChannelSessionRegistry::new(4);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
