//! Subscription Tracking
//!
//! Domain types for tracking which client sessions are subscribed to which
//! market-data topics.
//!
//! # Design
//!
//! The subscription table tracks:
//! - Which sessions are subscribed to each topic
//! - A reverse index from session to its topics
//!
//! A topic entry exists only while it has subscribers: the first subscriber
//! creates it (and requires an upstream subscribe on the market-data
//! channel), the last unsubscribe destroys it (and requires an upstream
//! unsubscribe). No history is retained for an empty topic.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::market_data::Topic;

/// Unique identifier for a client session.
pub type SessionId = u64;

// =============================================================================
// Upstream changes
// =============================================================================

/// Upstream effect of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicChange {
    /// No upstream change needed.
    None,
    /// First subscriber arrived; subscribe the topic upstream.
    FirstSubscriber,
    /// Last subscriber left; unsubscribe the topic upstream.
    LastUnsubscribed,
}

// =============================================================================
// Subscription table
// =============================================================================

#[derive(Debug, Default)]
struct TableState {
    topic_sessions: HashMap<Topic, HashSet<SessionId>>,
    session_topics: HashMap<SessionId, HashSet<Topic>>,
}

impl TableState {
    fn subscribe(&mut self, session: SessionId, topic: &Topic) -> TopicChange {
        let sessions = self.topic_sessions.entry(topic.clone()).or_default();
        if !sessions.insert(session) {
            return TopicChange::None;
        }
        self.session_topics
            .entry(session)
            .or_default()
            .insert(topic.clone());

        if sessions.len() == 1 {
            TopicChange::FirstSubscriber
        } else {
            TopicChange::None
        }
    }

    fn unsubscribe(&mut self, session: SessionId, topic: &Topic) -> TopicChange {
        let Some(sessions) = self.topic_sessions.get_mut(topic) else {
            return TopicChange::None;
        };
        if !sessions.remove(&session) {
            return TopicChange::None;
        }

        if let Some(topics) = self.session_topics.get_mut(&session) {
            topics.remove(topic);
            if topics.is_empty() {
                self.session_topics.remove(&session);
            }
        }

        if sessions.is_empty() {
            self.topic_sessions.remove(topic);
            TopicChange::LastUnsubscribed
        } else {
            TopicChange::None
        }
    }

    fn drop_session(&mut self, session: SessionId) -> Vec<Topic> {
        let Some(topics) = self.session_topics.remove(&session) else {
            return Vec::new();
        };

        let mut emptied = Vec::new();
        for topic in topics {
            if let Some(sessions) = self.topic_sessions.get_mut(&topic) {
                sessions.remove(&session);
                if sessions.is_empty() {
                    self.topic_sessions.remove(&topic);
                    emptied.push(topic);
                }
            }
        }
        emptied
    }
}

/// Thread-safe topic → session-set table.
///
/// Mutated only by the topic router; other components read snapshots.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    state: RwLock<TableState>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a topic.
    ///
    /// Returns the upstream change the caller must apply.
    pub fn subscribe(&self, session: SessionId, topic: &Topic) -> TopicChange {
        self.state.write().subscribe(session, topic)
    }

    /// Unsubscribe a session from a topic.
    ///
    /// Returns the upstream change the caller must apply.
    pub fn unsubscribe(&self, session: SessionId, topic: &Topic) -> TopicChange {
        self.state.write().unsubscribe(session, topic)
    }

    /// Remove every subscription a session holds.
    ///
    /// Returns the topics whose subscriber set became empty (each needs an
    /// upstream unsubscribe).
    pub fn drop_session(&self, session: SessionId) -> Vec<Topic> {
        self.state.write().drop_session(session)
    }

    /// Current subscribers of a topic.
    #[must_use]
    pub fn subscribers(&self, topic: &Topic) -> Vec<SessionId> {
        self.state
            .read()
            .topic_sessions
            .get(topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a session is currently subscribed to a topic.
    #[must_use]
    pub fn is_subscribed(&self, session: SessionId, topic: &Topic) -> bool {
        self.state
            .read()
            .topic_sessions
            .get(topic)
            .is_some_and(|s| s.contains(&session))
    }

    /// All topics with at least one subscriber.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.state.read().topic_sessions.keys().cloned().collect()
    }

    /// Counts of active topics and sessions.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            topic_count: state.topic_sessions.len(),
            session_count: state.session_topics.len(),
        }
    }
}

/// Snapshot of table occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of topics with at least one subscriber.
    pub topic_count: usize,
    /// Number of sessions with at least one subscription.
    pub session_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aapl() -> Topic {
        Topic::new("AAPL", "XNAS")
    }

    fn msft() -> Topic {
        Topic::new("MSFT", "XNAS")
    }

    #[test]
    fn first_subscriber_creates_topic() {
        let table = SubscriptionTable::new();
        assert_eq!(table.subscribe(1, &aapl()), TopicChange::FirstSubscriber);
        assert_eq!(table.subscribers(&aapl()), vec![1]);
    }

    #[test]
    fn second_subscriber_no_upstream_change() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        assert_eq!(table.subscribe(2, &aapl()), TopicChange::None);
        assert_eq!(table.subscribers(&aapl()).len(), 2);
    }

    #[test]
    fn duplicate_subscribe_is_noop() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        assert_eq!(table.subscribe(1, &aapl()), TopicChange::None);
        assert_eq!(table.subscribers(&aapl()).len(), 1);
    }

    #[test]
    fn last_unsubscribe_destroys_topic() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        let _ = table.subscribe(2, &aapl());

        assert_eq!(table.unsubscribe(1, &aapl()), TopicChange::None);
        assert_eq!(table.unsubscribe(2, &aapl()), TopicChange::LastUnsubscribed);
        assert!(table.active_topics().is_empty());
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let table = SubscriptionTable::new();
        assert_eq!(table.unsubscribe(1, &aapl()), TopicChange::None);

        let _ = table.subscribe(1, &aapl());
        assert_eq!(table.unsubscribe(2, &aapl()), TopicChange::None);
        assert_eq!(table.subscribers(&aapl()), vec![1]);
    }

    #[test]
    fn drop_session_reports_emptied_topics() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        let _ = table.subscribe(1, &msft());
        let _ = table.subscribe(2, &msft());

        let emptied = table.drop_session(1);
        // AAPL had only session 1; MSFT still has session 2.
        assert_eq!(emptied, vec![aapl()]);
        assert_eq!(table.subscribers(&msft()), vec![2]);
    }

    #[test]
    fn drop_unknown_session_is_noop() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        assert!(table.drop_session(99).is_empty());
        assert_eq!(table.subscribers(&aapl()), vec![1]);
    }

    #[test]
    fn is_subscribed_tracks_membership() {
        let table = SubscriptionTable::new();
        assert!(!table.is_subscribed(1, &aapl()));
        let _ = table.subscribe(1, &aapl());
        assert!(table.is_subscribed(1, &aapl()));
        let _ = table.unsubscribe(1, &aapl());
        assert!(!table.is_subscribed(1, &aapl()));
    }

    #[test]
    fn stats_are_accurate() {
        let table = SubscriptionTable::new();
        let _ = table.subscribe(1, &aapl());
        let _ = table.subscribe(1, &msft());
        let _ = table.subscribe(2, &aapl());

        let stats = table.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.session_count, 2);
    }

    #[test]
    fn concurrent_subscribe_and_drop() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(SubscriptionTable::new());

        let mut handles = vec![];
        for i in 0..10u64 {
            let t = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let _ = t.subscribe(i, &Topic::new("AAPL", "XNAS"));
                let _ = t.subscribe(i, &Topic::new(format!("SYM{i}"), "XNAS"));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.stats().session_count, 10);
        assert_eq!(table.subscribers(&Topic::new("AAPL", "XNAS")).len(), 10);

        let mut handles = vec![];
        for i in 0..10u64 {
            let t = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let _ = t.drop_session(i);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.stats(), SubscriptionStats::default());
    }
}
