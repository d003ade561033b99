//! Topic Router
//!
//! Fans a delivered tick or snapshot out to every session subscribed to
//! its topic. Delivery is best-effort, at-most-once: a session the
//! registry reports gone is dropped from the topic on the spot and never
//! retried. Subscription changes feed upstream interest through a channel
//! so the backend only carries topics somebody is watching.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::application::ports::{SessionPayload, SessionRegistry};
use crate::domain::market_data::{MarketDataTick, Topic, TopicSnapshot};
use crate::domain::subscription::{SessionId, SubscriptionStats, SubscriptionTable, TopicChange};
use crate::infrastructure::metrics;

// =============================================================================
// Upstream interest
// =============================================================================

/// Change in aggregate topic interest, forwarded to the backend feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamChange {
    /// First session subscribed; the backend feed should carry the topic.
    Subscribe(Topic),
    /// Last session left; the backend feed can drop the topic.
    Unsubscribe(Topic),
}

// =============================================================================
// Router
// =============================================================================

/// Routes market data to subscribed sessions and tracks topic interest.
pub struct TopicRouter {
    table: SubscriptionTable,
    sessions: Arc<dyn SessionRegistry>,
    upstream: mpsc::UnboundedSender<UpstreamChange>,
}

impl TopicRouter {
    /// Create a router over the given session registry.
    ///
    /// Returns the router and the receiver carrying upstream interest
    /// changes for the backend feed loop.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<UpstreamChange>) {
        let (upstream, upstream_rx) = mpsc::unbounded_channel();
        (
            Self {
                table: SubscriptionTable::new(),
                sessions,
                upstream,
            },
            upstream_rx,
        )
    }

    /// Subscribe a session to a topic.
    ///
    /// Idempotent per (session, topic). Emits an upstream subscribe when
    /// the topic gains its first subscriber.
    pub fn subscribe(&self, session: SessionId, topic: Topic) {
        let change = self.table.subscribe(session, &topic);
        if change == TopicChange::FirstSubscriber {
            tracing::info!(%topic, "First subscriber; requesting topic upstream");
            let _ = self.upstream.send(UpstreamChange::Subscribe(topic));
        }
        self.publish_stats();
    }

    /// Unsubscribe a session from a topic.
    ///
    /// Emits an upstream unsubscribe when the last subscriber leaves.
    pub fn unsubscribe(&self, session: SessionId, topic: &Topic) {
        let change = self.table.unsubscribe(session, topic);
        if change == TopicChange::LastUnsubscribed {
            tracing::info!(%topic, "Last subscriber gone; dropping topic upstream");
            let _ = self.upstream.send(UpstreamChange::Unsubscribe(topic.clone()));
        }
        self.publish_stats();
    }

    /// Remove every subscription a departed session held.
    pub fn drop_session(&self, session: SessionId) {
        for topic in self.table.drop_session(session) {
            tracing::info!(%topic, session, "Last subscriber gone; dropping topic upstream");
            let _ = self.upstream.send(UpstreamChange::Unsubscribe(topic));
        }
        self.publish_stats();
    }

    /// Fan a tick out to every subscriber of its topic.
    ///
    /// Returns the number of sessions actually delivered to.
    pub async fn publish_tick(&self, tick: &MarketDataTick) -> usize {
        self.fan_out(&tick.topic, || SessionPayload::Tick(tick.clone()))
            .await
    }

    /// Fan a snapshot out to every subscriber of its topic.
    pub async fn publish_snapshot(&self, snapshot: &TopicSnapshot) -> usize {
        self.fan_out(&snapshot.topic, || SessionPayload::Snapshot(snapshot.clone()))
            .await
    }

    /// Every topic with at least one subscriber, for upstream
    /// resubscription after a feed reconnect.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.table.active_topics()
    }

    /// Whether any session currently subscribes to the topic.
    #[must_use]
    pub fn has_subscribers(&self, topic: &Topic) -> bool {
        !self.table.subscribers(topic).is_empty()
    }

    /// Current subscription totals.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.table.stats()
    }

    async fn fan_out(&self, topic: &Topic, payload: impl Fn() -> SessionPayload) -> usize {
        let subscribers = self.table.subscribers(topic);
        let mut delivered = 0;

        for session in subscribers {
            // A session removed while earlier pushes were in flight must
            // not receive this tick.
            if !self.table.is_subscribed(session, topic) {
                continue;
            }
            match self.sessions.push(session, payload()).await {
                Ok(()) => delivered += 1,
                Err(gone) => {
                    tracing::warn!(session = gone.0, %topic, "Dropping gone session from topic");
                    metrics::incr_sessions_dropped();
                    self.unsubscribe(gone.0, topic);
                    self.sessions.subscriber_dropped(gone.0, topic).await;
                }
            }
        }

        metrics::incr_ticks_fanned_out(delivered);
        delivered
    }

    fn publish_stats(&self) {
        let stats = self.table.stats();
        metrics::set_subscription_stats(stats.topic_count, stats.session_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockSessionRegistry, SessionGone};
    use crate::domain::market_data::TickFields;

    fn topic(symbol: &str) -> Topic {
        Topic {
            symbol: symbol.to_string(),
            exchange: "SIM".to_string(),
        }
    }

    fn tick(symbol: &str, sequence: u64) -> MarketDataTick {
        MarketDataTick::new(topic(symbol), sequence, TickFields::default())
    }

    #[tokio::test]
    async fn subscribe_registers_the_session() {
        let registry = Arc::new(MockSessionRegistry::new());
        let (router, _upstream_rx) = TopicRouter::new(registry);

        router.subscribe(1, topic("AAPL"));

        assert!(router.has_subscribers(&topic("AAPL")));
        assert_eq!(router.stats().session_count, 1);
    }

    #[tokio::test]
    async fn first_and_last_subscriber_drive_upstream_interest() {
        let registry = Arc::new(MockSessionRegistry::new());
        let (router, mut upstream_rx) = TopicRouter::new(registry);

        router.subscribe(1, topic("AAPL"));
        router.subscribe(2, topic("AAPL"));
        router.unsubscribe(1, &topic("AAPL"));
        router.unsubscribe(2, &topic("AAPL"));

        assert_eq!(
            upstream_rx.recv().await,
            Some(UpstreamChange::Subscribe(topic("AAPL")))
        );
        assert_eq!(
            upstream_rx.recv().await,
            Some(UpstreamChange::Unsubscribe(topic("AAPL")))
        );
        assert!(upstream_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_reaches_only_subscribers() {
        let mut registry = MockSessionRegistry::new();
        registry
            .expect_push()
            .withf(|session, payload| {
                *session == 1 && matches!(payload, SessionPayload::Tick(_))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let (router, _upstream_rx) = TopicRouter::new(Arc::new(registry));
        router.subscribe(1, topic("AAPL"));
        router.subscribe(2, topic("MSFT"));

        let delivered = router.publish_tick(&tick("AAPL", 1)).await;
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn gone_session_is_dropped_and_never_retried() {
        let mut registry = MockSessionRegistry::new();
        registry
            .expect_push()
            .times(1)
            .returning(|session, _| Err(SessionGone(session)));
        registry
            .expect_subscriber_dropped()
            .times(1)
            .returning(|_, _| ());

        let (router, _upstream_rx) = TopicRouter::new(Arc::new(registry));
        router.subscribe(7, topic("AAPL"));

        assert_eq!(router.publish_tick(&tick("AAPL", 1)).await, 0);
        assert!(!router.has_subscribers(&topic("AAPL")));

        // Second publish finds no subscribers, so push is not called again.
        assert_eq!(router.publish_tick(&tick("AAPL", 2)).await, 0);
    }

    /// Registry whose pushes stall on a gate until the test releases them,
    /// recording which session is in flight and which were delivered.
    struct GatedRegistry {
        in_flight: tokio::sync::watch::Sender<Option<SessionId>>,
        gate: tokio::sync::Semaphore,
        delivered: parking_lot::Mutex<Vec<SessionId>>,
    }

    impl GatedRegistry {
        fn new() -> Self {
            Self {
                in_flight: tokio::sync::watch::Sender::new(None),
                gate: tokio::sync::Semaphore::new(0),
                delivered: parking_lot::Mutex::new(Vec::new()),
            }
        }

        async fn blocked_session(&self) -> SessionId {
            let mut rx = self.in_flight.subscribe();
            loop {
                if let Some(session) = *rx.borrow_and_update() {
                    return session;
                }
                rx.changed().await.unwrap();
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionRegistry for GatedRegistry {
        async fn push(
            &self,
            session: SessionId,
            _payload: SessionPayload,
        ) -> Result<(), SessionGone> {
            self.in_flight.send_replace(Some(session));
            self.gate.acquire().await.unwrap().forget();
            self.delivered.lock().push(session);
            Ok(())
        }

        fn list_subscribers(&self, _topic: &Topic) -> Vec<SessionId> {
            Vec::new()
        }

        async fn subscriber_dropped(&self, _session: SessionId, _topic: &Topic) {}
    }

    #[tokio::test]
    async fn session_removed_mid_fan_out_receives_nothing() {
        let registry = Arc::new(GatedRegistry::new());
        let (router, _upstream_rx) =
            TopicRouter::new(Arc::clone(&registry) as Arc<dyn SessionRegistry>);
        let router = Arc::new(router);

        router.subscribe(1, topic("AAPL"));
        router.subscribe(2, topic("AAPL"));

        let publisher = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.publish_tick(&tick("AAPL", 1)).await }
        });

        // While the first push is stalled, remove the other session, then
        // let the fan-out proceed.
        let first = registry.blocked_session().await;
        let other = if first == 1 { 2 } else { 1 };
        router.unsubscribe(other, &topic("AAPL"));
        registry.gate.add_permits(2);

        let delivered = publisher.await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(*registry.delivered.lock(), vec![first]);
    }

    #[tokio::test]
    async fn drop_session_releases_all_topics() {
        let registry = Arc::new(MockSessionRegistry::new());
        let (router, mut upstream_rx) = TopicRouter::new(registry);

        router.subscribe(3, topic("AAPL"));
        router.subscribe(3, topic("MSFT"));
        router.drop_session(3);

        let mut unsubscribed = Vec::new();
        while let Ok(change) = upstream_rx.try_recv() {
            if let UpstreamChange::Unsubscribe(released) = change {
                unsubscribed.push(released);
            }
        }
        unsubscribed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assert_eq!(unsubscribed, vec![topic("AAPL"), topic("MSFT")]);
        assert_eq!(router.stats().session_count, 0);
    }
}
