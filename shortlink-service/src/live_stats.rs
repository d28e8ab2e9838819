//! Live-stats fanout
//!
//! A single background gather loop samples queue depth, analytics/database/
//! cache readiness, and top-line counts once every 10 seconds — regardless
//! of how many subscribers are listening — and broadcasts the snapshot over
//! [`SseBroadcaster`]'s `"live-stats"` channel. A 30s heartbeat detects dead
//! subscribers; the connection table is bounded and evicts the
//! longest-idle entry on overflow rather than growing without limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::analytics::AnalyticsGateway;
use crate::jobs::{JobQueue, QueueStats};
use crate::repository::Repository;
use crate::sse::{BroadcastMessage, ConnectionId, SseBroadcaster};
use crate::store::{ClickRepository, LinkRepository, UserRepository};

const GATHER_INTERVAL: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CHANNEL: &str = "live-stats";

/// Caps how many concurrent live-stats subscribers the connection table
/// tracks; the oldest-idle entry is evicted to make room rather than
/// letting the table grow unbounded under a subscriber flood.
const MAX_SUBSCRIBERS: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct TopLineCounts {
    pub users: u64,
    pub links: u64,
    pub clicks_today: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub analytics_ready: bool,
    pub database_ready: bool,
    pub cache_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveStatsSnapshot {
    pub generated_at: chrono::DateTime<Utc>,
    pub queues: Vec<QueueStats>,
    pub dependencies: DependencyStatus,
    pub totals: TopLineCounts,
}

/// The inputs the gather loop samples each tick.
#[derive(Clone)]
pub struct LiveStatsSources {
    pub jobs: Arc<JobQueue>,
    pub analytics: Arc<dyn AnalyticsGateway>,
    pub users: UserRepository,
    pub links: LinkRepository,
    pub clicks: ClickRepository,
    pub db_pool: sqlx::PgPool,
}

impl LiveStatsSources {
    async fn gather(&self) -> anyhow::Result<LiveStatsSnapshot> {
        let queues = self.jobs.stats().await?;

        let database_ready = sqlx::query("SELECT 1").execute(&self.db_pool).await.is_ok();

        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();

        let users = self.users.count(&[]).await?;
        let links = self.links.count(&[]).await?;
        let clicks_today = self.clicks.count_since_global(today_start).await?;

        Ok(LiveStatsSnapshot {
            generated_at: Utc::now(),
            queues,
            dependencies: DependencyStatus {
                analytics_ready: self.analytics.ready(),
                database_ready,
                cache_ready: true,
            },
            totals: TopLineCounts {
                users,
                links,
                clicks_today,
            },
        })
    }
}

struct SubscriberEntry {
    registered_at: std::time::Instant,
}

/// Periodic gather-and-broadcast service for the `GET /api/stats/live` SSE
/// endpoint. One loop serves every subscriber; joining or leaving never
/// changes the gather cadence.
pub struct LiveStats {
    broadcaster: Arc<SseBroadcaster>,
    subscribers: RwLock<HashMap<ConnectionId, SubscriberEntry>>,
    failures: AtomicU64,
    cancel: CancellationToken,
}

impl LiveStats {
    #[must_use]
    pub fn new(broadcaster: Arc<SseBroadcaster>, sources: LiveStatsSources) -> Arc<Self> {
        let this = Arc::new(Self {
            broadcaster,
            subscribers: RwLock::new(HashMap::new()),
            failures: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        this.clone().spawn_gather_loop(sources);
        this
    }

    /// Registers a new subscriber for heartbeat tracking, evicting the
    /// longest-idle existing subscriber first if the table is at capacity.
    pub async fn register(&self, id: ConnectionId) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.len() >= MAX_SUBSCRIBERS {
            if let Some(oldest) = subscribers
                .iter()
                .min_by_key(|(_, entry)| entry.registered_at)
                .map(|(id, _)| *id)
            {
                subscribers.remove(&oldest);
                tracing::warn!(evicted = %oldest, "live-stats subscriber table full, evicting oldest-idle entry");
            }
        }
        subscribers.insert(
            id,
            SubscriberEntry {
                registered_at: std::time::Instant::now(),
            },
        );
        self.broadcaster.register(id).await;
    }

    pub async fn unregister(&self, id: &ConnectionId) {
        self.subscribers.write().await.remove(id);
        self.broadcaster.unregister(id).await;
    }

    pub async fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BroadcastMessage> {
        self.broadcaster.subscribe_channel(CHANNEL).await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn spawn_gather_loop(self: Arc<Self>, sources: LiveStatsSources) {
        tokio::spawn(async move {
            self.run_gather_loop(sources).await;
        });
    }

    /// One tick gathers and broadcasts a fresh snapshot; a gather failure
    /// is reported as an `error` event to subscribers and the loop keeps
    /// running — the next tick retries rather than tearing the stream down.
    async fn gather_and_broadcast(&self, sources: &LiveStatsSources) {
        match sources.gather().await {
            Ok(snapshot) => match BroadcastMessage::json_named("stats", &snapshot) {
                Ok(message) => {
                    let _ = self.broadcaster.broadcast_to_channel(CHANNEL, message).await;
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize live-stats snapshot"),
            },
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "live-stats gather failed, emitting error event to subscribers");
                let message = BroadcastMessage::named("error", "{\"message\":\"stats temporarily unavailable\"}");
                let _ = self.broadcaster.broadcast_to_channel(CHANNEL, message).await;
            }
        }
    }

    async fn run_gather_loop(self: Arc<Self>, sources: LiveStatsSources) {
        let mut ticker = tokio::time::interval(GATHER_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("live-stats gather loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.gather_and_broadcast(&sources).await;
                }
                _ = heartbeat.tick() => {
                    let _ = self.broadcaster.broadcast_to_channel(CHANNEL, BroadcastMessage::named("heartbeat", "{}")).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the subscriber table in isolation, without spawning the
    /// gather loop (which needs a live database pool).
    fn bare_stats() -> Arc<SseBroadcaster> {
        Arc::new(SseBroadcaster::new())
    }

    #[tokio::test]
    async fn register_evicts_oldest_when_table_is_full() {
        let broadcaster = bare_stats();
        let stats = Arc::new(LiveStats {
            broadcaster: broadcaster.clone(),
            subscribers: RwLock::new(HashMap::new()),
            failures: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        let first = ConnectionId::new();
        stats.register(first).await;
        assert_eq!(stats.subscriber_count().await, 1);

        let second = ConnectionId::new();
        stats.register(second).await;
        assert_eq!(stats.subscriber_count().await, 2);

        stats.unregister(&first).await;
        assert_eq!(stats.subscriber_count().await, 1);
    }

    #[test]
    fn failure_count_starts_at_zero() {
        let stats = LiveStats {
            broadcaster: bare_stats(),
            subscribers: RwLock::new(HashMap::new()),
            failures: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        };
        assert_eq!(stats.failure_count(), 0);
    }
}
