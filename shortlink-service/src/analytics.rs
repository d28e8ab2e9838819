//! Analytics index gateway
//!
//! Append-only ingestion of [`Click`](crate::domain::Click) documents into
//! ClickHouse, plus the aggregation queries the dashboards and live-stats
//! fanout read back. When the `clickhouse` feature is off, or the backend is
//! unreachable, the gateway degrades to mock mode: writes accept, reads
//! return empty aggregates, and [`AnalyticsGateway::ready`] reports `false`
//! so callers can surface `DEPENDENCY_DEGRADED` rather than silently serving
//! stale numbers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::{Click, LinkId, UserId};

/// One indexed click document. Field set matches the document schema the
/// dashboards query against: every facet the resolver knows about at
/// click time, denormalized so aggregation never joins back to the
/// primary store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "clickhouse", derive(clickhouse::Row))]
pub struct ClickDocument {
    pub link_id: LinkId,
    pub user_id: UserId,
    pub short_code: String,
    pub original_url: String,
    pub campaign: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

impl ClickDocument {
    /// Builds a document from a recorded [`Click`] plus the denormalized
    /// fields the resolver has in hand but the `clicks` table does not
    /// store (owner, short code, campaign).
    #[must_use]
    pub fn from_click(click: &Click, user_id: UserId, short_code: &str, original_url: &str, campaign: Option<String>) -> Self {
        Self {
            link_id: click.link_id,
            user_id,
            short_code: short_code.to_string(),
            original_url: original_url.to_string(),
            campaign,
            timestamp: click.timestamp,
            ip_address: click.ip_address.clone(),
            country: click.country.clone(),
            city: click.city.clone(),
            device_type: click.device_type.clone(),
            browser: click.browser.clone(),
            os: click.os.clone(),
            referrer: click.referrer.clone(),
            user_agent: click.user_agent.clone(),
        }
    }
}

/// One day's bucketed click count, as returned by [`ClickStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyClicks {
    pub date: String,
    pub clicks: u64,
}

/// Aggregate statistics for a single Link. Facets with no data come back
/// as an empty vec rather than an "Unknown" sentinel entry — callers that
/// display a breakdown should treat an empty vec as "Unknown: 100%".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickStats {
    pub total_clicks: u64,
    pub unique_clicks: u64,
    pub daily_clicks: Vec<DailyClicks>,
    pub top_countries: Vec<(String, u64)>,
    pub top_devices: Vec<(String, u64)>,
    pub top_browsers: Vec<(String, u64)>,
}

/// Filters for [`AnalyticsGateway::search_clicks`].
#[derive(Debug, Clone, Default)]
pub struct ClickSearchFilters {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub campaign: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub text: Option<String>,
}

/// Outcome of a batch write: how many documents were accepted. The caller
/// (the click-tracking queue worker) re-enqueues whatever didn't make it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResult {
    pub accepted: usize,
    pub failed: usize,
}

/// Operations the resolver, dashboards, and live-stats fanout need from the
/// analytics index, independent of whether a real ClickHouse cluster is
/// behind it.
#[async_trait::async_trait]
pub trait AnalyticsGateway: Send + Sync {
    async fn track_click(&self, doc: ClickDocument) -> BatchResult;
    async fn track_clicks_batch(&self, docs: Vec<ClickDocument>) -> BatchResult;
    async fn get_click_stats(&self, link_id: LinkId, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> ClickStats;
    async fn get_user_analytics(&self, user_id: UserId, window: chrono::Duration) -> ClickStats;
    async fn get_real_time_clicks(&self, user_id: UserId, n_minutes: i64) -> u64;
    async fn search_clicks(&self, user_id: UserId, filters: ClickSearchFilters, page: u32, size: u32) -> Vec<ClickDocument>;

    /// `true` iff the backend answered a health probe within the last
    /// reconnect cycle. The resolver and dashboards consult this to decide
    /// whether to degrade rather than attempting a doomed write.
    fn ready(&self) -> bool;
}

/// ClickHouse-backed gateway, built when the `clickhouse` feature is
/// enabled. Falls back to mock-mode behavior (accept every write, empty
/// every read) whenever `ready` is false, which a background reconnect
/// loop flips back to `true` once the backend answers a ping again.
#[cfg(feature = "clickhouse")]
pub struct ClickHouseAnalytics {
    client: clickhouse::Client,
    ready: Arc<std::sync::atomic::AtomicBool>,
    _reconnect: Arc<CancellationToken>,
}

#[cfg(feature = "clickhouse")]
impl ClickHouseAnalytics {
    /// Connects eagerly and spawns the background reconnect loop. The
    /// constructor never fails on a down backend: `ready()` simply starts
    /// `false` and the reconnect loop flips it once a probe succeeds,
    /// matching the spec's "mock mode on connection failure" contract.
    #[must_use]
    pub fn new(url: &str, database: &str) -> Self {
        let client = clickhouse::Client::default().with_url(url).with_database(database);
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cancel = Arc::new(CancellationToken::new());

        let probe_client = client.clone();
        let probe_ready = ready.clone();
        let probe_cancel = cancel.clone();
        tokio::spawn(async move {
            reconnect_loop(probe_client, probe_ready, probe_cancel).await;
        });

        Self {
            client,
            ready,
            _reconnect: cancel,
        }
    }
}

#[cfg(feature = "clickhouse")]
#[derive(clickhouse::Row, Deserialize)]
struct StatsRow {
    total_clicks: u64,
    unique_clicks: u64,
}

#[cfg(feature = "clickhouse")]
#[derive(clickhouse::Row, Deserialize)]
struct DailyRow {
    day: String,
    clicks: u64,
}

#[cfg(feature = "clickhouse")]
#[derive(clickhouse::Row, Deserialize)]
struct FacetRow {
    key: String,
    count: u64,
}

#[cfg(feature = "clickhouse")]
#[derive(clickhouse::Row, Deserialize)]
struct CountRow {
    count: u64,
}

#[cfg(feature = "clickhouse")]
async fn reconnect_loop(client: clickhouse::Client, ready: Arc<std::sync::atomic::AtomicBool>, cancel: Arc<CancellationToken>) {
    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    loop {
        let probe = client.query("SELECT 1").fetch_one::<u8>().await;
        match probe {
            Ok(_) => {
                ready.store(true, std::sync::atomic::Ordering::Relaxed);
                backoff = Duration::from_secs(1);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                ready.store(false, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "analytics index unreachable, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(feature = "clickhouse")]
#[async_trait::async_trait]
impl AnalyticsGateway for ClickHouseAnalytics {
    async fn track_click(&self, doc: ClickDocument) -> BatchResult {
        self.track_clicks_batch(vec![doc]).await
    }

    async fn track_clicks_batch(&self, docs: Vec<ClickDocument>) -> BatchResult {
        if !self.ready() || docs.is_empty() {
            return BatchResult { accepted: 0, failed: docs.len() };
        }

        match self.client.insert::<ClickDocument>("clicks") {
            Ok(mut insert) => {
                let mut accepted = 0;
                for doc in &docs {
                    if insert.write(doc).await.is_ok() {
                        accepted += 1;
                    }
                }
                match insert.end().await {
                    Ok(()) => BatchResult { accepted, failed: docs.len() - accepted },
                    Err(e) => {
                        tracing::warn!(error = %e, "analytics batch insert failed to finalize");
                        BatchResult { accepted: 0, failed: docs.len() }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "analytics batch insert failed to start");
                BatchResult { accepted: 0, failed: docs.len() }
            }
        }
    }

    async fn get_click_stats(&self, link_id: LinkId, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> ClickStats {
        if !self.ready() {
            return ClickStats::default();
        }
        let since = start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let until = end.unwrap_or_else(Utc::now);
        self.aggregate_stats("link_id", link_id.as_uuid(), since, until).await
    }

    async fn get_user_analytics(&self, user_id: UserId, window: chrono::Duration) -> ClickStats {
        if !self.ready() {
            return ClickStats::default();
        }
        let until = Utc::now();
        let since = until - window;
        self.aggregate_stats("user_id", user_id.as_uuid(), since, until).await
    }

    async fn get_real_time_clicks(&self, user_id: UserId, n_minutes: i64) -> u64 {
        if !self.ready() {
            return 0;
        }
        let since = Utc::now() - chrono::Duration::minutes(n_minutes);
        self.client
            .query("SELECT count() AS count FROM clicks WHERE user_id = ? AND timestamp >= ?")
            .bind(user_id.as_uuid())
            .bind(since)
            .fetch_one::<CountRow>()
            .await
            .map(|row| row.count)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "real-time click count query failed");
                0
            })
    }

    async fn search_clicks(&self, user_id: UserId, filters: ClickSearchFilters, page: u32, size: u32) -> Vec<ClickDocument> {
        if !self.ready() {
            return Vec::new();
        }

        let mut sql = String::from(
            "SELECT link_id, user_id, short_code, original_url, campaign, timestamp, ip_address, \
             country, city, device_type, browser, os, referrer, user_agent FROM clicks WHERE user_id = ?",
        );
        if filters.start.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filters.end.is_some() {
            sql.push_str(" AND timestamp < ?");
        }
        if filters.campaign.is_some() {
            sql.push_str(" AND campaign = ?");
        }
        if filters.country.is_some() {
            sql.push_str(" AND country = ?");
        }
        if filters.device_type.is_some() {
            sql.push_str(" AND device_type = ?");
        }
        if filters.text.is_some() {
            sql.push_str(" AND positionCaseInsensitive(original_url, ?) > 0");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut query = self.client.query(&sql).bind(user_id.as_uuid());
        if let Some(start) = filters.start {
            query = query.bind(start);
        }
        if let Some(end) = filters.end {
            query = query.bind(end);
        }
        if let Some(campaign) = &filters.campaign {
            query = query.bind(campaign);
        }
        if let Some(country) = &filters.country {
            query = query.bind(country);
        }
        if let Some(device_type) = &filters.device_type {
            query = query.bind(device_type);
        }
        if let Some(text) = &filters.text {
            query = query.bind(text);
        }
        query = query.bind(u64::from(size)).bind(u64::from(page) * u64::from(size));

        query.fetch_all::<ClickDocument>().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "click search query failed");
            Vec::new()
        })
    }

    fn ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(feature = "clickhouse")]
impl ClickHouseAnalytics {
    /// Shared aggregation path for [`AnalyticsGateway::get_click_stats`] and
    /// [`AnalyticsGateway::get_user_analytics`]: same shape, different scope
    /// column (`link_id` vs `user_id`).
    async fn aggregate_stats(&self, scope_column: &'static str, scope_id: uuid::Uuid, since: DateTime<Utc>, until: DateTime<Utc>) -> ClickStats {
        let totals_sql = format!(
            "SELECT count() AS total_clicks, uniq(ip_address) AS unique_clicks FROM clicks \
             WHERE {scope_column} = ? AND timestamp >= ? AND timestamp < ?"
        );
        let totals = self
            .client
            .query(&totals_sql)
            .bind(scope_id)
            .bind(since)
            .bind(until)
            .fetch_one::<StatsRow>()
            .await;
        let (total_clicks, unique_clicks) = match totals {
            Ok(row) => (row.total_clicks, row.unique_clicks),
            Err(e) => {
                tracing::warn!(error = %e, "analytics totals query failed");
                (0, 0)
            }
        };

        let daily_sql = format!(
            "SELECT toString(toDate(timestamp)) AS day, count() AS clicks FROM clicks \
             WHERE {scope_column} = ? AND timestamp >= ? AND timestamp < ? GROUP BY day ORDER BY day"
        );
        let daily_clicks = self
            .client
            .query(&daily_sql)
            .bind(scope_id)
            .bind(since)
            .bind(until)
            .fetch_all::<DailyRow>()
            .await
            .map(|rows| rows.into_iter().map(|r| DailyClicks { date: r.day, clicks: r.clicks }).collect())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "analytics daily-clicks query failed");
                Vec::new()
            });

        ClickStats {
            total_clicks,
            unique_clicks,
            daily_clicks,
            top_countries: self.top_facet(scope_column, scope_id, since, until, "country").await,
            top_devices: self.top_facet(scope_column, scope_id, since, until, "device_type").await,
            top_browsers: self.top_facet(scope_column, scope_id, since, until, "browser").await,
        }
    }

    /// Top 10 values of `facet_column` by click count within `[since, until)`.
    /// `scope_column`/`facet_column` are always one of this module's own
    /// fixed column-name literals, never caller input.
    async fn top_facet(&self, scope_column: &str, scope_id: uuid::Uuid, since: DateTime<Utc>, until: DateTime<Utc>, facet_column: &str) -> Vec<(String, u64)> {
        let sql = format!(
            "SELECT {facet_column} AS key, count() AS count FROM clicks \
             WHERE {scope_column} = ? AND timestamp >= ? AND timestamp < ? AND {facet_column} != '' \
             GROUP BY key ORDER BY count DESC LIMIT 10"
        );
        self.client
            .query(&sql)
            .bind(scope_id)
            .bind(since)
            .bind(until)
            .fetch_all::<FacetRow>()
            .await
            .map(|rows| rows.into_iter().map(|r| (r.key, r.count)).collect())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, facet = facet_column, "analytics facet query failed");
                Vec::new()
            })
    }
}

/// Always-degraded gateway used when the `clickhouse` feature is compiled
/// out, or as an explicit fallback construction. Accepts every write and
/// returns empty aggregates; `ready()` is permanently `false`.
#[derive(Debug, Default, Clone)]
pub struct MockAnalytics {
    pending: Arc<RwLock<u64>>,
}

impl MockAnalytics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of documents accepted since construction, for tests and
    /// diagnostics.
    pub async fn accepted_count(&self) -> u64 {
        *self.pending.read().await
    }
}

#[async_trait::async_trait]
impl AnalyticsGateway for MockAnalytics {
    async fn track_click(&self, _doc: ClickDocument) -> BatchResult {
        *self.pending.write().await += 1;
        BatchResult { accepted: 1, failed: 0 }
    }

    async fn track_clicks_batch(&self, docs: Vec<ClickDocument>) -> BatchResult {
        *self.pending.write().await += docs.len() as u64;
        BatchResult { accepted: docs.len(), failed: 0 }
    }

    async fn get_click_stats(&self, _link_id: LinkId, _start: Option<DateTime<Utc>>, _end: Option<DateTime<Utc>>) -> ClickStats {
        ClickStats::default()
    }

    async fn get_user_analytics(&self, _user_id: UserId, _window: chrono::Duration) -> ClickStats {
        ClickStats::default()
    }

    async fn get_real_time_clicks(&self, _user_id: UserId, _n_minutes: i64) -> u64 {
        0
    }

    async fn search_clicks(&self, _user_id: UserId, _filters: ClickSearchFilters, _page: u32, _size: u32) -> Vec<ClickDocument> {
        Vec::new()
    }

    fn ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> ClickDocument {
        ClickDocument {
            link_id: LinkId::new(),
            user_id: UserId::new(),
            short_code: "abc123".to_string(),
            original_url: "https://example.com".to_string(),
            campaign: None,
            timestamp: Utc::now(),
            ip_address: "203.0.113.7".to_string(),
            country: None,
            city: None,
            device_type: "desktop".to_string(),
            browser: None,
            os: None,
            referrer: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn mock_gateway_accepts_every_write_but_reports_not_ready() {
        let gw = MockAnalytics::new();
        let result = gw.track_click(sample_doc()).await;
        assert_eq!(result.accepted, 1);
        assert!(!gw.ready());
        assert_eq!(gw.accepted_count().await, 1);
    }

    #[tokio::test]
    async fn mock_gateway_batch_write_accepts_all() {
        let gw = MockAnalytics::new();
        let docs = vec![sample_doc(), sample_doc(), sample_doc()];
        let result = gw.track_clicks_batch(docs).await;
        assert_eq!(result.accepted, 3);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn mock_gateway_reads_return_empty_aggregates() {
        let gw = MockAnalytics::new();
        let stats = gw.get_click_stats(LinkId::new(), None, None).await;
        assert_eq!(stats.total_clicks, 0);
        assert!(stats.top_countries.is_empty());
        let results = gw.search_clicks(UserId::new(), ClickSearchFilters::default(), 0, 20).await;
        assert!(results.is_empty());
    }
}
