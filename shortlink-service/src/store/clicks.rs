use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{Click, ClickId, LinkId};
use crate::repository::{RepositoryOperation, RepositoryResult};

use super::map_sqlx_error;

/// Fields the resolver has in hand at the moment it records a visit. Not a
/// `CreateClick` DTO on the `Repository` trait because `Click` rows are
/// append-only and never updated or individually fetched by id outside
/// diagnostics.
#[derive(Debug, Clone)]
pub struct NewClick {
    pub link_id: LinkId,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub is_bot: bool,
}

/// `clicks` table gateway. Append-only: the resolver writes one row per
/// successful redirect and this repository never updates or deletes them.
#[derive(Clone)]
pub struct ClickRepository {
    pool: PgPool,
}

impl ClickRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `true` iff `ip_address` has no prior recorded click on `link_id`.
    /// An unknown/unparsed IP is treated as never unique by the caller
    /// (see the resolver's click-tracking step), so this only answers the
    /// question for a concrete address.
    pub async fn is_unique_visit(&self, link_id: &LinkId, ip_address: &str) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM clicks WHERE link_id = $1 AND ip_address = $2)",
        )
        .bind(link_id)
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(!exists)
    }

    pub async fn record(&self, click: NewClick) -> RepositoryResult<Click> {
        sqlx::query_as::<_, Click>(
            "INSERT INTO clicks (id, link_id, ip_address, user_agent, referrer, country, city, \
             device_type, browser, os, is_bot, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now()) RETURNING *",
        )
        .bind(ClickId::new())
        .bind(click.link_id)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referrer)
        .bind(&click.country)
        .bind(&click.city)
        .bind(&click.device_type)
        .bind(&click.browser)
        .bind(&click.os)
        .bind(click.is_bot)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Create, e))
    }

    pub async fn find_by_id(&self, id: &ClickId) -> RepositoryResult<Option<Click>> {
        sqlx::query_as::<_, Click>("SELECT * FROM clicks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    /// Most recent clicks for a link, newest first, for the link-level
    /// stats endpoint and the live-stats sampler.
    pub async fn find_by_link(&self, link_id: &LinkId, limit: u32) -> RepositoryResult<Vec<Click>> {
        sqlx::query_as::<_, Click>(
            "SELECT * FROM clicks WHERE link_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(link_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))
    }

    pub async fn count_for_link(&self, link_id: &LinkId) -> RepositoryResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM clicks WHERE link_id = $1")
            .bind(link_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Count, e))?;
        Ok(count as u64)
    }

    /// Total clicks recorded across every link since `since`, for the
    /// live-stats top-line count.
    pub async fn count_since_global(&self, since: chrono::DateTime<chrono::Utc>) -> RepositoryResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM clicks WHERE timestamp >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Count, e))?;
        Ok(count as u64)
    }

    /// Clicks for `link_id` in `[since, now)`, oldest first, for real-time
    /// and daily-bucketed analytics fallbacks when the analytics gateway is
    /// unavailable.
    pub async fn find_since(
        &self,
        link_id: &LinkId,
        since: chrono::DateTime<chrono::Utc>,
    ) -> RepositoryResult<Vec<Click>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT * FROM clicks WHERE link_id = ",
        );
        builder.push_bind(link_id);
        builder.push(" AND timestamp >= ").push_bind(since);
        builder.push(" ORDER BY timestamp ASC");

        builder
            .build_query_as::<Click>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_click_carries_resolver_fields() {
        let click = NewClick {
            link_id: LinkId::new(),
            ip_address: "203.0.113.7".to_string(),
            user_agent: Some("curl/8.0".to_string()),
            referrer: None,
            country: None,
            city: None,
            device_type: "desktop".to_string(),
            browser: None,
            os: None,
            is_bot: false,
        };
        assert_eq!(click.device_type, "desktop");
    }
}
