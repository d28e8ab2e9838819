use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{CreateDomain, Domain, DomainId, UpdateDomain, UserId};
use crate::repository::{
    FilterCondition, OrderDirection, Pagination, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult,
};

use super::{map_sqlx_error, push_filters};

/// `domains` table gateway. `host` is unique system-wide; deletion is
/// blocked at the registry layer when active Links still reference the
/// domain (see `domain_registry::DomainRegistry::delete`).
#[derive(Clone)]
pub struct DomainRepository {
    pool: PgPool,
}

impl DomainRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_host(&self, host: &str) -> RepositoryResult<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE host = lower($1)")
            .bind(host)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    /// Returns the Domain only if it's both active and verified, matching
    /// the resolution rule the link registry and resolver depend on.
    pub async fn find_active_by_host(&self, host: &str) -> RepositoryResult<Option<Domain>> {
        sqlx::query_as::<_, Domain>(
            "SELECT * FROM domains WHERE host = lower($1) AND is_active = true AND is_verified = true",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    pub async fn mark_verified(&self, id: &DomainId) -> RepositoryResult<Domain> {
        sqlx::query_as::<_, Domain>(
            "UPDATE domains SET is_verified = true, is_active = true, verified_at = now(), \
             updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?
        .ok_or_else(|| RepositoryError::not_found("Domain", id.to_string()))
    }

    /// `true` iff at least one active Link still references this domain;
    /// the registry uses this to block deletion.
    pub async fn has_active_links(&self, id: &DomainId) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM links WHERE domain_id = $1 AND is_active = true)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(exists)
    }

    pub async fn increment_usage(&self, id: &DomainId) -> RepositoryResult<()> {
        sqlx::query("UPDATE domains SET current_month_usage = current_month_usage + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;
        Ok(())
    }

    /// Idempotent monthly usage reset, triggered by an admin call rather
    /// than a scheduler (see design notes on automation).
    pub async fn reset_usage(&self, id: &DomainId) -> RepositoryResult<Domain> {
        sqlx::query_as::<_, Domain>(
            "UPDATE domains SET current_month_usage = 0, last_usage_reset = now(), updated_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?
        .ok_or_else(|| RepositoryError::not_found("Domain", id.to_string()))
    }

    pub async fn find_by_owner(&self, owner: &UserId) -> RepositoryResult<Vec<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE owner_user_id = $1 ORDER BY created_at DESC")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))
    }
}

impl Repository<DomainId, Domain, CreateDomain, UpdateDomain> for DomainRepository {
    async fn find_by_id(&self, id: &DomainId) -> RepositoryResult<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    async fn find_all(
        &self,
        filters: &[FilterCondition],
        order_by: Option<(&str, OrderDirection)>,
        pagination: Option<Pagination>,
    ) -> RepositoryResult<Vec<Domain>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM domains");
        push_filters(&mut builder, filters);
        if let Some((field, direction)) = order_by {
            builder.push(format!(" ORDER BY {field} {direction}"));
        } else {
            builder.push(" ORDER BY created_at DESC");
        }
        if let Some(page) = pagination {
            builder.push(" LIMIT ").push_bind(page.limit as i64);
            builder.push(" OFFSET ").push_bind(page.offset as i64);
        }
        builder
            .build_query_as::<Domain>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))
    }

    async fn count(&self, filters: &[FilterCondition]) -> RepositoryResult<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT count(*) FROM domains");
        push_filters(&mut builder, filters);
        let (count,): (i64,) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Count, e))?;
        Ok(count as u64)
    }

    async fn exists(&self, id: &DomainId) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM domains WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(exists)
    }

    async fn create(&self, data: CreateDomain) -> RepositoryResult<Domain> {
        let token = blake3::hash(uuid::Uuid::new_v4().as_bytes()).to_hex()[..32].to_string();
        sqlx::query_as::<_, Domain>(
            "INSERT INTO domains (id, owner_user_id, host, display_name, is_active, is_verified, \
             verification_token, dns_records, ssl_enabled, monthly_link_limit, current_month_usage, \
             last_usage_reset, created_at, updated_at) \
             VALUES ($1, $2, lower($3), $4, false, false, $5, '{}'::jsonb, false, $6, 0, now(), now(), now()) \
             RETURNING *",
        )
        .bind(DomainId::new())
        .bind(data.owner_user_id)
        .bind(&data.host)
        .bind(&data.display_name)
        .bind(&token)
        .bind(data.monthly_link_limit)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Create, e).with_entity("Domain", &data.host))
    }

    async fn update(&self, id: &DomainId, data: UpdateDomain) -> RepositoryResult<Domain> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE domains SET updated_at = now()");
        if let Some(name) = &data.display_name {
            builder.push(", display_name = ").push_bind(name.clone());
        }
        if let Some(active) = data.is_active {
            builder.push(", is_active = ").push_bind(active);
        }
        if let Some(limit) = data.monthly_link_limit {
            builder.push(", monthly_link_limit = ").push_bind(limit);
        }
        builder.push(" WHERE id = ").push_bind(*id);
        builder.push(" RETURNING *");

        builder
            .build_query_as::<Domain>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?
            .ok_or_else(|| RepositoryError::not_found("Domain", id.to_string()))
    }

    async fn delete(&self, id: &DomainId) -> RepositoryResult<bool> {
        let affected = sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Delete, e))?
            .rows_affected();
        Ok(affected > 0)
    }
}
