use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{CreateLink, DomainId, GeoRestrictions, Link, LinkId, UpdateLink, UserId};
use crate::repository::{
    FilterCondition, OrderDirection, Pagination, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult,
};

use super::{map_sqlx_error, push_filters, random_code, RESERVED_SHORT_CODES};

/// Raised when a caller-supplied custom short code is already taken on the
/// target domain (or on the system domain, for `domain_id: None`).
#[derive(Debug, Clone)]
pub struct DuplicateShortCodeError {
    pub short_code: String,
}

impl fmt::Display for DuplicateShortCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "short code '{}' is already in use", self.short_code)
    }
}

impl std::error::Error for DuplicateShortCodeError {}

/// Raised when random short-code generation could not find a free code
/// within the attempt budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortCodeExhausted;

impl fmt::Display for ShortCodeExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exhausted short code generation attempts")
    }
}

impl std::error::Error for ShortCodeExhausted {}

/// Raw row shape for `links`. `Link`'s `HashMap`/`GeoRestrictions` fields
/// don't derive cleanly through `FromRow`, so every query maps through this
/// intermediate and [`row_into_link`] instead of deriving it directly.
#[derive(sqlx::FromRow)]
struct LinkRow {
    id: LinkId,
    owner_user_id: UserId,
    domain_id: Option<DomainId>,
    original_url: String,
    short_code: String,
    custom_code: bool,
    title: Option<String>,
    description: Option<String>,
    campaign: Option<String>,
    tags: Vec<String>,
    password_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    click_count: i64,
    unique_clicks: i64,
    last_click_at: Option<DateTime<Utc>>,
    utm_parameters: serde_json::Value,
    url_metadata: serde_json::Value,
    geo_restrictions: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_into_link(row: LinkRow) -> RepositoryResult<Link> {
    let utm_parameters: HashMap<String, String> = serde_json::from_value(row.utm_parameters)
        .map_err(|e| RepositoryError::serialization_error(RepositoryOperation::FindById, e.to_string()))?;
    let url_metadata: HashMap<String, String> = serde_json::from_value(row.url_metadata)
        .map_err(|e| RepositoryError::serialization_error(RepositoryOperation::FindById, e.to_string()))?;
    let geo_restrictions: GeoRestrictions = serde_json::from_value(row.geo_restrictions)
        .map_err(|e| RepositoryError::serialization_error(RepositoryOperation::FindById, e.to_string()))?;

    Ok(Link {
        id: row.id,
        owner_user_id: row.owner_user_id,
        domain_id: row.domain_id,
        original_url: row.original_url,
        short_code: row.short_code,
        custom_code: row.custom_code,
        title: row.title,
        description: row.description,
        campaign: row.campaign,
        tags: row.tags,
        password_hash: row.password_hash,
        expires_at: row.expires_at,
        is_active: row.is_active,
        click_count: row.click_count,
        unique_clicks: row.unique_clicks,
        last_click_at: row.last_click_at,
        utm_parameters,
        url_metadata,
        geo_restrictions,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

const LINK_COLUMNS: &str = "id, owner_user_id, domain_id, original_url, short_code, custom_code, \
    title, description, campaign, tags, password_hash, expires_at, is_active, click_count, \
    unique_clicks, last_click_at, utm_parameters, url_metadata, geo_restrictions, created_at, updated_at";

/// `links` table gateway. `(short_code, domain_id)` is unique, with `NULL`
/// domain_id (the system domain) a distinct value from any tenant domain —
/// enforced by a Postgres partial unique index plus the explicit
/// availability check in [`LinkRepository::create_link`].
#[derive(Clone)]
pub struct LinkRepository {
    pool: PgPool,
}

impl LinkRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn short_code_taken(&self, short_code: &str, domain_id: Option<DomainId>) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM links WHERE short_code = $1 AND domain_id IS NOT DISTINCT FROM $2)",
        )
        .bind(short_code)
        .bind(domain_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(exists)
    }

    /// Looks up a Link by `(short_code, domain_id)`, the resolver's primary
    /// lookup path. `domain_id: None` means the system domain.
    pub async fn find_by_short_code_and_domain(
        &self,
        short_code: &str,
        domain_id: Option<DomainId>,
    ) -> RepositoryResult<Option<Link>> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = $1 AND domain_id IS NOT DISTINCT FROM $2",
        ))
        .bind(short_code)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))?;

        row.map(row_into_link).transpose()
    }

    /// Generates a short code that is neither reserved nor already in use
    /// on `domain_id`. Starts at length 6; lengthens by one after every 5
    /// failed attempts, and gives up after 10 attempts total.
    pub async fn generate_unique_short_code(
        &self,
        domain_id: Option<DomainId>,
    ) -> Result<String, ShortCodeExhausted> {
        let mut length = 6usize;

        for attempt in 1..=10u32 {
            let candidate = random_code(length);
            if RESERVED_SHORT_CODES.contains(&candidate.as_str()) {
                continue;
            }

            match self.short_code_taken(&candidate, domain_id).await {
                Ok(false) => return Ok(candidate),
                Ok(true) => {
                    if attempt % 5 == 0 {
                        length += 1;
                    }
                }
                Err(_) => return Err(ShortCodeExhausted),
            }
        }

        Err(ShortCodeExhausted)
    }

    /// Creates a Link, allocating a random short code unless `custom_code`
    /// is set. A caller-supplied code that is reserved or already taken
    /// fails with [`DuplicateShortCodeError`] rather than falling back to
    /// random allocation.
    pub async fn create_link(
        &self,
        data: CreateLink,
    ) -> Result<Link, CreateLinkError> {
        let short_code = match &data.custom_code {
            Some(code) => {
                if RESERVED_SHORT_CODES.contains(&code.as_str())
                    || self.short_code_taken(code, data.domain_id).await.map_err(CreateLinkError::Repository)?
                {
                    return Err(CreateLinkError::Duplicate(DuplicateShortCodeError {
                        short_code: code.clone(),
                    }));
                }
                code.clone()
            }
            None => self
                .generate_unique_short_code(data.domain_id)
                .await
                .map_err(CreateLinkError::Exhausted)?,
        };
        let custom_code = data.custom_code.is_some();

        let geo_json = serde_json::to_value(&data.geo_restrictions).unwrap_or(serde_json::json!({}));
        let utm_json = serde_json::to_value(&data.utm_parameters).unwrap_or(serde_json::json!({}));

        let row: LinkRow = sqlx::query_as(&format!(
            "INSERT INTO links (id, owner_user_id, domain_id, original_url, short_code, custom_code, \
             title, description, campaign, tags, password_hash, expires_at, is_active, click_count, \
             unique_clicks, last_click_at, utm_parameters, url_metadata, geo_restrictions, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, true, 0, 0, NULL, $13, '{{}}'::jsonb, $14, now(), now()) \
             RETURNING {LINK_COLUMNS}",
        ))
        .bind(LinkId::new())
        .bind(data.owner_user_id)
        .bind(data.domain_id)
        .bind(&data.original_url)
        .bind(&short_code)
        .bind(custom_code)
        .bind(&data.title)
        .bind(&data.description)
        .bind(&data.campaign)
        .bind(&data.tags)
        .bind(&data.password_hash)
        .bind(data.expires_at)
        .bind(utm_json)
        .bind(geo_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CreateLinkError::Repository(map_sqlx_error(RepositoryOperation::Create, e)))?;

        row_into_link(row).map_err(CreateLinkError::Repository)
    }

    /// Bumps `click_count` (and `unique_clicks` when `is_unique`) and stamps
    /// `last_click_at`. Called once per recorded [`Click`](crate::domain::Click).
    pub async fn increment_clicks(&self, id: &LinkId, is_unique: bool) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE links SET click_count = click_count + 1, \
             unique_clicks = unique_clicks + $2, last_click_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(if is_unique { 1i64 } else { 0i64 })
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;
        Ok(())
    }

    pub async fn find_by_owner(&self, owner: &UserId) -> RepositoryResult<Vec<Link>> {
        let rows: Vec<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE owner_user_id = $1 ORDER BY created_at DESC",
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))?;

        rows.into_iter().map(row_into_link).collect()
    }
}

/// The three ways [`LinkRepository::create_link`] can fail, kept distinct
/// so the registry layer can map them to different API errors.
#[derive(Debug)]
pub enum CreateLinkError {
    Duplicate(DuplicateShortCodeError),
    Exhausted(ShortCodeExhausted),
    Repository(RepositoryError),
}

impl fmt::Display for CreateLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateLinkError::Duplicate(e) => write!(f, "{e}"),
            CreateLinkError::Exhausted(e) => write!(f, "{e}"),
            CreateLinkError::Repository(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CreateLinkError {}

impl Repository<LinkId, Link, CreateLink, UpdateLink> for LinkRepository {
    async fn find_by_id(&self, id: &LinkId) -> RepositoryResult<Option<Link>> {
        let row: Option<LinkRow> = sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))?;
        row.map(row_into_link).transpose()
    }

    async fn find_all(
        &self,
        filters: &[FilterCondition],
        order_by: Option<(&str, OrderDirection)>,
        pagination: Option<Pagination>,
    ) -> RepositoryResult<Vec<Link>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {LINK_COLUMNS} FROM links"));
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

        let rows: Vec<LinkRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))?;

        rows.into_iter().map(row_into_link).collect()
    }

    async fn count(&self, filters: &[FilterCondition]) -> RepositoryResult<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT count(*) FROM links");
        push_filters(&mut builder, filters);
        let (count,): (i64,) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Count, e))?;
        Ok(count as u64)
    }

    async fn exists(&self, id: &LinkId) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM links WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(exists)
    }

    /// Delegates to [`LinkRepository::create_link`], discarding its richer
    /// error in favor of the uniform `RepositoryError` the trait promises.
    /// Callers that need to distinguish a duplicate code from exhaustion
    /// should call `create_link` directly.
    async fn create(&self, data: CreateLink) -> RepositoryResult<Link> {
        self.create_link(data).await.map_err(|e| match e {
            CreateLinkError::Duplicate(d) => RepositoryError::already_exists("Link", d.short_code.clone()),
            CreateLinkError::Exhausted(e) => {
                RepositoryError::database_error(RepositoryOperation::Create, e.to_string())
            }
            CreateLinkError::Repository(e) => e,
        })
    }

    async fn update(&self, id: &LinkId, data: UpdateLink) -> RepositoryResult<Link> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE links SET updated_at = now()");
        if let Some(title) = &data.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(description) = &data.description {
            builder.push(", description = ").push_bind(description.clone());
        }
        if let Some(campaign) = &data.campaign {
            builder.push(", campaign = ").push_bind(campaign.clone());
        }
        if let Some(tags) = &data.tags {
            builder.push(", tags = ").push_bind(tags.clone());
        }
        if let Some(password_hash) = &data.password_hash {
            builder.push(", password_hash = ").push_bind(password_hash.clone());
        }
        if let Some(expires_at) = &data.expires_at {
            builder.push(", expires_at = ").push_bind(*expires_at);
        }
        if let Some(active) = data.is_active {
            builder.push(", is_active = ").push_bind(active);
        }
        if let Some(utm) = &data.utm_parameters {
            let json = serde_json::to_value(utm).unwrap_or(serde_json::json!({}));
            builder.push(", utm_parameters = ").push_bind(json);
        }
        if let Some(geo) = &data.geo_restrictions {
            let json = serde_json::to_value(geo).unwrap_or(serde_json::json!({}));
            builder.push(", geo_restrictions = ").push_bind(json);
        }
        builder.push(" WHERE id = ").push_bind(*id);
        builder.push(format!(" RETURNING {LINK_COLUMNS}"));

        let row: Option<LinkRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;

        match row {
            Some(row) => row_into_link(row),
            None => Err(RepositoryError::not_found("Link", id.to_string())),
        }
    }

    async fn delete(&self, id: &LinkId) -> RepositoryResult<bool> {
        // Links are soft-deleted: deactivated, kept for historical click
        // attribution.
        let affected = sqlx::query("UPDATE links SET is_active = false, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Delete, e))?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_short_code_error_message() {
        let err = DuplicateShortCodeError {
            short_code: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));
    }
}
