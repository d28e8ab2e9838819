use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{CreateUser, Role, UpdateUser, User, UserId};
use crate::repository::{
    FilterCondition, OrderDirection, Pagination, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult,
};

use super::{map_sqlx_error, push_filters};

/// `users` table gateway. Email uniqueness (case-folded) is enforced by a
/// unique index on `lower(email)`; callers should lowercase/trim before
/// calling [`UserRepository::create`], but the DB constraint is the source
/// of truth.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Looks a user up by case-folded email. Used by the login flow and by
    /// the `user:email:<e>` cache keyspace's backing fetch.
    pub async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    pub async fn find_by_google_id(&self, google_id: &str) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE google_id = $1")
            .bind(google_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindById, e))
    }

    /// Atomically increments `token_version`, invalidating every
    /// outstanding token for this user (see `auth_core::logout_all`).
    pub async fn bump_token_version(&self, id: &UserId) -> RepositoryResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "UPDATE users SET token_version = token_version + 1, updated_at = now() \
             WHERE id = $1 RETURNING token_version",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;
        Ok(row.0)
    }

    pub async fn touch_last_seen(&self, id: &UserId) -> RepositoryResult<()> {
        sqlx::query("UPDATE users SET last_seen_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;
        Ok(())
    }

    pub async fn touch_last_logout(&self, id: &UserId) -> RepositoryResult<()> {
        sqlx::query("UPDATE users SET last_logout_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;
        Ok(())
    }
}

impl Repository<UserId, User, CreateUser, UpdateUser> for UserRepository {
    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
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
    ) -> RepositoryResult<Vec<User>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM users");
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
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::FindAll, e))
    }

    async fn count(&self, filters: &[FilterCondition]) -> RepositoryResult<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT count(*) FROM users");
        push_filters(&mut builder, filters);
        let (count,): (i64,) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Count, e))?;
        Ok(count as u64)
    }

    async fn exists(&self, id: &UserId) -> RepositoryResult<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(RepositoryOperation::Exists, e))?;
        Ok(exists)
    }

    async fn create(&self, data: CreateUser) -> RepositoryResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, password_hash, display_name, role, is_active, \
             is_email_verified, google_id, avatar, token_version, created_at, updated_at) \
             VALUES ($1, lower($2), $3, $4, $5, true, $6, $7, $8, 0, now(), now()) \
             RETURNING *",
        )
        .bind(UserId::new())
        .bind(&data.email)
        .bind(&data.password_hash)
        .bind(&data.display_name)
        .bind(Role::User.to_string())
        .bind(data.is_email_verified)
        .bind(&data.google_id)
        .bind(&data.avatar)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Create, e).with_entity("User", &data.email))
    }

    async fn update(&self, id: &UserId, data: UpdateUser) -> RepositoryResult<User> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET updated_at = now()");
        if let Some(name) = &data.display_name {
            builder.push(", display_name = ").push_bind(name.clone());
        }
        if let Some(hash) = &data.password_hash {
            builder.push(", password_hash = ").push_bind(hash.clone());
        }
        if let Some(avatar) = &data.avatar {
            builder.push(", avatar = ").push_bind(avatar.clone());
        }
        if let Some(active) = data.is_active {
            builder.push(", is_active = ").push_bind(active);
        }
        builder.push(" WHERE id = ").push_bind(*id);
        builder.push(" RETURNING *");

        let user = builder
            .build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Update, e))?;

        user.ok_or_else(|| RepositoryError::not_found("User", id.to_string()))
    }

    async fn delete(&self, id: &UserId) -> RepositoryResult<bool> {
        // Users are soft-deactivated, never physically deleted.
        let affected = sqlx::query("UPDATE users SET is_active = false, updated_at = now() WHERE id = $1")
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
    fn reserved_not_relevant_here_but_role_roundtrips() {
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
    }
}
