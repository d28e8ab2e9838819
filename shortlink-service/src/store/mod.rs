//! Primary store gateway
//!
//! Transactional CRUD for the user/domain/link/click graph, built on the
//! framework's [`Repository`](crate::repository::Repository) trait where the
//! generic CRUD shape fits, with bespoke methods (`create_link`,
//! `generate_unique_short_code`, `find_by_short_code_and_domain`,
//! `increment_clicks`, `unique_click`) for the operations that don't reduce
//! to plain CRUD. Every write is single-row transactional; uniqueness
//! violations surface as [`RepositoryErrorKind::AlreadyExists`], everything
//! else that sqlx reports is classified as retriable or not and surfaced
//! accordingly.

mod clicks;
mod domains;
mod links;
mod users;

pub use clicks::{ClickRepository, NewClick};
pub use domains::DomainRepository;
pub use links::{CreateLinkError, DuplicateShortCodeError, LinkRepository, ShortCodeExhausted};
pub use users::UserRepository;

use rand::Rng;

use crate::repository::{
    FilterCondition, FilterOperator, FilterValue, RepositoryError, RepositoryErrorKind,
    RepositoryOperation,
};

/// Maps a raw `sqlx::Error` to the repository taxonomy, recognizing Postgres
/// unique-violation (`23505`) as `AlreadyExists` and connection-shaped
/// errors as retriable.
pub(crate) fn map_sqlx_error(operation: RepositoryOperation, err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return RepositoryError::new(
                operation,
                RepositoryErrorKind::AlreadyExists,
                db_err.message().to_string(),
            );
        }
    }

    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            RepositoryError::new(operation, RepositoryErrorKind::ConnectionFailed, err.to_string())
        }
        _ => RepositoryError::database_error(operation, err.to_string()),
    }
}

/// Appends a ` WHERE ...` clause (and bound values) to `builder` for the
/// given filters. Fields are interpolated as identifiers (trusted,
/// caller-controlled column names); values are always bound as parameters.
pub(crate) fn push_filters<'a>(
    builder: &mut sqlx::QueryBuilder<'a, sqlx::Postgres>,
    filters: &'a [FilterCondition],
) {
    if filters.is_empty() {
        return;
    }

    builder.push(" WHERE ");
    let mut separated = builder.separated(" AND ");
    for filter in filters {
        match (&filter.operator, &filter.value) {
            (FilterOperator::IsNull, _) => {
                separated.push(format!("{} IS NULL", filter.field));
            }
            (FilterOperator::IsNotNull, _) => {
                separated.push(format!("{} IS NOT NULL", filter.field));
            }
            (FilterOperator::In, FilterValue::StringList(values)) => {
                separated.push(format!(
                    "{} = ANY(",
                    filter.field
                ));
                separated.push_bind_unseparated(values.clone());
                separated.push_unseparated(")");
            }
            (FilterOperator::In, FilterValue::IntegerList(values)) => {
                separated.push(format!("{} = ANY(", filter.field));
                separated.push_bind_unseparated(values.clone());
                separated.push_unseparated(")");
            }
            (op, FilterValue::String(s)) => {
                separated.push(format!("{} {} ", filter.field, op));
                separated.push_bind_unseparated(s.clone());
            }
            (op, FilterValue::Integer(n)) => {
                separated.push(format!("{} {} ", filter.field, op));
                separated.push_bind_unseparated(*n);
            }
            (op, FilterValue::Float(n)) => {
                separated.push(format!("{} {} ", filter.field, op));
                separated.push_bind_unseparated(*n);
            }
            (op, FilterValue::Boolean(b)) => {
                separated.push(format!("{} {} ", filter.field, op));
                separated.push_bind_unseparated(*b);
            }
            _ => {
                // IN with a scalar, or a null comparison via `=`/`!=` — not
                // a shape callers of this gateway construct.
            }
        }
    }
}

/// Generates a random code from `[A-Za-z0-9]` of the given length.
pub(crate) fn random_code(length: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Short codes that collide with core or admin routes and are rejected at
/// creation time regardless of availability.
pub const RESERVED_SHORT_CODES: &[&str] = &[
    "api", "admin", "www", "app", "login", "register", "dashboard", "health", "preview", "null",
    "undefined", "test",
];
