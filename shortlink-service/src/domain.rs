//! Entity types for the redirect data plane
//!
//! Plain `serde`-derived structs for the six entities the service persists:
//! [`User`], [`Domain`], [`Link`], [`Click`], [`Session`], and [`Job`]. Typed
//! newtype identifiers wrap a `Uuid` so repositories and registries can't mix
//! up a `LinkId` and a `DomainId` at the type level; lookups go through the
//! owning repository rather than an in-memory object graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh, random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        #[cfg(feature = "database")]
        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <Uuid as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        #[cfg(feature = "database")]
        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <Uuid as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }

        #[cfg(feature = "database")]
        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                Ok(Self(<Uuid as sqlx::Decode<sqlx::Postgres>>::decode(value)?))
            }
        }
    };
}

typed_id!(UserId);
typed_id!(DomainId);
typed_id!(LinkId);
typed_id!(ClickId);
typed_id!(SessionId);
typed_id!(JobId);

/// A user's role, controlling ownership bypass on link/domain operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(crate::error::Error::ValidationError(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// Identity. Email is unique case-folded; `token_version` only ever
/// increases and a mismatch between a token's claim and this field
/// invalidates the token (see `auth_core`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub google_id: Option<String>,
    pub avatar: Option<String>,
    pub token_version: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_logout_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::User)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.role(), Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: String,
    pub google_id: Option<String>,
    pub avatar: Option<String>,
    pub is_email_verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub avatar: Option<String>,
    pub is_active: Option<bool>,
}

/// Tenant-owned custom host. Only participates in resolution once both
/// `is_active` and `is_verified` are true.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Domain {
    pub id: DomainId,
    pub owner_user_id: UserId,
    pub host: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub verification_token: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub dns_records: serde_json::Value,
    pub ssl_enabled: bool,
    pub monthly_link_limit: i64,
    pub current_month_usage: i64,
    pub last_usage_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomain {
    pub owner_user_id: UserId,
    pub host: String,
    pub display_name: String,
    pub monthly_link_limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDomain {
    pub display_name: Option<String>,
    pub is_active: Option<bool>,
    pub monthly_link_limit: Option<i64>,
}

/// Access mode for a [`Link`]'s geo restriction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoMode {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoRestrictions {
    pub mode: Option<GeoMode>,
    pub countries: Vec<String>,
}

/// A short URL. `(short_code, domain_id)` is unique with `NULL` domain_id
/// treated as a distinct value (the system domain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub owner_user_id: UserId,
    pub domain_id: Option<DomainId>,
    pub original_url: String,
    pub short_code: String,
    pub custom_code: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub campaign: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub click_count: i64,
    pub unique_clicks: i64,
    pub last_click_at: Option<DateTime<Utc>>,
    pub utm_parameters: HashMap<String, String>,
    pub url_metadata: HashMap<String, String>,
    pub geo_restrictions: GeoRestrictions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// `true` iff the caller must supply a password to continue.
    #[must_use]
    pub fn requires_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// `true` iff `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLink {
    pub owner_user_id: UserId,
    pub domain_id: Option<DomainId>,
    pub original_url: String,
    pub custom_code: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub campaign: Option<String>,
    pub tags: Vec<String>,
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub utm_parameters: HashMap<String, String>,
    pub geo_restrictions: GeoRestrictions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLink {
    pub title: Option<String>,
    pub description: Option<String>,
    pub campaign: Option<String>,
    pub tags: Option<Vec<String>>,
    pub password_hash: Option<Option<String>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    pub utm_parameters: Option<HashMap<String, String>>,
    pub geo_restrictions: Option<GeoRestrictions>,
}

/// Device class derived from the click's User-Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Bot => "bot",
        };
        write!(f, "{s}")
    }
}

/// One recorded visit. Append-only: the resolver writes exactly one row
/// per successful redirect and none for bot-shunted or rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Click {
    pub id: ClickId,
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
    pub timestamp: DateTime<Utc>,
}

/// A login instance. Purged en masse by bumping the owning user's
/// `token_version`, independent of `Session` row deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
}

/// The kind of background work a [`Job`] performs, and therefore which
/// queue it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Metadata,
    Email,
    Analytics,
    ClickTracking,
}

impl JobKind {
    /// The queue name this kind is dispatched to.
    #[must_use]
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::Metadata => "metadata-fetching",
            JobKind::Email => "email-notifications",
            JobKind::Analytics => "analytics-processing",
            JobKind::ClickTracking => "click-tracking",
        }
    }

    /// Default attempt budget: 3 for everything except analytics (2).
    #[must_use]
    pub fn default_max_attempts(&self) -> u32 {
        match self {
            JobKind::Analytics => 2,
            _ => 3,
        }
    }
}

/// A unit of background work. `payload` is opaque JSON interpreted by the
/// handler registered for `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            max_attempts: kind.default_max_attempts(),
            kind,
            payload,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// `true` iff this job may be retried after another failure.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_ids_are_distinct_types_over_uuid() {
        let raw = Uuid::new_v4();
        let user_id = UserId::from(raw);
        let link_id = LinkId::from(raw);
        assert_eq!(user_id.as_uuid(), link_id.as_uuid());
        assert_eq!(user_id.to_string(), raw.to_string());
    }

    #[test]
    fn job_kind_default_attempts() {
        assert_eq!(JobKind::Analytics.default_max_attempts(), 2);
        assert_eq!(JobKind::ClickTracking.default_max_attempts(), 3);
    }

    #[test]
    fn job_can_retry_until_max_attempts() {
        let mut job = Job::new(JobKind::ClickTracking, serde_json::json!({}));
        assert!(job.can_retry());
        job.attempts = job.max_attempts;
        assert!(!job.can_retry());
    }

    #[test]
    fn link_expiry_check() {
        let now = Utc::now();
        let mut link_json = serde_json::json!({
            "id": LinkId::new(),
            "owner_user_id": UserId::new(),
            "domain_id": null,
            "original_url": "https://example.com",
            "short_code": "abc123",
            "custom_code": false,
            "title": null, "description": null, "campaign": null,
            "tags": [], "password_hash": null,
            "expires_at": now - chrono::Duration::hours(1),
            "is_active": true,
            "click_count": 0, "unique_clicks": 0, "last_click_at": null,
            "utm_parameters": {}, "url_metadata": {},
            "geo_restrictions": {"mode": null, "countries": []},
            "created_at": now, "updated_at": now,
        });
        let link: Link = serde_json::from_value(link_json.take()).unwrap();
        assert!(link.is_expired(now));
    }
}
