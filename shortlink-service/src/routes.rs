//! HTTP surface
//!
//! Composes [`Resolver`], [`LinkRegistry`], [`DomainRegistry`], [`AuthCore`],
//! and [`LiveStats`] into the router the spec's external interfaces table
//! describes: the redirect data plane at the root, the JSON control plane
//! under `/api`, and the live-stats SSE stream. Every handler returns
//! `Result<Response, Error>` so the existing `IntoResponse for Error` impl
//! is the single place HTTP status mapping happens.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Json, Response, Sse};
use axum::routing::{get, post};
use axum::{async_trait, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::analytics::AnalyticsGateway;
use crate::auth_core::{AuthCore, TokenPair};
use crate::domain::{CreateDomain, CreateLink, Domain, DomainId, GeoRestrictions, Link, LinkId, UpdateDomain, UpdateLink, User, UserId};
use crate::domain_registry::DomainRegistry;
use crate::error::{Error, Result};
use crate::jobs::JobQueue;
use crate::link_registry::LinkRegistry;
use crate::live_stats::LiveStats;
use crate::middleware::JwtAuth;
use crate::repository::{Repository, RepositoryError, RepositoryErrorKind};
use crate::resolver::{RedirectOutcome, RedirectRequest, Resolver, SHORT_CODE_RE};
use crate::store::UserRepository;

fn map_repo_err(e: RepositoryError) -> Error {
    match e.kind {
        RepositoryErrorKind::NotFound => Error::NotFound(e.message),
        RepositoryErrorKind::AlreadyExists => Error::Conflict(e.message),
        RepositoryErrorKind::ValidationFailed => Error::ValidationError(e.message),
        RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout => Error::DependencyDegraded(e.message),
        _ => Error::Internal(e.to_string()),
    }
}

/// Everything a handler needs, composed once at startup. Cheap to clone —
/// every field is itself an `Arc`/pool-backed handle.
#[derive(Clone)]
pub struct ShortlinkServices {
    pub resolver: Resolver,
    pub links: LinkRegistry,
    pub domains: DomainRegistry,
    pub auth: AuthCore,
    pub users: UserRepository,
    pub jobs: Arc<JobQueue>,
    pub analytics: Arc<dyn AnalyticsGateway>,
    pub live_stats: Arc<LiveStats>,
    pub system_domain: String,
}

/// Builds the full router: redirect plane at the root, `/api` control
/// plane, and the live-stats SSE stream. Does not attach the observability
/// or rate-limiting layers — those are composed at the binary's
/// composition root alongside the rest of the middleware stack.
#[must_use]
pub fn router(state: ShortlinkServices) -> Router {
    let api = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
        .route("/links", post(create_link).get(list_links))
        .route("/links/{id}", get(get_link).put(update_link).delete(delete_link))
        .route("/domains", post(create_domain).get(list_domains))
        .route("/domains/{id}", get(get_domain).put(update_domain).delete(delete_domain))
        .route("/domains/{id}/verify", post(verify_domain))
        .route("/stats/live", get(live_stats_stream));

    Router::new()
        .route("/preview/{short_code}", get(preview))
        .route("/{short_code}/password", post(redirect_with_password))
        .route("/{short_code}", get(redirect))
        .nest("/api", api)
        .with_state(state)
}

fn client_ip(parts: &axum::http::HeaderMap) -> String {
    parts
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("0.0.0.0")
        .to_string()
}

fn redirect_request(headers: &axum::http::HeaderMap, short_code: &str, password: Option<String>) -> RedirectRequest {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    RedirectRequest {
        host,
        short_code: short_code.to_string(),
        ip_address: client_ip(headers),
        user_agent: headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string),
        referrer: headers.get(header::REFERER).and_then(|v| v.to_str().ok()).map(str::to_string),
        country: headers.get("x-geo-country").and_then(|v| v.to_str().ok()).map(str::to_string),
        presented_password: password,
    }
}

/// Maps a resolver outcome to the status codes the external-interfaces
/// table specifies. `Redirect` is the only success path; everything else
/// is a taxonomy error the `IntoResponse for Error` impl already handles.
fn outcome_to_response(outcome: RedirectOutcome) -> Result<Response> {
    match outcome {
        RedirectOutcome::Redirect(location) => Ok((
            StatusCode::FOUND,
            [(header::LOCATION, location)],
        )
            .into_response()),
        RedirectOutcome::BotMetadata(preview) => Ok(Json(preview).into_response()),
        RedirectOutcome::PasswordRequired => Err(Error::PasswordRequired),
        RedirectOutcome::PasswordInvalid => Err(Error::PasswordInvalid),
        RedirectOutcome::Gone => Err(Error::Gone("this link has expired".to_string())),
        RedirectOutcome::Forbidden => Err(Error::Forbidden("this link is not accessible".to_string())),
        RedirectOutcome::NotFound => Err(Error::NotFound("short link not found".to_string())),
        RedirectOutcome::BadRequest => Err(Error::BadRequest("malformed short code".to_string())),
    }
}

async fn redirect(State(state): State<ShortlinkServices>, headers: axum::http::HeaderMap, Path(short_code): Path<String>) -> Result<Response> {
    let req = redirect_request(&headers, &short_code, None);
    outcome_to_response(state.resolver.redirect(&req).await)
}

#[derive(Debug, Deserialize)]
struct PasswordBody {
    password: String,
}

async fn redirect_with_password(
    State(state): State<ShortlinkServices>,
    headers: axum::http::HeaderMap,
    Path(short_code): Path<String>,
    Json(body): Json<PasswordBody>,
) -> Result<Response> {
    let req = redirect_request(&headers, &short_code, Some(body.password));
    outcome_to_response(state.resolver.redirect_with_password(&req).await)
}

async fn preview(State(state): State<ShortlinkServices>, headers: axum::http::HeaderMap, Path(short_code): Path<String>) -> Result<Response> {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    match state.resolver.preview(&host, &short_code).await {
        Ok(preview) => Ok(Json(preview).into_response()),
        Err(outcome) => outcome_to_response(outcome),
    }
}

/// Bearer-token extractor. Any verification failure collapses to
/// `Error::Unauthorized`, per the auth core's closed propagation policy
/// (spec §7: the auth core never recovers).
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<ShortlinkServices> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &ShortlinkServices) -> Result<Self> {
        let token = JwtAuth::extract_token(&parts.headers)?;
        let (_, user) = state.auth.verify_access(&token).await?;
        Ok(AuthUser(user))
    }
}

#[derive(Debug, Serialize)]
struct UserView {
    id: UserId,
    email: String,
    display_name: String,
    role: String,
    is_active: bool,
    is_email_verified: bool,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            role: u.role.clone(),
            is_active: u.is_active,
            is_email_verified: u.is_email_verified,
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: UserView,
    tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: String,
}

async fn register(State(state): State<ShortlinkServices>, Json(body): Json<RegisterRequest>) -> Result<Response> {
    let email = body.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::ValidationError("invalid email".to_string()));
    }
    if body.password.len() < 8 {
        return Err(Error::ValidationError("password must be at least 8 characters".to_string()));
    }

    if state.users.find_by_email(&email).await.map_err(map_repo_err)?.is_some() {
        return Err(Error::Conflict("an account with this email already exists".to_string()));
    }

    let password_hash = crate::auth::PasswordHasher::default().hash(&body.password)?;

    let created = state
        .users
        .create(crate::domain::CreateUser {
            email,
            password_hash: Some(password_hash),
            display_name: body.name,
            google_id: None,
            avatar: None,
            is_email_verified: false,
        })
        .await
        .map_err(map_repo_err)?;

    let (pair, _session) = state.auth.issue_pair(&created, None, None).await?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user: UserView::from(&created), tokens: pair })).into_response())
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(State(state): State<ShortlinkServices>, headers: axum::http::HeaderMap, Json(body): Json<LoginRequest>) -> Result<Response> {
    let email = body.email.trim().to_ascii_lowercase();
    let ip = client_ip(&headers);
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);

    let (user, pair) = state.auth.login_password(&email, &body.password, &ip, user_agent).await?;
    Ok(Json(AuthResponse { user: UserView::from(&user), tokens: pair }).into_response())
}

async fn logout(State(state): State<ShortlinkServices>, headers: axum::http::HeaderMap) -> Result<Response> {
    let token = JwtAuth::extract_token(&headers)?;
    state.auth.logout(&token, None).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(State(state): State<ShortlinkServices>, Json(body): Json<RefreshRequest>) -> Result<Response> {
    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(serde_json::json!({ "tokens": tokens })).into_response())
}

async fn me(AuthUser(user): AuthUser) -> Result<Response> {
    Ok(Json(UserView::from(&user)).into_response())
}

fn require_owner_or_admin(user: &User, owner: UserId) -> Result<()> {
    if user.id == owner || user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden("not the owner of this resource".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CreateLinkRequest {
    original_url: String,
    domain_id: Option<DomainId>,
    custom_code: Option<String>,
    title: Option<String>,
    description: Option<String>,
    campaign: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    password: Option<String>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    utm_parameters: std::collections::HashMap<String, String>,
    #[serde(default)]
    geo_restrictions: GeoRestrictions,
}

async fn create_link(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Json(body): Json<CreateLinkRequest>) -> Result<Response> {
    if let Some(custom_code) = &body.custom_code {
        if !SHORT_CODE_RE.is_match(custom_code) {
            return Err(Error::ValidationError(
                "custom code must be 1-50 characters of letters, digits, underscore, or hyphen".to_string(),
            ));
        }
    }

    let password_hash = body
        .password
        .as_deref()
        .map(|p| crate::auth::PasswordHasher::default().hash(p))
        .transpose()?;

    let link = state
        .links
        .create(CreateLink {
            owner_user_id: user.id,
            domain_id: body.domain_id,
            original_url: body.original_url,
            custom_code: body.custom_code,
            title: body.title,
            description: body.description,
            campaign: body.campaign,
            tags: body.tags,
            password_hash,
            expires_at: body.expires_at,
            utm_parameters: body.utm_parameters,
            geo_restrictions: body.geo_restrictions,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(link)).into_response())
}

async fn list_links(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser) -> Result<Response> {
    let links: Vec<Link> = state.links.list_by_owner(&user.id).await?;
    Ok(Json(serde_json::json!({ "items": links, "total": links.len() })).into_response())
}

async fn get_link(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Path(id): Path<LinkId>) -> Result<Response> {
    let link = state.links.get(&id).await?;
    require_owner_or_admin(&user, link.owner_user_id)?;
    Ok(Json(link).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct UpdateLinkRequest {
    title: Option<String>,
    description: Option<String>,
    campaign: Option<String>,
    tags: Option<Vec<String>>,
    is_active: Option<bool>,
    expires_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
    utm_parameters: Option<std::collections::HashMap<String, String>>,
    geo_restrictions: Option<GeoRestrictions>,
}

async fn update_link(
    State(state): State<ShortlinkServices>,
    AuthUser(user): AuthUser,
    Path(id): Path<LinkId>,
    Json(body): Json<UpdateLinkRequest>,
) -> Result<Response> {
    let existing = state.links.get(&id).await?;
    require_owner_or_admin(&user, existing.owner_user_id)?;

    let updated = state
        .links
        .update(
            &id,
            UpdateLink {
                title: body.title,
                description: body.description,
                campaign: body.campaign,
                tags: body.tags,
                password_hash: None,
                expires_at: body.expires_at,
                is_active: body.is_active,
                utm_parameters: body.utm_parameters,
                geo_restrictions: body.geo_restrictions,
            },
        )
        .await?;

    Ok(Json(updated).into_response())
}

async fn delete_link(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Path(id): Path<LinkId>) -> Result<Response> {
    let existing = state.links.get(&id).await?;
    require_owner_or_admin(&user, existing.owner_user_id)?;
    state.links.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct CreateDomainRequest {
    host: String,
    display_name: String,
    #[serde(default = "default_monthly_link_limit")]
    monthly_link_limit: i64,
}

fn default_monthly_link_limit() -> i64 {
    1000
}

async fn create_domain(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Json(body): Json<CreateDomainRequest>) -> Result<Response> {
    let domain = state
        .domains
        .add_domain(CreateDomain {
            owner_user_id: user.id,
            host: body.host,
            display_name: body.display_name,
            monthly_link_limit: body.monthly_link_limit,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(domain)).into_response())
}

async fn list_domains(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser) -> Result<Response> {
    let domains: Vec<Domain> = state.domains.list_by_owner(&user.id).await?;
    Ok(Json(serde_json::json!({ "items": domains, "total": domains.len() })).into_response())
}

async fn get_domain(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Path(id): Path<DomainId>) -> Result<Response> {
    let domain = state.domains.get_by_id(&id).await?;
    require_owner_or_admin(&user, domain.owner_user_id)?;
    Ok(Json(domain).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct UpdateDomainRequest {
    display_name: Option<String>,
    is_active: Option<bool>,
    monthly_link_limit: Option<i64>,
}

async fn update_domain(
    State(state): State<ShortlinkServices>,
    AuthUser(user): AuthUser,
    Path(id): Path<DomainId>,
    Json(body): Json<UpdateDomainRequest>,
) -> Result<Response> {
    let existing = state.domains.get_by_id(&id).await?;
    require_owner_or_admin(&user, existing.owner_user_id)?;

    let updated = state
        .domains
        .update(
            &id,
            UpdateDomain {
                display_name: body.display_name,
                is_active: body.is_active,
                monthly_link_limit: body.monthly_link_limit,
            },
        )
        .await?;
    Ok(Json(updated).into_response())
}

async fn delete_domain(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Path(id): Path<DomainId>) -> Result<Response> {
    let existing = state.domains.get_by_id(&id).await?;
    require_owner_or_admin(&user, existing.owner_user_id)?;
    state.domains.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn verify_domain(State(state): State<ShortlinkServices>, AuthUser(user): AuthUser, Path(id): Path<DomainId>) -> Result<Response> {
    let existing = state.domains.get_by_id(&id).await?;
    require_owner_or_admin(&user, existing.owner_user_id)?;
    let domain = state.domains.verify(&id).await?;
    Ok(Json(domain).into_response())
}

/// `GET /api/stats/live` — subscribes to the periodic snapshot broadcast.
/// The connection is registered with [`LiveStats`] for heartbeat tracking
/// on open and unregistered on stream drop (disconnect), matching the
/// spec's cancellation contract: no work is left scheduled per-subscriber.
async fn live_stats_stream(State(state): State<ShortlinkServices>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let connection_id = crate::sse::ConnectionId::new();
    state.live_stats.register(connection_id).await;
    let mut receiver = state.live_stats.subscribe().await;
    let live_stats = state.live_stats.clone();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let mut event = Event::default().data(message.data);
                    if let Some(event_type) = message.event_type {
                        event = event.event(event_type);
                    }
                    yield Ok(event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        live_stats.unregister(&connection_id).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
