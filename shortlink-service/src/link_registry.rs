//! Link registry
//!
//! Short-code allocation, metadata edits, and the access-control policy
//! (`can_access`) applied to every resolution. The resolver composes this
//! with [`DomainRegistry`](crate::domain_registry::DomainRegistry) to turn
//! `(host, short_code)` into a concrete Link; this module owns everything
//! about a Link once one has been found, including the final-URL
//! assembly that appends UTM parameters before the redirect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use url::Url;

use crate::domain::{CreateLink, DomainId, GeoMode, Link, LinkId, UpdateLink, UserId};
use crate::domain_registry::{normalize_host, DomainRegistry};
use crate::error::{Error, Result};
use crate::repository::{RepositoryError, RepositoryErrorKind};
use crate::store::{CreateLinkError, LinkRepository};

fn map_repo_err(e: RepositoryError) -> Error {
    match e.kind {
        RepositoryErrorKind::NotFound => Error::NotFound(e.message),
        RepositoryErrorKind::AlreadyExists => Error::Conflict(e.message),
        RepositoryErrorKind::ValidationFailed => Error::ValidationError(e.message),
        RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout => Error::DependencyDegraded(e.message),
        _ => Error::Internal(e.to_string()),
    }
}

fn map_create_err(e: CreateLinkError) -> Error {
    match e {
        CreateLinkError::Duplicate(d) => Error::Conflict(d.to_string()),
        CreateLinkError::Exhausted(e) => Error::Internal(e.to_string()),
        CreateLinkError::Repository(e) => map_repo_err(e),
    }
}

/// Where the lookup for `(host, short_code)` landed, before the resolver
/// applies its policy checks. Distinguishing these two failure modes
/// matters: the spec's redirect engine reports `DOMAIN_NOT_FOUND` and
/// `LINK_NOT_FOUND` as separate 404 reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    DomainNotFound,
    LinkNotFound,
}

/// Why [`LinkRegistry::can_access`] denied a request, in the policy
/// evaluation order the resolver follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    Expired,
    Deactivated,
    GeoBlocked,
    PasswordRequired,
    PasswordInvalid,
}

/// Caller-supplied request context `can_access` needs: their resolved
/// country (if known) and, for the password-gated retry, the password
/// they presented.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub country: Option<String>,
    pub presented_password: Option<String>,
}

/// Wraps [`LinkRepository`] with the registry-level operations: creation
/// (including domain usage accounting), owner-scoped reads/writes,
/// resolution, access policy, and final-URL assembly.
#[derive(Clone)]
pub struct LinkRegistry {
    repo: LinkRepository,
    domains: DomainRegistry,
}

impl LinkRegistry {
    #[must_use]
    pub fn new(repo: LinkRepository, domains: DomainRegistry) -> Self {
        Self { repo, domains }
    }

    /// Creates a Link, bumping the owning domain's monthly usage counter
    /// when it belongs to one.
    pub async fn create(&self, data: CreateLink) -> Result<Link> {
        let domain_id = data.domain_id;
        let link = self.repo.create_link(data).await.map_err(map_create_err)?;
        if let Some(domain_id) = domain_id {
            self.domains.record_link_created(&domain_id).await?;
        }
        Ok(link)
    }

    pub async fn get(&self, id: &LinkId) -> Result<Link> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(map_repo_err)?
            .ok_or_else(|| Error::NotFound("Link not found".to_string()))
    }

    pub async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Link>> {
        self.repo.find_by_owner(owner).await.map_err(map_repo_err)
    }

    pub async fn update(&self, id: &LinkId, data: UpdateLink) -> Result<Link> {
        self.repo.update(id, data).await.map_err(map_repo_err)
    }

    /// Soft-deletes (deactivates) a Link, preserving its row for
    /// historical click attribution.
    pub async fn delete(&self, id: &LinkId) -> Result<()> {
        let deleted = self.repo.delete(id).await.map_err(map_repo_err)?;
        if !deleted {
            return Err(Error::NotFound("Link not found".to_string()));
        }
        Ok(())
    }

    /// Resolves `(host, short_code)` to a Link, per the rule: a system-host
    /// request looks up `domain_id IS NULL`; anything else requires an
    /// active, verified [`Domain`](crate::domain::Domain) first.
    pub async fn resolve(&self, host: &str, short_code: &str, system_domain: &str) -> std::result::Result<Link, ResolutionError> {
        let normalized_host = normalize_host(host);
        let normalized_system = normalize_host(system_domain);

        let domain_id: Option<DomainId> = if normalized_host == normalized_system {
            None
        } else {
            let domain = self
                .domains
                .get_active_by_host(&normalized_host)
                .await
                .map_err(|_| ResolutionError::DomainNotFound)?
                .ok_or(ResolutionError::DomainNotFound)?;
            Some(domain.id)
        };

        self.repo
            .find_by_short_code_and_domain(short_code, domain_id)
            .await
            .map_err(|_| ResolutionError::LinkNotFound)?
            .filter(|link| link.is_active)
            .ok_or(ResolutionError::LinkNotFound)
    }

    /// Non-destructive lookup for the preview endpoint: same resolution,
    /// no policy checks, no side effects.
    pub async fn preview(&self, host: &str, short_code: &str, system_domain: &str) -> std::result::Result<Link, ResolutionError> {
        self.resolve(host, short_code, system_domain).await
    }

    /// Evaluates access policy in the spec's fixed order: liveness
    /// (active + not expired), geo-restriction, then password gate.
    /// Returns the first applicable denial, or `Ok(())` if the request
    /// may proceed.
    pub fn can_access(link: &Link, ctx: &AccessContext, now: DateTime<Utc>, password_matches: impl FnOnce(&str, &str) -> bool) -> std::result::Result<(), AccessDenial> {
        if !link.is_active {
            return Err(AccessDenial::Deactivated);
        }
        if link.is_expired(now) {
            return Err(AccessDenial::Expired);
        }

        if let Some(mode) = link.geo_restrictions.mode {
            if let Some(country) = &ctx.country {
                let in_list = link.geo_restrictions.countries.iter().any(|c| c.eq_ignore_ascii_case(country));
                let blocked = match mode {
                    GeoMode::Deny => in_list,
                    GeoMode::Allow => !in_list,
                };
                if blocked {
                    return Err(AccessDenial::GeoBlocked);
                }
            }
            // Unknown location matches neither an allow nor a deny list.
        }

        if link.requires_password() {
            match (&link.password_hash, &ctx.presented_password) {
                (Some(_), None) => return Err(AccessDenial::PasswordRequired),
                (Some(hash), Some(presented)) => {
                    if !password_matches(presented, hash) {
                        return Err(AccessDenial::PasswordInvalid);
                    }
                }
                (None, _) => unreachable!("requires_password() implies password_hash is Some"),
            }
        }

        Ok(())
    }

    /// Appends each `utmParameters` entry to `original_url` as a query
    /// parameter, serializing the result. Idempotent: a key already
    /// present in the URL's query string is overwritten in place rather
    /// than duplicated.
    pub fn build_final_url(link: &Link) -> Result<String> {
        let mut url = Url::parse(&link.original_url).map_err(|e| Error::ValidationError(format!("invalid original_url: {e}")))?;

        if link.utm_parameters.is_empty() {
            return Ok(url.to_string());
        }

        let existing: HashMap<String, String> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        let mut merged = existing;
        for (key, value) in &link.utm_parameters {
            merged.insert(key.clone(), value.clone());
        }

        let mut pairs: Vec<_> = merged.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        Ok(url.to_string())
    }

    pub fn repository(&self) -> &LinkRepository {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_link() -> Link {
        Link {
            id: LinkId::new(),
            owner_user_id: UserId::new(),
            domain_id: None,
            original_url: "https://example.com/landing".to_string(),
            short_code: "abc123".to_string(),
            custom_code: false,
            title: None,
            description: None,
            campaign: None,
            tags: vec![],
            password_hash: None,
            expires_at: None,
            is_active: true,
            click_count: 0,
            unique_clicks: 0,
            last_click_at: None,
            utm_parameters: HashMap::new(),
            url_metadata: HashMap::new(),
            geo_restrictions: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn build_final_url_is_a_no_op_with_no_utm_parameters() {
        let link = sample_link();
        let url = LinkRegistry::build_final_url(&link).unwrap();
        assert_eq!(url, "https://example.com/landing");
    }

    #[test]
    fn build_final_url_appends_utm_parameters() {
        let mut link = sample_link();
        link.utm_parameters.insert("utm_source".to_string(), "newsletter".to_string());
        let url = LinkRegistry::build_final_url(&link).unwrap();
        assert!(url.contains("utm_source=newsletter"));
    }

    #[test]
    fn build_final_url_is_idempotent() {
        let mut link = sample_link();
        link.original_url = "https://example.com/landing?utm_source=newsletter".to_string();
        link.utm_parameters.insert("utm_source".to_string(), "newsletter".to_string());
        let url = LinkRegistry::build_final_url(&link).unwrap();
        let occurrences = url.matches("utm_source").count();
        assert_eq!(occurrences, 1);
    }

    fn always_correct(presented: &str, _hash: &str) -> bool {
        presented == "correct"
    }

    #[test]
    fn can_access_denies_expired_link() {
        let mut link = sample_link();
        link.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let ctx = AccessContext::default();
        let result = LinkRegistry::can_access(&link, &ctx, Utc::now(), always_correct);
        assert_eq!(result, Err(AccessDenial::Expired));
    }

    #[test]
    fn can_access_denies_deactivated_link() {
        let mut link = sample_link();
        link.is_active = false;
        let ctx = AccessContext::default();
        assert_eq!(LinkRegistry::can_access(&link, &ctx, Utc::now(), always_correct), Err(AccessDenial::Deactivated));
    }

    #[test]
    fn can_access_geo_deny_blocks_listed_country() {
        let mut link = sample_link();
        link.geo_restrictions.mode = Some(GeoMode::Deny);
        link.geo_restrictions.countries = vec!["FR".to_string()];
        let ctx = AccessContext { country: Some("FR".to_string()), presented_password: None };
        assert_eq!(LinkRegistry::can_access(&link, &ctx, Utc::now(), always_correct), Err(AccessDenial::GeoBlocked));
    }

    #[test]
    fn can_access_geo_allow_permits_listed_country_only() {
        let mut link = sample_link();
        link.geo_restrictions.mode = Some(GeoMode::Allow);
        link.geo_restrictions.countries = vec!["US".to_string()];
        let blocked_ctx = AccessContext { country: Some("DE".to_string()), presented_password: None };
        let allowed_ctx = AccessContext { country: Some("US".to_string()), presented_password: None };
        assert_eq!(LinkRegistry::can_access(&link, &blocked_ctx, Utc::now(), always_correct), Err(AccessDenial::GeoBlocked));
        assert_eq!(LinkRegistry::can_access(&link, &allowed_ctx, Utc::now(), always_correct), Ok(()));
    }

    #[test]
    fn can_access_unknown_location_matches_neither_list() {
        let mut link = sample_link();
        link.geo_restrictions.mode = Some(GeoMode::Allow);
        link.geo_restrictions.countries = vec!["US".to_string()];
        let ctx = AccessContext { country: None, presented_password: None };
        assert_eq!(LinkRegistry::can_access(&link, &ctx, Utc::now(), always_correct), Ok(()));
    }

    #[test]
    fn can_access_requires_password_when_set() {
        let mut link = sample_link();
        link.password_hash = Some("hashed".to_string());
        let ctx = AccessContext::default();
        assert_eq!(LinkRegistry::can_access(&link, &ctx, Utc::now(), always_correct), Err(AccessDenial::PasswordRequired));

        let ctx_wrong = AccessContext { country: None, presented_password: Some("wrong".to_string()) };
        assert_eq!(LinkRegistry::can_access(&link, &ctx_wrong, Utc::now(), always_correct), Err(AccessDenial::PasswordInvalid));

        let ctx_right = AccessContext { country: None, presented_password: Some("correct".to_string()) };
        assert_eq!(LinkRegistry::can_access(&link, &ctx_right, Utc::now(), always_correct), Ok(()));
    }
}
