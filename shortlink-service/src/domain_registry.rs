//! Domain registry
//!
//! Owns custom-domain lifecycle on top of [`DomainRepository`]: issuing a
//! verification token at creation, confirming ownership via a DNS TXT
//! record, and the resolution lookup the link registry and resolver
//! depend on. Usage accounting (monthly link count) lives here too since
//! it is driven by the same Domain row the registry already owns.

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::{config::ResolverConfig, name_server::TokioConnectionProvider, Resolver};

use crate::domain::{CreateDomain, Domain, DomainId, UpdateDomain, UserId};
use crate::error::{Error, Result};
use crate::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use crate::store::DomainRepository;

/// Converts the store layer's structured error into the HTTP-facing
/// error taxonomy. `NotFound`/`AlreadyExists` map to their HTTP-shaped
/// counterparts; everything else surfaces as internal, since by the time
/// a repository call fails for any other reason there's nothing
/// actionable the caller can do about it.
fn map_repo_err(e: RepositoryError) -> Error {
    match e.kind {
        RepositoryErrorKind::NotFound => Error::NotFound(e.message),
        RepositoryErrorKind::AlreadyExists => Error::Conflict(e.message),
        RepositoryErrorKind::ValidationFailed => Error::ValidationError(e.message),
        RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout => {
            Error::DependencyDegraded(e.message)
        }
        _ => Error::Internal(e.to_string()),
    }
}

/// The well-known DNS TXT record name a domain owner publishes to prove
/// control of `host`, per the resolution rule in [`DomainRegistry::verify`].
fn verification_record_name(host: &str) -> String {
    format!("_shortlink-verify.{host}")
}

/// Verifies domain ownership by DNS lookup. Abstracted behind a trait so
/// tests can substitute a fixed TXT-record table instead of issuing real
/// DNS queries.
#[async_trait::async_trait]
pub trait DnsVerifier: Send + Sync {
    /// Returns `true` iff `token` appears, verbatim, among the TXT records
    /// for `_shortlink-verify.<host>`.
    async fn verify_txt_record(&self, host: &str, token: &str) -> Result<bool>;
}

/// Verifies against live DNS via `hickory-resolver`, bounded by a 5s
/// deadline per the per-operation deadline table.
pub struct HickoryDnsVerifier {
    resolver: Resolver<TokioConnectionProvider>,
}

impl HickoryDnsVerifier {
    #[must_use]
    pub fn new() -> Self {
        let resolver = Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default()).build();
        Self { resolver }
    }
}

impl Default for HickoryDnsVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DnsVerifier for HickoryDnsVerifier {
    async fn verify_txt_record(&self, host: &str, token: &str) -> Result<bool> {
        let record_name = verification_record_name(host);
        let lookup = tokio::time::timeout(Duration::from_secs(5), self.resolver.txt_lookup(record_name.clone())).await;

        match lookup {
            Ok(Ok(txt)) => Ok(txt.iter().any(|record| record.to_string().trim_matches('"') == token)),
            Ok(Err(e)) => {
                tracing::info!(host, error = %e, "DNS TXT lookup returned no verification record");
                Ok(false)
            }
            Err(_) => {
                tracing::warn!(host, "DNS TXT lookup for domain verification timed out");
                Err(Error::DependencyDegraded("DNS verification timed out".to_string()))
            }
        }
    }
}

/// Custom-domain registry: creation, DNS verification, resolution lookup,
/// usage accounting, and guarded deletion.
#[derive(Clone)]
pub struct DomainRegistry {
    repo: DomainRepository,
    dns: Arc<dyn DnsVerifier>,
}

impl DomainRegistry {
    #[must_use]
    pub fn new(repo: DomainRepository, dns: Arc<dyn DnsVerifier>) -> Self {
        Self { repo, dns }
    }

    /// Registers a new custom domain. The returned Domain is inactive and
    /// unverified until [`DomainRegistry::verify`] succeeds.
    pub async fn add_domain(&self, data: CreateDomain) -> Result<Domain> {
        self.repo.create(data).await.map_err(map_repo_err)
    }

    /// Confirms ownership of `id` by checking for the expected DNS TXT
    /// record, then marks the domain active and verified. Returns the
    /// updated Domain on success; a false/missing record is reported as a
    /// validation error rather than silently leaving the domain pending.
    pub async fn verify(&self, id: &DomainId) -> Result<Domain> {
        let domain = self.repo.find_by_id(id).await.map_err(map_repo_err)?.ok_or_else(|| Error::NotFound("Domain not found".to_string()))?;

        let verified = self.dns.verify_txt_record(&domain.host, &domain.verification_token).await?;
        if !verified {
            return Err(Error::ValidationError(format!(
                "expected TXT record {} = {} not found",
                verification_record_name(&domain.host),
                domain.verification_token
            )));
        }

        self.repo.mark_verified(id).await.map_err(map_repo_err)
    }

    /// Resolution lookup: returns the Domain only if it's both active and
    /// verified, as required before any Link under it can be resolved.
    pub async fn get_active_by_host(&self, host: &str) -> Result<Option<Domain>> {
        let host = normalize_host(host);
        self.repo.find_active_by_host(&host).await.map_err(map_repo_err)
    }

    pub async fn get_by_id(&self, id: &DomainId) -> Result<Domain> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(map_repo_err)?
            .ok_or_else(|| Error::NotFound("Domain not found".to_string()))
    }

    pub async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Domain>> {
        self.repo.find_by_owner(owner).await.map_err(map_repo_err)
    }

    pub async fn update(&self, id: &DomainId, data: UpdateDomain) -> Result<Domain> {
        self.repo.update(id, data).await.map_err(map_repo_err)
    }

    /// Deletes a domain, refusing when active Links still reference it —
    /// deleting out from under live redirects would orphan them.
    pub async fn delete(&self, id: &DomainId) -> Result<()> {
        if self.repo.has_active_links(id).await.map_err(map_repo_err)? {
            return Err(Error::Conflict("domain has active links and cannot be deleted".to_string()));
        }
        let deleted = self.repo.delete(id).await.map_err(map_repo_err)?;
        if !deleted {
            return Err(Error::NotFound("Domain not found".to_string()));
        }
        Ok(())
    }

    /// Bumps monthly usage; called by the link registry whenever a Link is
    /// created under this domain.
    pub async fn record_link_created(&self, id: &DomainId) -> Result<()> {
        self.repo.increment_usage(id).await.map_err(map_repo_err)
    }

    /// Idempotent manual usage reset. There is no scheduler driving this —
    /// an operator or an external cron calls it once a billing period.
    pub async fn reset_usage(&self, id: &DomainId) -> Result<Domain> {
        self.repo.reset_usage(id).await.map_err(map_repo_err)
    }

    pub fn repository(&self) -> &DomainRepository {
        &self.repo
    }
}

/// Strips a trailing port and lowercases, matching the resolver's host
/// normalization rule so the registry and the hot path agree on identity.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    host.split(':').next().unwrap_or(host).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedDnsVerifier {
        records: Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl DnsVerifier for FixedDnsVerifier {
        async fn verify_txt_record(&self, host: &str, token: &str) -> Result<bool> {
            let records = self.records.lock().unwrap();
            Ok(records.get(host).map(|v| v == token).unwrap_or(false))
        }
    }

    #[test]
    fn normalize_host_strips_port_and_lowercases() {
        assert_eq!(normalize_host("Example.COM:8443"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn verification_record_name_is_well_known_prefix() {
        assert_eq!(verification_record_name("links.acme.com"), "_shortlink-verify.links.acme.com");
    }

    #[tokio::test]
    async fn dns_verifier_matches_exact_token() {
        let mut records = HashMap::new();
        records.insert("acme.com".to_string(), "abc123".to_string());
        let verifier = FixedDnsVerifier { records: Mutex::new(records) };

        assert!(verifier.verify_txt_record("acme.com", "abc123").await.unwrap());
        assert!(!verifier.verify_txt_record("acme.com", "wrong-token").await.unwrap());
        assert!(!verifier.verify_txt_record("unknown.com", "abc123").await.unwrap());
    }
}
