//! Auth core
//!
//! Issues and verifies the access/refresh token pair, enforces the
//! brute-force limit on password login, and implements the one operation
//! that purges every outstanding token for a user: `token_version`
//! invalidation. This module is the orchestration layer on top of the
//! framework's `PasswordHasher`/`JwtGenerator` primitives and the
//! `LoginLockout` service — it is where the spec's closed-set error
//! taxonomy and the verification pipeline order actually live.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::PasswordHasher;
use crate::cache_ext::Cache;
use crate::domain::{CreateUser, Role, Session, SessionId, User, UserId};
use crate::error::{Error, Result};
use crate::lockout::LoginLockout;
use crate::store::UserRepository;

/// Which half of the pair a token is. Carried as a claim so a refresh
/// token can never be replayed where an access token is expected, and
/// vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims shared by both token kinds. `token_version` is the field that
/// makes logout-all work: it's compared against the live `User` row on
/// every verification, so bumping it invalidates every token issued
/// before the bump without touching a blacklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlinkClaims {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub token_version: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// An issued access/refresh pair, returned to the caller on login,
/// register, OAuth, and successful refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// The closed-set error taxonomy for password login, per spec §4.5. The
/// edge maps each to an HTTP status; `UserNotFound` is intentionally
/// distinguishable from the rest to enable a "smart signup" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    UserNotFound,
    AccountDeactivated,
    OauthUserNoPassword,
    InvalidPassword,
}

impl From<LoginError> for Error {
    fn from(e: LoginError) -> Self {
        match e {
            LoginError::UserNotFound => Error::NotFound("user not found".to_string()),
            LoginError::AccountDeactivated => Error::Forbidden("account is deactivated".to_string()),
            LoginError::OauthUserNoPassword => Error::BadRequest("account has no password set; sign in via OAuth".to_string()),
            LoginError::InvalidPassword => Error::Unauthorized("invalid credentials".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthCoreConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

impl Default for AuthCoreConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            issuer: "shortlink-service".to_string(),
            audience: "shortlink-clients".to_string(),
        }
    }
}

/// Composition of the token signing material, the user/session stores,
/// and the brute-force limiter the login/refresh/logout flows share.
#[derive(Clone)]
pub struct AuthCore {
    users: UserRepository,
    cache: Cache,
    lockout: Arc<LoginLockout>,
    passwords: PasswordHasher,
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    config: AuthCoreConfig,
}

impl AuthCore {
    #[must_use]
    pub fn new(users: UserRepository, cache: Cache, lockout: Arc<LoginLockout>, passwords: PasswordHasher, jwt_secret: &[u8], config: AuthCoreConfig) -> Self {
        Self {
            users,
            cache,
            lockout,
            passwords,
            encoding_key: Arc::new(EncodingKey::from_secret(jwt_secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(jwt_secret)),
            config,
        }
    }

    fn sign(&self, user: &User, token_type: TokenType) -> Result<String> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.config.access_ttl,
            TokenType::Refresh => self.config.refresh_ttl,
        };
        let claims = ShortlinkClaims {
            user_id: user.id,
            email: matches!(token_type, TokenType::Access).then(|| user.email.clone()),
            role: matches!(token_type, TokenType::Access).then(|| user.role()),
            token_version: user.token_version,
            token_type,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl.as_secs() as i64,
            iss: Some(self.config.issuer.clone()),
            aud: Some(self.config.audience.clone()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| Error::Jwt(Box::new(e)))
    }

    /// Issues a fresh access/refresh pair for `user` and records a
    /// `Session` in the cache keyed `session:<id>`.
    pub async fn issue_pair(&self, user: &User, ip: Option<String>, user_agent: Option<String>) -> Result<(TokenPair, Session)> {
        let access_token = self.sign(user, TokenType::Access)?;
        let refresh_token = self.sign(user, TokenType::Refresh)?;

        let session = Session {
            session_id: SessionId::new(),
            user_id: user.id,
            issued_at: Utc::now(),
            last_activity: Utc::now(),
            ip,
            user_agent,
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
        };
        self.cache.set(&session_key(&session.session_id), &session, self.config.refresh_ttl).await?;

        Ok((TokenPair { access_token, refresh_token }, session))
    }

    /// Decodes and structurally validates a token — signature, expiry,
    /// issuer/audience — without yet checking blacklist or token-version.
    fn decode(&self, token: &str) -> Result<ShortlinkClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        decode::<ShortlinkClaims>(token, &self.decoding_key, &validation)
            .map(|d| d.claims)
            .map_err(|e| Error::Jwt(Box::new(e)))
    }

    /// The five-step verification pipeline from spec §4.5, specialized to
    /// one expected `token_type`. Any failure collapses to
    /// `Error::Unauthorized` — the auth core never distinguishes *why* a
    /// token failed to an external caller.
    async fn verify(&self, token: &str, expected: TokenType) -> Result<(ShortlinkClaims, User)> {
        if self.cache.exists(&blacklist_key(token)).await.unwrap_or(false) {
            return Err(Error::Unauthorized("token has been revoked".to_string()));
        }

        let claims = self.decode(token).map_err(|_| Error::Unauthorized("invalid or expired token".to_string()))?;

        if claims.token_type != expected {
            return Err(Error::Unauthorized("wrong token type".to_string()));
        }

        let user = self
            .users
            .find_by_id(&claims.user_id)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .ok_or_else(|| Error::Unauthorized("user no longer exists".to_string()))?;

        if !user.is_active {
            return Err(Error::Unauthorized("account is deactivated".to_string()));
        }

        if user.token_version != claims.token_version {
            return Err(Error::Unauthorized("token has been superseded".to_string()));
        }

        Ok((claims, user))
    }

    pub async fn verify_access(&self, token: &str) -> Result<(ShortlinkClaims, User)> {
        self.verify(token, TokenType::Access).await
    }

    pub async fn verify_refresh(&self, token: &str) -> Result<(ShortlinkClaims, User)> {
        self.verify(token, TokenType::Refresh).await
    }

    /// Blacklists `token` for (approximately) its remaining lifetime, so a
    /// presented-but-not-yet-expired token can never be replayed.
    async fn blacklist(&self, token: &str) -> Result<()> {
        let remaining = self
            .decode(token)
            .ok()
            .map(|c| (c.exp - Utc::now().timestamp()).max(1))
            .unwrap_or(self.config.refresh_ttl.as_secs() as i64);
        self.cache.set(&blacklist_key(token), &true, Duration::from_secs(remaining as u64)).await
    }

    /// Password login. Inputs are expected already normalized (lowercased,
    /// trimmed) by the caller. Checks the per-identity+IP brute-force
    /// counter before touching the user store.
    pub async fn login_password(&self, email: &str, password: &str, ip: &str, user_agent: Option<String>) -> Result<(User, TokenPair)> {
        let identity = format!("{email}:{ip}");
        let status = self.lockout.check(&identity).await?;
        if status.locked {
            return Err(Error::RateLimited { retry_after_secs: status.lockout_remaining_secs });
        }

        let user = match self.users.find_by_email(email).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                self.lockout.record_failure(&identity).await?;
                return Err(LoginError::UserNotFound.into());
            }
            Err(e) => return Err(Error::Internal(e.to_string())),
        };

        if !user.is_active {
            return Err(LoginError::AccountDeactivated.into());
        }

        let Some(hash) = &user.password_hash else {
            return Err(LoginError::OauthUserNoPassword.into());
        };

        let matches = self.passwords.verify(password, hash).unwrap_or(false);
        if !matches {
            self.lockout.record_failure(&identity).await?;
            return Err(LoginError::InvalidPassword.into());
        }

        self.lockout.record_success(&identity).await?;
        self.users.touch_last_seen(&user.id).await.map_err(|e| Error::Internal(e.to_string()))?;

        let (pair, _session) = self.issue_pair(&user, Some(ip.to_string()), user_agent).await?;
        Ok((user, pair))
    }

    /// OAuth login: maps an already-resolved local `User` (created or
    /// found by the caller from the provider identity) straight to a
    /// token pair, identical to the tail of the password flow.
    pub async fn login_oauth(&self, user: &User, ip: Option<String>, user_agent: Option<String>) -> Result<TokenPair> {
        self.users.touch_last_seen(&user.id).await.map_err(|e| Error::Internal(e.to_string()))?;
        let (pair, _session) = self.issue_pair(user, ip, user_agent).await?;
        Ok(pair)
    }

    /// Finds or creates a local user for an OAuth identity. New users are
    /// created pre-verified and without a password, per spec §4.5.
    pub async fn find_or_create_oauth_user(&self, google_id: &str, email: &str, display_name: &str, avatar: Option<String>) -> Result<User> {
        if let Some(user) = self.users.find_by_google_id(google_id).await.map_err(|e| Error::Internal(e.to_string()))? {
            return Ok(user);
        }
        if let Some(user) = self.users.find_by_email(email).await.map_err(|e| Error::Internal(e.to_string()))? {
            return Ok(user);
        }
        self.users
            .create(CreateUser {
                email: email.to_string(),
                password_hash: None,
                display_name: display_name.to_string(),
                google_id: Some(google_id.to_string()),
                avatar,
                is_email_verified: true,
            })
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Refresh rotation: verifies the presented refresh token, blacklists
    /// it, and mints a fresh pair. An invalid refresh token is itself
    /// blacklisted (for whatever lifetime can be recovered from it) so
    /// repeated probing with the same forged/expired token doesn't keep
    /// re-triggering the full verification path.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let verified = self.verify_refresh(refresh_token).await;
        let (_, user) = match verified {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.blacklist(refresh_token).await;
                return Err(e);
            }
        };

        self.blacklist(refresh_token).await?;
        self.users.touch_last_seen(&user.id).await.map_err(|e| Error::Internal(e.to_string()))?;
        self.issue_pair(&user, None, None).await.map(|(pair, _)| pair)
    }

    /// Logout: blacklists the access token (and its paired refresh token,
    /// if the session record is still around) for their remaining TTLs,
    /// then drops the session.
    pub async fn logout(&self, access_token: &str, session_id: Option<&SessionId>) -> Result<()> {
        self.blacklist(access_token).await?;

        if let Some(id) = session_id {
            if let Ok(Some(session)) = self.cache.get::<Session>(&session_key(id)).await {
                let _ = self.blacklist(&session.refresh_token).await;
                self.users.touch_last_logout(&session.user_id).await.map_err(|e| Error::Internal(e.to_string()))?;
            }
            self.cache.del(&session_key(id)).await?;
        }
        Ok(())
    }

    /// Logout-all: bumps `token_version`, which invalidates every token
    /// already issued (verification step 5 fails for all of them from
    /// this point on) regardless of TTL. Sessions found via the key scan
    /// are additionally blacklisted and deleted so still-open viewers fail
    /// cleanly rather than hitting a confusing "token version mismatch".
    pub async fn logout_all(&self, user_id: &UserId) -> Result<()> {
        self.users.bump_token_version(user_id).await.map_err(|e| Error::Internal(e.to_string()))?;

        let pattern = "session:*".to_string();
        if let Ok(keys) = self.cache.keys(&pattern).await {
            for key in keys {
                if let Ok(Some(session)) = self.cache.get::<Session>(&key).await {
                    if session.user_id == *user_id {
                        let _ = self.blacklist(&session.access_token).await;
                        let _ = self.blacklist(&session.refresh_token).await;
                        let _ = self.cache.del(&key).await;
                    }
                }
            }
        }
        Ok(())
    }
}

fn session_key(id: &SessionId) -> String {
    format!("session:{id}")
}

fn blacklist_key(token: &str) -> String {
    format!("blacklist:{}", blake3::hash(token.as_bytes()).to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_key_is_stable_for_same_token() {
        assert_eq!(blacklist_key("abc"), blacklist_key("abc"));
        assert_ne!(blacklist_key("abc"), blacklist_key("def"));
    }

    #[test]
    fn session_key_is_namespaced() {
        let id = SessionId::new();
        assert!(session_key(&id).starts_with("session:"));
    }

    #[test]
    fn login_error_maps_to_closed_set_http_taxonomy() {
        assert!(matches!(Error::from(LoginError::UserNotFound), Error::NotFound(_)));
        assert!(matches!(Error::from(LoginError::AccountDeactivated), Error::Forbidden(_)));
        assert!(matches!(Error::from(LoginError::OauthUserNoPassword), Error::BadRequest(_)));
        assert!(matches!(Error::from(LoginError::InvalidPassword), Error::Unauthorized(_)));
    }
}
