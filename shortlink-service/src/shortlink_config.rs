//! Application-specific configuration extension
//!
//! Plugs into [`Config<T>`](crate::config::Config) as `Config<ShortlinkConfig>`,
//! carrying the handful of environment variables the redirect engine and
//! analytics gateway need that don't already have a home in the framework's
//! `ServiceConfig`/`DatabaseConfig`/`RedisConfig`/`JwtConfig` structs.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;

fn default_system_domain() -> String {
    "localhost".to_string()
}

fn default_server_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    Vec::new()
}

/// The redirect engine's operator-facing environment contract, layered on
/// top of the generic [`Config<T>`](crate::config::Config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlinkConfig {
    /// Canonical host served by this process; Links with `domain_id IS NULL`
    /// resolve under this host.
    #[serde(default = "default_system_domain")]
    pub system_domain: String,

    /// Advertised in the DNS-TXT setup instructions shown to tenants adding
    /// a custom domain.
    #[serde(default = "default_server_ip")]
    pub server_ip: String,

    /// When `true`, startup fails if the analytics index is unreachable
    /// rather than falling back to mock mode.
    #[serde(default)]
    pub require_elasticsearch: bool,

    /// Enables the background OpenGraph/`<title>` metadata fetch job.
    #[serde(default)]
    pub auto_fetch_metadata: bool,

    /// Origins allowed by CORS, parsed from a CSV environment value.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ShortlinkConfig {
    fn default() -> Self {
        Self {
            system_domain: default_system_domain(),
            server_ip: default_server_ip(),
            require_elasticsearch: false,
            auto_fetch_metadata: false,
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Loads `Config<ShortlinkConfig>` the same way [`Config::load_for_service`]
/// does (file → `ACTON_`-prefixed env → defaults), plus a second env layer
/// for the operator-familiar unprefixed names spec'd for this service
/// (`SYSTEM_DOMAIN`, `SERVER_IP`, `REQUIRE_ELASTICSEARCH`,
/// `AUTO_FETCH_METADATA`, `ALLOWED_ORIGINS`, and the `DATABASE_URL`/
/// `REDIS_URL`/`JWT_ISSUER`/`JWT_AUDIENCE` aliases), mapped onto their
/// nested positions in the config tree.
pub fn load_shortlink_config(service_name: &str) -> Result<Config<ShortlinkConfig>> {
    let mut figment = Figment::new().merge(Serialized::defaults(Config::<ShortlinkConfig>::default()));

    for path in ["config.toml"] {
        if std::path::Path::new(path).exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    figment = figment
        .merge(Env::prefixed("ACTON_").split("_"))
        .merge(
            Env::raw()
                .only(&["SYSTEM_DOMAIN", "REQUIRE_ELASTICSEARCH", "AUTO_FETCH_METADATA"])
                .map(|key| format!("custom.{}", key.as_str().to_lowercase()).into()),
        )
        .merge(Env::raw().only(&["SERVER_IP"]).map(|_| "custom.server_ip".into()))
        .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
        .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "redis.url".into()))
        .merge(Env::raw().only(&["JWT_ISSUER"]).map(|_| "jwt.issuer".into()))
        .merge(Env::raw().only(&["JWT_AUDIENCE"]).map(|_| "jwt.audience".into()));

    if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
        let list: Vec<String> = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        figment = figment.merge(Serialized::default("custom.allowed_origins", list));
    }

    let _ = service_name;
    let config = figment.extract()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe_for_local_dev() {
        let config = ShortlinkConfig::default();
        assert_eq!(config.system_domain, "localhost");
        assert!(!config.require_elasticsearch);
        assert!(!config.auto_fetch_metadata);
        assert!(config.allowed_origins.is_empty());
    }
}
