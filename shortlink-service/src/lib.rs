//! # shortlink-service
//!
//! Multi-tenant URL shortener backend: redirect data plane, link/domain
//! registries, click analytics pipeline, and the auth/rate-limiting stack
//! that guards them.
//!
//! ## Features
//!
//! - **HTTP surface** (axum): redirect resolver, link/domain registries,
//!   auth, live-stats SSE
//! - **Middleware stack**: JWT auth, rate limiting, request tracking,
//!   panic recovery, body size limits
//! - **Observability**: OpenTelemetry tracing, HTTP metrics, request ID propagation
//! - **Connection pooling**: PostgreSQL, Redis
//! - **Health checks**: liveness and readiness probes
//! - **Graceful shutdown**: proper signal handling (SIGTERM, SIGINT)
//!
//! ## Example
//!
//! ```rust,no_run
//! use shortlink_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Build application state
//!     let state = AppState::builder()
//!         .config(config.clone())
//!         .build()
//!         .await?;
//!
//!     // Create router
//!     let app = Router::new()
//!         .route("/health", get(health))
//!         .route("/ready", get(readiness))
//!         .with_state(state);
//!
//!     // Run server
//!     Server::new(config)
//!         .serve(app)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod health;
pub mod pool_health;
pub mod responses;
pub mod server;
pub mod service_builder;
pub mod state;
pub mod versioning;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "cache")]
pub mod cache;

pub mod observability;

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "session")]
pub mod session;

#[cfg(feature = "sse")]
pub mod sse;

pub mod domain;
pub mod analytics;
pub mod jobs;
pub mod handlers;
pub mod repository;
pub mod lockout;
pub mod shortlink_config;

#[cfg(feature = "database")]
pub mod store;

#[cfg(feature = "cache")]
pub mod cache_ext;

#[cfg(feature = "database")]
pub mod domain_registry;

#[cfg(feature = "database")]
pub mod link_registry;

#[cfg(all(feature = "database", feature = "cache", feature = "auth"))]
pub mod resolver;

#[cfg(all(feature = "auth", feature = "cache", feature = "database", feature = "jwt"))]
pub mod auth_core;

#[cfg(all(feature = "sse", feature = "database"))]
pub mod live_stats;

#[cfg(all(feature = "auth", feature = "cache", feature = "database", feature = "jwt", feature = "sse"))]
pub mod routes;

/// Internal agent-based components
///
/// Connection pool management is handled internally by agents. Callers don't
/// need to interact with this module directly - just use `ServiceBuilder::build()`
/// and access pools via `state.db()`, `state.redis()`, etc.
///
/// The only caller-facing types from this module are:
/// - [`BackgroundWorker`](agents::BackgroundWorker) - for managed background tasks
/// - [`TaskStatus`](agents::TaskStatus) - for checking background task status
/// - [`HealthStatus`](agents::HealthStatus) - for health check results
pub mod agents;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, RateLimitConfig, RouteRateLimitConfig};

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, readiness, pool_metrics};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::pool_health::PoolHealthSummary;

    #[cfg(feature = "database")]
    pub use crate::pool_health::DatabasePoolHealth;

    #[cfg(feature = "cache")]
    pub use crate::pool_health::RedisPoolHealth;

    pub use crate::middleware::{
        Claims, TokenValidator, RateLimit, RequestTrackingConfig,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS,
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
        apply_security_headers,
    };

    #[cfg(feature = "cache")]
    pub use crate::middleware::{TokenRevocation, RedisTokenRevocation};

    #[cfg(feature = "jwt")]
    pub use crate::middleware::JwtAuth;
    pub use crate::server::Server;
    pub use crate::service_builder::{ShortlinkService, ServiceBuilder};
    pub use crate::state::{AppState, AppStateBuilder};
    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    #[cfg(feature = "otel-metrics")]
    pub use crate::middleware::{MetricsConfig, metric_labels, metric_names};

    #[cfg(feature = "governor")]
    pub use crate::middleware::{GovernorConfig, GovernorRateLimit, RateLimitExceeded};

    #[cfg(feature = "observability")]
    pub use crate::observability::init_tracing;

    // Auth module exports
    #[cfg(feature = "auth")]
    pub use crate::auth::{
        AuthConfig, PasswordConfig, TokenGenerationConfig,
        RefreshTokenConfig, PasswordHasher, TokenGenerator, TokenPair,
        ApiKey, ApiKeyGenerator,
    };

    #[cfg(all(feature = "auth", feature = "jwt"))]
    pub use crate::auth::JwtGenerator;

    #[cfg(feature = "oauth")]
    pub use crate::auth::{OAuthProvider, OAuthTokens, OAuthUserInfo, ApiKeyConfig, OAuthConfig, OAuthProviderConfig};

    #[cfg(feature = "session")]
    pub use crate::session::{
        // Configuration
        SessionConfig, SessionStorage, CsrfConfig,
        // Typed session and extractors
        TypedSession, AuthSession, SessionAuth, SessionData,
    };

    // Re-export tower-sessions Session type for direct use
    #[cfg(feature = "session")]
    pub use tower_sessions::Session;

    // Re-export axum Html for non-templated HTML responses
    pub use axum::response::Html;

    // Server-Sent Events support
    #[cfg(feature = "sse")]
    pub use crate::sse::{
        // Configuration
        SseConfig,
        // Connection tracking
        ConnectionId as SseConnectionId, SseConnection,
        // Event building
        SseEventExt, TypedEvent,
        // Broadcasting
        SseBroadcaster, BroadcastMessage, BroadcastTarget as SseBroadcastTarget,
    };

    // Re-export axum SSE types for direct use
    #[cfg(feature = "sse")]
    pub use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};

    // Domain, analytics, job queue and HTTP handler exports
    pub use crate::domain::{User, Domain, Link, Click, Session as AuthSessionRecord, Job};
    pub use crate::jobs::{JobQueue, JobHandler, QueueConfig};
    pub use crate::analytics::AnalyticsGateway;
    pub use crate::lockout::{LoginLockout, LockoutConfig, LockoutStatus};
    pub use crate::shortlink_config::{ShortlinkConfig, load_shortlink_config};

    #[cfg(feature = "database")]
    pub use crate::store::{ClickRepository, DomainRepository, LinkRepository, UserRepository};

    #[cfg(feature = "cache")]
    pub use crate::cache_ext::Cache;

    #[cfg(feature = "database")]
    pub use crate::domain_registry::{DomainRegistry, DnsVerifier};

    #[cfg(feature = "database")]
    pub use crate::link_registry::{LinkRegistry, AccessContext, AccessDenial};

    #[cfg(all(feature = "database", feature = "cache", feature = "auth"))]
    pub use crate::resolver::{Resolver, RedirectRequest, RedirectOutcome, LinkPreview};

    #[cfg(all(feature = "auth", feature = "cache", feature = "database", feature = "jwt"))]
    pub use crate::auth_core::{AuthCore, AuthCoreConfig, ShortlinkClaims, TokenPair as AuthTokenPair, LoginError};

    #[cfg(all(feature = "sse", feature = "database"))]
    pub use crate::live_stats::{LiveStats, LiveStatsSources, LiveStatsSnapshot};

    #[cfg(all(feature = "auth", feature = "cache", feature = "database", feature = "jwt", feature = "sse"))]
    pub use crate::routes::{router, ShortlinkServices};

    // Background task management (user-facing)
    pub use crate::agents::{BackgroundWorker, TaskStatus};

    // Health status types (for checking aggregated health)
    pub use crate::agents::{AggregatedHealthResponse, HealthStatus};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export error handling utilities
    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    // Re-export time utilities
    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    // Re-export UUID
    pub use uuid::Uuid;

    // Re-export futures utilities
    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    // Re-export HTTP types
    pub use http::{Method, Uri};

    // Re-export acton-reactive prelude for actor system
    pub use acton_reactive::prelude::*;
}
