//! Login lockout with progressive delay and account lockout
//!
//! Provides brute force protection for login endpoints by tracking failed
//! attempts per identity in Redis. Supports configurable progressive delays,
//! threshold-based account lockout, and notification hooks.
//!
//! # Feature Dependencies
//!
//! Requires: `login-lockout` (which enables `auth` + `cache`)
//!
//! # Architecture
//!
//! - **Service approach**: Construct [`LoginLockout`] once, pass via `State`
//! - **Middleware approach**: Use [`LockoutMiddleware`] for automatic enforcement
//! - **Notifications**: Register [`LockoutNotification`] handlers for events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use acton_service::lockout::{LoginLockout, LockoutConfig};
//!
//! let lockout = LoginLockout::new(lockout_config, redis_pool);
//!
//! // In your login handler:
//! let status = lockout.check(&email).await?;
//! if status.locked { /* return 423 */ }
//!
//! match authenticate(&creds).await {
//!     Ok(tokens) => { lockout.record_success(&email).await?; Ok(tokens) }
//!     Err(_) => {
//!         let status = lockout.record_failure(&email).await?;
//!         if status.delay_ms > 0 {
//!             tokio::time::sleep(Duration::from_millis(status.delay_ms)).await;
//!         }
//!         Err(Error::Unauthorized("Invalid credentials".into()))
//!     }
//! }
//! ```

pub mod config;
pub mod middleware;
pub mod notification;
pub mod service;

pub use config::LockoutConfig;
pub use middleware::LockoutMiddleware;
pub use notification::{LockoutEvent, LockoutNotification, UnlockReason};
pub use service::{LockoutStatus, LoginLockout};
