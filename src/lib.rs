//! Gatepass
//!
//! Authenticated session client for internal web services gated by a
//! browser-mediated single-sign-on or identity-aware-proxy check.
//!
//! The crate emulates what a browser does during login — capturing and
//! persisting session cookies, following redirects with correct per-status
//! method/body semantics, minting and caching short-lived identity tokens,
//! and falling back to a real automated browser when no headless credential
//! path exists — behind a single call:
//! [`SessionManager::authorized_request`].
//!
//! # Architecture
//!
//! - [`cookie`] - cookie jar and `Set-Cookie` parsing
//! - [`transport`] - redirect-aware request execution
//! - [`provider`] - the three identity strategies
//! - [`session`] - bootstrap/retry state machine and registry
//! - [`cache`] - pluggable persistent session store
//!
//! # Example
//!
//! ```no_run
//! use gatepass::{IdentityConfig, PreparedRequest, SessionConfig, SessionRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = IdentityConfig::ServiceAccount {
//!     client_email: "robot@project.iam.example.com".to_string(),
//!     private_key_pem: std::fs::read_to_string("key.pem")?,
//!     token_uri: None,
//! };
//! let config = SessionConfig::new(
//!     "https://internal.example.com",
//!     "robot@project.iam.example.com",
//!     "GCP_IAAP_AUTH_TOKEN",
//!     identity,
//! )?;
//!
//! let registry = SessionRegistry::new();
//! let session = registry.obtain(config)?;
//! let response = session.authorized_request(PreparedRequest::get("/api/items")).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod cookie;
pub mod error;
pub mod provider;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheEntry, DiskStore, MemoryStore, SessionStore};
pub use config::{IdentityConfig, SessionConfig};
pub use cookie::{Cookie, CookieJar};
pub use error::SessionError;
pub use provider::{
    BearerToken, IdentityProvider, InteractiveBrowserSessionProvider, OAuth2CodeFlowProvider,
    ProviderError, ServiceAccountTokenProvider, SessionHarvest,
};
pub use session::{SessionManager, SessionPhase, SessionRegistry};
pub use transport::{Method, PreparedRequest, RedirectAwareRequester};
