//! HTTP transport with manual redirect handling.
//!
//! Automatic redirect-following is disabled on the underlying client so
//! intermediate `Set-Cookie` headers can be captured; a native auto-follow
//! would discard them.

mod requester;

pub use requester::{CookieSink, PreparedRequest, RedirectAwareRequester};

// Re-exported so callers can name methods without depending on reqwest.
pub use reqwest::Method;
