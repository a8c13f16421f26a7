//! Error types for session establishment and authorized requests.
//!
//! Fatal kinds abort the current call immediately; ordinary 401/403
//! responses after the retry budget is exhausted are returned as normal
//! responses, never as errors.

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur while establishing or using an authenticated session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration is missing or invalid (base URL, credentials, bounds).
    ///
    /// Never retried: the same inputs will fail the same way.
    #[error("invalid session configuration: {reason}")]
    Configuration {
        /// What was missing or malformed.
        reason: String,
    },

    /// The bootstrap request completed but the distinguished session cookie
    /// never materialized.
    ///
    /// This indicates a configuration problem (wrong cookie name, wrong
    /// audience, identity check not wired to this backend), not a transient
    /// failure.
    #[error("bootstrap against {base_url} did not produce session cookie '{cookie}'")]
    BootstrapFailed {
        /// The base URL the bootstrap request was issued against.
        base_url: String,
        /// The distinguished session cookie that was expected.
        cookie: String,
    },

    /// The redirect chain exceeded the configured bound.
    #[error("redirect limit of {limit} exceeded while requesting {url}")]
    RedirectLoop {
        /// The URL of the original request.
        url: String,
        /// The configured redirect bound.
        limit: u32,
    },

    /// A redirect escaped to the interactive login domain.
    ///
    /// The automated credential path hit a human login wall. This usually
    /// means the bearer token is missing, expired beyond recovery, or minted
    /// for the wrong audience.
    #[error(
        "redirected to interactive login at {location}; the configured credentials were not \
         accepted (check the principal and target audience)"
    )]
    InteractiveLoginRedirect {
        /// The Location the server redirected to.
        location: String,
    },

    /// An identity provider failed (signing, token exchange, browser).
    #[error("identity provider '{provider}' failed: {source}")]
    Provider {
        /// Which provider variant failed.
        provider: &'static str,
        /// The underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// Transport-level failure (DNS, connect, TLS, read).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },
}

impl SessionError {
    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a bootstrap failure.
    pub fn bootstrap_failed(base_url: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self::BootstrapFailed {
            base_url: base_url.into(),
            cookie: cookie.into(),
        }
    }

    /// Creates a redirect-loop error.
    pub fn redirect_loop(url: impl Into<String>, limit: u32) -> Self {
        Self::RedirectLoop {
            url: url.into(),
            limit,
        }
    }

    /// Creates an interactive-login-redirect error.
    pub fn interactive_login(location: impl Into<String>) -> Self {
        Self::InteractiveLoginRedirect {
            location: location.into(),
        }
    }

    /// Wraps a provider error with the provider's name.
    pub fn provider(provider: &'static str, source: ProviderError) -> Self {
        Self::Provider { provider, source }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }
}
