//! Identity provider strategies.
//!
//! Each strategy supplies a bearer token, drives a cookie-producing login,
//! or both. The strategy is selected by the explicit
//! [`IdentityConfig`](crate::config::IdentityConfig) discriminant.

mod browser;
mod oauth_code;
mod service_account;

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use browser::InteractiveBrowserSessionProvider;
pub use oauth_code::OAuth2CodeFlowProvider;
pub use service_account::ServiceAccountTokenProvider;

use crate::config::{IdentityConfig, SessionConfig};
use crate::cookie::Cookie;
use crate::error::SessionError;

/// A bearer token together with its decoded expiry.
///
/// The secret is redacted from `Debug` output.
#[derive(Clone)]
pub struct BearerToken {
    secret: String,
    /// Expiry decoded from the token itself.
    pub expires_at: SystemTime,
}

impl BearerToken {
    /// Creates a token from its secret string and decoded expiry.
    #[must_use]
    pub fn new(secret: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Returns the token string.
    ///
    /// Token material is sensitive — avoid logging the return value.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns whether the token is still usable at `now`, keeping the
    /// refresh margin of headroom before expiry.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Cookies and user-agent harvested from a browser-mediated login.
#[derive(Debug, Default)]
pub struct SessionHarvest {
    /// All cookies the browser held for the target after login.
    pub cookies: Vec<Cookie>,
    /// Effective browser user-agent, recorded so later plain-HTTP requests
    /// can present the same identity.
    pub user_agent: Option<String>,
}

/// Errors raised inside a specific identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credential material could not be used for signing.
    #[error("failed to sign assertion: {reason}")]
    Signing {
        /// What went wrong while building or signing the JWT.
        reason: String,
    },

    /// The token endpoint rejected the exchange.
    #[error("token endpoint returned HTTP {status}: {detail}")]
    TokenEndpoint {
        /// HTTP status from the endpoint.
        status: u16,
        /// Response body excerpt or error description.
        detail: String,
    },

    /// A minted or exchanged token could not be decoded.
    #[error("returned token is malformed: {reason}")]
    MalformedToken {
        /// Why decoding failed.
        reason: String,
    },

    /// Network failure while talking to the identity service.
    #[error("network error during token exchange: {source}")]
    Network {
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The loopback listener could not be bound.
    #[error("failed to bind loopback listener on {addr}: {source}")]
    ListenerBind {
        /// Address that failed to bind.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The user or authorization server explicitly denied the request.
    #[error("authorization denied: {reason}")]
    Denied {
        /// Denial reason reported by the authorization server.
        reason: String,
    },

    /// The loopback callback carried an unexpected `state` value.
    #[error("authorization callback state did not match the issued request")]
    StateMismatch,

    /// A human-in-the-loop flow did not finish within its bound.
    #[error("authentication did not complete within {seconds}s")]
    Timeout {
        /// The configured bound in seconds.
        seconds: u64,
    },

    /// The automated browser could not be launched or driven.
    #[error("browser launch failed: {reason}")]
    BrowserLaunch {
        /// What the automation layer reported.
        reason: String,
    },

    /// The user closed the page or browser before login completed.
    #[error("interactive login aborted: {reason}")]
    Aborted {
        /// How the abort was detected.
        reason: String,
    },
}

impl ProviderError {
    /// Creates a signing error.
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing {
            reason: reason.into(),
        }
    }

    /// Creates a malformed-token error.
    pub fn malformed_token(reason: impl Into<String>) -> Self {
        Self::MalformedToken {
            reason: reason.into(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(source: reqwest::Error) -> Self {
        Self::Network { source }
    }
}

/// A pluggable authentication strategy.
///
/// Strategies that mint tokens implement [`bearer_token`](Self::bearer_token);
/// strategies that drive a browser login implement
/// [`establish_session`](Self::establish_session). The session manager uses
/// whichever capability the strategy offers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Strategy name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Returns a bearer token, minting one if the cache is stale.
    ///
    /// Strategies without a token path return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when minting fails; errors propagate to the
    /// caller without internal retry.
    async fn bearer_token(&self, now: SystemTime) -> Result<Option<BearerToken>, ProviderError> {
        let _ = now;
        Ok(None)
    }

    /// Drives a browser-mediated login yielding session cookies.
    ///
    /// Strategies without an interactive path return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on launch failure, user abort, or timeout.
    async fn establish_session(
        &self,
        target: &Url,
    ) -> Result<Option<SessionHarvest>, ProviderError> {
        let _ = target;
        Ok(None)
    }
}

/// Builds the provider selected by the configuration discriminant.
///
/// # Errors
///
/// Returns [`SessionError::Configuration`] when the credential material
/// cannot be loaded (e.g. an unparseable private key).
pub fn build_provider(config: &SessionConfig) -> Result<Box<dyn IdentityProvider>, SessionError> {
    match &config.identity {
        IdentityConfig::ServiceAccount {
            client_email,
            private_key_pem,
            ..
        } => {
            let token_uri = config
                .identity
                .token_uri()
                .unwrap_or_default()
                .to_string();
            let provider = ServiceAccountTokenProvider::new(
                client_email.clone(),
                private_key_pem,
                token_uri,
                config.audience(),
                config.refresh_margin,
            )
            .map_err(|e| SessionError::provider("service-account", e))?;
            Ok(Box::new(provider))
        }
        IdentityConfig::OAuthCodeFlow {
            client_id,
            client_secret,
            auth_url,
            token_url,
            redirect_port,
            scopes,
        } => Ok(Box::new(
            OAuth2CodeFlowProvider::new(
                client_id.clone(),
                client_secret.clone(),
                auth_url.clone(),
                token_url.clone(),
                *redirect_port,
                scopes.clone(),
            )
            .with_callback_timeout(config.browser_timeout),
        )),
        IdentityConfig::InteractiveBrowser { profile_dir } => {
            Ok(Box::new(InteractiveBrowserSessionProvider::new(
                profile_dir.clone(),
                config.session_cookie.clone(),
                config.login_domain_pattern.clone(),
                config.browser_timeout,
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn test_bearer_token_debug_redacts_secret() {
        let token = BearerToken::new("eyJ-super-secret", UNIX_EPOCH + Duration::from_secs(100));
        let debug = format!("{token:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("eyJ-super-secret"));
    }

    #[test]
    fn test_bearer_token_freshness_respects_margin() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let token = BearerToken::new("t", now + Duration::from_secs(120));

        assert!(token.is_fresh(now, Duration::from_secs(60)));
        assert!(!token.is_fresh(now, Duration::from_secs(120)));
        assert!(!token.is_fresh(now + Duration::from_secs(61), Duration::from_secs(60)));
    }
}
