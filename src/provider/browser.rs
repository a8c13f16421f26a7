//! Interactive-browser identity: a visible automated browser completes the
//! login and the session cookies are harvested from it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pw_rs::{Browser, BrowserContext, LaunchOptions, Page, Playwright};
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{IdentityProvider, ProviderError, SessionHarvest};
use crate::cookie::Cookie;

/// Interval between login-completion checks.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a real, visible browser through the login and harvests the
/// resulting cookies and user-agent.
///
/// The browser profile lives in a persistent directory so device trust
/// (remembered second factors, device certificates) survives across runs.
pub struct InteractiveBrowserSessionProvider {
    profile_dir: PathBuf,
    session_cookie: String,
    login_domain: Option<Regex>,
    timeout: Duration,
}

impl InteractiveBrowserSessionProvider {
    /// Creates a provider bound to a profile directory.
    #[must_use]
    pub fn new(
        profile_dir: PathBuf,
        session_cookie: String,
        login_domain_pattern: Option<String>,
        timeout: Duration,
    ) -> Self {
        let login_domain = login_domain_pattern
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok());
        Self {
            profile_dir,
            session_cookie,
            login_domain,
            timeout,
        }
    }

    #[instrument(level = "debug", skip(self, target), fields(url = %target))]
    async fn run_login(&self, target: &Url) -> Result<SessionHarvest, ProviderError> {
        let playwright = Playwright::launch().await.map_err(launch_error)?;

        let options = LaunchOptions {
            headless: Some(false),
            args: Some(vec![format!(
                "--user-data-dir={}",
                self.profile_dir.display()
            )]),
            ..Default::default()
        };
        let browser = playwright
            .chromium()
            .launch_with_options(options)
            .await
            .map_err(launch_error)?;

        let outcome = self.drive_browser(&browser, target).await;

        // The browser is always torn down, success or not.
        let _ = browser.close().await;
        if let Err(e) = playwright.shutdown().await {
            debug!(error = %e, "playwright shutdown reported an error");
        }

        outcome
    }

    async fn drive_browser(
        &self,
        browser: &Browser,
        target: &Url,
    ) -> Result<SessionHarvest, ProviderError> {
        let context = browser.new_context().await.map_err(launch_error)?;
        let outcome = self.poll_until_login(&context, target).await;
        let _ = context.close().await;
        outcome
    }

    async fn poll_until_login(
        &self,
        context: &BrowserContext,
        target: &Url,
    ) -> Result<SessionHarvest, ProviderError> {
        let page = context.new_page().await.map_err(launch_error)?;
        let _ = page
            .goto(target.as_str(), None)
            .await
            .map_err(|e| ProviderError::Aborted {
                reason: format!("navigation to the login target failed: {e}"),
            })?;

        info!(url = %target, "waiting for interactive login");
        let deadline = Instant::now() + self.timeout;

        loop {
            // The cookie appearing is the primary signal; the page settling
            // on a same-origin, non-login URL is the secondary one.
            let cookies = context
                .cookies(None)
                .await
                .map_err(|e| ProviderError::Aborted {
                    reason: format!("browser went away while polling: {e}"),
                })?;

            let cookie_present = cookies
                .iter()
                .any(|cookie| cookie.name == self.session_cookie);
            let settled = settled_on_target(&page.url(), target, self.login_domain.as_ref());

            if cookie_present || settled {
                debug!(cookie_present, settled, "login detected");
                return Ok(self.harvest(context, &page).await);
            }

            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn harvest(&self, context: &BrowserContext, page: &Page) -> SessionHarvest {
        let cookies = match context.cookies(None).await {
            Ok(cookies) => cookies
                .into_iter()
                .map(|cookie| cookie_from_browser(cookie.name, cookie.value, cookie.expires))
                .collect(),
            Err(e) => {
                warn!(error = %e, "cookie harvest failed after login");
                Vec::new()
            }
        };

        let user_agent = match page.evaluate_value("navigator.userAgent").await {
            Ok(ua) if !ua.trim().is_empty() => Some(ua),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "could not read user agent");
                None
            }
        };

        SessionHarvest {
            cookies,
            user_agent,
        }
    }
}

#[async_trait]
impl IdentityProvider for InteractiveBrowserSessionProvider {
    fn name(&self) -> &'static str {
        "interactive-browser"
    }

    async fn establish_session(
        &self,
        target: &Url,
    ) -> Result<Option<SessionHarvest>, ProviderError> {
        self.run_login(target).await.map(Some)
    }
}

fn launch_error(error: impl std::fmt::Display) -> ProviderError {
    ProviderError::BrowserLaunch {
        reason: error.to_string(),
    }
}

/// Converts a browser cookie into the jar representation.
///
/// Browser expiry is Unix seconds as a float, with non-positive values
/// (Playwright uses -1) marking session cookies.
fn cookie_from_browser(name: String, value: String, expires: Option<f64>) -> Cookie {
    let expires_unix = expires
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(|seconds| seconds.floor() as u64);
    Cookie::from_parts(name, value, expires_unix)
}

/// Secondary success signal: the page has settled on a same-origin URL that
/// is not part of the login flow.
fn settled_on_target(current: &str, target: &Url, login_domain: Option<&Regex>) -> bool {
    let Ok(current) = Url::parse(current) else {
        return false;
    };

    let same_origin = current.scheme() == target.scheme()
        && current.host_str() == target.host_str()
        && current.port_or_known_default() == target.port_or_known_default();
    if !same_origin {
        return false;
    }

    if let Some(pattern) = login_domain
        && let Some(host) = current.host_str()
        && pattern.is_match(host)
    {
        return false;
    }

    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn target() -> Url {
        Url::parse("https://internal.example.com/app").unwrap()
    }

    #[test]
    fn test_settled_on_same_origin_url() {
        assert!(settled_on_target(
            "https://internal.example.com/app/home",
            &target(),
            None
        ));
    }

    #[test]
    fn test_not_settled_on_foreign_origin() {
        assert!(!settled_on_target(
            "https://accounts.example.com/signin",
            &target(),
            None
        ));
        assert!(!settled_on_target(
            "http://internal.example.com/app",
            &target(),
            None
        ));
    }

    #[test]
    fn test_not_settled_on_login_domain_match() {
        let pattern = Regex::new("internal").unwrap();
        assert!(!settled_on_target(
            "https://internal.example.com/app",
            &target(),
            Some(&pattern)
        ));
    }

    #[test]
    fn test_not_settled_on_blank_or_invalid_url() {
        assert!(!settled_on_target("about:blank", &target(), None));
        assert!(!settled_on_target("", &target(), None));
    }

    #[test]
    fn test_cookie_from_browser_maps_expiry_seconds() {
        let cookie = cookie_from_browser("sid".to_string(), "v".to_string(), Some(1.7e9));
        assert_eq!(
            cookie.expires_at,
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn test_cookie_from_browser_session_cookie_markers() {
        assert!(
            cookie_from_browser("sid".to_string(), "v".to_string(), Some(-1.0))
                .expires_at
                .is_none()
        );
        assert!(
            cookie_from_browser("sid".to_string(), "v".to_string(), None)
                .expires_at
                .is_none()
        );
    }

    #[test]
    fn test_invalid_login_pattern_disables_secondary_signal_check() {
        let provider = InteractiveBrowserSessionProvider::new(
            PathBuf::from("/tmp/profile"),
            "sid".to_string(),
            Some("([unclosed".to_string()),
            Duration::from_secs(300),
        );
        assert!(provider.login_domain.is_none());
    }

    #[test]
    fn test_provider_name() {
        let provider = InteractiveBrowserSessionProvider::new(
            PathBuf::from("/tmp/profile"),
            "sid".to_string(),
            None,
            Duration::from_secs(300),
        );
        assert_eq!(provider.name(), "interactive-browser");
    }
}
