//! Redirect-aware request execution.

use std::time::Duration;

use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::SessionError;

/// Connect timeout for each hop.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall timeout for each hop.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Session-state seam between the requester and its owner.
///
/// The requester consults the sink for the outgoing `Cookie` header and
/// bearer token on every hop, and hands every observed `Set-Cookie` header
/// back through it, so cookie capture works identically for bootstrap and
/// real requests.
pub trait CookieSink: Send + Sync {
    /// Returns the `Cookie` request header for the next hop, if any cookies
    /// are currently usable.
    fn cookie_header(&self) -> Option<String>;

    /// Returns the bearer token to attach, when a token provider is
    /// configured.
    fn bearer_token(&self) -> Option<String>;

    /// Absorbs `Set-Cookie` header values observed on one hop.
    fn absorb(&self, set_cookie_headers: &[String]);
}

/// One logical request before redirect handling.
///
/// The body is held as replayable bytes because 307/308 hops must resend it
/// unchanged.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method of the initial hop.
    pub method: Method,
    /// Path (and query) relative to the session base URL.
    pub path: String,
    /// Additional request headers applied on every hop.
    pub headers: Vec<(String, String)>,
    /// Request body, when the method carries one.
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    /// Creates a body-less request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Issues one logical request, following redirects manually so cookies are
/// captured at every hop.
#[derive(Debug, Clone)]
pub struct RedirectAwareRequester {
    client: Client,
    base_url: Url,
    max_redirects: u32,
    login_domain: Option<Regex>,
}

impl RedirectAwareRequester {
    /// Creates a requester for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Configuration`] when the login-domain pattern
    /// does not compile or the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        max_redirects: u32,
        login_domain_pattern: Option<&str>,
    ) -> Result<Self, SessionError> {
        let login_domain = login_domain_pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                SessionError::configuration(format!("login domain pattern is invalid: {e}"))
            })?;

        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .gzip(true)
            .build()
            .map_err(|e| SessionError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            max_redirects,
            login_domain,
        })
    }

    /// Executes the request, following redirects up to the configured bound.
    ///
    /// Per-status hop rules:
    /// - 303, or 301/302 with a non-GET/HEAD method: next hop is GET with no
    ///   body.
    /// - 307/308, or 301/302 with GET/HEAD: method and body are preserved.
    ///
    /// Every intermediate body is drained before following. A `Location`
    /// whose host matches the interactive-login domain is a distinguished
    /// failure, not a hop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RedirectLoop`] past the redirect bound,
    /// [`SessionError::InteractiveLoginRedirect`] on a login-domain escape,
    /// and [`SessionError::Network`] on transport failure.
    #[instrument(level = "debug", skip(self, request, sink), fields(path = %request.path))]
    pub async fn request(
        &self,
        request: PreparedRequest,
        sink: &dyn CookieSink,
    ) -> Result<Response, SessionError> {
        let original_url = self.base_url.join(&request.path).map_err(|e| {
            SessionError::configuration(format!(
                "path '{}' does not join onto base URL: {e}",
                request.path
            ))
        })?;

        let mut url = original_url.clone();
        let mut method = request.method.clone();
        let mut body = request.body.clone();
        let mut redirects_followed: u32 = 0;

        loop {
            let response = self
                .send_hop(&url, &method, &request.headers, body.as_deref(), sink)
                .await?;

            let set_cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok().map(str::to_string))
                .collect();
            if !set_cookies.is_empty() {
                sink.absorb(&set_cookies);
            }

            let status = response.status().as_u16();
            if !matches!(status, 301 | 302 | 303 | 307 | 308) {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
            else {
                warn!(status, "redirect without Location header; returning as-is");
                return Ok(response);
            };

            let next_url = url.join(&location).map_err(|e| {
                SessionError::configuration(format!("Location '{location}' is invalid: {e}"))
            })?;

            if let Some(pattern) = &self.login_domain
                && let Some(host) = next_url.host_str()
                && pattern.is_match(host)
            {
                debug!(location = %next_url, "redirect escaped to interactive login domain");
                return Err(SessionError::interactive_login(next_url.as_str()));
            }

            redirects_followed += 1;
            if redirects_followed > self.max_redirects {
                return Err(SessionError::redirect_loop(
                    original_url.as_str(),
                    self.max_redirects,
                ));
            }

            let preserve_method = match status {
                303 => false,
                301 | 302 => method == Method::GET || method == Method::HEAD,
                _ => true,
            };
            if !preserve_method {
                method = Method::GET;
                body = None;
            }

            debug!(
                status,
                hop = redirects_followed,
                next = %next_url,
                next_method = %method,
                "following redirect"
            );

            // Drain the discarded body so the connection can be reused.
            let _ = response.bytes().await;
            url = next_url;
        }
    }

    async fn send_hop(
        &self,
        url: &Url,
        method: &Method,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        sink: &dyn CookieSink,
    ) -> Result<Response, SessionError> {
        let mut builder = self.client.request(method.clone(), url.clone());

        for (name, value) in headers {
            // Entity headers make no sense once the body was dropped on a
            // 303/301/302 downgrade.
            if body.is_none()
                && (name.eq_ignore_ascii_case(CONTENT_TYPE.as_str())
                    || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()))
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = sink.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(cookie_header) = sink.cookie_header() {
            builder = builder.header(COOKIE, cookie_header);
        }
        if let Some(bytes) = body {
            builder = builder.body(bytes.to_vec());
        }

        builder
            .send()
            .await
            .map_err(|e| SessionError::network(url.as_str(), e))
    }
}
