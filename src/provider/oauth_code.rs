//! Interactive OAuth2 authorization-code identity with a loopback callback.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::service_account::decode_expiry;
use super::{BearerToken, IdentityProvider, ProviderError};
use crate::config::DEFAULT_LOOPBACK_PORT;

/// Bound on waiting for the user to finish the browser round.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Fallback token lifetime when the endpoint reports none and the token is
/// opaque.
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Page shown in the browser tab once the callback has been handled.
const COMPLETION_PAGE: &str =
    "<html><body><p>Authentication complete. You may close this window.</p></body></html>";

/// Runs the OAuth2 authorization-code flow over a short-lived loopback
/// listener and caches the resulting token until it expires.
///
/// There is no refresh path: an expired token forces a new interactive round.
pub struct OAuth2CodeFlowProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    redirect_port: u16,
    scopes: Vec<String>,
    callback_timeout: Duration,
    cached: Mutex<Option<BearerToken>>,
}

/// Query parameters delivered to the loopback callback.
struct Callback {
    code: String,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
}

impl OAuth2CodeFlowProvider {
    /// Creates a provider; the listener is bound lazily per authentication
    /// round.
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: String,
        auth_url: String,
        token_url: String,
        redirect_port: Option<u16>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            auth_url,
            token_url,
            redirect_port: redirect_port.unwrap_or(DEFAULT_LOOPBACK_PORT),
            scopes,
            callback_timeout: CALLBACK_TIMEOUT,
            cached: Mutex::new(None),
        }
    }

    /// Overrides the callback wait bound.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Runs one interactive round using the system browser.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on listener/bind failure, browser launch
    /// failure, denial, state mismatch, timeout, or exchange failure.
    pub async fn authenticate(&self) -> Result<BearerToken, ProviderError> {
        self.authenticate_with_opener(|auth_url| {
            open::that(auth_url).map_err(|e| ProviderError::BrowserLaunch {
                reason: format!("could not open system browser: {e}"),
            })
        })
        .await
    }

    /// Runs one interactive round with an injected browser-opening hop.
    ///
    /// Tests drive the callback themselves instead of opening a real
    /// browser. The loopback listener lives only inside this call: every
    /// exit path — success, denial, timeout — drops it exactly once, so the
    /// port is free again afterwards.
    ///
    /// # Errors
    ///
    /// See [`authenticate`](Self::authenticate).
    #[instrument(level = "debug", skip(self, opener))]
    pub async fn authenticate_with_opener<F>(&self, opener: F) -> Result<BearerToken, ProviderError>
    where
        F: FnOnce(&str) -> Result<(), ProviderError> + Send,
    {
        let addr = format!("127.0.0.1:{}", self.redirect_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProviderError::ListenerBind {
                addr: addr.clone(),
                source: e,
            })?;
        // Port 0 asks the OS for a free port; read back what was bound.
        let local_port = listener
            .local_addr()
            .map_err(|e| ProviderError::ListenerBind { addr, source: e })?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{local_port}/callback");

        let state = random_state();
        let authorization_url = self.authorization_url(&redirect_uri, &state)?;

        info!(port = local_port, "waiting for authorization callback");
        opener(authorization_url.as_str())?;

        let callback = tokio::time::timeout(
            self.callback_timeout,
            wait_for_callback(&listener, &state),
        )
        .await
        .map_err(|_| ProviderError::Timeout {
            seconds: self.callback_timeout.as_secs(),
        })??;

        // The exchange happens after the listener is gone; the browser side
        // of the flow is already complete.
        drop(listener);

        self.exchange_code(&callback.code, &redirect_uri).await
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.auth_url).map_err(|e| {
            ProviderError::signing(format!("authorization URL does not parse: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        if !self.scopes.is_empty() {
            url.query_pairs_mut()
                .append_pair("scope", &self.scopes.join(" "));
        }
        Ok(url)
    }

    #[instrument(level = "debug", skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<BearerToken, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(ProviderError::network)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::TokenEndpoint {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: TokenResponse = response.json().await.map_err(|e| {
            ProviderError::malformed_token(format!("token response is not JSON: {e}"))
        })?;

        let expires_in = payload.expires_in;
        let token = payload
            .id_token
            .or(payload.access_token)
            .ok_or_else(|| ProviderError::malformed_token("response carries no token field"))?;

        let expires_at = match decode_expiry(&token) {
            Ok(expiry) => expiry,
            // Opaque tokens fall back to the endpoint-reported lifetime.
            Err(_) => {
                SystemTime::now() + expires_in.map_or(FALLBACK_TOKEN_LIFETIME, Duration::from_secs)
            }
        };

        debug!("authorization code exchanged");
        Ok(BearerToken::new(token, expires_at))
    }
}

#[async_trait]
impl IdentityProvider for OAuth2CodeFlowProvider {
    fn name(&self) -> &'static str {
        "oauth-code-flow"
    }

    async fn bearer_token(&self, now: SystemTime) -> Result<Option<BearerToken>, ProviderError> {
        let cached = self
            .cached
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .filter(|token| token.is_fresh(now, Duration::ZERO))
            .cloned();
        if let Some(token) = cached {
            return Ok(Some(token));
        }

        let minted = self.authenticate().await?;
        *self
            .cached
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(minted.clone());
        Ok(Some(minted))
    }
}

/// Accepts loopback connections until one carries the authorization result.
///
/// Stray requests (favicon probes, health checks) get a 404 and the wait
/// continues.
async fn wait_for_callback(
    listener: &TcpListener,
    expected_state: &str,
) -> Result<Callback, ProviderError> {
    loop {
        let (mut stream, peer) = listener.accept().await.map_err(|e| ProviderError::Aborted {
            reason: format!("loopback listener failed: {e}"),
        })?;
        debug!(%peer, "loopback connection");

        let Some(params) = read_callback_params(&mut stream).await else {
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        };

        if let Some(error) = params.get("error") {
            respond(&mut stream, "200 OK", COMPLETION_PAGE).await;
            return Err(ProviderError::Denied {
                reason: error.clone(),
            });
        }

        if params.get("state").map(String::as_str) != Some(expected_state) {
            warn!("callback state mismatch");
            respond(&mut stream, "400 Bad Request", "").await;
            return Err(ProviderError::StateMismatch);
        }

        let Some(code) = params.get("code").cloned() else {
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        };

        respond(&mut stream, "200 OK", COMPLETION_PAGE).await;
        return Ok(Callback { code });
    }
}

/// Reads the request line and parses callback query parameters.
///
/// Returns `None` for requests that are not the `/callback` redirect.
async fn read_callback_params(stream: &mut TcpStream) -> Option<HashMap<String, String>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;

    // "GET /callback?code=...&state=... HTTP/1.1"
    let target = request_line.split_whitespace().nth(1)?;
    let (path, query) = target.split_once('?')?;
    if !path.ends_with("/callback") {
        return None;
    }

    let mut params = HashMap::new();
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            params.insert(key, value);
        }
    }
    Some(params)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "failed to answer loopback request");
    }
    let _ = stream.shutdown().await;
}

fn random_state() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
            char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())])
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(server: &MockServer) -> OAuth2CodeFlowProvider {
        OAuth2CodeFlowProvider::new(
            "client-1".to_string(),
            "secret-1".to_string(),
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
            Some(0),
            vec!["openid".to_string(), "email".to_string()],
        )
        .with_callback_timeout(Duration::from_secs(5))
    }

    /// Simulated browser: immediately follows the redirect URI with the
    /// given callback query.
    fn fake_browser(outcome: &'static str) -> impl FnOnce(&str) -> Result<(), ProviderError> {
        move |auth_url: &str| {
            let url = Url::parse(auth_url).unwrap();
            let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
            let redirect_uri = params.get("redirect_uri").unwrap().clone();
            let state = params.get("state").unwrap().clone();

            tokio::spawn(async move {
                let query = match outcome {
                    "grant" => format!("code=auth-code-123&state={state}"),
                    "denied" => format!("error=access_denied&state={state}"),
                    "tampered" => "code=auth-code-123&state=wrong".to_string(),
                    other => panic!("unknown outcome {other}"),
                };
                let url = format!("{redirect_uri}?{query}");
                let _ = reqwest::get(&url).await;
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_grant_round_trip_exchanges_code() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code-123"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "opaque-access-token",
                "token_type": "Bearer",
                "expires_in": 3599,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let token = provider
            .authenticate_with_opener(fake_browser("grant"))
            .await
            .unwrap();

        assert_eq!(token.secret(), "opaque-access-token");
        assert!(token.is_fresh(SystemTime::now(), Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_denial_rejects_with_reason() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);

        let result = provider
            .authenticate_with_opener(fake_browser("denied"))
            .await;

        match result {
            Err(ProviderError::Denied { reason }) => assert_eq!(reason, "access_denied"),
            other => panic!("expected Denied, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);

        let result = provider
            .authenticate_with_opener(fake_browser("tampered"))
            .await;
        assert!(matches!(result, Err(ProviderError::StateMismatch)));
    }

    #[tokio::test]
    async fn test_timeout_when_no_callback_arrives() {
        let server = MockServer::start().await;
        let provider = provider_for(&server).with_callback_timeout(Duration::from_millis(200));

        let result = provider.authenticate_with_opener(|_url| Ok(())).await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_listener_port_released_after_every_outcome() {
        let server = MockServer::start().await;

        // Bind an explicit port, time out, then bind the same port again.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let provider = OAuth2CodeFlowProvider::new(
            "client-1".to_string(),
            "secret-1".to_string(),
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
            Some(port),
            vec![],
        )
        .with_callback_timeout(Duration::from_millis(100));

        let first = provider.authenticate_with_opener(|_url| Ok(())).await;
        assert!(matches!(first, Err(ProviderError::Timeout { .. })));

        let second = provider.authenticate_with_opener(|_url| Ok(())).await;
        assert!(
            matches!(second, Err(ProviderError::Timeout { .. })),
            "port must be reusable after timeout, got: {second:?}"
        );
    }

    #[tokio::test]
    async fn test_opener_failure_propagates() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);

        let result = provider
            .authenticate_with_opener(|_url| {
                Err(ProviderError::BrowserLaunch {
                    reason: "no display".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(ProviderError::BrowserLaunch { .. })));
    }

    #[tokio::test]
    async fn test_exchange_failure_surfaces_endpoint_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result = provider
            .authenticate_with_opener(fake_browser("grant"))
            .await;

        match result {
            Err(ProviderError::TokenEndpoint { status, detail }) => {
                assert_eq!(status, 400);
                assert!(detail.contains("invalid_grant"));
            }
            other => panic!("expected TokenEndpoint, got: {other:?}"),
        }
    }

    #[test]
    fn test_authorization_url_carries_required_parameters() {
        let provider = OAuth2CodeFlowProvider::new(
            "client-1".to_string(),
            "secret-1".to_string(),
            "https://auth.example.com/authorize".to_string(),
            "https://auth.example.com/token".to_string(),
            None,
            vec!["openid".to_string()],
        );

        let url = provider
            .authorization_url("http://127.0.0.1:8976/callback", "state-xyz")
            .unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(params.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(
            params.get("redirect_uri").map(String::as_str),
            Some("http://127.0.0.1:8976/callback")
        );
        assert_eq!(params.get("state").map(String::as_str), Some("state-xyz"));
        assert_eq!(params.get("scope").map(String::as_str), Some("openid"));
    }

    #[test]
    fn test_random_state_is_long_and_varies() {
        let a = random_state();
        let b = random_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
