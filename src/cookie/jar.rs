//! In-memory cookie jar with expiry-aware header production.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// A single named cookie with optional expiry.
///
/// Cookies without an expiry are session-scoped: they are never proactively
/// evicted and get re-validated by the next bootstrap instead. The value is
/// redacted in `Debug` output to prevent accidental logging of session
/// material.
#[derive(Clone)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive — never log).
    value: String,
    /// Absolute expiry, when the server provided one.
    pub expires_at: Option<SystemTime>,
}

impl Cookie {
    /// Creates a new cookie.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates a new cookie with an absolute expiry.
    #[must_use]
    pub fn with_expiry(
        name: impl Into<String>,
        value: impl Into<String>,
        expires_at: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive — avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns whether the cookie is still usable at `now`, keeping the
    /// refresh margin of headroom before the actual expiry.
    ///
    /// Session-scoped cookies (no expiry) are always considered fresh here;
    /// their validity is the bootstrap's problem.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime, margin: Duration) -> bool {
        match self.expires_at {
            // Excluded once the remaining lifetime drops below the margin.
            Some(expires_at) => now + margin <= expires_at,
            None => true,
        }
    }

    /// Returns the expiry as Unix seconds for persistence.
    #[must_use]
    pub fn expires_unix(&self) -> Option<u64> {
        self.expires_at.and_then(|t| {
            t.duration_since(UNIX_EPOCH)
                .ok()
                .map(|duration| duration.as_secs())
        })
    }

    /// Rebuilds a cookie from persisted parts.
    #[must_use]
    pub fn from_parts(
        name: impl Into<String>,
        value: impl Into<String>,
        expires_unix: Option<u64>,
    ) -> Self {
        let expires_at =
            expires_unix.and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)));
        Self {
            name: name.into(),
            value: value.into(),
            expires_at,
        }
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Ordered collection of cookies for one gated service.
///
/// Insertion order is preserved for header production; storing a cookie under
/// an existing name overwrites the previous value in place.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a jar seeded with cookies (e.g. restored from the cache).
    #[must_use]
    pub fn from_cookies(cookies: Vec<Cookie>) -> Self {
        let mut jar = Self::new();
        for cookie in cookies {
            jar.store(cookie);
        }
        jar
    }

    /// Stores a cookie, overwriting any existing cookie with the same name.
    pub fn store(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Parses and stores each `Set-Cookie` header value.
    ///
    /// Malformed headers are skipped with a warning; parsing is never fatal.
    /// Returns the number of cookies stored.
    pub fn merge(&mut self, set_cookie_headers: &[String], now: SystemTime) -> usize {
        let mut stored = 0;
        for header in set_cookie_headers {
            match parse_set_cookie(header, now) {
                Some(cookie) => {
                    debug!(name = %cookie.name, "captured cookie");
                    self.store(cookie);
                    stored += 1;
                }
                None => {
                    warn!("skipping malformed Set-Cookie header");
                }
            }
        }
        stored
    }

    /// Produces the `Cookie` request header value for `now`.
    ///
    /// Cookies expiring within the refresh margin are excluded. Returns
    /// `None` when nothing usable remains.
    #[must_use]
    pub fn header(&self, now: SystemTime, margin: Duration) -> Option<String> {
        let parts: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| cookie.is_fresh(now, margin))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value()))
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// Returns whether a usable cookie with the given name is held.
    #[must_use]
    pub fn is_valid(&self, name: &str, now: SystemTime, margin: Duration) -> bool {
        self.cookies
            .iter()
            .any(|cookie| cookie.name == name && cookie.is_fresh(now, margin))
    }

    /// Removes the named cookie, returning whether it was present.
    pub fn invalidate(&mut self, name: &str) -> bool {
        let before = self.cookies.len();
        self.cookies.retain(|cookie| cookie.name != name);
        self.cookies.len() != before
    }

    /// Iterates over all held cookies, fresh or not.
    pub fn cookies(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// Returns whether the jar holds no cookies at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Parses one `Set-Cookie` header value into a cookie.
///
/// The name/value pair comes from the first `;`-separated segment; expiry is
/// resolved from `Max-Age` (which wins) else `Expires`. Unknown or
/// unparseable attributes are ignored.
fn parse_set_cookie(header: &str, now: SystemTime) -> Option<Cookie> {
    let mut segments = header.split(';');

    let pair = segments.next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut max_age: Option<i64> = None;
    let mut expires: Option<SystemTime> = None;

    for segment in segments {
        let segment = segment.trim();
        let (attr, attr_value) = match segment.split_once('=') {
            Some((attr, attr_value)) => (attr.trim(), attr_value.trim()),
            // Valueless attributes (Secure, HttpOnly) carry no expiry.
            None => continue,
        };

        if attr.eq_ignore_ascii_case("max-age") {
            match attr_value.parse::<i64>() {
                Ok(seconds) => max_age = Some(seconds),
                Err(_) => debug!(attr_value, "ignoring unparseable Max-Age"),
            }
        } else if attr.eq_ignore_ascii_case("expires") {
            match httpdate::parse_http_date(attr_value) {
                Ok(time) => expires = Some(time),
                Err(_) => debug!(attr_value, "ignoring unparseable Expires"),
            }
        }
    }

    let expires_at = match max_age {
        // Max-Age wins over Expires; non-positive values expire immediately.
        Some(seconds) if seconds > 0 => now.checked_add(Duration::from_secs(seconds as u64)),
        Some(_) => Some(now),
        None => expires,
    };

    Some(Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        expires_at,
    })
}
