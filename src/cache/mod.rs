//! Persistent session cache.
//!
//! The cache is a pluggable capability: the session manager talks to a
//! [`SessionStore`], and tests substitute [`MemoryStore`] for the disk-backed
//! [`DiskStore`] without touching the core algorithm. Load is tolerant and
//! save is best-effort — a read-only filesystem degrades to "no cache",
//! never to a crash.

mod disk;
mod memory;

use serde::{Deserialize, Serialize};

pub use disk::{DiskStore, StoreError};
pub use memory::MemoryStore;

use crate::cookie::{Cookie, CookieJar};

/// One persisted cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Expiry as Unix seconds; absent for session-scoped cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// Persisted session state for one (base URL, principal) pair.
///
/// Written wholesale on every cookie update; loaded eagerly when a session
/// manager is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// All cookies held at save time.
    #[serde(default)]
    pub cookies: Vec<CookieRecord>,
    /// Recorded browser user-agent, when a browser login produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl CacheEntry {
    /// Snapshots a jar (and optional user-agent) into a persistable entry.
    #[must_use]
    pub fn from_jar(jar: &CookieJar, user_agent: Option<&str>) -> Self {
        Self {
            cookies: jar
                .cookies()
                .map(|cookie| CookieRecord {
                    name: cookie.name.clone(),
                    value: cookie.value().to_string(),
                    expires_at: cookie.expires_unix(),
                })
                .collect(),
            user_agent: user_agent.map(str::to_string),
        }
    }

    /// Rebuilds jar cookies from the persisted records.
    #[must_use]
    pub fn to_cookies(&self) -> Vec<Cookie> {
        self.cookies
            .iter()
            .map(|record| {
                Cookie::from_parts(record.name.clone(), record.value.clone(), record.expires_at)
            })
            .collect()
    }

    /// Returns whether the entry holds nothing worth persisting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.user_agent.is_none()
    }
}

/// Load/save capability for persisted session state.
pub trait SessionStore: Send + Sync {
    /// Loads the persisted entry, returning empty state when nothing usable
    /// exists.
    fn load(&self) -> CacheEntry;

    /// Persists the entry, overwriting any previous state. Failures are
    /// logged, never raised.
    fn save(&self, entry: &CacheEntry);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn test_cache_entry_round_trips_through_jar() {
        let mut jar = CookieJar::new();
        jar.store(Cookie::with_expiry(
            "sid",
            "abc",
            UNIX_EPOCH + Duration::from_secs(4_102_444_800),
        ));
        jar.store(Cookie::new("pref", "1"));

        let entry = CacheEntry::from_jar(&jar, Some("Mozilla/5.0 Test"));
        let rebuilt = CookieJar::from_cookies(entry.to_cookies());

        let now = SystemTime::now();
        let margin = Duration::from_secs(60);
        assert!(rebuilt.is_valid("sid", now, margin));
        assert!(rebuilt.is_valid("pref", now, margin));
        assert_eq!(entry.user_agent.as_deref(), Some("Mozilla/5.0 Test"));
    }

    #[test]
    fn test_cache_entry_serializes_to_camel_case_contract() {
        let entry = CacheEntry {
            cookies: vec![CookieRecord {
                name: "sid".to_string(),
                value: "abc".to_string(),
                expires_at: Some(4_102_444_800),
            }],
            user_agent: Some("UA".to_string()),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["cookies"][0]["name"], "sid");
        assert_eq!(json["cookies"][0]["expiresAt"], 4_102_444_800_u64);
        assert_eq!(json["userAgent"], "UA");
    }

    #[test]
    fn test_session_cookie_omits_expiry_field() {
        let entry = CacheEntry {
            cookies: vec![CookieRecord {
                name: "sid".to_string(),
                value: "abc".to_string(),
                expires_at: None,
            }],
            user_agent: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("expiresAt"));
        assert!(!json.contains("userAgent"));
    }

    #[test]
    fn test_is_empty() {
        assert!(CacheEntry::default().is_empty());
        let entry = CacheEntry {
            cookies: vec![],
            user_agent: Some("UA".to_string()),
        };
        assert!(!entry.is_empty());
    }
}
