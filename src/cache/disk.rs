//! Disk-backed session store.
//!
//! One JSON file per (base URL, principal) pair under the per-user
//! application directory. Unlocked: concurrent writers sharing a key can
//! clobber each other (accepted limitation — single writer assumed).

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use super::{CacheEntry, SessionStore};

const APP_DIR_NAME: &str = "gatepass";

/// Errors locating the cache directory.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,
}

/// JSON-file session store keyed by (base URL, principal).
#[derive(Debug, Clone)]
pub struct DiskStore {
    path: PathBuf,
}

impl DiskStore {
    /// Creates a store for the given key under the default application
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigDirUnavailable`] if no usable config dir
    /// is found.
    pub fn for_key(base_url: &str, principal: &str) -> Result<Self, StoreError> {
        let dir = default_config_dir()?;
        Ok(Self {
            path: dir.join(cache_file_name(base_url, principal)),
        })
    }

    /// Creates a store at an explicit file path.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for DiskStore {
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> CacheEntry {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cache file; starting empty");
                return CacheEntry::default();
            }
            Err(e) => {
                warn!(error = %e, "failed to read session cache; starting empty");
                return CacheEntry::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "session cache is corrupt; starting empty");
                CacheEntry::default()
            }
        }
    }

    #[instrument(level = "debug", skip(self, entry), fields(path = %self.path.display()))]
    fn save(&self, entry: &CacheEntry) {
        let payload = match serde_json::to_vec_pretty(entry) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize session cache");
                return;
            }
        };

        if let Some(parent) = self.path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warn!(error = %e, "failed to create cache directory");
            return;
        }

        if let Err(e) = fs::write(&self.path, payload) {
            warn!(error = %e, "failed to write session cache");
            return;
        }
        if let Err(e) = set_owner_only_permissions(&self.path) {
            warn!(error = %e, "failed to restrict cache file permissions");
        }
        debug!(cookies = entry.cookies.len(), "session cache written");
    }
}

/// Derives the stable, sanitized file name for a (base URL, principal) pair.
#[must_use]
pub fn cache_file_name(base_url: &str, principal: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_url.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(principal.as_bytes());
    let digest = hasher.finalize();

    let mut key = String::with_capacity(32);
    for byte in &digest[..16] {
        key.push_str(&format!("{byte:02x}"));
    }
    format!("session-{key}.json")
}

fn default_config_dir() -> Result<PathBuf, StoreError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, StoreError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join(APP_DIR_NAME));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join(APP_DIR_NAME));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join(APP_DIR_NAME));
    }
    Err(StoreError::ConfigDirUnavailable)
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::super::CookieRecord;
    use super::*;

    fn sample_entry() -> CacheEntry {
        CacheEntry {
            cookies: vec![CookieRecord {
                name: "sid".to_string(),
                value: "abc".to_string(),
                expires_at: Some(4_102_444_800),
            }],
            user_agent: Some("UA".to_string()),
        }
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::at_path(dir.path().join("session.json"));

        store.save(&sample_entry());
        let loaded = store.load();
        assert_eq!(loaded, sample_entry());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::at_path(dir.path().join("absent.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{not json").unwrap();

        let store = DiskStore::at_path(path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::at_path(dir.path().join("session.json"));

        store.save(&sample_entry());
        let smaller = CacheEntry {
            cookies: vec![CookieRecord {
                name: "other".to_string(),
                value: "1".to_string(),
                expires_at: None,
            }],
            user_agent: None,
        };
        store.save(&smaller);

        let loaded = store.load();
        assert_eq!(loaded, smaller, "previous cookies must not survive a save");
    }

    #[test]
    fn test_save_failure_does_not_panic() {
        // A directory path cannot be written as a file.
        let dir = TempDir::new().unwrap();
        let store = DiskStore::at_path(dir.path());
        store.save(&sample_entry());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_cache_file_name_is_stable_and_distinct() {
        let a1 = cache_file_name("https://a.example.com", "robot@a");
        let a2 = cache_file_name("https://a.example.com", "robot@a");
        let b = cache_file_name("https://b.example.com", "robot@a");
        let c = cache_file_name("https://a.example.com", "robot@b");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1, c);
        assert!(a1.starts_with("session-"));
        assert!(a1.ends_with(".json"));
    }

    #[test]
    fn test_cache_file_name_contains_no_url_characters() {
        let name = cache_file_name("https://a.example.com:8443/path?q=1", "robot@example.com");
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
        assert!(!name.contains('@'));
    }

    #[test]
    fn test_resolve_config_dir_prefers_xdg_over_home() {
        let resolved = resolve_config_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
            None,
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/gatepass"));
    }

    #[test]
    fn test_resolve_config_dir_falls_back_to_home_then_appdata() {
        let home = resolve_config_dir(None, Some(PathBuf::from("/tmp/home")), None).unwrap();
        assert_eq!(home, PathBuf::from("/tmp/home/.config/gatepass"));

        let appdata = resolve_config_dir(None, None, Some(PathBuf::from("/tmp/appdata"))).unwrap();
        assert_eq!(appdata, PathBuf::from("/tmp/appdata/gatepass"));
    }

    #[test]
    fn test_resolve_config_dir_errors_when_all_sources_missing() {
        let result = resolve_config_dir(None, None, None);
        assert!(matches!(result, Err(StoreError::ConfigDirUnavailable)));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = DiskStore::at_path(&path);
        store.save(&sample_entry());

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
