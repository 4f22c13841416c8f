use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::{thread_rng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VaultError;

const APP_DIR: &str = "vaultdocs";

/// Where a store keeps its files. Built once and handed to every component.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub config_file: PathBuf,
    pub cache_root: PathBuf,
    /// Applied to every HTTP request made against the sync endpoint.
    pub fetch_timeout: Duration,
}

impl StoreConfig {
    /// Platform defaults, unless `VAULTDOCS_HOME` points somewhere else.
    pub fn default_paths() -> Self {
        if let Ok(home) = std::env::var("VAULTDOCS_HOME") {
            return Self::with_root(home);
        }
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let (config_base, cache_base) = if cfg!(target_os = "windows") {
            let base = std::env::var("LOCALAPPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."));
            (base.clone(), base)
        } else if cfg!(target_os = "macos") {
            (
                home.join("Library/Application Support"),
                home.join("Library/Caches"),
            )
        } else {
            (home.join(".config"), home.join(".cache"))
        };
        Self {
            config_file: config_base.join(APP_DIR).join("config.json"),
            cache_root: cache_base.join(APP_DIR),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Roots the config file and every cache directory under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_file: root.join("config").join("config.json"),
            cache_root: root.join("cache"),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn local_root(&self) -> PathBuf {
        self.cache_root.join("local")
    }

    pub fn remote_root(&self) -> PathBuf {
        self.cache_root.join("remote")
    }

    /// Unpacked entry files for `username`.
    pub fn local_dir(&self, username: &str) -> PathBuf {
        self.local_root().join(username)
    }

    pub fn remote_dir(&self, username: &str) -> PathBuf {
        self.remote_root().join(username)
    }

    pub fn archive_name(username: &str) -> String {
        format!("{}.tar.gz", username)
    }

    /// Creates the per-user local and remote folders.
    pub fn ensure_dirs(&self, username: &str) -> crate::Result<()> {
        for dir in [self.local_dir(username), self.remote_dir(username)] {
            fs::create_dir_all(&dir)?;
        }
        if let Some(parent) = self.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    /// argon2 PHC string of the password that last unlocked this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    pub endpoint: String,
}

impl Profile {
    pub fn is_http(&self) -> bool {
        is_http_endpoint(&self.endpoint)
    }

    /// `None` when no verifier has been recorded yet.
    pub fn verify_password(&self, password: &str) -> Option<bool> {
        let stored = self.verifier.as_deref()?;
        let parsed = match PasswordHash::new(stored) {
            Ok(parsed) => parsed,
            Err(_) => return Some(false),
        };
        Some(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    }
}

pub fn is_http_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("http")
}

/// Endpoints must name one of the supported schemes.
fn is_known_scheme(endpoint: &str) -> bool {
    ["http://", "https://", "ssh://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme))
}

/// The persisted profile list, most recently used first.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.config_file.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> crate::Result<Vec<Profile>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    /// Picks the active profile and moves it to the front of the list.
    ///
    /// An empty `username` selects the current default. An existing profile keeps
    /// its stored endpoint; `endpoint` only seeds new profiles.
    pub fn resolve(&self, username: &str, endpoint: &str) -> crate::Result<Profile> {
        if !endpoint.is_empty() && !is_known_scheme(endpoint) {
            return Err(VaultError::InvalidEndpoint(endpoint.to_string()));
        }

        let mut profiles = if self.path.exists() {
            self.profiles()?
        } else {
            if username.is_empty() {
                return Err(VaultError::MissingUsername);
            }
            Vec::new()
        };

        let wanted = if username.is_empty() {
            match profiles.first() {
                Some(first) => first.username.clone(),
                None => return Err(VaultError::MissingUsername),
            }
        } else {
            username.to_string()
        };

        match profiles.iter().position(|p| p.username == wanted) {
            Some(0) => {}
            Some(index) => {
                let current = profiles.remove(index);
                profiles.insert(0, current);
            }
            None => {
                if !is_known_scheme(endpoint) {
                    return Err(VaultError::InvalidEndpoint(endpoint.to_string()));
                }
                profiles.insert(
                    0,
                    Profile {
                        username: wanted.clone(),
                        verifier: None,
                        endpoint: endpoint.to_string(),
                    },
                );
            }
        }

        self.save(&profiles)?;
        debug!(username = %profiles[0].username, endpoint = %profiles[0].endpoint, "resolved profile");
        Ok(profiles[0].clone())
    }

    pub fn set_endpoint(&self, username: &str, endpoint: &str) -> crate::Result<Profile> {
        if !is_known_scheme(endpoint) {
            return Err(VaultError::InvalidEndpoint(endpoint.to_string()));
        }
        self.update_profile(username, |profile| {
            profile.endpoint = endpoint.to_string();
            Ok(())
        })
    }

    /// Stores an argon2 hash of `password` on the profile.
    pub fn record_verifier(&self, username: &str, password: &str) -> crate::Result<Profile> {
        let mut salt_bytes = [0u8; 16];
        thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::b64_encode(&salt_bytes)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| VaultError::Crypto(e.to_string()))?
            .to_string();
        self.update_profile(username, |profile| {
            profile.verifier = Some(hash);
            Ok(())
        })
    }

    /// Removes the config file, shredding its contents first.
    pub fn erase(&self) -> crate::Result<()> {
        if self.path.exists() {
            shred_file(&self.path)?;
        }
        Ok(())
    }

    fn update_profile<F>(&self, username: &str, f: F) -> crate::Result<Profile>
    where
        F: FnOnce(&mut Profile) -> crate::Result<()>,
    {
        let mut profiles = self.profiles()?;
        let profile = profiles
            .iter_mut()
            .find(|p| p.username == username)
            .ok_or_else(|| VaultError::UnknownProfile(username.to_string()))?;
        f(profile)?;
        let updated = profile.clone();
        self.save(&profiles)?;
        Ok(updated)
    }

    fn save(&self, profiles: &[Profile]) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(profiles)?;
        atomic_write(&self.path, data.as_bytes())
    }
}

/// Writes to a temporary sibling and renames it into place.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| VaultError::Configuration(format!("invalid path {}", path.display())))?;
    let suffix: u64 = thread_rng().gen();
    let tmp = parent.join(format!(".tmp_vaultdocs.{}.tmp", suffix));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Overwrites a file with random bytes before removing it.
pub(crate) fn shred_file(path: &Path) -> crate::Result<()> {
    let len = fs::metadata(path)?.len() as usize;
    let mut noise = vec![0u8; len];
    thread_rng().fill_bytes(&mut noise);
    fs::write(path, &noise)?;
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> ConfigStore {
        ConfigStore::new(&StoreConfig::with_root(tmp.path()))
    }

    #[test]
    fn test_first_resolve_requires_username() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let err = store.resolve("", "http://localhost:9095").unwrap_err();
        assert!(matches!(err, VaultError::MissingUsername));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_first_resolve_requires_known_scheme() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let err = store.resolve("zack", "ftp://server").unwrap_err();
        assert!(matches!(err, VaultError::InvalidEndpoint(_)));
        let err = store.resolve("zack", "").unwrap_err();
        assert!(matches!(err, VaultError::InvalidEndpoint(_)));
        let err = store.resolve("zack", "httpserver").unwrap_err();
        assert!(matches!(err, VaultError::InvalidEndpoint(_)));
        let err = store.resolve("zack", "sshd").unwrap_err();
        assert!(matches!(err, VaultError::InvalidEndpoint(_)));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_resolve_promotes_and_keeps_stored_endpoint() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.resolve("zack", "ssh://server1").unwrap();
        store.resolve("anna", "http://server2").unwrap();
        assert_eq!(store.profiles().unwrap()[0].username, "anna");

        let zack = store.resolve("zack", "http://ignored").unwrap();
        assert_eq!(zack.endpoint, "ssh://server1");
        let names: Vec<String> = store
            .profiles()
            .unwrap()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["zack", "anna"]);
    }

    #[test]
    fn test_empty_username_selects_default() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.resolve("zack", "ssh://server1").unwrap();
        store.resolve("anna", "http://server2").unwrap();
        let profile = store.resolve("", "").unwrap();
        assert_eq!(profile.username, "anna");
        assert_eq!(profile.endpoint, "http://server2");
    }

    #[test]
    fn test_set_endpoint_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.resolve("zack", "ssh://server1").unwrap();
        store.resolve("anna", "http://server2").unwrap();

        let updated = store.set_endpoint("zack", "https://other").unwrap();
        assert_eq!(updated.endpoint, "https://other");
        let profiles = store.profiles().unwrap();
        assert_eq!(profiles[0].username, "anna");
        assert_eq!(profiles[1].endpoint, "https://other");

        assert!(matches!(
            store.set_endpoint("zack", "somewhere"),
            Err(VaultError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            store.set_endpoint("nobody", "http://x"),
            Err(VaultError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_verifier_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let profile = store.resolve("zack", "ssh://server1").unwrap();
        assert_eq!(profile.verify_password("secret"), None);

        store.record_verifier("zack", "secret").unwrap();
        let profile = store.resolve("zack", "").unwrap();
        assert_eq!(profile.verify_password("secret"), Some(true));
        assert_eq!(profile.verify_password("wrong"), Some(false));
    }

    #[test]
    fn test_erase_removes_config() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.resolve("zack", "ssh://server1").unwrap();
        store.erase().unwrap();
        assert!(!store.path().exists());
        assert!(store.profiles().unwrap().is_empty());
    }
}
