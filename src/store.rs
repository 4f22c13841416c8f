use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::{debug, warn};

use crate::config::{atomic_write, shred_file, ConfigStore, StoreConfig};
use crate::crypto::EntryCipher;
use crate::entry::{Entry, EntryId, EntryKind};
use crate::error::VaultError;
use crate::timestamp;

/// Length of generated entry names, drawn from 62 alphanumerics.
pub const GENERATED_NAME_LEN: usize = 10;

/// A file in the cache that could not be decrypted or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptFile {
    pub id: EntryId,
    pub reason: String,
}

impl From<CorruptFile> for VaultError {
    fn from(file: CorruptFile) -> Self {
        VaultError::CorruptEntry {
            id: file.id,
            reason: file.reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct Decrypted {
    pub entries: BTreeMap<EntryId, Entry>,
    pub failures: Vec<CorruptFile>,
}

/// Encrypted, content-addressed entry files in one cache directory.
pub struct EntryStore {
    dir: PathBuf,
    cipher: EntryCipher,
}

impl EntryStore {
    pub fn new(dir: impl Into<PathBuf>, password: &str) -> Self {
        Self {
            dir: dir.into(),
            cipher: EntryCipher::from_password(password),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a content entry. Empty `entry_name` and `timestamp` are filled in.
    pub fn put(
        &self,
        text: &str,
        document: &str,
        entry_name: &str,
        timestamp: &str,
    ) -> crate::Result<EntryId> {
        self.write(Entry::content(text, document, entry_name, timestamp))
    }

    pub fn put_tombstone(
        &self,
        kind: EntryKind,
        document: &str,
        entry_name: &str,
    ) -> crate::Result<EntryId> {
        self.write(Entry::tombstone(kind, document, entry_name))
    }

    fn write(&self, mut entry: Entry) -> crate::Result<EntryId> {
        entry.timestamp = if entry.timestamp.is_empty() {
            timestamp::now()
        } else {
            timestamp::normalize(&entry.timestamp)?
        };
        if entry.entry.is_empty() {
            entry.entry = generate_name();
        }

        let id = entry.file_name();
        let plaintext = serde_json::to_vec_pretty(&entry)?;
        let sealed = self.cipher.seal_hex(&plaintext)?;
        fs::create_dir_all(&self.dir)?;
        atomic_write(&self.dir.join(&id), sealed.as_bytes())?;
        debug!(id = %id, document = %entry.document, entry = %entry.entry, "wrote entry");
        Ok(id)
    }

    /// Decrypts one file. Failures carry the file's id.
    pub fn read(&self, id: &str) -> Result<Entry, CorruptFile> {
        let corrupt = |reason: String| CorruptFile {
            id: id.to_string(),
            reason,
        };
        let contents = fs::read_to_string(self.dir.join(id)).map_err(|e| corrupt(e.to_string()))?;
        let plaintext = self
            .cipher
            .open_hex(&contents)
            .map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&plaintext).map_err(|e| corrupt(e.to_string()))
    }

    /// Decrypts every file in the directory, setting aside the ones that fail.
    pub fn decrypt_all(&self) -> crate::Result<Decrypted> {
        let start = Instant::now();
        let mut decrypted = Decrypted::default();
        for path in entry_files(&self.dir)? {
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.read(id) {
                Ok(entry) => {
                    decrypted.entries.insert(id.to_string(), entry);
                }
                Err(failure) => {
                    warn!(id = %failure.id, reason = %failure.reason, "skipping corrupt entry file");
                    decrypted.failures.push(failure);
                }
            }
        }
        debug!(
            entries = decrypted.entries.len(),
            failures = decrypted.failures.len(),
            elapsed = ?start.elapsed(),
            "decrypted cache"
        );
        Ok(decrypted)
    }

    /// Tries the password against the first entry file only.
    ///
    /// An empty directory accepts any password.
    pub fn probe(dir: &Path, password: &str) -> crate::Result<()> {
        let Some(first) = entry_files(dir)?.into_iter().next() else {
            return Ok(());
        };
        debug!(file = %first.display(), "testing password");
        let contents = fs::read_to_string(&first)?;
        EntryCipher::from_password(password)
            .open_hex(&contents)
            .map(|_| ())
            .map_err(|_| VaultError::IncorrectPassword)
    }
}

/// Entry files of a cache directory in filename order, skipping dotfiles.
pub fn entry_files(dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let paths = glob::glob(&pattern)
        .map_err(|e| VaultError::Configuration(format!("bad cache path: {}", e)))?;
    let mut files = Vec::new();
    for path in paths {
        let path = path.map_err(|e| VaultError::FileSystem(e.into()))?;
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    Ok(files)
}

fn generate_name() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_NAME_LEN)
        .map(char::from)
        .collect()
}

/// Shreds every cached file and the profile list, then removes the cache root.
pub fn erase_all(config: &StoreConfig) -> crate::Result<usize> {
    let mut shredded = 0;
    if config.cache_root.exists() {
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&config.cache_root.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| VaultError::Configuration(format!("bad cache path: {}", e)))?;
        for path in paths.flatten() {
            if path.is_file() {
                shred_file(&path)?;
                shredded += 1;
            }
        }
        fs::remove_dir_all(&config.cache_root)?;
    }
    ConfigStore::new(config).erase()?;
    Ok(shredded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_then_read() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::new(tmp.path(), "test");
        let id = store
            .put("some text", "notes", "entry1", "2014-11-20T13:00:00-05:00")
            .unwrap();
        let entry = store.read(&id).unwrap();
        assert_eq!(entry.text, "some text");
        assert_eq!(entry.timestamp, "2014-11-20 13:00:00");
        assert_eq!(entry.document, "notes");
        assert_eq!(entry.entry, "entry1");
        assert_eq!(entry.kind, EntryKind::Content);
    }

    #[test]
    fn test_put_fills_name_and_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::new(tmp.path(), "test");
        let id = store.put("text", "notes", "", "").unwrap();
        let entry = store.read(&id).unwrap();
        assert_eq!(entry.entry.len(), GENERATED_NAME_LEN);
        assert!(entry.entry.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(entry.datetime().is_some());
    }

    #[test]
    fn test_put_rejects_bad_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::new(tmp.path(), "test");
        let err = store.put("text", "notes", "a", "not a date").unwrap_err();
        assert!(matches!(err, VaultError::UnparseableTimestamp(_)));
        assert!(entry_files(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_identical_text_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::new(tmp.path(), "test");
        let first = store.put("same", "notes", "a", "2014-11-20").unwrap();
        let second = store.put("same", "journal", "b", "2015-11-20").unwrap();
        assert_eq!(first, second);

        let decrypted = store.decrypt_all().unwrap();
        assert_eq!(decrypted.entries.len(), 1);
        let survivor = &decrypted.entries[&first];
        assert_eq!(survivor.document, "journal");
        assert_eq!(survivor.entry, "b");
    }

    #[test]
    fn test_decrypt_all_isolates_corrupt_files() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::new(tmp.path(), "test");
        store.put("good", "notes", "a", "2014-11-20").unwrap();
        fs::write(tmp.path().join("deadbeef"), "zz not hex").unwrap();
        EntryStore::new(tmp.path(), "other")
            .put("foreign", "notes", "b", "2014-11-21")
            .unwrap();

        let decrypted = store.decrypt_all().unwrap();
        assert_eq!(decrypted.entries.len(), 1);
        assert_eq!(decrypted.failures.len(), 2);
        assert!(decrypted.failures.iter().any(|f| f.id == "deadbeef"));
    }

    #[test]
    fn test_probe() {
        let tmp = TempDir::new().unwrap();
        EntryStore::probe(tmp.path(), "anything").unwrap();

        EntryStore::new(tmp.path(), "right")
            .put("text", "notes", "a", "")
            .unwrap();
        EntryStore::probe(tmp.path(), "right").unwrap();
        let err = EntryStore::probe(tmp.path(), "wrong").unwrap_err();
        assert!(matches!(err, VaultError::IncorrectPassword));
    }

    #[test]
    fn test_erase_all() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        ConfigStore::new(&config).resolve("zack", "ssh://server").unwrap();
        config.ensure_dirs("zack").unwrap();
        let store = EntryStore::new(config.local_dir("zack"), "test");
        store.put("one", "notes", "a", "").unwrap();
        store.put("two", "notes", "b", "").unwrap();

        assert_eq!(erase_all(&config).unwrap(), 2);
        assert!(!config.cache_root.exists());
        assert!(!config.config_file.exists());
    }
}
