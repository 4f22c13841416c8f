use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::archive;
use crate::config::{ConfigStore, Profile, StoreConfig};
use crate::entry::{Entry, EntryId, EntryKind};
use crate::error::VaultError;
use crate::index::{DocumentIndex, Lookup};
use crate::store::{CorruptFile, EntryStore};
use crate::sync::{FetchTask, SyncStatus};
use crate::timestamp;
use crate::transport::{remote_for, Remote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Unlocked,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::Unlocked => "unlocked",
            SessionState::Closed => "closed",
        }
    }
}

/// Plaintext dump of every visible document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub username: String,
    pub exported_at: String,
    pub documents: BTreeMap<String, Vec<Entry>>,
}

/// One user's pass over the store: init, open, reads and writes, close.
pub struct Session {
    config: StoreConfig,
    state: SessionState,
    profile: Option<Profile>,
    remote_override: Option<Arc<dyn Remote>>,
    remote: Option<Arc<dyn Remote>>,
    fetch: Option<FetchTask>,
    pull_status: Option<SyncStatus>,
    store: Option<EntryStore>,
    password: Zeroizing<String>,
    index: Option<DocumentIndex>,
    corrupt: Vec<CorruptFile>,
}

impl Session {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            profile: None,
            remote_override: None,
            remote: None,
            fetch: None,
            pull_status: None,
            store: None,
            password: Zeroizing::new(String::new()),
            index: None,
            corrupt: Vec::new(),
        }
    }

    /// Uses `remote` instead of deriving one from the profile's endpoint.
    pub fn with_remote(mut self, remote: Arc<dyn Remote>) -> Self {
        self.remote_override = Some(remote);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Result of the last completed fetch.
    pub fn pull_status(&self) -> Option<&SyncStatus> {
        self.pull_status.as_ref()
    }

    /// Files skipped by the last index rebuild.
    pub fn corrupt_entries(&self) -> &[CorruptFile] {
        &self.corrupt
    }

    pub fn fetch_finished(&self) -> bool {
        self.fetch.as_ref().map_or(true, FetchTask::is_finished)
    }

    /// Resolves the profile and starts fetching remote data in the background.
    ///
    /// Outside a tokio runtime this fails with `Configuration` and the session
    /// stays where it was.
    pub fn init(&mut self, username: &str, endpoint: &str) -> crate::Result<&Profile> {
        if !matches!(self.state, SessionState::Uninitialized | SessionState::Closed) {
            return Err(self.invalid("init"));
        }
        let profile = ConfigStore::new(&self.config).resolve(username, endpoint)?;
        self.config.ensure_dirs(&profile.username)?;

        self.remote = match &self.remote_override {
            Some(remote) => Some(Arc::clone(remote)),
            None => remote_for(&profile, self.config.fetch_timeout),
        };
        self.fetch = Some(FetchTask::spawn(
            self.config.clone(),
            profile.username.clone(),
            self.remote.clone(),
        )?);
        self.pull_status = None;
        self.corrupt.clear();
        self.state = SessionState::Initialized;
        info!("🔐 Session initialized for {} ({})", profile.username, profile.endpoint);
        Ok(&*self.profile.insert(profile))
    }

    /// Waits for the background fetch, then checks the password.
    ///
    /// `IncorrectPassword` leaves the session initialized so the caller can retry.
    pub async fn open(&mut self, password: &str) -> crate::Result<()> {
        self.require(SessionState::Initialized, "open")?;
        if let Some(task) = self.fetch.as_mut() {
            let outcome = task.wait().await;
            self.fetch = None;
            self.pull_status = Some(outcome?.status);
        }
        self.unlock(password)
    }

    /// Like `open`, but gives up on the fetch after `limit`.
    ///
    /// On timeout the fetch is told to skip its merge and the session stays
    /// initialized; a later `open` waits for the fetch to wind down.
    pub async fn open_within(&mut self, password: &str, limit: Duration) -> crate::Result<()> {
        self.require(SessionState::Initialized, "open")?;
        if let Some(task) = self.fetch.as_mut() {
            match tokio::time::timeout(limit, task.wait()).await {
                Ok(outcome) => {
                    self.fetch = None;
                    self.pull_status = Some(outcome?.status);
                }
                Err(_) => {
                    task.cancel();
                    warn!(?limit, "remote fetch timed out");
                    return Err(VaultError::FetchTimedOut);
                }
            }
        }
        self.unlock(password)
    }

    fn unlock(&mut self, password: &str) -> crate::Result<()> {
        let Some(profile) = self.profile.clone() else {
            return Err(self.invalid("open"));
        };
        let dir = self.config.local_dir(&profile.username);
        EntryStore::probe(&dir, password)?;

        match profile.verify_password(password) {
            None => match ConfigStore::new(&self.config).record_verifier(&profile.username, password) {
                Ok(updated) => self.profile = Some(updated),
                Err(err) => warn!(error = %err, "could not record password verifier"),
            },
            Some(false) => warn!(
                username = %profile.username,
                "password differs from the one last recorded for this profile"
            ),
            Some(true) => {}
        }

        self.store = Some(EntryStore::new(dir, password));
        self.password = Zeroizing::new(password.to_string());
        self.index = None;
        self.state = SessionState::Unlocked;
        debug!(username = %profile.username, "session unlocked");
        Ok(())
    }

    /// Writes an entry. Empty `entry` and `timestamp` are filled in.
    ///
    /// Writing `ignore entry` or `ignore document` deletes, as the delete calls do.
    pub fn update(
        &mut self,
        text: &str,
        document: &str,
        entry: &str,
        timestamp: &str,
    ) -> crate::Result<EntryId> {
        let id = self.store("update")?.put(text, document, entry, timestamp)?;
        self.index = None;
        Ok(id)
    }

    pub fn delete_entry(&mut self, document: &str, entry: &str) -> crate::Result<EntryId> {
        let id = self
            .store("delete_entry")?
            .put_tombstone(EntryKind::EntryTombstone, document, entry)?;
        self.index = None;
        info!("🗑️  Deleted entry {} from {}", entry, document);
        Ok(id)
    }

    /// Hides `document` for good, including entries written to it later.
    pub fn delete_document(&mut self, document: &str) -> crate::Result<EntryId> {
        let id = self
            .store("delete_document")?
            .put_tombstone(EntryKind::DocumentTombstone, document, "")?;
        self.index = None;
        info!("🗑️  Deleted document {}", document);
        Ok(id)
    }

    pub fn list_documents(&mut self) -> crate::Result<Vec<String>> {
        Ok(self.index("list_documents")?.list_documents())
    }

    pub fn get_document(&mut self, document: &str) -> crate::Result<Vec<Entry>> {
        Ok(self.index("get_document")?.get_document(document))
    }

    pub fn get_entry(&mut self, document: &str, entry: &str) -> crate::Result<Entry> {
        self.index("get_entry")?.get_entry(document, entry)
    }

    pub fn entry_names(&mut self) -> crate::Result<Vec<String>> {
        Ok(self.index("entry_names")?.entry_names())
    }

    pub fn lookup(&mut self, name: &str) -> crate::Result<Lookup> {
        Ok(self.index("lookup")?.lookup(name))
    }

    /// Writes every visible document as plaintext JSON and returns the entry count.
    pub fn export_to_file(&mut self, path: impl AsRef<Path>) -> crate::Result<usize> {
        let username = self.username("export")?;
        let index = self.index("export")?;
        let documents: BTreeMap<String, Vec<Entry>> = index
            .list_documents()
            .into_iter()
            .map(|document| {
                let entries = index.get_document(&document);
                (document, entries)
            })
            .collect();
        let count = documents.values().map(Vec::len).sum();
        let bundle = ExportBundle {
            username,
            exported_at: timestamp::now(),
            documents,
        };
        let json = serde_json::to_string_pretty(&bundle)?;
        fs::write(path.as_ref(), json)?;
        info!("📤 Exported {} entries to {}", count, path.as_ref().display());
        Ok(count)
    }

    /// Writes each entry of an export bundle as a fresh content entry.
    pub fn import_from_file(&mut self, path: impl AsRef<Path>) -> crate::Result<usize> {
        self.require(SessionState::Unlocked, "import")?;
        let data = fs::read_to_string(path.as_ref())?;
        let bundle: ExportBundle = serde_json::from_str(&data)?;
        let mut count = 0;
        for (document, entries) in &bundle.documents {
            for entry in entries.iter().filter(|e| !e.kind.is_tombstone()) {
                self.update(&entry.text, document, &entry.entry, &entry.timestamp)?;
                count += 1;
            }
        }
        info!("📥 Imported {} entries from {}", count, path.as_ref().display());
        Ok(count)
    }

    /// Repacks the local cache and pushes it. Push failures only degrade the status.
    pub async fn close(&mut self) -> crate::Result<SyncStatus> {
        self.require(SessionState::Unlocked, "close")?;
        let username = self.username("close")?;

        let config = self.config.clone();
        let user = username.clone();
        let packed = tokio::task::spawn_blocking(move || {
            let root = config.local_root();
            archive::write_archive(&root, &user, &root.join(StoreConfig::archive_name(&user)))
        })
        .await??;

        let status = match self.remote.clone() {
            Some(remote) => {
                let user = username.clone();
                let password = self.password.clone();
                let pushed =
                    tokio::task::spawn_blocking(move || remote.push(&user, &password, packed))
                        .await?;
                match pushed {
                    Ok(()) => SyncStatus::Synced,
                    Err(err) => {
                        warn!(username = %username, error = %err, "push failed, changes kept locally");
                        SyncStatus::local_only(err.to_string())
                    }
                }
            }
            None => SyncStatus::local_only("no HTTP endpoint"),
        };

        self.store = None;
        self.index = None;
        self.password = Zeroizing::new(String::new());
        self.state = SessionState::Closed;
        info!("💾 Session closed for {}: {}", username, status);
        Ok(status)
    }

    fn require(&self, wanted: SessionState, operation: &'static str) -> crate::Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> VaultError {
        VaultError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    fn username(&self, operation: &'static str) -> crate::Result<String> {
        self.profile
            .as_ref()
            .map(|p| p.username.clone())
            .ok_or_else(|| self.invalid(operation))
    }

    fn store(&self, operation: &'static str) -> crate::Result<&EntryStore> {
        self.require(SessionState::Unlocked, operation)?;
        self.store.as_ref().ok_or_else(|| self.invalid(operation))
    }

    /// Decrypts the cache on first use after a write.
    fn index(&mut self, operation: &'static str) -> crate::Result<&DocumentIndex> {
        self.require(SessionState::Unlocked, operation)?;
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let decrypted = self.store(operation)?.decrypt_all()?;
                self.corrupt = decrypted.failures;
                DocumentIndex::rebuild(decrypted.entries)
            }
        };
        Ok(&*self.index.insert(index))
    }
}
