//! Background fetch of the remote archive and the union merge into the local cache.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive;
use crate::config::{atomic_write, StoreConfig};
use crate::error::VaultError;
use crate::store::entry_files;
use crate::transport::Remote;

/// Outcome of talking to the sync endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    /// The remote was skipped or failed; local data is intact.
    LocalOnly { reason: String },
}

impl SyncStatus {
    pub fn local_only(reason: impl Into<String>) -> Self {
        SyncStatus::LocalOnly {
            reason: reason.into(),
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::LocalOnly { reason } => write!(f, "local only ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Whether the remote returned an archive.
    pub pulled: bool,
    /// Remote-only files copied into the local cache.
    pub copied: usize,
    pub status: SyncStatus,
}

/// Handle to a fetch running on the blocking pool.
pub struct FetchTask {
    handle: JoinHandle<crate::Result<FetchReport>>,
    cancelled: Arc<AtomicBool>,
}

impl FetchTask {
    /// Fails with `Configuration` outside a tokio runtime.
    pub fn spawn(
        config: StoreConfig,
        username: String,
        remote: Option<Arc<dyn Remote>>,
    ) -> crate::Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            VaultError::Configuration(format!("background fetch needs a tokio runtime: {}", e))
        })?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = runtime.spawn_blocking(move || {
            run_fetch(&config, &username, remote.as_deref(), &flag)
        });
        Ok(Self { handle, cancelled })
    }

    /// Asks the fetch to stop before merging remote data.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the fetch. Must not be called again once it has returned.
    pub async fn wait(&mut self) -> crate::Result<FetchReport> {
        (&mut self.handle).await?
    }
}

/// Pulls the remote archive, restores the local archive and unions the two caches.
///
/// Remote failures degrade to `LocalOnly`; only local I/O errors fail the fetch.
pub fn run_fetch(
    config: &StoreConfig,
    username: &str,
    remote: Option<&dyn Remote>,
    cancelled: &AtomicBool,
) -> crate::Result<FetchReport> {
    let start = Instant::now();
    let archive_name = StoreConfig::archive_name(username);

    let (pulled, status) = match remote {
        Some(remote) => match pull_into(config, username, remote) {
            Ok(pulled) => (pulled, SyncStatus::Synced),
            Err(err) => {
                warn!(username, error = %err, "fetch failed, continuing with local data");
                (false, SyncStatus::local_only(err.to_string()))
            }
        },
        None => (false, SyncStatus::local_only("no HTTP endpoint")),
    };
    debug!(elapsed = ?start.elapsed(), pulled, "pull phase done");

    if cancelled.load(Ordering::SeqCst) {
        info!(username, "fetch cancelled before merge");
        return Ok(FetchReport {
            pulled,
            copied: 0,
            status: SyncStatus::local_only("fetch cancelled"),
        });
    }

    let local_root = config.local_root();
    archive::unpack_file(&local_root.join(&archive_name), &local_root)?;
    debug!(elapsed = ?start.elapsed(), "local archive restored");

    if cancelled.load(Ordering::SeqCst) {
        info!(username, "fetch cancelled before merge");
        return Ok(FetchReport {
            pulled,
            copied: 0,
            status: SyncStatus::local_only("fetch cancelled"),
        });
    }

    let copied = union_copy(&config.remote_dir(username), &config.local_dir(username))?;
    info!(username, pulled, copied, status = %status, elapsed = ?start.elapsed(), "fetch finished");
    Ok(FetchReport {
        pulled,
        copied,
        status,
    })
}

fn pull_into(config: &StoreConfig, username: &str, remote: &dyn Remote) -> crate::Result<bool> {
    let Some(bytes) = remote.pull(username)? else {
        return Ok(false);
    };
    let remote_root = config.remote_root();
    fs::create_dir_all(&remote_root)?;
    atomic_write(&remote_root.join(StoreConfig::archive_name(username)), &bytes)?;
    archive::unpack(&bytes, &remote_root)?;
    Ok(true)
}

/// Copies files present in `from` but missing from `to`, byte for byte.
///
/// Existing files are never overwritten and nothing is deleted.
pub fn union_copy(from: &Path, to: &Path) -> crate::Result<usize> {
    fs::create_dir_all(to)?;
    let mut copied = 0;
    for path in entry_files(from)? {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = to.join(name);
        if target.exists() {
            continue;
        }
        fs::copy(&path, &target)?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRemote;
    use tempfile::TempDir;

    #[test]
    fn test_union_copy_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("remote");
        let to = tmp.path().join("local");
        fs::create_dir_all(&from).unwrap();
        fs::create_dir_all(&to).unwrap();
        fs::write(from.join("aaaa"), "remote-a").unwrap();
        fs::write(from.join("bbbb"), "remote-b").unwrap();
        fs::write(to.join("aaaa"), "local-a").unwrap();
        fs::write(to.join("cccc"), "local-c").unwrap();

        assert_eq!(union_copy(&from, &to).unwrap(), 1);
        assert_eq!(fs::read_to_string(to.join("aaaa")).unwrap(), "local-a");
        assert_eq!(fs::read_to_string(to.join("bbbb")).unwrap(), "remote-b");
        assert_eq!(fs::read_to_string(to.join("cccc")).unwrap(), "local-c");
        assert!(!from.join("cccc").exists());
    }

    #[test]
    fn test_union_copy_from_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let copied = union_copy(&tmp.path().join("nothing"), &tmp.path().join("local")).unwrap();
        assert_eq!(copied, 0);
    }

    fn remote_with_archive(files: &[(&str, &str)]) -> MemoryRemote {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("zack")).unwrap();
        for (name, contents) in files {
            fs::write(src.path().join("zack").join(name), contents).unwrap();
        }
        let remote = MemoryRemote::new();
        remote.insert("zack", archive::pack_dir(src.path(), "zack").unwrap());
        remote
    }

    #[test]
    fn test_run_fetch_merges_remote_files() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        config.ensure_dirs("zack").unwrap();
        fs::write(config.local_dir("zack").join("aaaa"), "local-a").unwrap();
        let remote = remote_with_archive(&[("aaaa", "remote-a"), ("bbbb", "remote-b")]);

        let report = run_fetch(&config, "zack", Some(&remote), &AtomicBool::new(false)).unwrap();
        assert!(report.pulled);
        assert_eq!(report.copied, 1);
        assert_eq!(report.status, SyncStatus::Synced);
        assert!(config.remote_root().join("zack.tar.gz").exists());
        assert_eq!(
            fs::read_to_string(config.local_dir("zack").join("aaaa")).unwrap(),
            "local-a"
        );
        assert_eq!(
            fs::read_to_string(config.local_dir("zack").join("bbbb")).unwrap(),
            "remote-b"
        );
    }

    #[test]
    fn test_run_fetch_offline_degrades() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        config.ensure_dirs("zack").unwrap();
        let remote = remote_with_archive(&[("bbbb", "remote-b")]);
        remote.set_offline(true);

        let report = run_fetch(&config, "zack", Some(&remote), &AtomicBool::new(false)).unwrap();
        assert!(!report.pulled);
        assert!(!report.status.is_synced());
        assert!(!config.local_dir("zack").join("bbbb").exists());
    }

    #[test]
    fn test_run_fetch_cancelled_skips_merge() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        config.ensure_dirs("zack").unwrap();
        let remote = remote_with_archive(&[("bbbb", "remote-b")]);

        let report = run_fetch(&config, "zack", Some(&remote), &AtomicBool::new(true)).unwrap();
        assert_eq!(report.copied, 0);
        assert!(config.remote_dir("zack").join("bbbb").exists());
        assert!(!config.local_dir("zack").join("bbbb").exists());
    }

    #[test]
    fn test_run_fetch_restores_local_archive() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        config.ensure_dirs("zack").unwrap();
        fs::write(config.local_dir("zack").join("aaaa"), "local-a").unwrap();
        archive::write_archive(
            &config.local_root(),
            "zack",
            &config.local_root().join("zack.tar.gz"),
        )
        .unwrap();
        fs::remove_file(config.local_dir("zack").join("aaaa")).unwrap();

        run_fetch(&config, "zack", None, &AtomicBool::new(false)).unwrap();
        assert_eq!(
            fs::read_to_string(config.local_dir("zack").join("aaaa")).unwrap(),
            "local-a"
        );
    }

    #[tokio::test]
    async fn test_fetch_task_wait() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        config.ensure_dirs("zack").unwrap();
        let remote: Arc<dyn Remote> = Arc::new(remote_with_archive(&[("bbbb", "remote-b")]));

        let mut task = FetchTask::spawn(config.clone(), "zack".to_string(), Some(remote)).unwrap();
        let report = task.wait().await.unwrap();
        assert_eq!(report.copied, 1);
        assert!(task.is_finished());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());
        let err = FetchTask::spawn(config, "zack".to_string(), None).err().unwrap();
        assert!(matches!(err, VaultError::Configuration(_)));
    }
}
