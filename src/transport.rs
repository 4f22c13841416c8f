//! Pull/push of whole archives against a sync endpoint.
//!
//! Calls are blocking; the session runs them on tokio's blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::Profile;
use crate::error::VaultError;

/// A remote archive store keyed by username.
pub trait Remote: Send + Sync {
    /// `Ok(None)` when the user has nothing stored yet.
    fn pull(&self, username: &str) -> crate::Result<Option<Vec<u8>>>;

    /// Replaces the user's stored archive.
    fn push(&self, username: &str, password: &str, archive: Vec<u8>) -> crate::Result<()>;
}

/// The remote for a profile's endpoint, if it speaks HTTP.
pub fn remote_for(profile: &Profile, timeout: Duration) -> Option<Arc<dyn Remote>> {
    if profile.is_http() {
        Some(Arc::new(HttpRemote::new(&profile.endpoint, timeout)))
    } else {
        warn!(endpoint = %profile.endpoint, "no transport for endpoint, working locally");
        None
    }
}

/// `GET {endpoint}/pull` and `POST {endpoint}/post` with basic auth.
pub struct HttpRemote {
    endpoint: String,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // Built per call: a blocking client must not be dropped on an async worker.
    fn client(&self) -> crate::Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(unreachable)
    }
}

fn unreachable(err: reqwest::Error) -> VaultError {
    VaultError::SyncUnreachable(err.to_string())
}

impl Remote for HttpRemote {
    fn pull(&self, username: &str) -> crate::Result<Option<Vec<u8>>> {
        let url = format!("{}/pull", self.endpoint);
        let response = self
            .client()?
            .get(&url)
            .basic_auth(username, None::<&str>)
            .send()
            .map_err(unreachable)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!(username, "remote has no archive yet");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(VaultError::SyncUnreachable(format!(
                "pull from {} returned {}",
                url, status
            )));
        }
        let body = response.bytes().map_err(unreachable)?;
        if body.is_empty() {
            return Ok(None);
        }
        debug!(username, bytes = body.len(), "pulled archive");
        Ok(Some(body.to_vec()))
    }

    fn push(&self, username: &str, password: &str, archive: Vec<u8>) -> crate::Result<()> {
        let url = format!("{}/post", self.endpoint);
        let bytes = archive.len();
        let response = self
            .client()?
            .post(&url)
            .basic_auth(username, Some(password))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(archive)
            .send()
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(VaultError::SyncUnreachable(format!(
                "push to {} returned {}: {}",
                url,
                status,
                text.trim()
            )));
        }
        debug!(username, bytes, "pushed archive");
        Ok(())
    }
}

/// In-process remote, useful for tests and for embedding without a server.
#[derive(Default)]
pub struct MemoryRemote {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `SyncUnreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn archive(&self, username: &str) -> Option<Vec<u8>> {
        self.archives
            .lock()
            .ok()
            .and_then(|archives| archives.get(username).cloned())
    }

    pub fn insert(&self, username: &str, archive: Vec<u8>) {
        if let Ok(mut archives) = self.archives.lock() {
            archives.insert(username.to_string(), archive);
        }
    }

    fn check_online(&self) -> crate::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VaultError::SyncUnreachable("remote is offline".to_string()));
        }
        Ok(())
    }
}

impl Remote for MemoryRemote {
    fn pull(&self, username: &str) -> crate::Result<Option<Vec<u8>>> {
        self.check_online()?;
        Ok(self.archive(username))
    }

    fn push(&self, username: &str, _password: &str, archive: Vec<u8>) -> crate::Result<()> {
        self.check_online()?;
        self.insert(username, archive);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves one canned response and hands back the raw request.
    fn serve_once(response: &'static [u8]) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response).unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (endpoint, handle)
    }

    #[test]
    fn test_pull_no_content() {
        let (endpoint, server) =
            serve_once(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");
        let remote = HttpRemote::new(&endpoint, Duration::from_secs(5));
        assert_eq!(remote.pull("zack").unwrap(), None);

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /pull "));
        // basic auth with an empty password: base64("zack:")
        assert!(request.contains("emFjazo="));
    }

    #[test]
    fn test_pull_archive() {
        let (endpoint, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 5\r\nConnection: close\r\n\r\nbytes",
        );
        let remote = HttpRemote::new(&format!("{}/", endpoint), Duration::from_secs(5));
        assert_eq!(remote.pull("zack").unwrap(), Some(b"bytes".to_vec()));
        server.join().unwrap();
    }

    #[test]
    fn test_push_sends_archive() {
        let (endpoint, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        );
        let remote = HttpRemote::new(&endpoint, Duration::from_secs(5));
        remote.push("zack", "pw", b"archive".to_vec()).unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /post "));
        assert!(request.to_ascii_lowercase().contains("content-type: application/octet-stream"));
        assert!(request.ends_with("archive"));
        // base64("zack:pw")
        assert!(request.contains("emFjazpwdw=="));
    }

    #[test]
    fn test_push_rejected() {
        let (endpoint, server) = serve_once(
            b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 18\r\nConnection: close\r\n\r\nincorrect password",
        );
        let remote = HttpRemote::new(&endpoint, Duration::from_secs(5));
        let err = remote.push("zack", "pw", b"archive".to_vec()).unwrap_err();
        assert!(matches!(err, VaultError::SyncUnreachable(ref m) if m.contains("401")));
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let remote = HttpRemote::new(&endpoint, Duration::from_secs(5));
        assert!(matches!(
            remote.pull("zack"),
            Err(VaultError::SyncUnreachable(_))
        ));
    }

    #[test]
    fn test_memory_remote_offline() {
        let remote = MemoryRemote::new();
        remote.push("zack", "pw", vec![1, 2, 3]).unwrap();
        assert_eq!(remote.pull("zack").unwrap(), Some(vec![1, 2, 3]));
        remote.set_offline(true);
        assert!(remote.pull("zack").is_err());
    }
}
