use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid endpoint '{0}': must start with http, https or ssh")]
    InvalidEndpoint(String),

    #[error("A username is required to initialize for the first time")]
    MissingUsername,

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Unparseable timestamp: {0}")]
    UnparseableTimestamp(String),

    #[error("Entry not found: {document}/{entry}")]
    EntryNotFound { document: String, entry: String },

    #[error("Entry deleted: {document}/{entry}")]
    EntryDeleted { document: String, entry: String },

    #[error("Sync endpoint unreachable: {0}")]
    SyncUnreachable(String),

    #[error("Timed out waiting for the remote fetch")]
    FetchTimedOut,

    #[error("Invalid session state: {operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Corrupt entry {id}: {reason}")]
    CorruptEntry { id: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Background task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl VaultError {
    /// Whether the caller can simply prompt again and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::IncorrectPassword | VaultError::FetchTimedOut)
    }
}
