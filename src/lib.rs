pub mod archive;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod index;
pub mod session;
pub mod store;
pub mod sync;
pub mod timestamp;
pub mod transport;

pub use config::{ConfigStore, Profile, StoreConfig};
pub use entry::{Entry, EntryId, EntryKind};
pub use error::VaultError;
pub use index::{DocumentIndex, Lookup};
pub use session::{ExportBundle, Session, SessionState};
pub use store::{erase_all, CorruptFile, EntryStore};
pub use sync::{FetchReport, SyncStatus};
pub use transport::{HttpRemote, MemoryRemote, Remote};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, VaultError>;
