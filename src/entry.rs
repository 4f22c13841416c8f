use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::crypto::content_address;
use crate::timestamp;

/// Filename of an entry file, which is also its identity in the index.
pub type EntryId = String;

/// Writing this text marks the entry name as deleted from its document.
pub const ENTRY_TOMBSTONE_TEXT: &str = "ignore entry";
/// Writing this text marks the whole document as deleted.
pub const DOCUMENT_TOMBSTONE_TEXT: &str = "ignore document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Content,
    /// Hides the entry name from its document.
    EntryTombstone,
    /// Hides the whole document, permanently.
    DocumentTombstone,
}

impl EntryKind {
    /// Classifies by the reserved tombstone texts.
    pub fn from_text(text: &str) -> Self {
        match text {
            ENTRY_TOMBSTONE_TEXT => EntryKind::EntryTombstone,
            DOCUMENT_TOMBSTONE_TEXT => EntryKind::DocumentTombstone,
            _ => EntryKind::Content,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        !matches!(self, EntryKind::Content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredEntry")]
pub struct Entry {
    pub text: String,
    pub timestamp: String,
    pub document: String,
    pub entry: String,
    pub kind: EntryKind,
}

/// Wire shape of an entry; `kind` is absent in older files.
#[derive(Deserialize)]
struct StoredEntry {
    text: String,
    timestamp: String,
    document: String,
    entry: String,
    #[serde(default)]
    kind: Option<EntryKind>,
}

impl From<StoredEntry> for Entry {
    fn from(stored: StoredEntry) -> Self {
        let kind = stored
            .kind
            .unwrap_or_else(|| EntryKind::from_text(&stored.text));
        Entry {
            text: stored.text,
            timestamp: stored.timestamp,
            document: stored.document,
            entry: stored.entry,
            kind,
        }
    }
}

impl Entry {
    /// A write of `text`. The reserved tombstone texts yield tombstones.
    pub fn content(text: &str, document: &str, entry: &str, timestamp: &str) -> Self {
        Self {
            text: text.to_string(),
            timestamp: timestamp.to_string(),
            document: document.to_string(),
            entry: entry.to_string(),
            kind: EntryKind::from_text(text),
        }
    }

    pub fn tombstone(kind: EntryKind, document: &str, entry: &str) -> Self {
        let text = match kind {
            EntryKind::DocumentTombstone => DOCUMENT_TOMBSTONE_TEXT,
            _ => ENTRY_TOMBSTONE_TEXT,
        };
        Self {
            text: text.to_string(),
            timestamp: String::new(),
            document: document.to_string(),
            entry: entry.to_string(),
            kind,
        }
    }

    /// `None` for timestamps that no longer parse; those sort as the oldest.
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        timestamp::parse(&self.timestamp).ok()
    }

    /// Name of the file this entry is stored under.
    ///
    /// Entries are addressed by their text alone, so two writes with identical
    /// text land on the same file and the later one replaces the earlier. That
    /// holds for tombstones too: a second entry delete replaces the first marker.
    pub fn file_name(&self) -> EntryId {
        content_address(&self.text)
    }
}
