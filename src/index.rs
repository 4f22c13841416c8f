//! Per-document views over the flat set of decrypted entries.

use std::collections::{HashMap, HashSet};

use crate::entry::{Entry, EntryId, EntryKind};
use crate::error::VaultError;

/// What a bare name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Document(Vec<Entry>),
    Entry(Entry),
    New,
}

#[derive(Debug, Default)]
pub struct DocumentIndex {
    entries: HashMap<EntryId, Entry>,
    /// Most recent write per entry name, across all documents.
    by_name: HashMap<String, EntryId>,
    /// Ascending by timestamp. Each entry name is kept only in the document of
    /// its most recent write.
    ordering: HashMap<String, Vec<EntryId>>,
    tombstoned: HashSet<String>,
}

impl DocumentIndex {
    pub fn rebuild<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (EntryId, Entry)>,
    {
        let mut index = DocumentIndex::default();

        let mut newest_first: Vec<_> = entries
            .into_iter()
            .map(|(id, entry)| (entry.datetime(), id, entry))
            .collect();
        newest_first.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut seen: HashSet<String> = HashSet::new();
        for (_, id, entry) in newest_first {
            if entry.kind == EntryKind::DocumentTombstone {
                index.tombstoned.insert(entry.document.clone());
            }
            index
                .by_name
                .entry(entry.entry.clone())
                .or_insert_with(|| id.clone());
            if seen.insert(entry.entry.clone()) {
                index
                    .ordering
                    .entry(entry.document.clone())
                    .or_default()
                    .push(id.clone());
            }
            index.entries.insert(id, entry);
        }

        for ids in index.ordering.values_mut() {
            ids.reverse();
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_tombstoned(&self, document: &str) -> bool {
        self.tombstoned.contains(document)
    }

    /// Documents never hit by a document tombstone, sorted by name.
    pub fn list_documents(&self) -> Vec<String> {
        let mut documents: Vec<String> = self
            .ordering
            .keys()
            .filter(|document| !self.tombstoned.contains(*document))
            .cloned()
            .collect();
        documents.sort();
        documents
    }

    pub fn get_document(&self, document: &str) -> Vec<Entry> {
        if self.tombstoned.contains(document) {
            return Vec::new();
        }
        self.ordering
            .get(document)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id))
                    .filter(|entry| entry.kind == EntryKind::Content)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_entry(&self, document: &str, name: &str) -> crate::Result<Entry> {
        let found = self
            .ordering
            .get(document)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
            .find(|entry| entry.entry == name);

        match found {
            Some(entry) if entry.kind == EntryKind::EntryTombstone => Err(VaultError::EntryDeleted {
                document: document.to_string(),
                entry: name.to_string(),
            }),
            Some(entry) => Ok(entry.clone()),
            None => Err(VaultError::EntryNotFound {
                document: document.to_string(),
                entry: name.to_string(),
            }),
        }
    }

    /// Every entry name seen in any document, sorted.
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves `name` as a visible document first, then as an entry name.
    pub fn lookup(&self, name: &str) -> Lookup {
        if self.ordering.contains_key(name) && !self.tombstoned.contains(name) {
            return Lookup::Document(self.get_document(name));
        }
        let Some(entry) = self.by_name.get(name).and_then(|id| self.entries.get(id)) else {
            return Lookup::New;
        };
        if self.tombstoned.contains(&entry.document) {
            return Lookup::New;
        }
        match self.get_entry(&entry.document, name) {
            Ok(entry) => Lookup::Entry(entry),
            Err(_) => Lookup::New,
        }
    }
}
