//! Reconciliation between the directory as read and the registry the
//! pipeline produced: which concrete files must be written, which deleted,
//! and which are already correct on disk.
//!
//! Both sides are flattened to path -> bytes first, enumerating every
//! representation a document owns (primary contents, source map JSON, proxy
//! module, declaration companion). Hashed documents land in `created` +
//! `deleted` pairs (new name appears, old name goes); documents that keep
//! their path but change bytes (the manifest's neighbors: HTML and friends)
//! land in `updated` so they are rewritten in place instead of slipping
//! through untouched.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use tracing::{debug, instrument};

use crate::core::document::{Document, DocumentRegistry, proxy_path_for, source_map_path_for};

/// Flattened view of a registry: every concrete file it implies.
pub type FileSet = BTreeMap<Utf8PathBuf, Vec<u8>>;

/// Outcome of reconciling the original directory against the final registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDiff {
    /// Paths that exist only in the final set.
    pub created: Vec<Utf8PathBuf>,
    /// Paths present on both sides with different bytes.
    pub updated: Vec<Utf8PathBuf>,
    /// Paths that exist only in the original set.
    pub deleted: Vec<Utf8PathBuf>,
    /// Paths present on both sides with identical bytes.
    pub unchanged: Vec<Utf8PathBuf>,
}

impl DocumentDiff {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Expand a registry into the concrete files it implies.
pub fn flatten_registry(registry: &DocumentRegistry) -> FileSet {
    let mut files = FileSet::new();
    for document in registry.values() {
        flatten_document(document, &mut files);
    }
    files
}

fn flatten_document(document: &Document, files: &mut FileSet) {
    files.insert(document.file_path.clone(), document.contents.as_bytes().to_vec());

    if let Some(map) = &document.source_map {
        let map_path = source_map_path_for(&document.file_path);
        files.insert(map_path.clone(), map.raw.clone().into_bytes());

        if let Some(proxy) = &map.proxy {
            // Proxy file path follows the map, not whatever the nested
            // document was read as.
            let mut proxy_doc = (**proxy).clone();
            proxy_doc.file_path = proxy_path_for(&map_path);
            flatten_document(&proxy_doc, files);
        }
    }

    if let Some(dts) = &document.dts {
        flatten_document(dts, files);
    }
}

/// Classify every path across the original and final file sets.
#[instrument(skip_all, fields(original = original.len(), updated = updated.len()))]
pub fn diff_file_sets(original: &FileSet, updated: &FileSet) -> DocumentDiff {
    let mut diff = DocumentDiff::default();

    for (path, bytes) in original {
        match updated.get(path) {
            None => diff.deleted.push(path.clone()),
            Some(new_bytes) if new_bytes == bytes => diff.unchanged.push(path.clone()),
            Some(_) => diff.updated.push(path.clone()),
        }
    }

    for path in updated.keys() {
        if !original.contains_key(path) {
            diff.created.push(path.clone());
        }
    }

    debug!(
        created = diff.created.len(),
        updated = diff.updated.len(),
        deleted = diff.deleted.len(),
        unchanged = diff.unchanged.len(),
        "reconciled file sets"
    );
    diff
}

/// Convenience wrapper for registries.
pub fn diff_registries(original: &DocumentRegistry, updated: &DocumentRegistry) -> DocumentDiff {
    diff_file_sets(&flatten_registry(original), &flatten_registry(updated))
}
