//! Content-hash engine: SHA-512 digests, hash indirection, combined cycle
//! hashing, and hashed-path derivation.
//!
//! Internal hashes are kept full-length; trimming to the configured hash
//! length is a prefix slice applied only where a hash is embedded into a
//! filename or manifest entry, never where it is stored.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use sha2::{Digest, Sha512};

use crate::core::document::{
    Document, DocumentHash, DocumentRegistry, companion_primary, proxy_path_for,
    source_map_path_for,
};

/// SHA-512 of raw bytes, base64url-encoded without padding.
pub fn sha512_base64url(bytes: &[u8]) -> String {
    let digest = Sha512::digest(bytes);
    URL_SAFE_NO_PAD.encode(digest)
}

/// Prefix slice of a base64url hash. `None` keeps the full length.
pub fn trim_hash(hash: &str, length: Option<usize>) -> &str {
    match length {
        Some(n) if n < hash.len() => &hash[..n],
        _ => hash,
    }
}

/// Effective hash of a document, following `HashFor` indirection through
/// the registry. Returns `None` for unhashed documents.
pub fn content_hash_of(document: &Document, registry: &DocumentRegistry) -> Option<String> {
    match document.content_hash.as_ref()? {
        DocumentHash::Direct(hash) => Some(hash.clone()),
        DocumentHash::HashFor(target) => {
            let target_doc = registry.get(target)?;
            content_hash_of(target_doc, registry)
        }
    }
}

/// `foo.js` + hash -> `foo.<hash>.js`: the hash is embedded before the
/// (possibly multi-part) extension.
pub fn replace_hash(path: &Utf8Path, extension: &str, hash: &str) -> Utf8PathBuf {
    let s = path.as_str();
    match s.strip_suffix(extension) {
        Some(stem) if !extension.is_empty() => Utf8PathBuf::from(format!("{stem}.{hash}{extension}")),
        _ => Utf8PathBuf::from(format!("{s}.{hash}")),
    }
}

/// Final (possibly renamed) path of a document: its original path with the
/// trimmed effective hash embedded, or the original path unchanged for
/// unhashed documents and documents that do not support renaming.
pub fn hashed_path(document: &Document, registry: &DocumentRegistry, hash_length: Option<usize>) -> Utf8PathBuf {
    if !document.supports_hashes {
        return document.file_path.clone();
    }
    match content_hash_of(document, registry) {
        Some(hash) => replace_hash(
            &document.file_path,
            &document.file_extension,
            trim_hash(&hash, hash_length),
        ),
        None => document.file_path.clone(),
    }
}

/// Representative hash used when folding a document into a combined digest:
/// the resolved registry hash if one exists, else the hash of its raw bytes.
fn representative_hash(document: &Document, registry: &DocumentRegistry) -> String {
    content_hash_of(document, registry).unwrap_or_else(|| sha512_base64url(document.contents.as_bytes()))
}

/// Combined hashes for a batch of mutually dependent documents (a cycle).
///
/// Rewriting alone cannot break the circularity: each member's bytes would
/// need the other's final name first. Instead every `Direct` member gets a
/// Merkle-style digest seeded with its own representative hash and folded
/// with the representative hash of everything transitively reachable from it
/// (breadth-first in dependency discovery order, visited-set de-duplicated).
/// Two members with identical content and identical dependency closures get
/// identical hashes; a change anywhere in the closure propagates upward.
pub fn combined_hashes(
    batch: &[Utf8PathBuf],
    registry: &DocumentRegistry,
) -> IndexMap<Utf8PathBuf, String> {
    let mut computed = IndexMap::new();
    if batch.len() < 2 {
        return computed;
    }

    for path in batch {
        let Some(document) = registry.get(path) else { continue };
        if matches!(document.content_hash, Some(DocumentHash::Direct(_))) {
            computed.insert(path.clone(), combined_hash(document, registry));
        }
    }

    computed
}

fn combined_hash(document: &Document, registry: &DocumentRegistry) -> String {
    let mut digest = Sha512::new();
    digest.update(representative_hash(document, registry).as_bytes());

    // BFS over the dependency closure. The queue is fed in dependency
    // discovery order (which fixes the digest insertion order) and the
    // visited set keeps the fold finite even when the closure loops back
    // onto `document` itself.
    let mut visited: std::collections::HashSet<&Utf8Path> = std::collections::HashSet::new();
    let mut queue: Vec<&Utf8Path> = document.dependencies.iter().map(|d| d.file_path.as_path()).collect();
    let mut head = 0;

    while head < queue.len() {
        let path = queue[head];
        head += 1;

        if !visited.insert(path) {
            continue;
        }

        // Companion targets fold their primary's representative hash.
        let dep_doc = registry
            .get(path)
            .or_else(|| companion_primary(path).and_then(|p| registry.get(&p)));
        let Some(dep_doc) = dep_doc else { continue };
        digest.update(representative_hash(dep_doc, registry).as_bytes());

        for dep in &dep_doc.dependencies {
            queue.push(dep.file_path.as_path());
        }
    }

    URL_SAFE_NO_PAD.encode(digest.finalize())
}

/// Hash-table entries contributed by one document: the primary path plus
/// every companion representation (source map, proxy module, `.d.ts` and its
/// companions), all carrying the same hash.
pub fn document_hash_entries(
    document: &Document,
    registry: &DocumentRegistry,
) -> IndexMap<Utf8PathBuf, String> {
    let mut entries = IndexMap::new();
    let Some(hash) = content_hash_of(document, registry) else {
        return entries;
    };
    collect_hash_entries(document, &hash, &mut entries);
    entries
}

fn collect_hash_entries(document: &Document, hash: &str, entries: &mut IndexMap<Utf8PathBuf, String>) {
    entries.insert(document.file_path.clone(), hash.to_string());

    if let Some(map) = &document.source_map {
        let map_path = source_map_path_for(&document.file_path);
        entries.insert(map_path.clone(), hash.to_string());

        if map.proxy.is_some() {
            entries.insert(proxy_path_for(&map_path), hash.to_string());
        }
    }

    if let Some(dts) = &document.dts {
        collect_hash_entries(dts, hash, entries);
    }
}
