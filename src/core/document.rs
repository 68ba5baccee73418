//! Document model: the in-memory representation of one discovered asset
//! and its relationships.
//!
//! A `Document` is created by directory scan + per-format extraction,
//! mutated by the hash engine (hash assignment) and the rewriter (content +
//! path), and retired when the reconciler decides its original path must be
//! deleted. The registry is the single source of truth, keyed by the
//! document's *original* absolute path for the whole in-memory pipeline;
//! hashed paths are derived, never used as lookup keys.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Map of file paths to the corresponding Document. `BTreeMap` so every
/// iteration over the registry is deterministic.
pub type DocumentRegistry = BTreeMap<Utf8PathBuf, Document>;

/// Textual or opaque binary payload of a document.
///
/// Binary payloads are hashed and byte-copied but never rewritten. They are
/// serialized as base64 in registry dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Contents {
    Text(String),
    #[serde(with = "base64_bytes")]
    Binary(Vec<u8>),
}

impl Contents {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Contents::Text(s) => Some(s.as_str()),
            Contents::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Contents::Text(s) => s.as_bytes(),
            Contents::Binary(b) => b.as_slice(),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Contents::Binary(_))
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// How a document's hash is defined.
///
/// `HashFor` is hash indirection: the document always carries the same hash
/// as another document (source maps, `.d.ts` files, proxy modules — shadow
/// representations of a primary file). Targets of `HashFor` are never
/// themselves `HashFor`; resolution is a single hop through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DocumentHash {
    /// Hash computed from this document's own bytes (plus, transitively,
    /// its dependency closure via content rewriting or combined hashing).
    Direct(String),
    /// Mirror the hash of the document registered at this path.
    HashFor(Utf8PathBuf),
}

/// One reference from a document's contents to another file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The specifier text as written in the source (`./foo.js`, `/img/a.png`).
    pub specifier: String,
    /// Resolved absolute path of the referenced file.
    pub file_path: Utf8PathBuf,
    /// Normalized extension of the referenced file.
    pub file_extension: String,
    /// Byte range `[start, end)` into `contents` holding the specifier text.
    pub position: (usize, usize),
}

/// A source map attached to a document.
///
/// `raw` is kept as JSON text and parsed lazily: a malformed map must not
/// fail the pipeline, only skip that document's map rewrites. The `proxy`
/// models a same-named `.proxy.js` wrapper some loaders require for a map
/// to be importable as an ES module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub raw: String,
    pub proxy: Option<Box<Document>>,
}

/// One discovered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Absolute path. Stays at the original path until the registry is
    /// finalized; the hashed path is derived on demand.
    pub file_path: Utf8PathBuf,
    /// Normalized extension, including multi-part suffixes
    /// (`.d.ts`, `.js.map`, `.js.map.proxy.js`).
    pub file_extension: String,
    pub contents: Contents,
    /// Ordered by `position.0`, non-overlapping. An implementation
    /// invariant of extraction, relied upon by the rewriter.
    pub dependencies: Vec<Dependency>,
    /// `None` means opaque/unhashed (e.g. the manifest itself).
    pub content_hash: Option<DocumentHash>,
    pub source_map: Option<SourceMap>,
    /// Companion TypeScript declaration file, processed in lockstep.
    pub dts: Option<Box<Document>>,
    /// Whether this document's path may be renamed.
    pub supports_hashes: bool,
}

impl Document {
    /// A minimal text document with no relationships; callers fill in the rest.
    pub fn text(path: impl Into<Utf8PathBuf>, extension: impl Into<String>, contents: impl Into<String>) -> Self {
        Document {
            file_path: path.into(),
            file_extension: extension.into(),
            contents: Contents::Text(contents.into()),
            dependencies: Vec::new(),
            content_hash: None,
            source_map: None,
            dts: None,
            supports_hashes: true,
        }
    }

    /// Path of this document's source map file (`foo.js` -> `foo.js.map`).
    pub fn source_map_path(&self) -> Utf8PathBuf {
        source_map_path_for(&self.file_path)
    }
}

/// `foo.js` -> `foo.js.map`.
pub fn source_map_path_for(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.map"))
}

/// `foo.js.map` -> `foo.js.map.proxy.js`.
pub fn proxy_path_for(map_path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{map_path}.proxy.js"))
}

/// `foo.js` -> `foo.d.ts`.
pub fn dts_path_for(path: &Utf8Path) -> Utf8PathBuf {
    let s = path.as_str();
    match s.strip_suffix(".js") {
        Some(stem) => Utf8PathBuf::from(format!("{stem}.d.ts")),
        None => Utf8PathBuf::from(format!("{s}.d.ts")),
    }
}

/// Primary path a companion representation belongs to, if the path looks
/// like one: `foo.js.map.proxy.js` / `foo.js.map` / `foo.d.ts` -> `foo.js`,
/// `foo.css.map` -> `foo.css`. Companions live nested inside their primary's
/// `Document`, so registry lookups for these paths go through this mapping.
pub fn companion_primary(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let s = path.as_str();
    if let Some(stem) = s.strip_suffix(".proxy.js") {
        return companion_primary(Utf8Path::new(stem));
    }
    if let Some(stem) = s.strip_suffix(".map") {
        // A `.d.ts.map` chains through the declaration to the primary.
        return Some(companion_primary(Utf8Path::new(stem)).unwrap_or_else(|| Utf8PathBuf::from(stem)));
    }
    if let Some(stem) = s.strip_suffix(".d.ts") {
        return Some(Utf8PathBuf::from(format!("{stem}.js")));
    }
    None
}

/// Normalized file extension, recognizing the multi-part suffixes that
/// matter to the pipeline: `foo.js.map.proxy.js` -> `.js.map.proxy.js`,
/// `foo.d.ts` -> `.d.ts`, `foo.css.map` -> `.css.map`.
pub fn file_extension_of(path: &str) -> String {
    if let Some(stem) = path.strip_suffix(".proxy.js") {
        return format!("{}.proxy.js", file_extension_of(stem));
    }
    if let Some(stem) = path.strip_suffix(".map") {
        return format!("{}.map", file_extension_of(stem));
    }
    if path.ends_with(".d.ts") {
        return ".d.ts".to_string();
    }
    match path.rfind('/') {
        Some(slash) => extension_of_name(&path[slash + 1..]),
        None => extension_of_name(path),
    }
}

fn extension_of_name(name: &str) -> String {
    // Mirror `Path::extension`: a leading dot alone is not an extension.
    if name.len() < 2 {
        return String::new();
    }
    match name[1..].rfind('.') {
        Some(dot) => name[dot + 1..].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_part_extensions() {
        assert_eq!(file_extension_of("dist/foo.js"), ".js");
        assert_eq!(file_extension_of("dist/foo.js.map"), ".js.map");
        assert_eq!(file_extension_of("dist/foo.d.ts"), ".d.ts");
        assert_eq!(file_extension_of("dist/foo.d.ts.map"), ".d.ts.map");
        assert_eq!(file_extension_of("dist/foo.js.map.proxy.js"), ".js.map.proxy.js");
        assert_eq!(file_extension_of("dist/foo.css"), ".css");
        assert_eq!(file_extension_of("dist/logo.png"), ".png");
        assert_eq!(file_extension_of("dist/Makefile"), "");
        assert_eq!(file_extension_of(".gitignore"), "");
    }

    #[test]
    fn companion_paths() {
        let p = Utf8PathBuf::from("/dist/foo.js");
        assert_eq!(source_map_path_for(&p), "/dist/foo.js.map");
        assert_eq!(proxy_path_for(&source_map_path_for(&p)), "/dist/foo.js.map.proxy.js");
        assert_eq!(dts_path_for(&p), "/dist/foo.d.ts");
    }

    #[test]
    fn companion_primary_mapping() {
        assert_eq!(companion_primary(Utf8Path::new("/d/foo.js.map")), Some("/d/foo.js".into()));
        assert_eq!(
            companion_primary(Utf8Path::new("/d/foo.js.map.proxy.js")),
            Some("/d/foo.js".into())
        );
        assert_eq!(companion_primary(Utf8Path::new("/d/foo.d.ts")), Some("/d/foo.js".into()));
        assert_eq!(companion_primary(Utf8Path::new("/d/foo.css.map")), Some("/d/foo.css".into()));
        assert_eq!(companion_primary(Utf8Path::new("/d/foo.d.ts.map")), Some("/d/foo.js".into()));
        assert_eq!(companion_primary(Utf8Path::new("/d/foo.js")), None);
    }

    #[test]
    fn binary_contents_roundtrip_serde() {
        let c = Contents::Binary(vec![0u8, 159, 146, 150]);
        let json = serde_json::to_string(&c).unwrap();
        let back: Contents = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
