//! Asset-manifest generation: a flat JSON object mapping each original
//! build-relative path to its final path, covering primaries and every
//! companion representation.

use camino::Utf8Path;
use indexmap::IndexMap;
use serde_json::to_string_pretty;
use tracing::instrument;

use crate::core::document::{Document, DocumentRegistry, proxy_path_for, source_map_path_for};
use crate::core::hash::hashed_path;
use crate::core::rewrite::{apply_origin, relative_to};

/// Original relative path -> final relative (or origin-absolute) path.
pub type AssetManifest = IndexMap<String, String>;

/// Inputs for manifest entry formatting.
#[derive(Debug, Clone, Copy)]
pub struct ManifestOptions<'a> {
    pub directory: &'a Utf8Path,
    pub hash_length: Option<usize>,
    pub base_url: Option<&'a str>,
}

/// Build the manifest from the pre-rename registry (keys are original
/// paths; final paths are derived). Registry iteration is sorted, so the
/// manifest is byte-stable across runs.
#[instrument(skip_all, fields(documents = registry.len()))]
pub fn generate_asset_manifest(registry: &DocumentRegistry, opts: &ManifestOptions<'_>) -> AssetManifest {
    let mut manifest = AssetManifest::new();
    for document in registry.values() {
        insert_document_entries(document, registry, opts, &mut manifest);
    }
    manifest
}

fn insert_document_entries(
    document: &Document,
    registry: &DocumentRegistry,
    opts: &ManifestOptions<'_>,
    manifest: &mut AssetManifest,
) {
    let from = document.file_path.clone();
    let to = hashed_path(document, registry, opts.hash_length);
    insert_entry(&from, &to, opts, manifest);

    if let Some(map) = &document.source_map {
        let map_from = source_map_path_for(&from);
        let map_to = source_map_path_for(&to);
        insert_entry(&map_from, &map_to, opts, manifest);

        if map.proxy.is_some() {
            insert_entry(&proxy_path_for(&map_from), &proxy_path_for(&map_to), opts, manifest);
        }
    }

    if let Some(dts) = &document.dts {
        insert_document_entries(dts, registry, opts, manifest);
    }
}

fn insert_entry(
    from: &Utf8Path,
    to: &Utf8Path,
    opts: &ManifestOptions<'_>,
    manifest: &mut AssetManifest,
) {
    let key = relative_to(opts.directory, from).to_string();
    let value = match opts.base_url {
        Some(origin) => apply_origin(opts.directory, to, origin),
        None => relative_to(opts.directory, to).to_string(),
    };
    manifest.insert(key, value);
}

/// Serialize the manifest the way it lands on disk.
pub fn manifest_json(manifest: &AssetManifest) -> String {
    // Infallible: string-to-string map.
    to_string_pretty(manifest).unwrap_or_default()
}
