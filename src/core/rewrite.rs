//! Reference rewriter: applies hashed paths to dependency specifiers inside
//! document contents, keeps source maps composed across passes, and refreshes
//! `sourceMappingURL` comments to the final hashed map filenames.
//!
//! Rewrites happen strictly in memory on registry snapshots; nothing here
//! touches disk.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

use crate::core::document::{
    Contents, Document, DocumentHash, DocumentRegistry, Dependency, SourceMap, companion_primary,
    source_map_path_for,
};
use crate::core::hash::{combined_hashes, hashed_path, replace_hash, sha512_base64url, trim_hash};
use crate::core::sourcemap::{
    RawSourceMap, compose, edit_map, find_source_mapping_url, source_mapping_url_comment,
};

/// One content replacement: byte range `[start, end)` replaced by
/// `replacement`. `start == end` is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// Inputs the rewriter needs beyond the registry itself.
#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions<'a> {
    /// Build directory root; absolute replacements and origin URLs are
    /// relative to it.
    pub directory: &'a Utf8Path,
    /// Hash prefix length embedded into filenames. `None` keeps full hashes.
    pub hash_length: Option<usize>,
    /// Whether source maps are regenerated alongside content rewrites.
    pub source_maps: bool,
    /// Origin to resolve replacement paths against (CDN deployments).
    pub base_url: Option<&'a str>,
}

/// Apply ascending, non-overlapping edits to a string in one pass.
pub fn apply_edits(contents: &str, edits: &[Edit]) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&contents[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&contents[cursor..]);
    out
}

/// Rewrite one dependency-first batch.
///
/// For a batch of two or more (a cycle), every `Direct` member first receives
/// its combined hash; content rewriting then embeds those pre-computed names
/// and the post-edit rehash is skipped, because the combined hash already
/// covers the whole closure. A singleton batch is rewritten first and hashed
/// from its final bytes, which is what propagates dependency hashes upward.
#[instrument(skip_all, fields(batch = batch.len()))]
pub fn rewrite_batch(
    batch: &[Utf8PathBuf],
    mut registry: DocumentRegistry,
    opts: &RewriteOptions<'_>,
) -> DocumentRegistry {
    let combined = combined_hashes(batch, &registry);

    for path in batch {
        let Some(mut document) = registry.get(path).cloned() else { continue };
        debug!(file = %path, "rewriting dependencies");

        let skip_hash_update = match combined.get(path) {
            Some(hash) => {
                document.content_hash = Some(DocumentHash::Direct(hash.clone()));
                true
            }
            None => false,
        };

        let document = rewrite_document(document, &registry, &combined, opts, skip_hash_update);
        registry.insert(path.clone(), document);
    }

    registry
}

fn rewrite_document(
    mut document: Document,
    registry: &DocumentRegistry,
    combined: &IndexMap<Utf8PathBuf, String>,
    opts: &RewriteOptions<'_>,
    skip_hash_update: bool,
) -> Document {
    // Source maps are recomposed, never edited as text; binary payloads are
    // opaque.
    if document.file_extension.ends_with(".map") || document.contents.is_binary() {
        return document;
    }
    let Some(text) = document.contents.as_text() else {
        return document;
    };
    let original = text.to_string();

    let edits = dependency_edits(&document, registry, combined, opts);
    document.contents = Contents::Text(apply_edits(&original, &edits));

    if !skip_hash_update && matches!(document.content_hash, Some(DocumentHash::Direct(_))) {
        document.content_hash = Some(DocumentHash::Direct(sha512_base64url(
            document.contents.as_bytes(),
        )));
    }

    if opts.source_maps && !document.file_extension.ends_with(".proxy.js") {
        let file_name = document.file_path.file_name().unwrap_or_default().to_string();
        if let Some(map) = &mut document.source_map {
            recompose_map(map, &file_name, &original, &edits);
            if let Some(proxy) = map.proxy.take() {
                map.proxy = Some(Box::new(rewrite_document(*proxy, registry, combined, opts, true)));
            }
        }
    }

    if let Some(dts) = document.dts.take() {
        // The companion mirrors the primary's hash; only its specifiers move.
        document.dts = Some(Box::new(rewrite_document(*dts, registry, combined, opts, true)));
    }

    document
}

fn dependency_edits(
    document: &Document,
    registry: &DocumentRegistry,
    combined: &IndexMap<Utf8PathBuf, String>,
    opts: &RewriteOptions<'_>,
) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(document.dependencies.len());
    for dep in &document.dependencies {
        let replacement = if let Some(dep_doc) = registry.get(&dep.file_path) {
            replacement_path(document, dep_doc, dep, registry, combined, opts)
        } else if let Some(primary) =
            companion_primary(&dep.file_path).filter(|p| registry.contains_key(p))
        {
            // Companion target nested under a primary: shadow it with a
            // hash-indirection view so the replacement carries the
            // primary's hash under the companion's own name.
            let shadow = companion_view(dep, primary);
            replacement_path(document, &shadow, dep, registry, combined, opts)
        } else {
            debug!(file = %document.file_path, dependency = %dep.file_path, "dependency not in registry, leaving specifier untouched");
            continue;
        };
        if replacement == dep.specifier {
            // Unhashed targets resolve back to the text already in place; an
            // identity edit would still coarsen the source map over the range.
            continue;
        }
        let (start, end) = dep.position;
        edits.push(Edit { start, end, replacement });
    }
    edits
}

fn companion_view(dep: &Dependency, primary: Utf8PathBuf) -> Document {
    Document {
        file_path: dep.file_path.clone(),
        file_extension: dep.file_extension.clone(),
        contents: Contents::Text(String::new()),
        dependencies: Vec::new(),
        content_hash: Some(DocumentHash::HashFor(primary)),
        source_map: None,
        dts: None,
        supports_hashes: true,
    }
}

/// The specifier text that replaces a dependency reference.
///
/// Shape follows the reference as written: a `base_url` rebases everything
/// onto that origin, a root-absolute specifier stays root-absolute against
/// the build directory, anything else stays relative to the referencing
/// document. Declaration-file targets lose their `.d.ts` suffix so the
/// specifier stays extensionless the way declaration imports are written.
fn replacement_path(
    document: &Document,
    dep_doc: &Document,
    dep: &Dependency,
    registry: &DocumentRegistry,
    combined: &IndexMap<Utf8PathBuf, String>,
    opts: &RewriteOptions<'_>,
) -> String {
    // Cycle members and their companions use the freshly computed combined
    // hash; everything else reads the registry.
    let combined_for = combined.get(&dep_doc.file_path).or_else(|| match &dep_doc.content_hash {
        Some(DocumentHash::HashFor(target)) => combined.get(target),
        _ => None,
    });
    let hashed = match combined_for {
        Some(hash) => replace_hash(
            &dep_doc.file_path,
            &dep_doc.file_extension,
            trim_hash(hash, opts.hash_length),
        ),
        None => hashed_path(dep_doc, registry, opts.hash_length),
    };

    let path_to_use = if let Some(origin) = opts.base_url {
        apply_origin(opts.directory, &hashed, origin)
    } else if dep.specifier.starts_with('/') {
        ensure_absolute(relative_to(opts.directory, &hashed).as_str())
    } else {
        let parent = document.file_path.parent().unwrap_or(Utf8Path::new("/"));
        ensure_relative(relative_to(parent, &hashed).as_str())
    };

    match path_to_use.strip_suffix(".d.ts") {
        Some(stripped) => stripped.to_string(),
        None => path_to_use,
    }
}

/// Final pass: point every `sourceMappingURL` comment at the hashed map
/// filename. Runs after all hashes are settled; the comment depends on the
/// hash, so this edit must not feed back into it.
#[instrument(skip_all)]
pub fn rewrite_source_map_urls(
    registry: DocumentRegistry,
    opts: &RewriteOptions<'_>,
) -> DocumentRegistry {
    if !opts.source_maps {
        return registry;
    }
    let snapshot = registry.clone();
    registry
        .into_iter()
        .map(|(path, document)| {
            let updated = refresh_source_map_url(document, &snapshot, opts);
            (path, updated)
        })
        .collect()
}

fn refresh_source_map_url(
    mut document: Document,
    registry: &DocumentRegistry,
    opts: &RewriteOptions<'_>,
) -> Document {
    if document.source_map.is_none() || document.file_extension.ends_with(".map") {
        return document;
    }
    let Some(text) = document.contents.as_text() else {
        return document;
    };
    let original = text.to_string();

    let final_path = hashed_path(&document, registry, opts.hash_length);
    let Some(map_name) = source_map_path_for(&final_path).file_name().map(str::to_string) else {
        return document;
    };
    let comment = source_mapping_url_comment(&map_name, &document.file_extension);

    let edit = match find_source_mapping_url(&original) {
        Some((start, end)) => {
            if original[start..end] == comment {
                return document;
            }
            Edit { start, end, replacement: comment }
        }
        None => {
            let mut replacement = String::new();
            if !original.ends_with('\n') {
                replacement.push('\n');
            }
            replacement.push_str(&comment);
            Edit { start: original.len(), end: original.len(), replacement }
        }
    };

    let edits = vec![edit];
    document.contents = Contents::Text(apply_edits(&original, &edits));

    let file_name = document.file_path.file_name().unwrap_or_default().to_string();
    if let Some(map) = &mut document.source_map {
        recompose_map(map, &file_name, &original, &edits);
    }
    document
}

fn recompose_map(map: &mut SourceMap, file_name: &str, original: &str, edits: &[Edit]) {
    let delta = edit_map(file_name, original, edits);
    match RawSourceMap::parse(&map.raw) {
        Ok(stored) => match compose(&delta, &stored) {
            Ok(composed) => map.raw = composed.to_json(),
            Err(err) => warn!(file = file_name, error = %err, "source map composition failed, keeping previous map"),
        },
        Err(err) => {
            warn!(file = file_name, error = %err, "malformed source map, skipping map rewrite");
        }
    }
}

/// Relative path from `base` (a directory) to `target`, POSIX-style.
pub fn relative_to(base: &Utf8Path, target: &Utf8Path) -> Utf8PathBuf {
    let mut base_parts = base.components().peekable();
    let mut target_parts = target.components().peekable();
    while let (Some(b), Some(t)) = (base_parts.peek(), target_parts.peek()) {
        if b != t {
            break;
        }
        base_parts.next();
        target_parts.next();
    }

    let mut out = Utf8PathBuf::new();
    for _ in base_parts {
        out.push("..");
    }
    for part in target_parts {
        out.push(part.as_str());
    }
    out
}

/// Pathname of `new URL(relative, origin)` for the file's path under the
/// build directory: origin path segments resolved against the relative path,
/// host and scheme dropped.
pub fn apply_origin(directory: &Utf8Path, file: &Utf8Path, origin: &str) -> String {
    let relative = relative_to(directory, file);

    let path_start = origin.find("://").map_or(0, |i| i + 3);
    let base_path = match origin[path_start..].find('/') {
        Some(i) => &origin[path_start + i..],
        None => "/",
    };

    let mut segments: Vec<&str> = base_path.split('/').collect();
    // URL resolution drops the last segment of the base path.
    segments.pop();
    for part in relative.as_str().split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    ensure_absolute(&joined)
}

fn ensure_absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn ensure_relative(path: &str) -> String {
    if path.starts_with('.') {
        path.to_string()
    } else {
        format!("./{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::file_extension_of;

    fn opts(directory: &Utf8Path) -> RewriteOptions<'_> {
        RewriteOptions { directory, hash_length: Some(6), source_maps: true, base_url: None }
    }

    fn doc(path: &str, contents: &str) -> Document {
        let mut d = Document::text(path, file_extension_of(path), contents);
        d.content_hash = Some(DocumentHash::Direct(sha512_base64url(contents.as_bytes())));
        d
    }

    fn dep(specifier: &str, path: &str, start: usize, end: usize) -> Dependency {
        Dependency {
            specifier: specifier.to_string(),
            file_path: path.into(),
            file_extension: file_extension_of(path),
            position: (start, end),
        }
    }

    fn registry_of(docs: Vec<Document>) -> DocumentRegistry {
        docs.into_iter().map(|d| (d.file_path.clone(), d)).collect()
    }

    #[test]
    fn apply_edits_handles_replacements_and_insertions() {
        let edits = vec![
            Edit { start: 0, end: 3, replacement: "qux".into() },
            Edit { start: 4, end: 7, replacement: "quux".into() },
            Edit { start: 8, end: 8, replacement: "!".into() },
        ];
        assert_eq!(apply_edits("foo bar\n", &edits), "qux quux\n!");
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_to("/d/sub".into(), Utf8Path::new("/d/sub/a.js")), "a.js");
        assert_eq!(relative_to("/d/sub".into(), Utf8Path::new("/d/other/b.js")), "../other/b.js");
        assert_eq!(relative_to("/d".into(), Utf8Path::new("/d/x/y.css")), "x/y.css");
    }

    #[test]
    fn apply_origin_resolves_against_origin_path() {
        let dir = Utf8Path::new("/build");
        assert_eq!(
            apply_origin(dir, Utf8Path::new("/build/js/app.abc.js"), "https://cdn.example.com"),
            "/js/app.abc.js"
        );
        assert_eq!(
            apply_origin(dir, Utf8Path::new("/build/app.abc.js"), "https://example.com/static/"),
            "/static/app.abc.js"
        );
    }

    #[test]
    fn single_document_rewrite_updates_content_and_hash() {
        let dir = Utf8Path::new("/d");
        let leaf = doc("/d/foo.js", "export const foo = 1\n");
        let contents = "import { foo } from './foo.js'\n";
        let mut main = doc("/d/bar.js", contents);
        main.dependencies.push(dep("./foo.js", "/d/foo.js", 21, 29));

        let registry = registry_of(vec![leaf.clone(), main]);
        let registry = rewrite_batch(&["/d/bar.js".into()], registry, &opts(dir));

        let updated = &registry[Utf8Path::new("/d/bar.js")];
        let text = updated.contents.as_text().unwrap();
        let leaf_hash = sha512_base64url(leaf.contents.as_bytes());
        let expected = format!("import {{ foo }} from './foo.{}.js'\n", &leaf_hash[..6]);
        assert_eq!(text, expected);
        assert_eq!(
            updated.content_hash,
            Some(DocumentHash::Direct(sha512_base64url(text.as_bytes())))
        );
    }

    #[test]
    fn absolute_specifier_stays_absolute() {
        let dir = Utf8Path::new("/d");
        let img = {
            let mut d = Document::text("/d/img/logo.png", ".png", "");
            d.contents = Contents::Binary(vec![1, 2, 3]);
            d.content_hash = Some(DocumentHash::Direct(sha512_base64url(&[1, 2, 3])));
            d
        };
        let contents = "body { background: url(/img/logo.png) }\n";
        let mut css = doc("/d/style.css", contents);
        css.dependencies.push(dep("/img/logo.png", "/d/img/logo.png", 23, 36));

        let registry = registry_of(vec![img.clone(), css]);
        let registry = rewrite_batch(&["/d/style.css".into()], registry, &opts(dir));

        let text = registry[Utf8Path::new("/d/style.css")].contents.as_text().unwrap().to_string();
        let hash = sha512_base64url(&[1, 2, 3]);
        assert_eq!(text, format!("body {{ background: url(/img/logo.{}.png) }}\n", &hash[..6]));
    }

    #[test]
    fn base_url_rebases_replacements() {
        let dir = Utf8Path::new("/d");
        let leaf = doc("/d/foo.js", "export {}\n");
        let mut main = doc("/d/bar.js", "import './foo.js'\n");
        main.dependencies.push(dep("./foo.js", "/d/foo.js", 8, 16));

        let registry = registry_of(vec![leaf.clone(), main]);
        let o = RewriteOptions {
            directory: dir,
            hash_length: Some(6),
            source_maps: true,
            base_url: Some("https://cdn.example.com"),
        };
        let registry = rewrite_batch(&["/d/bar.js".into()], registry, &o);

        let text = registry[Utf8Path::new("/d/bar.js")].contents.as_text().unwrap().to_string();
        let hash = sha512_base64url(leaf.contents.as_bytes());
        assert_eq!(text, format!("import '/foo.{}.js'\n", &hash[..6]));
    }

    #[test]
    fn dts_suffix_is_stripped_from_replacements() {
        let dir = Utf8Path::new("/d");
        let target = doc("/d/foo.d.ts", "export declare const foo: number\n");
        let contents = "import { foo } from './foo'\n";
        let mut dts = doc("/d/bar.d.ts", contents);
        dts.dependencies.push(dep("./foo", "/d/foo.d.ts", 21, 26));

        let registry = registry_of(vec![target.clone(), dts]);
        let registry = rewrite_batch(&["/d/bar.d.ts".into()], registry, &opts(dir));

        let text = registry[Utf8Path::new("/d/bar.d.ts")].contents.as_text().unwrap().to_string();
        let hash = sha512_base64url(target.contents.as_bytes());
        assert_eq!(text, format!("import {{ foo }} from './foo.{}'\n", &hash[..6]));
    }

    #[test]
    fn references_to_unhashed_targets_emit_no_edits() {
        use crate::core::sourcemap::{decode_mappings, trace};

        let dir = Utf8Path::new("/d");
        let mut page = doc("/d/page.html", "<p>hi</p>\n");
        page.supports_hashes = false;
        let contents = "import './page.html'\nrun()\n";
        let mut main = doc("/d/app.js", contents);
        main.dependencies.push(dep("./page.html", "/d/page.html", 8, 19));
        let map = edit_map("app.js", contents, &[]);
        main.source_map = Some(SourceMap { raw: map.to_json(), proxy: None });

        let registry = registry_of(vec![page, main]);
        let registry = rewrite_batch(&["/d/app.js".into()], registry, &opts(dir));

        let updated = &registry[Utf8Path::new("/d/app.js")];
        assert_eq!(updated.contents.as_text().unwrap(), contents);

        // Columns inside the specifier still trace one-to-one; an identity
        // edit would have anchored the whole range to its start column.
        let composed = RawSourceMap::parse(&updated.source_map.as_ref().unwrap().raw).unwrap();
        let lines = decode_mappings(&composed.mappings).unwrap();
        let origin = trace(&lines, 0, 12).unwrap();
        assert_eq!(origin.column, 12);
    }

    #[test]
    fn cycle_members_keep_combined_hash_after_rewrite() {
        let dir = Utf8Path::new("/d");
        let mut a = doc("/d/a.css", "@import './b.css';\n");
        a.dependencies.push(dep("./b.css", "/d/b.css", 9, 16));
        let mut b = doc("/d/b.css", "@import './a.css';\n");
        b.dependencies.push(dep("./a.css", "/d/a.css", 9, 16));

        let registry = registry_of(vec![a, b]);
        let batch: Vec<Utf8PathBuf> = vec!["/d/a.css".into(), "/d/b.css".into()];
        let expected = combined_hashes(&batch, &registry);

        let registry = rewrite_batch(&batch, registry, &opts(dir));
        for path in &batch {
            let document = &registry[path];
            assert_eq!(
                document.content_hash,
                Some(DocumentHash::Direct(expected[path].clone())),
                "combined hash survives the rewrite for {path}"
            );
            let text = document.contents.as_text().unwrap();
            assert!(text.contains(".css'"), "specifier rewritten: {text}");
            assert_ne!(text, "@import './a.css';\n");
            assert_ne!(text, "@import './b.css';\n");
        }
    }

    #[test]
    fn source_map_url_comment_is_replaced_and_idempotent() {
        let dir = Utf8Path::new("/d");
        let contents = "console.log(1)\n//# sourceMappingURL=app.js.map\n";
        let mut app = doc("/d/app.js", contents);
        let map = edit_map("app.js", contents, &[]);
        app.source_map = Some(SourceMap { raw: map.to_json(), proxy: None });

        let registry = registry_of(vec![app]);
        let hash = {
            let d = &registry[Utf8Path::new("/d/app.js")];
            match d.content_hash.as_ref().unwrap() {
                DocumentHash::Direct(h) => h[..6].to_string(),
                DocumentHash::HashFor(_) => unreachable!(),
            }
        };

        let once = rewrite_source_map_urls(registry, &opts(dir));
        let text = once[Utf8Path::new("/d/app.js")].contents.as_text().unwrap().to_string();
        assert!(text.ends_with(&format!("//# sourceMappingURL=app.{hash}.js.map\n")), "{text}");
        assert!(!text.contains("sourceMappingURL=app.js.map"));

        let twice = rewrite_source_map_urls(once.clone(), &opts(dir));
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_comment_is_appended() {
        let dir = Utf8Path::new("/d");
        let contents = "body {}\n";
        let mut css = doc("/d/style.css", contents);
        let map = edit_map("style.css", contents, &[]);
        css.source_map = Some(SourceMap { raw: map.to_json(), proxy: None });

        let registry = registry_of(vec![css]);
        let registry = rewrite_source_map_urls(registry, &opts(dir));
        let text = registry[Utf8Path::new("/d/style.css")].contents.as_text().unwrap();
        assert!(text.starts_with("body {}\n/*# sourceMappingURL=style."));
        assert!(text.ends_with(".css.map */\n"));
    }

    #[test]
    fn malformed_source_map_does_not_block_the_rewrite() {
        let dir = Utf8Path::new("/d");
        let leaf = doc("/d/foo.js", "export {}\n");
        let mut main = doc("/d/bar.js", "import './foo.js'\n");
        main.dependencies.push(dep("./foo.js", "/d/foo.js", 8, 16));
        main.source_map = Some(SourceMap { raw: "not json".into(), proxy: None });

        let registry = registry_of(vec![leaf, main]);
        let registry = rewrite_batch(&["/d/bar.js".into()], registry, &opts(dir));

        let updated = &registry[Utf8Path::new("/d/bar.js")];
        assert!(updated.contents.as_text().unwrap().contains("./foo."));
        // Map left as-is, content rewrite still happened.
        assert_eq!(updated.source_map.as_ref().unwrap().raw, "not json");
    }
}
