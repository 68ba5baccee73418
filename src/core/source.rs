//! Document sources: per-format dependency extraction behind one trait,
//! plus the shared read path that assembles a `Document` with its companion
//! representations (source map, proxy module, declaration file).

use std::collections::BTreeSet;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, instrument};

use crate::core::document::{
    Contents, Dependency, Document, DocumentHash, SourceMap, dts_path_for, file_extension_of,
    proxy_path_for, source_map_path_for,
};
use crate::core::hash::sha512_base64url;
use crate::core::pipeline::BustError;
use crate::infra::io::read_contents;
use crate::parsers::{CssSource, HtmlSource, JavaScriptSource};

/// Shared inputs for dependency extraction.
pub struct ExtractContext<'a> {
    /// Build directory root; root-absolute specifiers resolve against it.
    pub directory: &'a Utf8Path,
    /// Every file discovered by the walk; extensionless resolution probes
    /// this set instead of the filesystem.
    pub files: &'a BTreeSet<Utf8PathBuf>,
    /// Fail on extensionless specifiers that resolve to nothing instead of
    /// dropping them as probable routes.
    pub strict_extensionless: bool,
    /// Attach `.d.ts` companions to their primaries. Off, declaration files
    /// become standalone documents.
    pub dts: bool,
}

/// One file format the pipeline understands.
pub trait DocumentSource: Send + Sync {
    /// Short tag used in logs.
    fn name(&self) -> &'static str;

    /// Extensions this source claims, matched as suffixes.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether files of this format may be renamed to hashed paths.
    fn supports_hashes(&self) -> bool {
        true
    }

    /// Extract dependencies from the document's contents. Positions are byte
    /// ranges into the contents, sorted and non-overlapping.
    fn extract(&self, document: &Document, cx: &ExtractContext<'_>) -> Result<Vec<Dependency>>;

    fn claims(&self, extension: &str) -> bool {
        self.extensions().iter().any(|e| extension.ends_with(e))
    }
}

/// Extension-dispatched set of sources. Unsupported extensions fall through
/// to opaque leaf handling (hashed and renamed, never rewritten).
pub struct SourceSet {
    sources: Vec<Box<dyn DocumentSource>>,
}

impl SourceSet {
    pub fn standard() -> SourceSet {
        SourceSet {
            sources: vec![
                Box::new(JavaScriptSource),
                Box::new(CssSource),
                Box::new(HtmlSource),
            ],
        }
    }

    pub fn source_for(&self, extension: &str) -> Option<&dyn DocumentSource> {
        self.sources.iter().find(|s| s.claims(extension)).map(|b| b.as_ref())
    }
}

/// Whether a path is a companion of a discovered primary: attached during
/// that primary's read rather than read as a standalone registry entry.
pub fn is_companion_of_discovered(path: &Utf8Path, cx: &ExtractContext<'_>) -> bool {
    let extension = file_extension_of(path.as_str());
    if extension.ends_with(".proxy.js") {
        return true;
    }
    if let Some(stem) = path.as_str().strip_suffix(".map") {
        return cx.files.contains(Utf8Path::new(stem));
    }
    if cx.dts && extension == ".d.ts" {
        if let Some(stem) = path.as_str().strip_suffix(".d.ts") {
            return cx.files.contains(&Utf8PathBuf::from(format!("{stem}.js")));
        }
    }
    false
}

/// Read one primary document: contents, extracted dependencies, initial
/// `Direct` hash, and companion representations discovered next to it.
#[instrument(skip(set, cx), fields(file = %path))]
pub fn read_document(path: &Utf8Path, set: &SourceSet, cx: &ExtractContext<'_>) -> Result<Document> {
    let extension = file_extension_of(path.as_str());
    let contents = read_contents(path)?;

    let mut document = Document {
        file_path: path.to_path_buf(),
        file_extension: extension.clone(),
        contents,
        dependencies: Vec::new(),
        content_hash: None,
        source_map: None,
        dts: None,
        supports_hashes: true,
    };
    document.content_hash = Some(DocumentHash::Direct(sha512_base64url(
        document.contents.as_bytes(),
    )));

    match set.source_for(&extension) {
        Some(source) => {
            document.supports_hashes = source.supports_hashes();
            document.dependencies = source.extract(&document, cx)?;
            debug!(
                source = source.name(),
                dependencies = document.dependencies.len(),
                "extracted dependencies"
            );
        }
        None => {
            debug!("no source claims this extension, keeping as opaque leaf");
        }
    }

    attach_companions(&mut document, set, cx)?;
    Ok(document)
}

/// Read a referenced path that the walk never discovered, as an opaque leaf.
/// An unreadable path here is the fatal unresolved-dependency case.
pub fn read_leaf(path: &Utf8Path, referenced_by: &Utf8Path) -> Result<Document> {
    let contents = read_contents(path).map_err(|_| BustError::UnresolvedDependency {
        specifier: path.to_path_buf(),
        referenced_by: referenced_by.to_path_buf(),
    })?;
    let mut document = Document {
        file_path: path.to_path_buf(),
        file_extension: file_extension_of(path.as_str()),
        contents,
        dependencies: Vec::new(),
        content_hash: None,
        source_map: None,
        dts: None,
        supports_hashes: true,
    };
    document.content_hash = Some(DocumentHash::Direct(sha512_base64url(
        document.contents.as_bytes(),
    )));
    Ok(document)
}

fn attach_companions(document: &mut Document, set: &SourceSet, cx: &ExtractContext<'_>) -> Result<()> {
    let primary = document.file_path.clone();

    let map_path = source_map_path_for(&primary);
    if cx.files.contains(&map_path) {
        match read_contents(&map_path)? {
            Contents::Text(raw) => {
                let proxy_path = proxy_path_for(&map_path);
                let proxy = if cx.files.contains(&proxy_path) {
                    Some(Box::new(read_companion(&proxy_path, &primary, set, cx)?))
                } else {
                    None
                };
                document.source_map = Some(SourceMap { raw, proxy });
            }
            Contents::Binary(_) => {
                debug!(file = %map_path, "source map is not UTF-8, ignoring");
            }
        }
    }

    if cx.dts && document.file_extension == ".js" {
        let dts_path = dts_path_for(&primary);
        if cx.files.contains(&dts_path) {
            let mut dts = read_companion(&dts_path, &primary, set, cx)?;
            // Declarations carry their own map pair.
            let dts_map_path = source_map_path_for(&dts_path);
            if cx.files.contains(&dts_map_path) {
                if let Contents::Text(raw) = read_contents(&dts_map_path)? {
                    dts.source_map = Some(SourceMap { raw, proxy: None });
                }
            }
            document.dts = Some(Box::new(dts));
        }
    }

    Ok(())
}

/// A companion mirrors its primary's hash and is never renamed on its own.
fn read_companion(
    path: &Utf8Path,
    primary: &Utf8Path,
    set: &SourceSet,
    cx: &ExtractContext<'_>,
) -> Result<Document> {
    let extension = file_extension_of(path.as_str());
    let contents = read_contents(path)?;
    let mut document = Document {
        file_path: path.to_path_buf(),
        file_extension: extension.clone(),
        contents,
        dependencies: Vec::new(),
        content_hash: Some(DocumentHash::HashFor(primary.to_path_buf())),
        source_map: None,
        dts: None,
        supports_hashes: true,
    };
    if let Some(source) = set.source_for(&extension) {
        document.dependencies = source.extract(&document, cx)?;
    }
    Ok(document)
}

/// Resolution outcome for one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Utf8PathBuf),
    /// Bare module specifier, external URL, or a dropped probable route.
    Skipped,
}

/// Resolve a specifier against the referencing document's directory and the
/// discovered file set.
///
/// Specifiers with an extension resolve lexically: whether the target exists
/// is settled later, when the pipeline reads it as a leaf. Extensionless
/// specifiers are probed against `candidates` (then `index.js`); a miss is a
/// probable client-side route and is dropped, unless strict mode makes it
/// fatal.
pub fn resolve_specifier(
    specifier: &str,
    document: &Utf8Path,
    candidates: &[&str],
    cx: &ExtractContext<'_>,
) -> Result<Resolution> {
    if specifier.is_empty() || is_external_url(specifier) || specifier.starts_with('#') {
        return Ok(Resolution::Skipped);
    }

    let resolved = if let Some(rest) = specifier.strip_prefix('/') {
        normalize_path(&cx.directory.join(rest))
    } else if specifier.starts_with('.') {
        let parent = document.parent().unwrap_or(cx.directory);
        normalize_path(&parent.join(specifier))
    } else {
        // Bare module specifier.
        return Ok(Resolution::Skipped);
    };

    if !file_extension_of(resolved.as_str()).is_empty() {
        return Ok(Resolution::Resolved(resolved));
    }

    for ext in candidates {
        let with_ext = Utf8PathBuf::from(format!("{resolved}{ext}"));
        if cx.files.contains(&with_ext) {
            return Ok(Resolution::Resolved(with_ext));
        }
    }
    let index = resolved.join("index.js");
    if cx.files.contains(&index) {
        return Ok(Resolution::Resolved(index));
    }

    if cx.strict_extensionless {
        return Err(BustError::UnresolvedDependency {
            specifier: resolved,
            referenced_by: document.to_path_buf(),
        }
        .into());
    }
    debug!(specifier, file = %document, "extensionless specifier resolves to nothing, dropping as probable route");
    Ok(Resolution::Skipped)
}

fn is_external_url(specifier: &str) -> bool {
    let Some(colon) = specifier.find(':') else {
        return false;
    };
    let scheme = &specifier[..colon];
    !scheme.is_empty()
        && scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
        && scheme.as_bytes()[0].is_ascii_alphabetic()
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component.as_str() {
            "." => {}
            ".." => {
                out.pop();
            }
            part => out.push(part),
        }
    }
    out
}

/// Sort dependencies by start offset and drop overlapping duplicates, so the
/// rewriter's single-pass edit application invariant holds.
pub fn normalize_dependencies(mut dependencies: Vec<Dependency>) -> Vec<Dependency> {
    dependencies.sort_by_key(|d| d.position);
    let mut out: Vec<Dependency> = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        if out.last().is_some_and(|prev| dep.position.0 < prev.position.1) {
            continue;
        }
        out.push(dep);
    }
    out
}
