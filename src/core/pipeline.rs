//! Pipeline orchestration: walk, parallel read/extract, dependency-first
//! batch processing, reconciliation, and manifest generation.
//!
//! Everything up to `apply` happens on in-memory registries; disk is only
//! touched once the whole run has succeeded (fail in memory first, apply to
//! disk last).

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{info, instrument};

use owo_colors::OwoColorize;

use crate::cli::{AppContext, HashArgs};
use crate::core::diff::{DocumentDiff, FileSet, diff_file_sets, flatten_registry};
use crate::core::document::{
    Document, DocumentRegistry, companion_primary, file_extension_of,
};
use crate::core::graph::sort_documents;
use crate::core::hash::{document_hash_entries, hashed_path};
use crate::core::manifest::{AssetManifest, ManifestOptions, generate_asset_manifest, manifest_json};
use crate::core::rewrite::{RewriteOptions, rewrite_batch, rewrite_source_map_urls};
use crate::core::source::{ExtractContext, SourceSet, is_companion_of_discovered, read_document, read_leaf};
use crate::infra::config::{Config, load_config};
use crate::infra::io::{apply_diff, write_file};
use crate::infra::walk::AssetWalker;

/// Domain-specific error taxonomy for exit-code mapping.
#[derive(Debug, thiserror::Error)]
pub enum BustError {
    /// A reference points at a path that cannot be read.
    #[error("unresolved dependency: {specifier} (referenced by {referenced_by})")]
    UnresolvedDependency {
        specifier: Utf8PathBuf,
        referenced_by: Utf8PathBuf,
    },

    /// Writing a created or updated file failed while applying the diff.
    #[error("failed to write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    /// Deleting a renamed-away file failed while applying the diff.
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Exit codes: 0=success, 2=unresolved dependency, 4=filesystem apply
/// failure, 5=internal.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BustError>() {
        Some(BustError::UnresolvedDependency { .. }) => 2,
        Some(BustError::Write { .. } | BustError::Delete { .. }) => 4,
        None => 5,
    }
}

/// Fully resolved inputs for one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Absolute build directory root.
    pub directory: Utf8PathBuf,
    pub hash_length: Option<usize>,
    pub base_url: Option<String>,
    pub source_maps: bool,
    pub dts: bool,
    /// Manifest filename, relative to the build directory.
    pub manifest: String,
    pub registry_dump: Option<Utf8PathBuf>,
    pub strict_extensionless: bool,
    pub ignore_patterns: Vec<String>,
}

impl PipelineOptions {
    pub fn new(directory: Utf8PathBuf, config: &Config) -> PipelineOptions {
        PipelineOptions {
            directory,
            hash_length: config.hash_length,
            base_url: config.base_url.clone(),
            source_maps: config.source_maps,
            dts: config.dts,
            manifest: config.manifest.clone(),
            registry_dump: config.registry_dump.clone(),
            strict_extensionless: config.strict_extensionless,
            ignore_patterns: config.ignore_patterns.clone(),
        }
    }

    fn rewrite_options(&self) -> RewriteOptions<'_> {
        RewriteOptions {
            directory: &self.directory,
            hash_length: self.hash_length,
            source_maps: self.source_maps,
            base_url: self.base_url.as_deref(),
        }
    }

    fn manifest_options(&self) -> ManifestOptions<'_> {
        ManifestOptions {
            directory: &self.directory,
            hash_length: self.hash_length,
            base_url: self.base_url.as_deref(),
        }
    }
}

/// Everything one run produces, still in memory.
#[derive(Debug, Clone)]
pub struct HashedDirectory {
    /// Final registry, keyed by hashed paths, manifest included.
    pub registry: DocumentRegistry,
    /// Original path -> full-length hash, companions included.
    pub hashes: IndexMap<Utf8PathBuf, String>,
    pub manifest: AssetManifest,
    pub diff: DocumentDiff,
    /// Flattened final files, for applying the diff.
    pub files: FileSet,
}

impl HashedDirectory {
    /// Write created and updated files, delete renamed-away originals.
    pub fn apply(&self) -> Result<()> {
        apply_diff(&self.diff, &self.files)
    }

    /// JSON dump of the final registry, for debugging runs.
    pub fn registry_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.registry).context("failed to serialize registry")
    }
}

/// Entry point for `buster hash`.
pub fn run(args: HashArgs, ctx: &AppContext) -> Result<()> {
    let mut config = load_config().unwrap_or_default();
    args.apply_to(&mut config);

    let directory = args
        .directory
        .canonicalize_utf8()
        .with_context(|| format!("failed to resolve directory {}", args.directory))?;

    let opts = PipelineOptions::new(directory, &config);
    let outcome = hash_directory(&opts)?;

    if !ctx.quiet {
        print_summary(&outcome, ctx);
    }

    if ctx.dry_run {
        if !ctx.quiet {
            let note = "DRY RUN: no files were changed";
            if ctx.no_color {
                println!("{note}");
            } else {
                println!("{}", note.yellow());
            }
        }
        return Ok(());
    }

    outcome.apply()?;

    if let Some(dump_path) = &opts.registry_dump {
        let json = outcome.registry_json()?;
        write_file(dump_path, json.as_bytes())?;
    }

    Ok(())
}

fn print_summary(outcome: &HashedDirectory, ctx: &AppContext) {
    let sections: [(&str, &[Utf8PathBuf]); 3] = [
        ("created", &outcome.diff.created),
        ("updated", &outcome.diff.updated),
        ("deleted", &outcome.diff.deleted),
    ];
    for (label, paths) in sections {
        for path in paths {
            if ctx.no_color {
                println!("{label:>8} {path}");
            } else {
                match label {
                    "created" => println!("{:>8} {path}", label.green()),
                    "deleted" => println!("{:>8} {path}", label.red()),
                    _ => println!("{:>8} {path}", label.cyan()),
                }
            }
        }
    }
    println!(
        "{} created, {} updated, {} deleted, {} unchanged",
        outcome.diff.created.len(),
        outcome.diff.updated.len(),
        outcome.diff.deleted.len(),
        outcome.diff.unchanged.len()
    );
}

/// Run the whole in-memory pipeline over a build directory.
#[instrument(skip_all, fields(directory = %opts.directory))]
pub fn hash_directory(opts: &PipelineOptions) -> Result<HashedDirectory> {
    info!("reading directory");
    let registry = read_directory(opts)?;
    let original_files = flatten_registry(&registry);

    info!(documents = registry.len(), "generating content hashes");
    let rewrite_opts = opts.rewrite_options();
    let batches = sort_documents(&registry);
    let mut registry = registry;
    for batch in &batches {
        registry = rewrite_batch(batch, registry, &rewrite_opts);
    }

    info!("rewriting source map urls");
    let registry = rewrite_source_map_urls(registry, &rewrite_opts);

    let mut hashes = IndexMap::new();
    for document in registry.values() {
        hashes.extend(document_hash_entries(document, &registry));
    }

    info!("generating asset manifest");
    let manifest = generate_asset_manifest(&registry, &opts.manifest_options());

    let mut final_registry = finalize_registry(&registry, opts.hash_length);
    let mut manifest_doc = Document::text(
        opts.directory.join(&opts.manifest),
        file_extension_of(&opts.manifest),
        manifest_json(&manifest),
    );
    manifest_doc.supports_hashes = false;
    final_registry.insert(manifest_doc.file_path.clone(), manifest_doc);

    let files = flatten_registry(&final_registry);
    let diff = diff_file_sets(&original_files, &files);

    Ok(HashedDirectory { registry: final_registry, hashes, manifest, diff, files })
}

/// Walk the build directory and read every primary document, fanning the
/// read/extract work out across threads. Referenced paths the walk never
/// discovered are materialized as opaque leaf documents afterwards.
fn read_directory(opts: &PipelineOptions) -> Result<DocumentRegistry> {
    // The manifest regenerates every run; never treat a stale one as input.
    let mut ignores = opts.ignore_patterns.clone();
    ignores.push(opts.manifest.clone());

    let walker = AssetWalker::new(&ignores)?;
    let walked = walker.walk_files(&opts.directory)?;
    let files: BTreeSet<Utf8PathBuf> = walked.iter().cloned().collect();

    let cx = ExtractContext {
        directory: &opts.directory,
        files: &files,
        strict_extensionless: opts.strict_extensionless,
        dts: opts.dts,
    };
    let set = SourceSet::standard();

    let primaries: Vec<&Utf8PathBuf> = walked
        .iter()
        .filter(|path| !is_companion_of_discovered(path, &cx))
        .collect();

    let documents: Vec<Document> = primaries
        .par_iter()
        .map(|path| read_document(path, &set, &cx))
        .collect::<Result<_>>()?;

    let mut registry: DocumentRegistry = documents
        .into_iter()
        .map(|d| (d.file_path.clone(), d))
        .collect();

    // Referenced but undiscovered paths become opaque leaves; unreadable
    // ones surface as the fatal unresolved-dependency error.
    let mut referenced: IndexMap<Utf8PathBuf, Utf8PathBuf> = IndexMap::new();
    for document in registry.values() {
        collect_references(document, &mut referenced);
    }
    for (path, referenced_by) in referenced {
        if registry.contains_key(&path) {
            continue;
        }
        if companion_primary(&path).is_some_and(|p| registry.contains_key(&p)) {
            continue;
        }
        let leaf = read_leaf(&path, &referenced_by)?;
        registry.insert(path, leaf);
    }

    Ok(registry)
}

fn collect_references(document: &Document, out: &mut IndexMap<Utf8PathBuf, Utf8PathBuf>) {
    for dep in &document.dependencies {
        out.entry(dep.file_path.clone())
            .or_insert_with(|| document.file_path.clone());
    }
    if let Some(map) = &document.source_map {
        if let Some(proxy) = &map.proxy {
            collect_references(proxy, out);
        }
    }
    if let Some(dts) = &document.dts {
        collect_references(dts, out);
    }
}

/// Re-key the registry by final hashed paths, renaming nested declaration
/// companions in lockstep.
fn finalize_registry(registry: &DocumentRegistry, hash_length: Option<usize>) -> DocumentRegistry {
    let mut out = DocumentRegistry::new();
    for document in registry.values() {
        let mut renamed = document.clone();
        renamed.file_path = hashed_path(document, registry, hash_length);
        if let Some(dts) = renamed.dts.take() {
            let mut dts = *dts;
            dts.file_path = hashed_path(&dts, registry, hash_length);
            renamed.dts = Some(Box::new(dts));
        }
        out.insert(renamed.file_path.clone(), renamed);
    }
    out
}
