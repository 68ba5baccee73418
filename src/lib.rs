//! **buster** - Content-addressed cache busting for built static assets
//!
//! Walks a build directory, hashes every asset by content (transitively, so a
//! hash changes when anything it references changes), renames files to embed
//! their hashes, rewrites references in place, recomposes source maps, and
//! emits an asset manifest mapping original paths to hashed ones.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core pipeline - document model, graph ordering, hashing, rewriting
pub mod core {
    /// Document model: contents, dependencies, hashes, companions
    pub mod document;
    pub use document::{Contents, Dependency, Document, DocumentHash, DocumentRegistry};

    /// Dependency graph ordering via strongly connected components
    pub mod graph;
    pub use graph::{Batch, sort_documents};

    /// SHA-512 content hashing, combined cycle hashes, hashed path naming
    pub mod hash;
    pub use hash::{content_hash_of, hashed_path, sha512_base64url};

    /// Position-preserving reference rewriting and hash assignment
    pub mod rewrite;
    pub use rewrite::{Edit, RewriteOptions, rewrite_batch};

    /// Source map decoding, edit-map composition, and VLQ codec
    pub mod sourcemap;

    /// Registry flattening and original-vs-final reconciliation
    pub mod diff;
    pub use diff::{DocumentDiff, FileSet, diff_registries};

    /// Asset manifest generation (original path -> hashed path)
    pub mod manifest;
    pub use manifest::{AssetManifest, generate_asset_manifest};

    /// Document reading, specifier resolution, and companion attachment
    pub mod source;
    pub use source::{DocumentSource, ExtractContext, SourceSet};

    /// Orchestration: walk, read, batch, rewrite, reconcile, apply
    pub mod pipeline;
    pub use pipeline::{BustError, HashedDirectory, PipelineOptions, hash_directory};
}

/// Format support - dependency extraction per file type
pub mod parsers {
    /// JavaScript/TypeScript import extraction (static, side-effect, dynamic)
    pub mod javascript;
    pub use javascript::JavaScriptSource;

    /// CSS @import and url() extraction
    pub mod css;
    pub use css::CssSource;

    /// HTML src/href/srcset extraction (entry points, never renamed)
    pub mod html;
    pub use html::HtmlSource;
}

/// Infrastructure - Configuration, I/O, directory walking
pub mod infra {
    /// Configuration management with TOML support and env overrides
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Filesystem boundary: content reads and diff application
    pub mod io;
    pub use io::{apply_diff, read_contents};

    /// Gitignore-aware directory walking
    pub mod walk;
    pub use walk::AssetWalker;
}

// Strategic re-exports for library consumers
pub use cli::{AppContext, Cli, Commands};
pub use core::{
    AssetManifest, BustError, Document, DocumentRegistry, HashedDirectory, PipelineOptions,
    hash_directory,
};
pub use infra::{AssetWalker, Config, load_config};
