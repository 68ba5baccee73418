//! Build-directory walker.
//! - Respects .gitignore, .git/info/exclude, and global gitignore
//! - Extra ignore globs from configuration (early prune + late filter)
//! - Deterministic ordering for stable runs and tests
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use tracing::debug;

/// Gitignore-aware walker with additional ignore globs. Extra globs are
/// applied twice: early to prune whole directories during traversal, late to
/// drop files that still slipped through.
pub struct AssetWalker {
    ignore_patterns: GlobSet,
}

impl AssetWalker {
    /// Build a walker with additional ignore patterns (e.g. `"*.LICENSE.txt"`,
    /// `"stats/**"`). Patterns match on paths relative to the walk root.
    pub fn new(additional_ignores: &[String]) -> Result<AssetWalker> {
        let mut builder = GlobSetBuilder::new();
        for pattern in additional_ignores {
            builder.add(Glob::new(pattern).with_context(|| format!("invalid ignore glob {pattern:?}"))?);
        }
        Ok(AssetWalker { ignore_patterns: builder.build()? })
    }

    /// Every regular file under `root`, as sorted absolute UTF-8 paths.
    pub fn walk_files(&self, root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
        let mut builder = WalkBuilder::new(root);
        builder.git_ignore(true);
        builder.git_global(true);
        builder.git_exclude(true);
        // Built output regularly contains dot-prefixed files worth hashing.
        builder.hidden(false);
        builder.follow_links(false);

        let prune = self.ignore_patterns.clone();
        let prune_root = root.to_path_buf();
        builder.filter_entry(move |entry: &DirEntry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if !is_dir {
                return true;
            }
            let rel = entry.path().strip_prefix(prune_root.as_std_path()).unwrap_or(entry.path());
            !prune.is_match(rel)
        });

        let mut out = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    debug!(error = %err, "walk entry error, skipping");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|p| anyhow!("non-UTF-8 path in build directory: {}", p.display()))?;
            let rel = path.strip_prefix(root).unwrap_or(&path);
            if self.ignore_patterns.is_match(rel.as_std_path()) {
                continue;
            }
            out.push(path);
        }

        out.sort();
        debug!(root = %root, files = out.len(), "walked build directory");
        Ok(out)
    }
}
