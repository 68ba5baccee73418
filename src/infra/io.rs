//! Filesystem boundary: reading file contents into documents and applying a
//! reconciled diff back to disk.
//!
//! Everything above this module works on in-memory registries; this is the
//! only place that writes or deletes files.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::{debug, info, instrument};

use crate::core::diff::{DocumentDiff, FileSet};
use crate::core::document::Contents;
use crate::core::pipeline::BustError;

/// Read a file as text when it is valid UTF-8, as raw bytes otherwise.
pub fn read_contents(path: &Utf8Path) -> Result<Contents> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {path}"))?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => Contents::Text(text),
        Err(err) => Contents::Binary(err.into_bytes()),
    })
}

/// Apply the reconciled diff: write created and updated files, delete files
/// whose paths were renamed away, leave unchanged files alone.
///
/// Runs only after the whole in-memory pipeline has succeeded, so a failure
/// here can leave a partial directory; each failed path is reported as the
/// fatal write/delete case.
#[instrument(skip_all, fields(created = diff.created.len(), updated = diff.updated.len(), deleted = diff.deleted.len()))]
pub fn apply_diff(diff: &DocumentDiff, files: &FileSet) -> Result<()> {
    for path in diff.created.iter().chain(&diff.updated) {
        let Some(bytes) = files.get(path) else { continue };
        write_file(path, bytes)?;
    }

    for path in &diff.deleted {
        debug!(file = %path, "deleting");
        fs::remove_file(path).map_err(|source| BustError::Delete { path: path.clone(), source })?;
    }

    info!(
        written = diff.created.len() + diff.updated.len(),
        deleted = diff.deleted.len(),
        "applied changes to disk"
    );
    Ok(())
}

pub fn write_file(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    debug!(file = %path, bytes = bytes.len(), "writing");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| BustError::Write { path: path.to_path_buf(), source })?;
    }
    fs::write(path, bytes).map_err(|source| BustError::Write { path: path.to_path_buf(), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn reads_text_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let text_path = root.join("a.txt");
        fs::write(&text_path, "hello\n").unwrap();
        assert_eq!(read_contents(&text_path).unwrap(), Contents::Text("hello\n".into()));

        let bin_path = root.join("a.bin");
        fs::write(&bin_path, [0u8, 159, 146, 150]).unwrap();
        assert_eq!(
            read_contents(&bin_path).unwrap(),
            Contents::Binary(vec![0, 159, 146, 150])
        );
    }

    #[test]
    fn apply_diff_writes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let old = root.join("app.js");
        fs::write(&old, "old\n").unwrap();

        let new = root.join("app.abc.js");
        let index = root.join("index.html");
        fs::write(&index, "x").unwrap();

        let mut files = FileSet::new();
        files.insert(new.clone(), b"new\n".to_vec());
        files.insert(index.clone(), b"y".to_vec());

        let diff = DocumentDiff {
            created: vec![new.clone()],
            updated: vec![index.clone()],
            deleted: vec![old.clone()],
            unchanged: Vec::new(),
        };

        apply_diff(&diff, &files).unwrap();
        assert_eq!(fs::read_to_string(&new).unwrap(), "new\n");
        assert_eq!(fs::read_to_string(&index).unwrap(), "y");
        assert!(!old.exists());
    }

    #[test]
    fn missing_file_read_is_an_error() {
        let missing = Utf8PathBuf::from("/nonexistent/definitely/missing.js");
        assert!(read_contents(&missing).is_err());
    }
}
