//! Shared test utilities for integration tests
//!
//! Provides common fixture creation and helper functions
//! used across multiple test files.

use assert_fs::prelude::*;
use camino::Utf8PathBuf;

/// A small built site: an HTML entry point, a two-file JS chain, a
/// stylesheet, and a binary image referenced from CSS.
pub fn make_site_fixture() -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    tmp.child("index.html")
        .write_str("<script src=\"./app.js\"></script>\n<link rel=\"stylesheet\" href=\"./styles.css\">\n")
        .expect("write index.html");

    tmp.child("app.js")
        .write_str("import { greet } from './lib.js'\nconsole.log(greet)\n")
        .expect("write app.js");

    tmp.child("lib.js")
        .write_str("export const greet = 'hi'\n")
        .expect("write lib.js");

    tmp.child("styles.css")
        .write_str("body { background: url('./img/logo.png') }\n")
        .expect("write styles.css");

    // PNG magic followed by junk; enough to count as binary.
    tmp.child("img/logo.png")
        .write_binary(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 1, 2, 3])
        .expect("write logo.png");

    tmp
}

/// Canonical UTF-8 path of a fixture root.
pub fn fixture_root(tmp: &assert_fs::TempDir) -> Utf8PathBuf {
    let canonical = tmp.path().canonicalize().expect("canonicalize fixture root");
    Utf8PathBuf::from_path_buf(canonical).expect("utf-8 fixture path")
}
