//! HTML dependency extraction: `src`/`href` attributes and `srcset` lists.
//!
//! HTML files are entry points served at fixed URLs, so the format never
//! renames its own files; only the references inside move.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::core::document::{Dependency, Document, file_extension_of};
use crate::core::source::{
    DocumentSource, ExtractContext, Resolution, normalize_dependencies, resolve_specifier,
};

/// `src="..."` / `href='...'`.
static SRC_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:src|href)\s*=\s*["']([^"']+)["']"#).expect("src/href regex")
});

/// `srcset="..."` — the value is a comma-separated list of URL + descriptor
/// pairs and needs its own positional split.
static SRCSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bsrcset\s*=\s*["']([^"']+)["']"#).expect("srcset regex")
});

pub struct HtmlSource;

impl DocumentSource for HtmlSource {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".html", ".htm"]
    }

    fn supports_hashes(&self) -> bool {
        false
    }

    fn extract(&self, document: &Document, cx: &ExtractContext<'_>) -> Result<Vec<Dependency>> {
        let Some(contents) = document.contents.as_text() else {
            return Ok(Vec::new());
        };

        let mut dependencies = Vec::new();

        for captures in SRC_HREF.captures_iter(contents) {
            let Some(m) = captures.get(1) else { continue };
            push_reference(m.as_str(), m.start(), m.end(), document, cx, &mut dependencies)?;
        }

        for captures in SRCSET.captures_iter(contents) {
            let Some(m) = captures.get(1) else { continue };
            for (url, start, end) in split_srcset(m.as_str(), m.start()) {
                push_reference(url, start, end, document, cx, &mut dependencies)?;
            }
        }

        Ok(normalize_dependencies(dependencies))
    }
}

fn push_reference(
    specifier: &str,
    start: usize,
    end: usize,
    document: &Document,
    cx: &ExtractContext<'_>,
    out: &mut Vec<Dependency>,
) -> Result<()> {
    match resolve_specifier(specifier, &document.file_path, &[], cx)? {
        Resolution::Resolved(file_path) => out.push(Dependency {
            specifier: specifier.to_string(),
            file_extension: file_extension_of(file_path.as_str()),
            file_path,
            position: (start, end),
        }),
        Resolution::Skipped => {}
    }
    Ok(())
}

/// Split a srcset value into URLs with byte positions relative to the whole
/// document. Each comma-separated part is `<url> [<descriptor>]`.
fn split_srcset(value: &str, value_start: usize) -> Vec<(&str, usize, usize)> {
    let mut out = Vec::new();
    let mut offset = 0;
    for part in value.split(',') {
        let trimmed_front = part.len() - part.trim_start().len();
        let part_start = offset + trimmed_front;
        let url = part
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or_default();
        if !url.is_empty() {
            out.push((url, value_start + part_start, value_start + part_start + url.len()));
        }
        offset += part.len() + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::{Utf8Path, Utf8PathBuf};
    use std::collections::BTreeSet;

    fn extract(contents: &str) -> Vec<Dependency> {
        let files: BTreeSet<Utf8PathBuf> = BTreeSet::new();
        let cx = ExtractContext {
            directory: Utf8Path::new("/d"),
            files: &files,
            strict_extensionless: false,
            dts: true,
        };
        let doc = Document::text("/d/index.html", ".html", contents);
        HtmlSource.extract(&doc, &cx).unwrap()
    }

    #[test]
    fn html_is_never_renamed() {
        assert!(!HtmlSource.supports_hashes());
    }

    #[test]
    fn src_and_href_attributes() {
        let contents = "\
<link rel=\"stylesheet\" href=\"/style.css\">
<script src=\"./app.js\"></script>
<img src='./img/logo.png'>
";
        let deps = extract(contents);
        let paths: Vec<&str> = deps.iter().map(|d| d.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/d/style.css", "/d/app.js", "/d/img/logo.png"]);
        for dep in &deps {
            assert_eq!(&contents[dep.position.0..dep.position.1], dep.specifier);
        }
    }

    #[test]
    fn srcset_urls_have_exact_positions() {
        let contents = "<img srcset=\"./a.png 1x, ./b.png 2x\" src=\"./a.png\">";
        let deps = extract(contents);
        let specifiers: Vec<&str> = deps.iter().map(|d| d.specifier.as_str()).collect();
        assert_eq!(specifiers, vec!["./a.png", "./b.png", "./a.png"]);
        for dep in &deps {
            assert_eq!(&contents[dep.position.0..dep.position.1], dep.specifier);
        }
    }

    #[test]
    fn external_and_anchor_references_are_skipped() {
        let contents = "\
<a href=\"https://example.com\">x</a>
<a href=\"#section\">y</a>
<a href=\"mailto:a@b.c\">z</a>
<script src=\"./real.js\"></script>
";
        let deps = extract(contents);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].specifier, "./real.js");
    }

    #[test]
    fn bare_route_hrefs_are_skipped() {
        // `about` has no extension and resolves to nothing.
        let deps = extract("<a href=\"./about\">about</a>\n");
        assert!(deps.is_empty());
    }
}
