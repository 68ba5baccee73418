//! CSS dependency extraction: `@import` rules and `url()` references.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::core::document::{Dependency, Document, file_extension_of};
use crate::core::source::{
    DocumentSource, ExtractContext, Resolution, normalize_dependencies, resolve_specifier,
};

/// `@import 'x.css'` / `@import "x.css"` / `@import url(x.css)`.
static IMPORT_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?\s*\)?"#).expect("@import regex")
});

/// `url(x)` with optional quotes, as used by backgrounds and font faces.
static URL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\burl\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("url() regex")
});

pub struct CssSource;

impl DocumentSource for CssSource {
    fn name(&self) -> &'static str {
        "css"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".css"]
    }

    fn extract(&self, document: &Document, cx: &ExtractContext<'_>) -> Result<Vec<Dependency>> {
        let Some(contents) = document.contents.as_text() else {
            return Ok(Vec::new());
        };

        // An `@import url(...)` matches both patterns at the same capture
        // range; normalization collapses the overlap.
        let mut dependencies = Vec::new();
        for regex in [&*IMPORT_RULE, &*URL_REF] {
            for captures in regex.captures_iter(contents) {
                let Some(m) = captures.get(1) else { continue };
                let specifier = m.as_str();
                match resolve_specifier(specifier, &document.file_path, &[".css"], cx)? {
                    Resolution::Resolved(file_path) => dependencies.push(Dependency {
                        specifier: specifier.to_string(),
                        file_extension: file_extension_of(file_path.as_str()),
                        file_path,
                        position: (m.start(), m.end()),
                    }),
                    Resolution::Skipped => {}
                }
            }
        }

        Ok(normalize_dependencies(dependencies))
    }
}
