//! JavaScript/TypeScript dependency extraction: static `import`/`export …
//! from`, side-effect imports, and dynamic `import()` calls, regex-based.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::trace;

use crate::core::document::{Dependency, Document, file_extension_of};
use crate::core::source::{
    DocumentSource, ExtractContext, Resolution, normalize_dependencies, resolve_specifier,
};

/// `… from '<specifier>'` — covers `import x from`, `import {a} from`,
/// `export * from`, and `export {a} from`, including multi-line clauses.
static FROM_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bfrom\s*['"]([^'"\n]+)['"]"#).expect("from-clause regex")
});

/// Side-effect import: `import '<specifier>'`.
static SIDE_EFFECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*['"]([^'"\n]+)['"]"#).expect("side-effect import regex")
});

/// Dynamic import: `import('<specifier>')`.
static DYNAMIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#).expect("dynamic import regex")
});

pub struct JavaScriptSource;

impl JavaScriptSource {
    fn candidate_extensions(document_extension: &str) -> &'static [&'static str] {
        match document_extension {
            ".d.ts" => &[".d.ts", ".ts", ".js"],
            ".jsx" => &[".jsx", ".js"],
            _ => &[".js", ".jsx"],
        }
    }
}

impl DocumentSource for JavaScriptSource {
    fn name(&self) -> &'static str {
        "js"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".js", ".jsx", ".ts", ".tsx", ".d.ts", ".mjs", ".cjs"]
    }

    fn extract(&self, document: &Document, cx: &ExtractContext<'_>) -> Result<Vec<Dependency>> {
        let Some(contents) = document.contents.as_text() else {
            return Ok(Vec::new());
        };
        let candidates = Self::candidate_extensions(&document.file_extension);

        let mut dependencies = Vec::new();
        for regex in [&*FROM_CLAUSE, &*SIDE_EFFECT, &*DYNAMIC] {
            for captures in regex.captures_iter(contents) {
                let Some(m) = captures.get(1) else { continue };
                let specifier = m.as_str();
                match resolve_specifier(specifier, &document.file_path, candidates, cx)? {
                    Resolution::Resolved(file_path) => {
                        trace!(specifier, target = %file_path, "resolved import");
                        dependencies.push(Dependency {
                            specifier: specifier.to_string(),
                            file_extension: file_extension_of(file_path.as_str()),
                            file_path,
                            position: (m.start(), m.end()),
                        });
                    }
                    Resolution::Skipped => {}
                }
            }
        }

        Ok(normalize_dependencies(dependencies))
    }
}
