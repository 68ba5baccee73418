//! Source-map support: VLQ mappings codec, edit-delta map generation, and
//! recomposition across rewrite passes.
//!
//! The rewriter produces an edit map for every content rewrite (new
//! positions -> pre-edit positions). Composing that edit map with the
//! previously stored map (pre-edit positions -> original source positions)
//! keeps the stored map pointing at true original sources no matter how many
//! passes have run.

use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::rewrite::Edit;

/// The source-map v3 JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSourceMap {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "sourceRoot", skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl RawSourceMap {
    pub fn parse(json: &str) -> Result<RawSourceMap> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        // Infallible: the struct contains only JSON-representable types.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One decoded mapping segment on a generated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Column in the generated file (0-based).
    pub gen_col: u32,
    pub origin: Option<SegmentOrigin>,
}

/// Where a generated position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOrigin {
    pub source: u32,
    pub line: u32,
    pub column: u32,
    pub name: Option<u32>,
}

const BASE64_CHARS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_value(byte: u8) -> Option<i64> {
    match byte {
        b'A'..=b'Z' => Some(i64::from(byte - b'A')),
        b'a'..=b'z' => Some(i64::from(byte - b'a') + 26),
        b'0'..=b'9' => Some(i64::from(byte - b'0') + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

const VLQ_SHIFT: u32 = 5;
const VLQ_CONTINUATION: i64 = 1 << VLQ_SHIFT;
const VLQ_MASK: i64 = VLQ_CONTINUATION - 1;

fn vlq_encode(value: i64, out: &mut String) {
    // Sign lives in the least significant bit.
    let mut v = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = v & VLQ_MASK;
        v >>= VLQ_SHIFT;
        if v > 0 {
            digit |= VLQ_CONTINUATION;
        }
        out.push(BASE64_CHARS[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

fn vlq_decode(bytes: &[u8], pos: &mut usize) -> Result<i64> {
    let mut value: i64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| anyhow!("truncated VLQ sequence"))?;
        *pos += 1;
        let digit = base64_value(byte).ok_or_else(|| anyhow!("invalid VLQ character {byte:#x}"))?;
        value |= (digit & VLQ_MASK) << shift;
        if digit & VLQ_CONTINUATION == 0 {
            break;
        }
        shift += VLQ_SHIFT;
        if shift > 45 {
            bail!("VLQ value too large");
        }
    }
    let negative = value & 1 == 1;
    value >>= 1;
    Ok(if negative { -value } else { value })
}

/// Decode a `mappings` string into per-generated-line segments.
pub fn decode_mappings(mappings: &str) -> Result<Vec<Vec<Segment>>> {
    let mut lines = Vec::new();
    // Source/line/column/name fields are relative across the whole map;
    // generated column resets per line.
    let mut src: i64 = 0;
    let mut src_line: i64 = 0;
    let mut src_col: i64 = 0;
    let mut name: i64 = 0;

    for line in mappings.split(';') {
        let mut segments = Vec::new();
        let mut gen_col: i64 = 0;
        for raw in line.split(',') {
            if raw.is_empty() {
                continue;
            }
            let bytes = raw.as_bytes();
            let mut pos = 0;
            gen_col += vlq_decode(bytes, &mut pos)?;
            let origin = if pos < bytes.len() {
                src += vlq_decode(bytes, &mut pos)?;
                src_line += vlq_decode(bytes, &mut pos)?;
                src_col += vlq_decode(bytes, &mut pos)?;
                let name_idx = if pos < bytes.len() {
                    name += vlq_decode(bytes, &mut pos)?;
                    Some(u32::try_from(name).map_err(|_| anyhow!("negative name index"))?)
                } else {
                    None
                };
                Some(SegmentOrigin {
                    source: u32::try_from(src).map_err(|_| anyhow!("negative source index"))?,
                    line: u32::try_from(src_line).map_err(|_| anyhow!("negative source line"))?,
                    column: u32::try_from(src_col).map_err(|_| anyhow!("negative source column"))?,
                    name: name_idx,
                })
            } else {
                None
            };
            segments.push(Segment {
                gen_col: u32::try_from(gen_col).map_err(|_| anyhow!("negative generated column"))?,
                origin,
            });
        }
        lines.push(segments);
    }
    Ok(lines)
}

/// Encode per-line segments back into a `mappings` string.
pub fn encode_mappings(lines: &[Vec<Segment>]) -> String {
    let mut out = String::new();
    let mut src: i64 = 0;
    let mut src_line: i64 = 0;
    let mut src_col: i64 = 0;
    let mut name: i64 = 0;

    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let mut gen_col: i64 = 0;
        for (j, segment) in line.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            vlq_encode(i64::from(segment.gen_col) - gen_col, &mut out);
            gen_col = i64::from(segment.gen_col);
            if let Some(origin) = segment.origin {
                vlq_encode(i64::from(origin.source) - src, &mut out);
                src = i64::from(origin.source);
                vlq_encode(i64::from(origin.line) - src_line, &mut out);
                src_line = i64::from(origin.line);
                vlq_encode(i64::from(origin.column) - src_col, &mut out);
                src_col = i64::from(origin.column);
                if let Some(n) = origin.name {
                    vlq_encode(i64::from(n) - name, &mut out);
                    name = i64::from(n);
                }
            }
        }
    }
    out
}

/// Generate the edit-delta map for one rewrite pass: maps positions in the
/// edited output back to positions in `original`. High-resolution (one
/// segment per character outside replacements) so that composition with an
/// earlier map loses no precision; replacement text maps wholesale to the
/// start of the range it replaced.
///
/// `edits` must be sorted ascending and non-overlapping — the extraction
/// invariant the rewriter already relies on.
pub fn edit_map(file: &str, original: &str, edits: &[Edit]) -> RawSourceMap {
    let mut lines: Vec<Vec<Segment>> = vec![Vec::new()];
    let mut out_col: u32 = 0;
    let mut orig_line: u32 = 0;
    let mut orig_col: u32 = 0;
    let mut cursor = 0usize;

    for edit in edits {
        copy_identity_run(&original[cursor..edit.start], &mut lines, &mut out_col, &mut orig_line, &mut orig_col);

        // Replacement text: every character points at the start of the
        // replaced range.
        let (anchor_line, anchor_col) = (orig_line, orig_col);
        for ch in edit.replacement.chars() {
            if ch == '\n' {
                lines.push(Vec::new());
                out_col = 0;
            } else {
                let segment = Segment {
                    gen_col: out_col,
                    origin: Some(SegmentOrigin { source: 0, line: anchor_line, column: anchor_col, name: None }),
                };
                if let Some(line) = lines.last_mut() {
                    line.push(segment);
                }
                out_col += 1;
            }
        }

        // Skip over the replaced original text.
        for ch in original[edit.start..edit.end].chars() {
            if ch == '\n' {
                orig_line += 1;
                orig_col = 0;
            } else {
                orig_col += 1;
            }
        }
        cursor = edit.end;
    }
    copy_identity_run(&original[cursor..], &mut lines, &mut out_col, &mut orig_line, &mut orig_col);

    RawSourceMap {
        version: 3,
        file: Some(file.to_string()),
        source_root: None,
        sources: vec![file.to_string()],
        sources_content: Some(vec![Some(original.to_string())]),
        names: Vec::new(),
        mappings: encode_mappings(&lines),
    }
}

fn copy_identity_run(
    run: &str,
    lines: &mut Vec<Vec<Segment>>,
    out_col: &mut u32,
    orig_line: &mut u32,
    orig_col: &mut u32,
) {
    for ch in run.chars() {
        if ch == '\n' {
            lines.push(Vec::new());
            *out_col = 0;
            *orig_line += 1;
            *orig_col = 0;
        } else {
            let segment = Segment {
                gen_col: *out_col,
                origin: Some(SegmentOrigin { source: 0, line: *orig_line, column: *orig_col, name: None }),
            };
            if let Some(line) = lines.last_mut() {
                line.push(segment);
            }
            *out_col += 1;
            *orig_col += 1;
        }
    }
}

/// Compose two maps: `outer` maps final -> intermediate, `inner` maps
/// intermediate -> original. The result maps final -> original, carrying
/// `inner`'s sources, contents, and names.
pub fn compose(outer: &RawSourceMap, inner: &RawSourceMap) -> Result<RawSourceMap> {
    let outer_lines = decode_mappings(&outer.mappings)?;
    let inner_lines = decode_mappings(&inner.mappings)?;

    let mut composed: Vec<Vec<Segment>> = Vec::with_capacity(outer_lines.len());
    for line in &outer_lines {
        let mut out_line = Vec::new();
        for segment in line {
            let origin = segment
                .origin
                .and_then(|o| trace(&inner_lines, o.line, o.column));
            // Segments that trace nowhere are dropped rather than emitted
            // as unmapped: an unmapped range in a composed map is noise.
            if let Some(origin) = origin {
                let last_same = out_line
                    .last()
                    .is_some_and(|prev: &Segment| prev.origin == Some(origin));
                if !last_same {
                    out_line.push(Segment { gen_col: segment.gen_col, origin: Some(origin) });
                }
            }
        }
        composed.push(out_line);
    }

    Ok(RawSourceMap {
        version: 3,
        file: outer.file.clone(),
        source_root: inner.source_root.clone(),
        sources: inner.sources.clone(),
        sources_content: inner.sources_content.clone(),
        names: inner.names.clone(),
        mappings: encode_mappings(&composed),
    })
}

/// Find the mapped origin of (line, column) in decoded mappings: the last
/// segment on the line at or before the column.
pub fn trace(lines: &[Vec<Segment>], line: u32, column: u32) -> Option<SegmentOrigin> {
    let segments = lines.get(line as usize)?;
    let idx = segments.partition_point(|s| s.gen_col <= column);
    segments[..idx].last()?.origin
}

static SOURCE_MAPPING_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:/\*[#@][ \t]*sourceMappingURL=([^\s'"]*)[ \t]*\*/|//[#@][ \t]*sourceMappingURL=([^\s'"]*))[ \t]*\r?\n?"#,
    )
    .expect("sourceMappingURL regex")
});

/// Byte range of an existing `sourceMappingURL` comment, if any.
pub fn find_source_mapping_url(contents: &str) -> Option<(usize, usize)> {
    // Cheap containment check before running the regex.
    memchr::memmem::find(contents.as_bytes(), b"sourceMappingURL")?;
    let m = SOURCE_MAPPING_URL.find(contents)?;
    Some((m.start(), m.end()))
}

/// The replacement comment for a document's final hashed map filename.
/// CSS gets the block-comment form, everything else the line-comment form.
pub fn source_mapping_url_comment(map_file_name: &str, file_extension: &str) -> String {
    if file_extension.ends_with(".css") {
        format!("/*# sourceMappingURL={map_file_name} */\n")
    } else {
        format!("//# sourceMappingURL={map_file_name}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_roundtrip() {
        let values = [0i64, 1, -1, 16, -16, 31, 32, 1024, -98_765, 1 << 30];
        for v in values {
            let mut s = String::new();
            vlq_encode(v, &mut s);
            let mut pos = 0;
            assert_eq!(vlq_decode(s.as_bytes(), &mut pos).unwrap(), v, "value {v}");
            assert_eq!(pos, s.len());
        }
    }

    proptest::proptest! {
        #[test]
        fn vlq_roundtrip_any(v in -(1i64 << 31)..(1i64 << 31)) {
            let mut s = String::new();
            vlq_encode(v, &mut s);
            let mut pos = 0;
            proptest::prop_assert_eq!(vlq_decode(s.as_bytes(), &mut pos).unwrap(), v);
            proptest::prop_assert_eq!(pos, s.len());
        }
    }

    #[test]
    fn decode_known_mappings() {
        // "AAAA,IAAM" — two segments on one line.
        let lines = decode_mappings("AAAA,IAAM").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0][0], Segment {
            gen_col: 0,
            origin: Some(SegmentOrigin { source: 0, line: 0, column: 0, name: None }),
        });
        assert_eq!(lines[0][1], Segment {
            gen_col: 4,
            origin: Some(SegmentOrigin { source: 0, line: 0, column: 6, name: None }),
        });
    }

    #[test]
    fn mappings_roundtrip() {
        let input = "AAAA;;AACA,IAAMC;AACN,CAAC,KAAK";
        let decoded = decode_mappings(input).unwrap();
        assert_eq!(encode_mappings(&decoded), input);
    }

    #[test]
    fn edit_map_points_replacement_at_range_start() {
        let original = "import { foo } from './foo.js'\nfoo()\n";
        let edits = vec![Edit {
            start: 21,
            end: 29,
            replacement: "./foo.abc123.js".to_string(),
        }];
        let map = edit_map("bar.js", original, &edits);
        let lines = decode_mappings(&map.mappings).unwrap();

        // Column 21 in the output is the replacement start and maps to
        // column 21 of the original.
        let origin = trace(&lines, 0, 21).unwrap();
        assert_eq!((origin.line, origin.column), (0, 21));
        // A column inside the replacement still maps to the range start.
        let origin = trace(&lines, 0, 30).unwrap();
        assert_eq!((origin.line, origin.column), (0, 21));
        // The second line is untouched and maps straight through.
        let origin = trace(&lines, 1, 2).unwrap();
        assert_eq!((origin.line, origin.column), (1, 2));
        assert_eq!(map.sources_content, Some(vec![Some(original.to_string())]));
    }

    #[test]
    fn compose_traces_through_both_maps() {
        // First pass: replace cols [4, 7) of "let abc = 1" with a longer name.
        let original = "let abc = 1\n";
        let first = edit_map("a.js", original, &[Edit { start: 4, end: 7, replacement: "abcdef".into() }]);
        let intermediate = "let abcdef = 1\n";
        // Second pass: replace "1" (now at col 13) with "2".
        let second = edit_map("a.js", intermediate, &[Edit { start: 13, end: 14, replacement: "2".into() }]);

        let composed = compose(&second, &first).unwrap();
        let lines = decode_mappings(&composed.mappings).unwrap();

        // Final col 13 ("2") -> intermediate col 13 -> original col 10.
        let origin = trace(&lines, 0, 13).unwrap();
        assert_eq!((origin.line, origin.column), (0, 10));
        // Final col 0 maps straight back to original col 0.
        let origin = trace(&lines, 0, 0).unwrap();
        assert_eq!((origin.line, origin.column), (0, 0));
        assert_eq!(composed.sources_content, first.sources_content);
    }

    #[test]
    fn find_js_and_css_comments() {
        let js = "console.log(1)\n//# sourceMappingURL=app.js.map\n";
        let (start, end) = find_source_mapping_url(js).unwrap();
        assert_eq!(&js[start..end], "//# sourceMappingURL=app.js.map\n");

        let css = "body {}\n/*# sourceMappingURL=style.css.map */\n";
        let (start, end) = find_source_mapping_url(css).unwrap();
        assert_eq!(&css[start..end], "/*# sourceMappingURL=style.css.map */\n");

        assert!(find_source_mapping_url("no comment here\n").is_none());
    }

    #[test]
    fn comment_templates() {
        assert_eq!(
            source_mapping_url_comment("style.abc.css.map", ".css"),
            "/*# sourceMappingURL=style.abc.css.map */\n"
        );
        assert_eq!(
            source_mapping_url_comment("app.abc.js.map", ".js"),
            "//# sourceMappingURL=app.abc.js.map\n"
        );
    }

    #[test]
    fn malformed_map_is_a_parse_error_not_a_panic() {
        assert!(RawSourceMap::parse("not json").is_err());
        assert!(RawSourceMap::parse("{\"version\":3}").is_err());
    }
}
