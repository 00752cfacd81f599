//! Managed regions in generated files
//!
//! Every generated block is wrapped in begin/end markers that record a hash of
//! the block body. On regeneration, blocks whose body still matches the hash
//! are replaced and everything outside the markers is kept byte-for-byte. A
//! block whose hash no longer matches was edited by hand and stops the merge.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use crate::error::{CompileError, CompileResult};

static BEGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)// <stepwright:begin (\S+) sha=([0-9a-f]{12})>\s*$").expect("begin marker regex")
});

static END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*// <stepwright:end (\S+)>\s*$").expect("end marker regex"));

/// First 12 hex characters of the SHA-256 of a region body
pub fn region_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))[..12].to_string()
}

/// One generated block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub key: String,
    /// Body lines joined by `\n`, without a trailing newline
    pub body: String,
    /// Separate from the previous region by a blank line in fresh files
    pub leading_blank: bool,
}

impl Region {
    pub fn new(key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            leading_blank: true,
        }
    }

    /// Region that follows the previous one without a blank line
    pub fn tight(key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            leading_blank: false,
            ..Self::new(key, body)
        }
    }

    fn indent(&self) -> &str {
        let first = self.body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        &first[..first.len() - first.trim_start().len()]
    }

    /// Marker-wrapped text, ending with a newline
    pub fn render(&self) -> String {
        let indent = self.indent();
        let mut out = format!(
            "{}// <stepwright:begin {} sha={}>\n",
            indent,
            self.key,
            region_hash(&self.body)
        );
        if !self.body.is_empty() {
            out.push_str(&self.body);
            out.push('\n');
        }
        out.push_str(&format!("{}// <stepwright:end {}>\n", indent, self.key));
        out
    }
}

/// The generated regions of one file, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedFile {
    pub regions: Vec<Region>,
}

impl RenderedFile {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.key.as_str()).collect()
    }

    pub fn region(&self, key: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.key == key)
    }

    /// Text of a file written from scratch
    pub fn render_fresh(&self) -> String {
        let mut out = String::new();
        for (i, region) in self.regions.iter().enumerate() {
            if i > 0 && region.leading_blank {
                out.push('\n');
            }
            out.push_str(&region.render());
        }
        out
    }
}

/// How regions missing from the new rendering are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Regions absent from the new rendering are removed
    Replace,
    /// Regions absent from the new rendering are kept (shared modules)
    Additive,
}

/// A parsed region as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRegion {
    pub key: String,
    pub recorded_hash: String,
    pub body: String,
    /// Original text including markers
    pub raw: String,
}

impl ExistingRegion {
    pub fn is_pristine(&self) -> bool {
        region_hash(&self.body) == self.recorded_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Region(ExistingRegion),
}

/// Split a generated file into unmanaged text and regions
pub fn parse(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut pending = String::new();
    let mut open: Option<(String, String, Vec<String>, String)> = None;
    let mut seen = BTreeSet::new();

    for line in text.split_inclusive('\n') {
        let bare = line.strip_suffix('\n').unwrap_or(line);
        if let Some((key, hash, body, raw)) = open.as_mut() {
            raw.push_str(line);
            if let Some(caps) = END.captures(bare) {
                let end_key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                if end_key != key.as_str() {
                    return Err(format!("region '{}' closed by end marker for '{}'", key, end_key));
                }
                let region = ExistingRegion {
                    key: key.clone(),
                    recorded_hash: hash.clone(),
                    body: body.join("\n"),
                    raw: raw.clone(),
                };
                segments.push(Segment::Region(region));
                open = None;
            } else if BEGIN.is_match(bare) {
                return Err(format!("region '{}' is not closed before the next begin marker", key));
            } else {
                body.push(bare.to_string());
            }
            continue;
        }

        if let Some(caps) = BEGIN.captures(bare) {
            let key = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            let hash = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
            if !seen.insert(key.clone()) {
                return Err(format!("region '{}' appears more than once", key));
            }
            if !pending.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut pending)));
            }
            open = Some((key, hash, Vec::new(), line.to_string()));
        } else if let Some(caps) = END.captures(bare) {
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            return Err(format!("end marker for '{}' without a begin marker", key));
        } else {
            pending.push_str(line);
        }
    }

    if let Some((key, ..)) = open {
        return Err(format!("region '{}' is never closed", key));
    }
    if !pending.is_empty() {
        segments.push(Segment::Text(pending));
    }
    Ok(segments)
}

/// Merge a new rendering into the current file text
pub fn merge(existing: &str, rendered: &RenderedFile, mode: MergeMode, path: &Path) -> CompileResult<String> {
    let conflict = |region: &str| CompileError::GenerationConflict {
        path: path.to_path_buf(),
        region: region.to_string(),
    };

    let segments = parse(existing).map_err(|msg| {
        debug!("Malformed markers in {}: {}", path.display(), msg);
        conflict("<markers>")
    })?;

    if !segments.iter().any(|s| matches!(s, Segment::Region(_))) {
        if existing.trim().is_empty() {
            return Ok(rendered.render_fresh());
        }
        // A file at a generated path with no markers belongs to someone else
        return Err(conflict("<unmanaged file>"));
    }

    for segment in &segments {
        if let Segment::Region(region) = segment {
            if !region.is_pristine() {
                return Err(conflict(&region.key));
            }
        }
    }

    let fresh: BTreeMap<&str, &Region> = rendered.regions.iter().map(|r| (r.key.as_str(), r)).collect();

    // Output pieces; `Some(key)` marks a region so new keys can be placed
    let mut pieces: Vec<(Option<String>, String)> = Vec::new();
    // A removed region also takes one separating newline with it
    let mut trim_next = false;
    for segment in segments {
        match segment {
            Segment::Text(mut text) => {
                if std::mem::take(&mut trim_next) && text.starts_with('\n') {
                    text.remove(0);
                }
                pieces.push((None, text));
            }
            Segment::Region(region) => match fresh.get(region.key.as_str()) {
                Some(new) => pieces.push((Some(region.key.clone()), new.render())),
                None if mode == MergeMode::Additive => pieces.push((Some(region.key.clone()), region.raw)),
                None => {
                    debug!("Removing region '{}' from {}", region.key, path.display());
                    match pieces.last_mut() {
                        Some((None, text)) if text.as_str() == "\n" || text.ends_with("\n\n") => {
                            text.pop();
                        }
                        _ => trim_next = true,
                    }
                }
            },
        }
    }

    let order = rendered.keys();
    for (i, region) in rendered.regions.iter().enumerate() {
        if position_of(&pieces, &region.key).is_some() {
            continue;
        }
        let text = if region.leading_blank {
            format!("\n{}", region.render())
        } else {
            region.render()
        };
        let before = order[..i].iter().rev().find_map(|k| position_of(&pieces, k));
        match before {
            Some(index) => pieces.insert(index + 1, (Some(region.key.clone()), text)),
            None => match order[i + 1..].iter().find_map(|k| position_of(&pieces, k)) {
                Some(index) => pieces.insert(index, (Some(region.key.clone()), region.render())),
                None => pieces.push((Some(region.key.clone()), text)),
            },
        }
    }

    Ok(pieces.into_iter().map(|(_, text)| text).collect())
}

fn position_of(pieces: &[(Option<String>, String)], key: &str) -> Option<usize> {
    pieces.iter().position(|(k, _)| k.as_deref() == Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(regions: &[(&str, &str)]) -> RenderedFile {
        RenderedFile::new(regions.iter().map(|(k, b)| Region::new(*k, *b)).collect())
    }

    fn path() -> PathBuf {
        PathBuf::from("tests/smoke/j.spec.ts")
    }

    #[test]
    fn test_fresh_roundtrip_is_stable() {
        let rendered = file(&[("imports", "import x;"), ("step-1", "  a();\n  b();")]);
        let text = rendered.render_fresh();
        assert!(text.contains("// <stepwright:begin step-1 sha="));
        assert!(text.contains("  // <stepwright:end step-1>"));
        let merged = merge(&text, &rendered, MergeMode::Replace, &path()).unwrap();
        assert_eq!(merged, text);
    }

    #[test]
    fn test_edits_outside_regions_survive() {
        let rendered = file(&[("imports", "import x;"), ("step-1", "a();")]);
        let mut text = rendered.render_fresh();
        text.push_str("\n// my own helper\nfunction mine() {}\n");
        let updated = file(&[("imports", "import x;"), ("step-1", "b();")]);
        let merged = merge(&text, &updated, MergeMode::Replace, &path()).unwrap();
        assert!(merged.contains("function mine() {}"));
        assert!(merged.contains("b();"));
        assert!(!merged.contains("a();"));
    }

    #[test]
    fn test_hand_edited_region_conflicts() {
        let rendered = file(&[("imports", "import x;"), ("step-1", "a();")]);
        let text = rendered.render_fresh().replace("a();", "a(); // tweaked");
        match merge(&text, &rendered, MergeMode::Replace, &path()).unwrap_err() {
            CompileError::GenerationConflict { region, .. } => assert_eq!(region, "step-1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_new_key_goes_after_its_predecessor() {
        let old = file(&[("imports", "i"), ("step-1", "one"), ("footer", "f")]);
        let new = file(&[("imports", "i"), ("step-1", "one"), ("step-2", "two"), ("footer", "f")]);
        let merged = merge(&old.render_fresh(), &new, MergeMode::Replace, &path()).unwrap();
        assert_eq!(merged, new.render_fresh());
    }

    #[test]
    fn test_removed_key_is_dropped_unless_additive() {
        let old = file(&[("a", "1"), ("b", "2")]);
        let new = file(&[("a", "1")]);
        let replaced = merge(&old.render_fresh(), &new, MergeMode::Replace, &path()).unwrap();
        assert!(!replaced.contains("begin b "));
        let kept = merge(&old.render_fresh(), &new, MergeMode::Additive, &path()).unwrap();
        assert!(kept.contains("begin b "));
    }

    #[test]
    fn test_removed_region_takes_its_blank_line() {
        let old = file(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = file(&[("a", "1"), ("c", "3")]);
        let merged = merge(&old.render_fresh(), &new, MergeMode::Replace, &path()).unwrap();
        assert_eq!(merged, new.render_fresh());

        let last = merge(&old.render_fresh(), &file(&[("a", "1"), ("b", "2")]), MergeMode::Replace, &path()).unwrap();
        assert_eq!(last, file(&[("a", "1"), ("b", "2")]).render_fresh());

        let first = merge(&old.render_fresh(), &file(&[("b", "2"), ("c", "3")]), MergeMode::Replace, &path()).unwrap();
        assert_eq!(first, file(&[("b", "2"), ("c", "3")]).render_fresh());

        // Removing and adding back leaves the file as it was
        let restored = merge(&merged, &old, MergeMode::Replace, &path()).unwrap();
        assert_eq!(restored, old.render_fresh());
    }

    #[test]
    fn test_malformed_markers_conflict() {
        let text = "// <stepwright:begin a sha=000000000000>\nx\n";
        assert!(matches!(
            merge(text, &file(&[("a", "x")]), MergeMode::Replace, &path()),
            Err(CompileError::GenerationConflict { .. })
        ));
        assert!(parse("// <stepwright:end a>\n").is_err());
    }

    #[test]
    fn test_unmanaged_file_conflicts() {
        assert!(merge("export const x = 1;\n", &file(&[("a", "x")]), MergeMode::Replace, &path()).is_err());
    }
}
