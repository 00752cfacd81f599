//! Journey document model and parser
//!
//! A journey is Markdown with YAML frontmatter. Steps are the numbered items
//! under `## Steps`; everything else in the body is ignored except the
//! acceptance criteria bullets.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CompileError, CompileResult};
use crate::hints::{self, MachineHint};

/// File suffix picked up when a directory is given
pub const JOURNEY_SUFFIX: &str = ".journey.md";

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}(\d+)[.)]\s+(.*)$").expect("numbered item regex"));

static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*]\s+(.*)$").expect("bullet regex"));

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("heading regex"));

// ============================================================================
// Model
// ============================================================================

/// Journey lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    Proposed,
    Defined,
    Clarified,
    Implemented,
    Quarantined,
    Deprecated,
}

impl JourneyStatus {
    pub fn parse(value: &str) -> Option<Self> {
        let status = match value.trim().to_ascii_lowercase().as_str() {
            "proposed" => JourneyStatus::Proposed,
            "defined" => JourneyStatus::Defined,
            "clarified" => JourneyStatus::Clarified,
            "implemented" => JourneyStatus::Implemented,
            "quarantined" => JourneyStatus::Quarantined,
            "deprecated" => JourneyStatus::Deprecated,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Proposed => "proposed",
            JourneyStatus::Defined => "defined",
            JourneyStatus::Clarified => "clarified",
            JourneyStatus::Implemented => "implemented",
            JourneyStatus::Quarantined => "quarantined",
            JourneyStatus::Deprecated => "deprecated",
        }
    }

    /// Clarified, implemented and quarantined journeys may be compiled
    pub fn is_compilable(&self) -> bool {
        *self >= JourneyStatus::Clarified && *self != JourneyStatus::Deprecated
    }
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test tier; also the output subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Smoke,
    Release,
    Regression,
}

impl Tier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "smoke" => Some(Tier::Smoke),
            "release" => Some(Tier::Release),
            "regression" => Some(Tier::Regression),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Smoke => "smoke",
            Tier::Release => "release",
            Tier::Regression => "regression",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step the author has marked as not automatable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedStep {
    pub step: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutogenControl {
    pub enabled: bool,
    pub blocked_steps: Vec<BlockedStep>,
    pub machine_hints: bool,
}

impl Default for AutogenControl {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_steps: Vec::new(),
            machine_hints: true,
        }
    }
}

impl AutogenControl {
    pub fn blocked_reason(&self, ordinal: u32) -> Option<&str> {
        self.blocked_steps
            .iter()
            .find(|b| b.step == ordinal)
            .map(|b| b.reason.as_str())
    }
}

/// One numbered step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub ordinal: u32,
    /// Prose with any machine hint removed
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<MachineHint>,
    /// 1-based line in the source document
    pub line: usize,
    /// Short digest of the raw step text
    pub fingerprint: String,
}

/// A parsed journey document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,
    pub title: String,
    pub status: JourneyStatus,
    pub tier: Tier,
    pub actor: String,
    pub scope: Option<String>,
    pub framework: Option<String>,
    pub tags: Vec<String>,
    pub autogen: AutogenControl,
    pub steps: Vec<Step>,
    pub acceptance_criteria: Vec<String>,
    pub source_path: Option<PathBuf>,
}

impl Journey {
    /// Read and parse a journey file
    pub fn load(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse(&content, Some(path))
    }

    /// File-name-safe form of the journey id
    pub fn slug(&self) -> String {
        slugify(&self.id)
    }

    /// Refuse journeys whose status does not allow compilation
    pub fn ensure_compilable(&self) -> CompileResult<()> {
        if self.status.is_compilable() {
            Ok(())
        } else {
            Err(CompileError::NotCompilable {
                id: self.id.clone(),
                status: self.status.to_string(),
            })
        }
    }
}

/// Lower-case, hyphen-separated identifier
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "journey".to_string()
    } else {
        out
    }
}

/// Expand paths into journey files; directories are walked for `*.journey.md`
pub fn discover(paths: &[PathBuf]) -> CompileResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = walkdir::WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| n.ends_with(JOURNEY_SUFFIX))
                        .unwrap_or(false)
                })
                .map(|e| e.into_path())
                .collect();
            found.sort();
            debug!("Found {} journeys under {}", found.len(), path.display());
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(CompileError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("journey path not found: {}", path.display()),
            )));
        }
    }
    files.dedup();
    Ok(files)
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrontmatter {
    id: Option<String>,
    title: Option<String>,
    status: Option<String>,
    tier: Option<String>,
    actor: Option<String>,
    scope: Option<String>,
    framework: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    autogen: Option<RawAutogen>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAutogen {
    enabled: Option<bool>,
    #[serde(default)]
    blocked_steps: Vec<RawBlockedStep>,
    machine_hints: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawBlockedStep {
    step: u32,
    reason: Option<String>,
}

struct Frontmatter<'a> {
    /// Line of the opening fence
    start: usize,
    lines: Vec<&'a str>,
    /// Index into the document lines of the first body line
    body_start: usize,
}

impl Frontmatter<'_> {
    /// Line of `key:` in the frontmatter, falling back to the fence line
    fn key_line(&self, key: &str) -> usize {
        self.lines
            .iter()
            .position(|l| {
                l.trim_start()
                    .strip_prefix(key)
                    .map(|rest| rest.trim_start().starts_with(':'))
                    .unwrap_or(false)
            })
            .map(|i| self.start + 1 + i)
            .unwrap_or(self.start)
    }
}

/// Parse a journey document. `path` is only used for error locations.
pub fn parse(content: &str, path: Option<&Path>) -> CompileResult<Journey> {
    let display_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("<journey>"));
    let err = |line: usize, message: String| CompileError::structural(display_path.clone(), line, message);

    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let lines: Vec<&str> = content.lines().collect();
    let fm = split_frontmatter(&lines).map_err(|(line, msg)| err(line, msg))?;

    let raw: RawFrontmatter = if fm.lines.iter().all(|l| l.trim().is_empty()) {
        RawFrontmatter::default()
    } else {
        serde_yaml::from_str(&fm.lines.join("\n")).map_err(|e| {
            let line = e
                .location()
                .map(|loc| fm.start + loc.line())
                .unwrap_or(fm.start);
            err(line, format!("invalid frontmatter: {}", e))
        })?
    };

    let required = |value: Option<String>, key: &str| {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| err(fm.start, format!("missing required frontmatter key '{}'", key)))
    };
    let id = required(raw.id, "id")?;
    let title = required(raw.title, "title")?;
    let status_raw = required(raw.status, "status")?;
    let tier_raw = required(raw.tier, "tier")?;
    let actor = required(raw.actor, "actor")?;

    let status = JourneyStatus::parse(&status_raw).ok_or_else(|| {
        err(
            fm.key_line("status"),
            format!(
                "unknown status '{}': expected proposed, defined, clarified, implemented, quarantined or deprecated",
                status_raw
            ),
        )
    })?;
    let tier = Tier::parse(&tier_raw).ok_or_else(|| {
        err(
            fm.key_line("tier"),
            format!("unknown tier '{}': expected smoke, release or regression", tier_raw),
        )
    })?;

    let raw_autogen = raw.autogen.unwrap_or_default();
    let autogen = AutogenControl {
        enabled: raw_autogen.enabled.unwrap_or(true),
        machine_hints: raw_autogen.machine_hints.unwrap_or(true),
        blocked_steps: raw_autogen
            .blocked_steps
            .into_iter()
            .map(|b| BlockedStep {
                step: b.step,
                reason: b
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "marked as manual by the journey author".to_string()),
            })
            .collect(),
    };

    let body = Body::scan(&lines, fm.body_start);
    let raw_steps = collect_steps(&lines, &body.step_lines);
    if raw_steps.is_empty() {
        let line = body.steps_heading.unwrap_or(fm.body_start + 1);
        return Err(err(line, "journey has no numbered steps".to_string()));
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw_step) in raw_steps.into_iter().enumerate() {
        let expected = index as u32 + 1;
        if raw_step.number != expected {
            return Err(err(
                raw_step.line,
                format!(
                    "step numbered {} but expected {}: steps must be numbered 1..n consecutively",
                    raw_step.number, expected
                ),
            ));
        }

        let extracted = hints::extract(&raw_step.text).map_err(|msg| err(raw_step.line, msg))?;
        let hint = match extracted.hint {
            Some(_) if !autogen.machine_hints => {
                warn!(
                    "Journey {} step {}: machine hints are disabled, ignoring hint",
                    id, expected
                );
                None
            }
            other => other,
        };

        steps.push(Step {
            ordinal: expected,
            text: extracted.prose,
            hint,
            line: raw_step.line,
            fingerprint: fingerprint(&raw_step.text),
        });
    }

    for blocked in &autogen.blocked_steps {
        if blocked.step == 0 || blocked.step as usize > steps.len() {
            return Err(err(
                fm.key_line("blockedSteps"),
                format!(
                    "blockedSteps references step {} but the journey has {} steps",
                    blocked.step,
                    steps.len()
                ),
            ));
        }
    }

    let acceptance_criteria = body
        .criteria_lines
        .iter()
        .filter_map(|&i| BULLET.captures(lines[i]))
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();

    debug!("Parsed journey {} with {} steps", id, steps.len());

    Ok(Journey {
        id,
        title,
        status,
        tier,
        actor,
        scope: raw.scope.filter(|s| !s.trim().is_empty()),
        framework: raw.framework.filter(|s| !s.trim().is_empty()),
        tags: raw.tags,
        autogen,
        steps,
        acceptance_criteria,
        source_path: path.map(Path::to_path_buf),
    })
}

fn split_frontmatter<'a>(lines: &[&'a str]) -> Result<Frontmatter<'a>, (usize, String)> {
    let open = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .ok_or((1, "empty journey document".to_string()))?;
    if lines[open].trim_end() != "---" {
        return Err((open + 1, "journey must start with a '---' frontmatter block".to_string()));
    }
    let close = lines[open + 1..]
        .iter()
        .position(|l| {
            let t = l.trim_end();
            t == "---" || t == "..."
        })
        .map(|i| open + 1 + i)
        .ok_or((open + 1, "unterminated frontmatter: no closing '---'".to_string()))?;

    Ok(Frontmatter {
        start: open + 1,
        lines: lines[open + 1..close].to_vec(),
        body_start: close + 1,
    })
}

/// Line indices of the step and acceptance-criteria sections
struct Body {
    steps_heading: Option<usize>,
    step_lines: Vec<usize>,
    criteria_lines: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Steps,
    Criteria,
    Other,
}

impl Body {
    fn scan(lines: &[&str], start: usize) -> Self {
        let mut steps_heading = None;
        let mut sections = Vec::with_capacity(lines.len().saturating_sub(start));
        let mut current = Section::Other;
        let mut in_fence = false;

        for (offset, line) in lines[start.min(lines.len())..].iter().enumerate() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            if !in_fence {
                if let Some(caps) = HEADING.captures(line) {
                    let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
                    let title = caps
                        .get(2)
                        .map(|m| m.as_str().to_ascii_lowercase())
                        .unwrap_or_default();
                    if level >= 2 {
                        current = match title.as_str() {
                            "steps" | "procedural steps" => {
                                if steps_heading.is_none() {
                                    steps_heading = Some(start + offset + 1);
                                }
                                Section::Steps
                            }
                            "acceptance criteria" => Section::Criteria,
                            _ if level == 2 => Section::Other,
                            _ => current,
                        };
                    } else {
                        current = Section::Other;
                    }
                    sections.push(Section::Other);
                    continue;
                }
            }
            sections.push(if in_fence { Section::Other } else { current });
        }

        let pick = |wanted: &dyn Fn(Section) -> bool| -> Vec<usize> {
            sections
                .iter()
                .enumerate()
                .filter(|(_, s)| wanted(**s))
                .map(|(i, _)| start + i)
                .collect()
        };

        // Without a steps heading every numbered item outside the criteria counts
        let step_lines = if steps_heading.is_some() {
            pick(&|s: Section| s == Section::Steps)
        } else {
            pick(&|s: Section| s != Section::Criteria)
        };
        let criteria_lines = pick(&|s: Section| s == Section::Criteria);

        Self {
            steps_heading,
            step_lines,
            criteria_lines,
        }
    }
}

struct RawStep {
    number: u32,
    line: usize,
    text: String,
}

fn collect_steps(lines: &[&str], indices: &[usize]) -> Vec<RawStep> {
    let mut steps: Vec<RawStep> = Vec::new();
    let mut open = false;

    for &i in indices {
        let line = lines[i];
        if let Some(caps) = NUMBERED.captures(line) {
            let number = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            steps.push(RawStep {
                number,
                line: i + 1,
                text: text.to_string(),
            });
            open = true;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        match steps.last_mut() {
            Some(step) if open && indented && BULLET.captures(line).is_none() => {
                step.text.push(' ');
                step.text.push_str(line.trim());
            }
            _ => open = false,
        }
    }
    steps
}

/// First 16 hex characters of SHA-256
pub fn fingerprint(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOURNEY: &str = r#"---
id: JRN-0007
title: Place an order
status: clarified
tier: smoke
actor: buyer
scope: orders
tags: [checkout]
autogen:
  blockedSteps:
    - step: 4
      reason: Payment provider sandbox needs a human
---

# Place an order

## Steps

1. Navigate to /orders/new
2. Enter "Widget" in the Product field
   (role=textbox, name="Product")
3. Click the "Place order" button
4. Complete 3-D Secure challenge

## Acceptance Criteria

- An order confirmation is shown
- The order appears in history
"#;

    #[test]
    fn test_parse_full_document() {
        let journey = parse(JOURNEY, None).unwrap();
        assert_eq!(journey.id, "JRN-0007");
        assert_eq!(journey.status, JourneyStatus::Clarified);
        assert_eq!(journey.tier, Tier::Smoke);
        assert_eq!(journey.scope.as_deref(), Some("orders"));
        assert_eq!(journey.steps.len(), 4);
        assert_eq!(journey.steps[0].line, 19);
        assert_eq!(journey.steps[1].text, r#"Enter "Widget" in the Product field"#);
        assert!(journey.steps[1].hint.is_some());
        assert_eq!(journey.autogen.blocked_reason(4), Some("Payment provider sandbox needs a human"));
        assert_eq!(journey.acceptance_criteria.len(), 2);
        assert_eq!(journey.slug(), "jrn-0007");
    }

    #[test]
    fn test_status_ordering() {
        assert!(JourneyStatus::Clarified.is_compilable());
        assert!(JourneyStatus::Quarantined.is_compilable());
        assert!(!JourneyStatus::Defined.is_compilable());
        assert!(!JourneyStatus::Deprecated.is_compilable());
        assert!(JourneyStatus::Proposed < JourneyStatus::Implemented);
    }

    #[test]
    fn test_unknown_status_reports_key_line() {
        let doc = JOURNEY.replace("status: clarified", "status: drafted");
        match parse(&doc, None).unwrap_err() {
            CompileError::Structural { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("drafted"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_key_reports_frontmatter_start() {
        let doc = JOURNEY.replace("actor: buyer\n", "");
        match parse(&doc, None).unwrap_err() {
            CompileError::Structural { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("actor"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_numbering_gap_reports_step_line() {
        let doc = JOURNEY.replace("3. Click", "5. Click");
        match parse(&doc, None).unwrap_err() {
            CompileError::Structural { line, message, .. } => {
                assert_eq!(line, 22);
                assert!(message.contains("expected 3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blocked_step_out_of_range() {
        let doc = JOURNEY.replace("- step: 4", "- step: 9");
        assert!(parse(&doc, None).unwrap_err().is_structural());
    }

    #[test]
    fn test_unterminated_frontmatter() {
        let err = parse("---\nid: x\n\n1. Click it\n", None).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_hints_discarded_when_disabled() {
        let doc = JOURNEY.replace("autogen:\n", "autogen:\n  machineHints: false\n");
        let journey = parse(&doc, None).unwrap();
        assert!(journey.steps[1].hint.is_none());
        assert!(!journey.steps[1].text.contains("role="));
    }

    #[test]
    fn test_steps_without_heading() {
        let doc = "---\nid: J1\ntitle: t\nstatus: implemented\ntier: release\nactor: a\n---\n1. Navigate to /\n2) Click the \"Go\" link\n";
        let journey = parse(doc, None).unwrap();
        assert_eq!(journey.steps.len(), 2);
        assert_eq!(journey.steps[1].ordinal, 2);
    }

    #[test]
    fn test_fingerprint_changes_with_text() {
        assert_eq!(fingerprint("a").len(), 16);
        assert_ne!(fingerprint("Click the \"Save\" button"), fingerprint("Click the \"Send\" button"));
    }

    #[test]
    fn test_discover_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.journey.md"), "x").unwrap();
        std::fs::write(dir.path().join("nested/a.journey.md"), "x").unwrap();
        std::fs::write(dir.path().join("notes.md"), "x").unwrap();
        let found = discover(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found.len(), 2);
    }
}
