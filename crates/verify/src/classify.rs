//! Failure classification
//!
//! Maps Playwright error text to one of a small set of failure classes and
//! identifies the element involved by its rendered locator expression.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use stepwright_compiler::Evidence;

use crate::report::RunReport;

static TIMEOUT_EXCEEDED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Timeout \d+ms exceeded|Timed out \d+ms").expect("timeout regex"));

static NAVIGATION_TIMEOUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:page\.goto|navigation).*Timeout \d+ms exceeded|Timeout \d+ms exceeded.*navigation")
        .expect("navigation timeout regex")
});

const NOT_FOUND: &[&str] = &["resolved to 0 elements", "element(s) not found", "elements not found"];

const VISIBILITY: &[&str] = &["not visible", "not stable", "detached", "not enabled", "not attached"];

const WAITS: &[&str] = &["waitForURL", "waitForResponse"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    SelectorNotFound,
    TimingRace,
    StrictModeAmbiguity,
    Unclassifiable,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::SelectorNotFound => "selector_not_found",
            FailureClass::TimingRace => "timing_race",
            FailureClass::StrictModeAmbiguity => "strict_mode_ambiguity",
            FailureClass::Unclassifiable => "unclassifiable",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub class: FailureClass,
    /// Key of the element the error names
    pub element: Option<String>,
    pub message: String,
    pub evidence: Evidence,
}

/// An element's identity and the locator expression it currently renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementProbe {
    pub key: String,
    pub expression: String,
}

/// Classify a failed run. `root` is used to make evidence paths relative.
pub fn classify(report: &RunReport, elements: &[ElementProbe], root: &Path) -> Failure {
    let text = report.error_text();
    let element = identify(&text, elements);
    let evidence = collect_evidence(report, root);

    let class = if text.contains("strict mode violation") {
        FailureClass::StrictModeAmbiguity
    } else if is_not_found(&text) {
        FailureClass::SelectorNotFound
    } else if is_timing(&text) {
        FailureClass::TimingRace
    } else {
        FailureClass::Unclassifiable
    };

    // Locator failures are only actionable when we know which element failed
    let class = match class {
        FailureClass::SelectorNotFound | FailureClass::StrictModeAmbiguity if element.is_none() => {
            FailureClass::Unclassifiable
        }
        c => c,
    };

    Failure {
        class,
        element,
        message: text,
        evidence,
    }
}

fn is_not_found(text: &str) -> bool {
    if NOT_FOUND.iter().any(|p| text.contains(p)) {
        return true;
    }
    text.contains("waiting for ")
        && TIMEOUT_EXCEEDED.is_match(text)
        && !VISIBILITY.iter().any(|p| text.contains(p))
        && !WAITS.iter().any(|p| text.contains(p))
        && !NAVIGATION_TIMEOUT.is_match(text)
}

fn is_timing(text: &str) -> bool {
    VISIBILITY.iter().any(|p| text.contains(p))
        || WAITS.iter().any(|p| text.contains(p))
        || NAVIGATION_TIMEOUT.is_match(text)
}

/// The element whose expression appears in the text; the longest match wins
fn identify(text: &str, elements: &[ElementProbe]) -> Option<String> {
    elements
        .iter()
        .filter(|e| !e.expression.is_empty() && text.contains(&e.expression))
        .max_by(|a, b| {
            a.expression
                .len()
                .cmp(&b.expression.len())
                .then_with(|| b.key.cmp(&a.key))
        })
        .map(|e| e.key.clone())
}

fn collect_evidence(report: &RunReport, root: &Path) -> Evidence {
    let mut evidence = Evidence::default();
    for attachment in report.attachments() {
        let Some(path) = &attachment.path else {
            continue;
        };
        let path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let name = attachment.name.to_ascii_lowercase();
        if name == "trace" || attachment.content_type == "application/zip" {
            evidence.trace.get_or_insert(path);
        } else if name == "error-context" || name.contains("snapshot") {
            evidence.snapshot.get_or_insert(path);
        } else if name == "screenshot" || attachment.content_type.starts_with("image/") {
            evidence.screenshot.get_or_insert(path);
        }
    }
    evidence
}
