//! Playwright JSON reporter output

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::{VerifyError, VerifyResult};

static ANSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi escape regex"));

/// Remove terminal colour codes from Playwright messages
pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

// ============================================================================
// Reporter schema (only the fields we read)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonReport {
    suites: Vec<JsonSuite>,
    errors: Vec<JsonError>,
    stats: JsonStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonStats {
    expected: u32,
    unexpected: u32,
    flaky: u32,
    skipped: u32,
    duration: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSuite {
    title: String,
    specs: Vec<JsonSpec>,
    suites: Vec<JsonSuite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSpec {
    title: String,
    tests: Vec<JsonTest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonTest {
    status: String,
    results: Vec<JsonResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonResult {
    status: String,
    error: Option<JsonError>,
    errors: Vec<JsonError>,
    attachments: Vec<JsonAttachment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonError {
    message: Option<String>,
    stack: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct JsonAttachment {
    name: String,
    content_type: String,
    path: Option<PathBuf>,
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub path: Option<PathBuf>,
}

/// One failing test with its error text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub title: String,
    /// Error message with colour codes removed
    pub message: String,
    pub attachments: Vec<Attachment>,
}

/// What one runner invocation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub failures: Vec<TestFailure>,
    pub duration: Duration,
}

impl RunReport {
    pub fn passed(duration: Duration) -> Self {
        Self {
            outcome: RunOutcome::Passed,
            failures: Vec::new(),
            duration,
        }
    }

    pub fn failed(failures: Vec<TestFailure>, duration: Duration) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            failures,
            duration,
        }
    }

    /// Report for a run that was stopped before it finished
    pub fn interrupted(outcome: RunOutcome, duration: Duration) -> Self {
        Self {
            outcome,
            failures: Vec::new(),
            duration,
        }
    }

    /// All failure messages joined, for classification
    pub fn error_text(&self) -> String {
        self.failures
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.failures.iter().flat_map(|f| f.attachments.iter())
    }
}

/// Parse reporter output. Anything printed around the JSON object is ignored.
pub fn parse_report(stdout: &str) -> VerifyResult<RunReport> {
    let start = stdout.find('{');
    let end = stdout.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &stdout[s..=e],
        _ => return Err(VerifyError::ReportParse("no JSON object in runner output".to_string())),
    };
    let report: JsonReport =
        serde_json::from_str(json).map_err(|e| VerifyError::ReportParse(e.to_string()))?;

    let duration = Duration::from_millis(report.stats.duration.max(0.0) as u64);
    let mut failures = Vec::new();

    for error in &report.errors {
        failures.push(TestFailure {
            title: "<global>".to_string(),
            message: error_message(error),
            attachments: Vec::new(),
        });
    }
    let mut specs = Vec::new();
    collect_specs(&report.suites, "", &mut specs);
    for (title, spec) in specs {
        for test in &spec.tests {
            if test.status != "unexpected" {
                continue;
            }
            let Some(result) = test.results.iter().rev().find(|r| r.status != "passed" && r.status != "skipped") else {
                continue;
            };
            let mut messages: Vec<String> = result.errors.iter().map(error_message).collect();
            if messages.is_empty() {
                messages.extend(result.error.as_ref().map(error_message));
            }
            failures.push(TestFailure {
                title: title.clone(),
                message: messages.join("\n"),
                attachments: result
                    .attachments
                    .iter()
                    .map(|a| Attachment {
                        name: a.name.clone(),
                        content_type: a.content_type.clone(),
                        path: a.path.clone(),
                    })
                    .collect(),
            });
        }
    }

    if report.stats.flaky > 0 {
        warn!("{} test(s) passed only on retry", report.stats.flaky);
    }
    if failures.is_empty() && report.stats.unexpected == 0 && report.stats.expected + report.stats.flaky > 0 {
        return Ok(RunReport::passed(duration));
    }
    if failures.is_empty() {
        // Nothing failed but nothing passed either (skipped or fixme)
        failures.push(TestFailure {
            title: "<run>".to_string(),
            message: format!(
                "no test passed ({} skipped, {} unexpected)",
                report.stats.skipped, report.stats.unexpected
            ),
            attachments: Vec::new(),
        });
    }
    Ok(RunReport::failed(failures, duration))
}

fn error_message(error: &JsonError) -> String {
    strip_ansi(
        error
            .message
            .as_deref()
            .or(error.stack.as_deref())
            .unwrap_or("unknown error"),
    )
}

fn collect_specs<'a>(suites: &'a [JsonSuite], prefix: &str, out: &mut Vec<(String, &'a JsonSpec)>) {
    for suite in suites {
        let path = if prefix.is_empty() {
            suite.title.clone()
        } else {
            format!("{} > {}", prefix, suite.title)
        };
        for spec in &suite.specs {
            out.push((format!("{} > {}", path, spec.title), spec));
        }
        collect_specs(&suite.suites, &path, out);
    }
}
