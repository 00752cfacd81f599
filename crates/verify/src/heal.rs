//! Heal planning and policy
//!
//! The planner proposes one tuning change per failure. The policy decides
//! whether the re-rendered files may replace the current ones.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use stepwright_compiler::codegen::{effective_strategy, ElementTuning, JOURNEY_NS, SHARED_NS};
use stepwright_compiler::managed::{self, Segment};
use stepwright_compiler::{PlannedFile, ResolvedElement, VerifyConfig};

use crate::classify::{Failure, FailureClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HealAction {
    /// Switch to another resolved candidate
    SubstituteLocator { candidate: usize },
    /// Wait for the element to be visible before using it
    AddWait { timeout_ms: u64 },
    /// Raise an existing wait's timeout
    StrengthenWait { timeout_ms: u64 },
    /// Require an exact name match
    NarrowLocator,
}

impl HealAction {
    /// Apply to an element's tuning
    pub fn apply(&self, tuning: &mut ElementTuning) {
        match *self {
            HealAction::SubstituteLocator { candidate } => {
                tuning.candidate = candidate;
                tuning.exact = false;
            }
            HealAction::AddWait { timeout_ms } | HealAction::StrengthenWait { timeout_ms } => {
                tuning.wait_ms = Some(timeout_ms);
            }
            HealAction::NarrowLocator => tuning.exact = true,
        }
    }
}

impl fmt::Display for HealAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealAction::SubstituteLocator { candidate } => write!(f, "substitute_locator(candidate {})", candidate),
            HealAction::AddWait { timeout_ms } => write!(f, "add_wait({}ms)", timeout_ms),
            HealAction::StrengthenWait { timeout_ms } => write!(f, "strengthen_wait({}ms)", timeout_ms),
            HealAction::NarrowLocator => f.write_str("narrow_locator(exact)"),
        }
    }
}

/// Picks the next permissible heal for a failure
#[derive(Debug, Clone)]
pub struct HealPlanner {
    initial_wait_ms: u64,
    max_wait_ms: u64,
}

impl HealPlanner {
    pub fn new(config: &VerifyConfig) -> Self {
        Self {
            initial_wait_ms: config.initial_wait_ms,
            max_wait_ms: config.max_wait_ms,
        }
    }

    pub fn propose(&self, failure: &Failure, element: &ResolvedElement, tuning: &ElementTuning) -> Option<HealAction> {
        let next_candidate =
            (tuning.candidate + 1 < element.candidate_count()).then(|| HealAction::SubstituteLocator {
                candidate: tuning.candidate + 1,
            });
        let add_wait = tuning.wait_ms.is_none().then(|| HealAction::AddWait {
            timeout_ms: self.initial_wait_ms,
        });

        match failure.class {
            FailureClass::SelectorNotFound => next_candidate.or(add_wait),
            FailureClass::TimingRace => add_wait.or_else(|| {
                let current = tuning.wait_ms?;
                (current < self.max_wait_ms).then(|| HealAction::StrengthenWait {
                    timeout_ms: current.saturating_mul(2).min(self.max_wait_ms),
                })
            }),
            FailureClass::StrictModeAmbiguity => {
                let narrowable = !tuning.exact
                    && effective_strategy(element, tuning)
                        .map(|s| s.with_exact().is_some())
                        .unwrap_or(false);
                if narrowable {
                    Some(HealAction::NarrowLocator)
                } else {
                    next_candidate
                }
            }
            FailureClass::Unclassifiable => None,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// An `expect(` line was added, removed or changed
    AssertionChanged { before: usize, after: usize },
    /// The header region, which carries the acceptance criteria, changed
    HeaderChanged,
    /// A fixed-time delay appeared
    UnconditionalDelay(String),
    /// An action was forced past actionability checks
    ForcedAction(String),
    /// Step regions were added or removed
    StepSetChanged,
    /// A generated file could not be read back
    Malformed(String),
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::AssertionChanged { before, after } => {
                write!(f, "assertions changed ({} before, {} after)", before, after)
            }
            PolicyViolation::HeaderChanged => f.write_str("acceptance criteria header changed"),
            PolicyViolation::UnconditionalDelay(path) => write!(f, "waitForTimeout in {}", path),
            PolicyViolation::ForcedAction(path) => write!(f, "force: true in {}", path),
            PolicyViolation::StepSetChanged => f.write_str("step regions changed"),
            PolicyViolation::Malformed(msg) => write!(f, "malformed output: {}", msg),
        }
    }
}

/// Deny-list checks on re-rendered output
#[derive(Debug, Clone, Copy, Default)]
pub struct HealPolicy;

impl HealPolicy {
    /// Compare a journey's files before and after a heal. The first file of
    /// each list is the test file.
    pub fn validate(&self, before: &[PlannedFile], after: &[PlannedFile]) -> Result<(), PolicyViolation> {
        for file in after {
            let path = file.path.display().to_string();
            if file.content.contains("waitForTimeout") {
                return Err(PolicyViolation::UnconditionalDelay(path));
            }
            if file.content.contains("force: true") {
                return Err(PolicyViolation::ForcedAction(path));
            }
        }

        let (Some(old), Some(new)) = (before.first(), after.first()) else {
            return Err(PolicyViolation::Malformed("missing test file".to_string()));
        };

        let old_asserts = assertion_lines(&old.content);
        let new_asserts = assertion_lines(&new.content);
        if old_asserts != new_asserts {
            return Err(PolicyViolation::AssertionChanged {
                before: old_asserts.len(),
                after: new_asserts.len(),
            });
        }

        let old_regions = regions(&old.content)?;
        let new_regions = regions(&new.content)?;
        let step_keys = |r: &[(String, String)]| -> BTreeSet<String> {
            r.iter()
                .filter(|(k, _)| k.starts_with("step-"))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if step_keys(&old_regions) != step_keys(&new_regions) {
            return Err(PolicyViolation::StepSetChanged);
        }
        let header = |r: &[(String, String)]| r.iter().find(|(k, _)| k == "header").map(|(_, b)| b.clone());
        if header(&old_regions) != header(&new_regions) {
            return Err(PolicyViolation::HeaderChanged);
        }
        Ok(())
    }
}

/// Assertion lines with the module namespace folded, so demoting a shared
/// element into the journey module is not an assertion change
fn assertion_lines(content: &str) -> Vec<String> {
    let shared = format!("{}.", SHARED_NS);
    let journey = format!("{}.", JOURNEY_NS);
    content
        .lines()
        .filter(|l| l.contains("expect("))
        .map(|l| l.trim().replace(&shared, &journey))
        .collect()
}

fn regions(content: &str) -> Result<Vec<(String, String)>, PolicyViolation> {
    let segments = managed::parse(content).map_err(PolicyViolation::Malformed)?;
    Ok(segments
        .into_iter()
        .filter_map(|s| match s {
            Segment::Region(r) => Some((r.key, r.body)),
            Segment::Text(_) => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use stepwright_compiler::ir::AriaRole;
    use stepwright_compiler::selectors::{ElementKind, LocatorSpec, Provenance};
    use stepwright_compiler::LocatorStrategy;

    fn spec(strategy: LocatorStrategy, tier: u8) -> LocatorSpec {
        LocatorSpec {
            strategy,
            confidence: 0.9,
            provenance: Provenance::PatternInferred,
            tier,
        }
    }

    fn element(alternates: usize) -> ResolvedElement {
        let primary = spec(
            LocatorStrategy::Role {
                role: AriaRole::Button,
                name: Some("Save".to_string()),
                exact: false,
            },
            2,
        );
        let alternates = (0..alternates)
            .map(|i| {
                spec(
                    LocatorStrategy::Text {
                        text: format!("Save {}", i),
                        exact: false,
                    },
                    6,
                )
            })
            .collect();
        ResolvedElement {
            key: "button:save".to_string(),
            description: "Save button".to_string(),
            kind: ElementKind::Standard,
            primary,
            alternates,
            debt: None,
        }
    }

    fn failure(class: FailureClass) -> Failure {
        Failure {
            class,
            element: Some("button:save".to_string()),
            message: String::new(),
            evidence: Default::default(),
        }
    }

    fn planner() -> HealPlanner {
        HealPlanner::new(&VerifyConfig::default())
    }

    #[test]
    fn test_not_found_substitutes_then_waits() {
        let el = element(1);
        let mut tuning = ElementTuning::default();
        let first = planner().propose(&failure(FailureClass::SelectorNotFound), &el, &tuning).unwrap();
        assert_eq!(first, HealAction::SubstituteLocator { candidate: 1 });
        first.apply(&mut tuning);
        let second = planner().propose(&failure(FailureClass::SelectorNotFound), &el, &tuning).unwrap();
        assert_eq!(second, HealAction::AddWait { timeout_ms: 5000 });
        second.apply(&mut tuning);
        assert!(planner().propose(&failure(FailureClass::SelectorNotFound), &el, &tuning).is_none());
    }

    #[test]
    fn test_timing_waits_are_capped() {
        let el = element(0);
        let mut tuning = ElementTuning::default();
        let mut actions = Vec::new();
        while let Some(action) = planner().propose(&failure(FailureClass::TimingRace), &el, &tuning) {
            action.apply(&mut tuning);
            actions.push(action);
        }
        assert_eq!(
            actions,
            vec![
                HealAction::AddWait { timeout_ms: 5000 },
                HealAction::StrengthenWait { timeout_ms: 10000 },
                HealAction::StrengthenWait { timeout_ms: 20000 },
                HealAction::StrengthenWait { timeout_ms: 30000 },
            ]
        );
    }

    #[test]
    fn test_ambiguity_narrows_first() {
        let el = element(1);
        let mut tuning = ElementTuning::default();
        let first = planner().propose(&failure(FailureClass::StrictModeAmbiguity), &el, &tuning).unwrap();
        assert_eq!(first, HealAction::NarrowLocator);
        first.apply(&mut tuning);
        assert_eq!(
            planner().propose(&failure(FailureClass::StrictModeAmbiguity), &el, &tuning),
            Some(HealAction::SubstituteLocator { candidate: 1 })
        );
        assert!(planner().propose(&failure(FailureClass::Unclassifiable), &el, &tuning).is_none());
    }

    fn file(content: &str) -> PlannedFile {
        PlannedFile {
            path: PathBuf::from("tests/smoke/a.spec.ts"),
            content: content.to_string(),
            changed: true,
        }
    }

    fn test_file(step: &str) -> String {
        use stepwright_compiler::managed::{Region, RenderedFile};
        RenderedFile::new(vec![
            Region::new("header", "test.describe('J', () => {"),
            Region::new("step-1", step),
            Region::new("footer", "});"),
        ])
        .render_fresh()
    }

    #[test]
    fn test_policy_accepts_wait_before_assertion() {
        let before = test_file("    await expect(shared.saveButton(page)).toBeVisible();");
        let after = test_file(
            "    await journey.waitForSaveButton(page);\n    await expect(journey.saveButton(page)).toBeVisible();",
        );
        assert!(HealPolicy.validate(&[file(&before)], &[file(&after)]).is_ok());
    }

    #[test]
    fn test_policy_rejects_weakened_assertion() {
        let before = test_file("    await expect(journey.total(page)).toContainText('42');");
        let after = test_file("    await journey.total(page);");
        assert!(matches!(
            HealPolicy.validate(&[file(&before)], &[file(&after)]),
            Err(PolicyViolation::AssertionChanged { .. })
        ));
    }

    #[test]
    fn test_policy_rejects_delays_and_force() {
        let before = test_file("    await journey.clickSave(page);");
        let delayed = test_file("    await page.waitForTimeout(1000);\n    await journey.clickSave(page);");
        assert!(matches!(
            HealPolicy.validate(&[file(&before)], &[file(&delayed)]),
            Err(PolicyViolation::UnconditionalDelay(_))
        ));
        let forced = test_file("    await journey.saveButton(page).click({ force: true });");
        assert!(matches!(
            HealPolicy.validate(&[file(&before)], &[file(&forced)]),
            Err(PolicyViolation::ForcedAction(_))
        ));
    }
}
