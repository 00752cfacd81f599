//! Selector resolution
//!
//! Turns a `LocatorRequest` into a concrete locator by walking a fixed tier
//! order. Every tier that yields a candidate is kept: the first becomes the
//! primary locator and the rest are alternates available to the heal loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{KnowledgeBase, ScopeContext, SelectorCatalog};
use crate::codegen::ts::quote;
use crate::config::ResolverConfig;
use crate::ir::{AriaRole, LocatorRequest, ToastType};

// ============================================================================
// Locator strategies
// ============================================================================

/// How a locator finds its element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocatorStrategy {
    Role {
        role: AriaRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        exact: bool,
    },
    Label {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    TestId {
        id: String,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Structural {
        selector: String,
    },
}

impl LocatorStrategy {
    /// Playwright locator call without the receiver, e.g.
    /// `getByRole('button', { name: 'Save' })`.
    ///
    /// This is also the form Playwright prints in error messages, which is
    /// what failure classification matches against.
    pub fn expression(&self) -> String {
        fn exact_opt(exact: bool) -> &'static str {
            if exact {
                ", { exact: true }"
            } else {
                ""
            }
        }
        match self {
            LocatorStrategy::Role { role, name, exact } => match name {
                Some(name) if *exact => format!(
                    "getByRole({}, {{ name: {}, exact: true }})",
                    quote(role.as_str()),
                    quote(name)
                ),
                Some(name) => format!("getByRole({}, {{ name: {} }})", quote(role.as_str()), quote(name)),
                None => format!("getByRole({})", quote(role.as_str())),
            },
            LocatorStrategy::Label { text, exact } => {
                format!("getByLabel({}{})", quote(text), exact_opt(*exact))
            }
            LocatorStrategy::TestId { id } => format!("getByTestId({})", quote(id)),
            LocatorStrategy::Text { text, exact } => {
                format!("getByText({}{})", quote(text), exact_opt(*exact))
            }
            LocatorStrategy::Structural { selector } => format!("locator({})", quote(selector)),
        }
    }

    /// Stable textual identity, independent of rendering
    pub fn canonical(&self) -> String {
        match self {
            LocatorStrategy::Role { role, name, exact } => {
                let mut out = format!("role={}", role);
                if let Some(name) = name {
                    out.push_str(&format!(",name={}", name));
                }
                if *exact {
                    out.push_str(",exact");
                }
                out
            }
            LocatorStrategy::Label { text, exact } => {
                format!("label={}{}", text, if *exact { ",exact" } else { "" })
            }
            LocatorStrategy::TestId { id } => format!("testid={}", id),
            LocatorStrategy::Text { text, exact } => {
                format!("text={}{}", text, if *exact { ",exact" } else { "" })
            }
            LocatorStrategy::Structural { selector } => format!("css={}", selector),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LocatorStrategy::Role { .. } => "role",
            LocatorStrategy::Label { .. } => "label",
            LocatorStrategy::TestId { .. } => "test_id",
            LocatorStrategy::Text { .. } => "text",
            LocatorStrategy::Structural { .. } => "structural",
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, LocatorStrategy::Structural { .. })
    }

    pub fn is_exact(&self) -> bool {
        match self {
            LocatorStrategy::Role { exact, .. }
            | LocatorStrategy::Label { exact, .. }
            | LocatorStrategy::Text { exact, .. } => *exact,
            _ => false,
        }
    }

    /// The same locator with exact matching turned on, if that narrows it
    pub fn with_exact(&self) -> Option<LocatorStrategy> {
        match self {
            LocatorStrategy::Role {
                role,
                name: Some(name),
                exact: false,
            } => Some(LocatorStrategy::Role {
                role: *role,
                name: Some(name.clone()),
                exact: true,
            }),
            LocatorStrategy::Label { text, exact: false } => Some(LocatorStrategy::Label {
                text: text.clone(),
                exact: true,
            }),
            LocatorStrategy::Text { text, exact: false } => Some(LocatorStrategy::Text {
                text: text.clone(),
                exact: true,
            }),
            _ => None,
        }
    }

    /// Name or text the strategy matches on, case-folded
    pub fn match_text(&self) -> Option<String> {
        let raw = match self {
            LocatorStrategy::Role { name, .. } => name.as_deref(),
            LocatorStrategy::Label { text, .. } | LocatorStrategy::Text { text, .. } => Some(text.as_str()),
            LocatorStrategy::TestId { id } => Some(id.as_str()),
            LocatorStrategy::Structural { selector } => Some(selector.as_str()),
        };
        raw.map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
    }
}

/// Where a candidate locator came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Hint,
    PatternInferred,
    CatalogMatched { scope: String },
    KnowledgeBase,
}

/// A concrete locator with its tier and confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorSpec {
    pub strategy: LocatorStrategy,
    pub confidence: f64,
    pub provenance: Provenance,
    /// Resolution tier, 1 (hint) to 7 (structural)
    pub tier: u8,
}

/// A fragile structural locator that made it into generated code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorDebt {
    pub app: String,
    pub element: String,
    pub selector: String,
    pub remediation: String,
}

/// Debt record for `strategy` if it is structural
pub fn selector_debt(app: Option<&str>, element: &str, strategy: &LocatorStrategy) -> Option<SelectorDebt> {
    match strategy {
        LocatorStrategy::Structural { selector } => Some(SelectorDebt {
            app: app.unwrap_or("unscoped").to_string(),
            element: element.to_string(),
            selector: selector.clone(),
            remediation: format!(
                "add a data-testid or an accessible name to '{}' and record it in the selector catalog",
                element
            ),
        }),
        _ => None,
    }
}

// ============================================================================
// Resolution results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Standard,
    Toast { toast_type: ToastType },
}

/// A logical element with its chosen locator and fallbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedElement {
    /// Logical identity, stable across heals
    pub key: String,
    pub description: String,
    pub kind: ElementKind,
    pub primary: LocatorSpec,
    #[serde(default)]
    pub alternates: Vec<LocatorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt: Option<SelectorDebt>,
}

impl ResolvedElement {
    /// Candidate `0` is the primary, `n` is alternate `n - 1`
    pub fn candidate(&self, index: usize) -> Option<&LocatorSpec> {
        if index == 0 {
            Some(&self.primary)
        } else {
            self.alternates.get(index - 1)
        }
    }

    pub fn candidate_count(&self) -> usize {
        1 + self.alternates.len()
    }

    pub fn is_toast(&self) -> bool {
        matches!(self.kind, ElementKind::Toast { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedElement),
    Unresolved { reason: String },
}

// ============================================================================
// Resolver
// ============================================================================

/// Read-only resolver shared by all journeys in a run
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: Arc<SelectorCatalog>,
    knowledge: Arc<KnowledgeBase>,
    thresholds: ResolverConfig,
}

impl Resolver {
    pub fn new(catalog: Arc<SelectorCatalog>, knowledge: Arc<KnowledgeBase>, thresholds: ResolverConfig) -> Self {
        Self {
            catalog,
            knowledge,
            thresholds,
        }
    }

    /// Resolver with no external inputs
    pub fn standalone() -> Self {
        Self::new(
            Arc::new(SelectorCatalog::empty()),
            Arc::new(KnowledgeBase::empty()),
            ResolverConfig::default(),
        )
    }

    /// Resolve an element request against every tier
    pub fn resolve(&self, request: &LocatorRequest, ctx: &ScopeContext<'_>) -> Resolution {
        let mut candidates: Vec<LocatorSpec> = Vec::new();

        // Tier 1: machine hint, verbatim
        if let Some(hint) = &request.hint {
            candidates.push(LocatorSpec {
                strategy: hint.strategy(),
                confidence: 1.0,
                provenance: Provenance::Hint,
                tier: 1,
            });
        }

        // Tier 2: role + accessible name
        if let (Some(role), Some(name)) = (request.role, &request.name) {
            candidates.push(inferred(
                LocatorStrategy::Role {
                    role,
                    name: Some(name.clone()),
                    exact: false,
                },
                0.95,
                2,
            ));
        }

        // Tier 3: label
        if let Some(label) = &request.label {
            candidates.push(inferred(
                LocatorStrategy::Label {
                    text: label.clone(),
                    exact: false,
                },
                0.9,
                3,
            ));
        }

        // Tier 4: test id written in the step
        if let Some(id) = &request.test_id {
            candidates.push(inferred(LocatorStrategy::TestId { id: id.clone() }, 0.9, 4));
        }

        // Tier 5: catalog then knowledge base; structural entries wait for tier 7
        let mut structural = Vec::new();
        for query in catalog_queries(request) {
            for entry in self
                .catalog
                .lookup(&query, ctx, self.thresholds.min_catalog_confidence)
            {
                let spec = LocatorSpec {
                    strategy: entry.strategy.clone(),
                    confidence: entry.confidence * entry.scope.weight(),
                    provenance: Provenance::CatalogMatched {
                        scope: entry.scope.to_string(),
                    },
                    tier: 5,
                };
                if entry.strategy.is_structural() {
                    structural.push(LocatorSpec {
                        confidence: 0.3,
                        tier: 7,
                        ..spec
                    });
                } else {
                    candidates.push(spec);
                }
            }
            for suggestion in self
                .knowledge
                .lookup(&query, self.thresholds.min_suggestion_confidence)
            {
                if suggestion.strategy.is_structural() {
                    debug!("Ignoring structural knowledge-base suggestion for '{}'", query);
                    continue;
                }
                candidates.push(LocatorSpec {
                    strategy: suggestion.strategy.clone(),
                    confidence: suggestion.confidence,
                    provenance: Provenance::KnowledgeBase,
                    tier: 5,
                });
            }
        }

        // Tier 6: quoted visible text
        if let Some(text) = &request.text {
            candidates.push(inferred(
                LocatorStrategy::Text {
                    text: text.clone(),
                    exact: false,
                },
                0.7,
                6,
            ));
        }

        // Tier 7: structural, catalog only
        candidates.extend(structural);

        let mut candidates = dedup(candidates).into_iter();
        let Some(primary) = candidates.next() else {
            return Resolution::Unresolved {
                reason: format!(
                    "no locator for '{}': no hint, role name, label, test id, catalog entry or quoted text",
                    request.description
                ),
            };
        };
        let debt = selector_debt(ctx.app, &request.description, &primary.strategy);
        if let Some(debt) = &debt {
            warn!("Selector debt for '{}': {}", debt.element, debt.selector);
        }
        debug!(
            "Resolved '{}' at tier {} ({})",
            request.description,
            primary.tier,
            primary.strategy.expression()
        );

        Resolution::Resolved(ResolvedElement {
            key: request.element_key(),
            description: request.description.clone(),
            kind: ElementKind::Standard,
            primary,
            alternates: candidates.collect(),
            debt,
        })
    }

    /// Resolve a toast region. Toasts are a cross-application convention,
    /// so the standard live-region roles come before any catalog entry.
    pub fn resolve_toast(&self, toast_type: ToastType, ctx: &ScopeContext<'_>) -> ResolvedElement {
        let (first, second) = match toast_type {
            ToastType::Error | ToastType::Warning => (AriaRole::Alert, AriaRole::Status),
            ToastType::Success | ToastType::Info | ToastType::Any => (AriaRole::Status, AriaRole::Alert),
        };
        let role = |role, confidence| {
            inferred(
                LocatorStrategy::Role {
                    role,
                    name: None,
                    exact: false,
                },
                confidence,
                2,
            )
        };

        let mut candidates = vec![role(first, 0.95), role(second, 0.85)];
        for entry in self
            .catalog
            .toast_entries(ctx, self.thresholds.min_catalog_confidence)
        {
            let structural = entry.strategy.is_structural();
            candidates.push(LocatorSpec {
                strategy: entry.strategy.clone(),
                confidence: if structural { 0.3 } else { entry.confidence * entry.scope.weight() },
                provenance: Provenance::CatalogMatched {
                    scope: entry.scope.to_string(),
                },
                tier: if structural { 7 } else { 5 },
            });
        }

        let mut candidates = dedup(candidates).into_iter();
        let primary = candidates.next().unwrap_or_else(|| role(first, 0.95));
        let description = match toast_type {
            ToastType::Any => "toast".to_string(),
            t => format!("{} toast", t.as_str()),
        };
        ResolvedElement {
            key: format!("toast:{}", toast_type.as_str()),
            description,
            kind: ElementKind::Toast { toast_type },
            primary,
            alternates: candidates.collect(),
            debt: None,
        }
    }
}

fn inferred(strategy: LocatorStrategy, confidence: f64, tier: u8) -> LocatorSpec {
    LocatorSpec {
        strategy,
        confidence,
        provenance: Provenance::PatternInferred,
        tier,
    }
}

/// Descriptions worth looking up in the catalog, most specific first
fn catalog_queries(request: &LocatorRequest) -> Vec<String> {
    let mut seen = BTreeSet::new();
    [
        Some(&request.description),
        request.name.as_ref(),
        request.label.as_ref(),
        request.text.as_ref(),
    ]
    .into_iter()
    .flatten()
    .filter(|q| !q.trim().is_empty())
    .filter(|q| seen.insert(crate::catalog::normalize_description(q)))
    .cloned()
    .collect()
}

fn dedup(candidates: Vec<LocatorSpec>) -> Vec<LocatorSpec> {
    let mut seen = BTreeSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.strategy.expression()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, CatalogScope};
    use crate::hints::MachineHint;
    use chrono::{TimeZone, Utc};

    fn entry(scope: CatalogScope, description: &str, strategy: LocatorStrategy, confidence: f64) -> CatalogEntry {
        CatalogEntry {
            scope,
            description: description.to_string(),
            strategy,
            confidence,
            last_used: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn resolver(entries: Vec<CatalogEntry>) -> Resolver {
        Resolver::new(
            Arc::new(SelectorCatalog::from_entries(entries)),
            Arc::new(KnowledgeBase::empty()),
            ResolverConfig::default(),
        )
    }

    fn resolved(resolution: Resolution) -> ResolvedElement {
        match resolution {
            Resolution::Resolved(element) => element,
            Resolution::Unresolved { reason } => panic!("unresolved: {}", reason),
        }
    }

    #[test]
    fn test_expression_forms() {
        let role = LocatorStrategy::Role {
            role: AriaRole::Button,
            name: Some("Save".to_string()),
            exact: false,
        };
        assert_eq!(role.expression(), "getByRole('button', { name: 'Save' })");
        assert_eq!(
            role.with_exact().unwrap().expression(),
            "getByRole('button', { name: 'Save', exact: true })"
        );
        assert_eq!(
            LocatorStrategy::Label {
                text: "Email".to_string(),
                exact: true
            }
            .expression(),
            "getByLabel('Email', { exact: true })"
        );
        assert_eq!(
            LocatorStrategy::Structural {
                selector: "#grid > tr".to_string()
            }
            .expression(),
            "locator('#grid > tr')"
        );
        assert!(LocatorStrategy::TestId { id: "x".to_string() }.with_exact().is_none());
    }

    #[test]
    fn test_role_and_name_beats_text() {
        let request = LocatorRequest {
            description: "Save button".to_string(),
            role: Some(AriaRole::Button),
            name: Some("Save".to_string()),
            text: Some("Save".to_string()),
            ..Default::default()
        };
        let element = resolved(resolver(vec![]).resolve(&request, &ScopeContext::default()));
        assert_eq!(element.primary.tier, 2);
        assert_eq!(element.alternates.len(), 1);
        assert_eq!(element.alternates[0].tier, 6);
        assert!(element.debt.is_none());
    }

    #[test]
    fn test_hint_is_used_verbatim() {
        let request = LocatorRequest {
            description: "confirm element".to_string(),
            hint: Some(MachineHint {
                test_id: Some("confirm".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let element = resolved(resolver(vec![]).resolve(&request, &ScopeContext::default()));
        assert_eq!(element.primary.provenance, Provenance::Hint);
        assert_eq!(element.primary.strategy.expression(), "getByTestId('confirm')");
        assert_eq!(element.key, "hint:testid=confirm");
    }

    #[test]
    fn test_structural_tier_records_debt() {
        let request = LocatorRequest {
            description: "Legacy grid".to_string(),
            ..Default::default()
        };
        let r = resolver(vec![entry(
            CatalogScope::App("billing".to_string()),
            "legacy grid",
            LocatorStrategy::Structural {
                selector: "table.legacy".to_string(),
            },
            0.9,
        )]);
        let ctx = ScopeContext {
            app: Some("billing"),
            framework: None,
        };
        let element = resolved(r.resolve(&request, &ctx));
        assert_eq!(element.primary.tier, 7);
        assert_eq!(element.primary.confidence, 0.3);
        let debt = element.debt.unwrap();
        assert_eq!(debt.app, "billing");
        assert_eq!(debt.selector, "table.legacy");
    }

    #[test]
    fn test_catalog_confidence_is_scope_weighted() {
        let request = LocatorRequest {
            description: "Export".to_string(),
            text: Some("Export".to_string()),
            ..Default::default()
        };
        let r = resolver(vec![entry(
            CatalogScope::Universal,
            "export",
            LocatorStrategy::TestId { id: "export".to_string() },
            1.0,
        )]);
        let element = resolved(r.resolve(&request, &ScopeContext::default()));
        assert_eq!(element.primary.tier, 5);
        assert!((element.primary.confidence - 0.8).abs() < 1e-9);
        assert_eq!(element.alternates[0].tier, 6);
    }

    #[test]
    fn test_unresolved_without_anchor() {
        let request = LocatorRequest {
            description: "confirm element".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            resolver(vec![]).resolve(&request, &ScopeContext::default()),
            Resolution::Unresolved { .. }
        ));
    }

    #[test]
    fn test_toast_roles() {
        let r = resolver(vec![]);
        let success = r.resolve_toast(ToastType::Success, &ScopeContext::default());
        assert_eq!(success.primary.strategy.expression(), "getByRole('status')");
        assert_eq!(success.alternates[0].strategy.expression(), "getByRole('alert')");
        let error = r.resolve_toast(ToastType::Error, &ScopeContext::default());
        assert_eq!(error.primary.strategy.expression(), "getByRole('alert')");
        assert_eq!(error.key, "toast:error");
    }
}
