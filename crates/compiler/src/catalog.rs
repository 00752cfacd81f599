//! Selector catalog and knowledge-base suggestions
//!
//! Both are external, read-only inputs. They are loaded once, wrapped in an
//! `Arc`, and shared by every journey compiled in the same run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{CompileError, CompileResult};
use crate::selectors::LocatorStrategy;

/// Where a catalog entry applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CatalogScope {
    Universal,
    Framework(String),
    App(String),
}

impl CatalogScope {
    /// Precedence rank; lower is preferred
    fn rank(&self) -> u8 {
        match self {
            CatalogScope::App(_) => 0,
            CatalogScope::Framework(_) => 1,
            CatalogScope::Universal => 2,
        }
    }

    /// Confidence multiplier applied when an entry is used
    pub fn weight(&self) -> f64 {
        match self {
            CatalogScope::App(_) => 1.0,
            CatalogScope::Framework(_) => 0.9,
            CatalogScope::Universal => 0.8,
        }
    }

    fn applies(&self, ctx: &ScopeContext<'_>) -> bool {
        match self {
            CatalogScope::Universal => true,
            CatalogScope::Framework(name) => ctx.framework.map_or(false, |f| f.eq_ignore_ascii_case(name)),
            CatalogScope::App(name) => ctx.app.map_or(false, |a| a.eq_ignore_ascii_case(name)),
        }
    }
}

impl fmt::Display for CatalogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogScope::Universal => f.write_str("universal"),
            CatalogScope::Framework(name) => write!(f, "framework:{}", name),
            CatalogScope::App(name) => write!(f, "app:{}", name),
        }
    }
}

impl TryFrom<String> for CatalogScope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "universal" {
            return Ok(CatalogScope::Universal);
        }
        match value.split_once(':') {
            Some(("framework", name)) if !name.is_empty() => Ok(CatalogScope::Framework(name.to_string())),
            Some(("app", name)) if !name.is_empty() => Ok(CatalogScope::App(name.to_string())),
            _ => Err(format!(
                "invalid catalog scope '{}': expected universal, framework:<name> or app:<name>",
                value
            )),
        }
    }
}

impl From<CatalogScope> for String {
    fn from(scope: CatalogScope) -> Self {
        scope.to_string()
    }
}

/// The journey-side half of a scope lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeContext<'a> {
    pub app: Option<&'a str>,
    pub framework: Option<&'a str>,
}

/// A previously observed locator for an element description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub scope: CatalogScope,
    pub description: String,
    pub strategy: LocatorStrategy,
    pub confidence: f64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    entries: Vec<CatalogEntry>,
}

fn default_version() -> u32 {
    1
}

/// Read-only selector catalog
#[derive(Debug, Clone, Default)]
pub struct SelectorCatalog {
    entries: Vec<CatalogEntry>,
}

impl SelectorCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Parse a catalog from JSON
    pub fn from_json(json: &str) -> CompileResult<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        if file.version != 1 {
            return Err(CompileError::Catalog(format!(
                "unsupported catalog version {}",
                file.version
            )));
        }
        for entry in &file.entries {
            if !(0.0..=1.0).contains(&entry.confidence) {
                return Err(CompileError::Catalog(format!(
                    "entry '{}' has confidence {} outside [0, 1]",
                    entry.description, entry.confidence
                )));
            }
        }
        Ok(Self {
            entries: file.entries,
        })
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;
        info!("Loaded {} selector catalog entries from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries matching `query` in scopes that apply, best first.
    ///
    /// Order: app > framework > universal, then confidence, then recency,
    /// then description. The order is total so lookups are deterministic.
    pub fn lookup(&self, query: &str, ctx: &ScopeContext<'_>, min_confidence: f64) -> Vec<&CatalogEntry> {
        let wanted = normalize_description(query);
        if wanted.is_empty() {
            return Vec::new();
        }
        let wanted_bare = strip_role_nouns(&wanted);

        let mut hits: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| e.scope.applies(ctx) && e.confidence >= min_confidence)
            .filter(|e| {
                let have = normalize_description(&e.description);
                have == wanted || (!wanted_bare.is_empty() && strip_role_nouns(&have) == wanted_bare)
            })
            .collect();
        hits.sort_by(|a, b| precedence(a, b));
        debug!("Catalog lookup '{}' -> {} hit(s)", query, hits.len());
        hits
    }

    /// Toast/notification entries for scopes that apply, best first
    pub fn toast_entries(&self, ctx: &ScopeContext<'_>, min_confidence: f64) -> Vec<&CatalogEntry> {
        let mut hits: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| e.scope.applies(ctx) && e.confidence >= min_confidence)
            .filter(|e| {
                let d = normalize_description(&e.description);
                d.split(' ').any(|w| w == "toast" || w == "notification" || w == "snackbar")
            })
            .collect();
        hits.sort_by(|a, b| precedence(a, b));
        hits
    }
}

fn precedence(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    a.scope
        .rank()
        .cmp(&b.scope.rank())
        .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| b.last_used.cmp(&a.last_used))
        .then_with(|| a.description.cmp(&b.description))
}

/// An externally learned candidate locator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub description: String,
    pub strategy: LocatorStrategy,
    pub confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeFile {
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

/// Optional knowledge base of learned suggestions; never ground truth
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    suggestions: Vec<Suggestion>,
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_suggestions(suggestions: Vec<Suggestion>) -> Self {
        Self { suggestions }
    }

    pub fn from_json(json: &str) -> CompileResult<Self> {
        let file: KnowledgeFile = serde_json::from_str(json)?;
        Ok(Self {
            suggestions: file.suggestions,
        })
    }

    pub fn load(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let kb = Self::from_json(&content)?;
        info!("Loaded {} knowledge-base suggestions from {}", kb.suggestions.len(), path.display());
        Ok(kb)
    }

    /// Suggestions for `query` at or above `min_confidence`, best first
    pub fn lookup(&self, query: &str, min_confidence: f64) -> Vec<&Suggestion> {
        let wanted = normalize_description(query);
        if wanted.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Suggestion> = self
            .suggestions
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .filter(|s| normalize_description(&s.description) == wanted)
            .collect();
        hits.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.description.cmp(&b.description))
        });
        hits
    }
}

/// Lower-case, strip punctuation, collapse whitespace
pub fn normalize_description(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const ROLE_NOUNS: &[&str] = &[
    "button", "link", "tab", "checkbox", "field", "input", "dropdown", "select", "option",
    "heading", "icon", "menu", "item", "toggle", "switch", "radio",
];

fn strip_role_nouns(normalized: &str) -> String {
    let mut words: Vec<&str> = normalized.split(' ').collect();
    while let Some(last) = words.last() {
        if ROLE_NOUNS.contains(last) && words.len() > 1 {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
  "version": 1,
  "entries": [
    {
      "scope": "universal",
      "description": "Save button",
      "strategy": { "kind": "text", "text": "Save" },
      "confidence": 0.9,
      "last_used": "2026-01-01T00:00:00Z"
    },
    {
      "scope": "app:orders",
      "description": "save",
      "strategy": { "kind": "test_id", "id": "order-save" },
      "confidence": 0.7,
      "last_used": "2025-06-01T00:00:00Z"
    },
    {
      "scope": "framework:mui",
      "description": "Save button",
      "strategy": { "kind": "structural", "selector": ".MuiButton-root.save" },
      "confidence": 0.95,
      "last_used": "2026-02-01T00:00:00Z"
    },
    {
      "scope": "universal",
      "description": "Success toast",
      "strategy": { "kind": "test_id", "id": "toast-success" },
      "confidence": 0.8,
      "last_used": "2026-02-01T00:00:00Z"
    }
  ]
}"#;

    #[test]
    fn test_scope_precedence() {
        let catalog = SelectorCatalog::from_json(CATALOG).unwrap();
        let ctx = ScopeContext {
            app: Some("orders"),
            framework: Some("mui"),
        };
        let hits = catalog.lookup("Save", &ctx, 0.0);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].scope, CatalogScope::App("orders".to_string()));
        assert_eq!(hits[1].scope, CatalogScope::Framework("mui".to_string()));
        assert_eq!(hits[2].scope, CatalogScope::Universal);
    }

    #[test]
    fn test_scopes_that_do_not_apply_are_skipped() {
        let catalog = SelectorCatalog::from_json(CATALOG).unwrap();
        let hits = catalog.lookup("save button", &ScopeContext::default(), 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scope, CatalogScope::Universal);
    }

    #[test]
    fn test_min_confidence_filters() {
        let catalog = SelectorCatalog::from_json(CATALOG).unwrap();
        let ctx = ScopeContext {
            app: Some("orders"),
            framework: None,
        };
        let hits = catalog.lookup("save", &ctx, 0.8);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scope, CatalogScope::Universal);
    }

    #[test]
    fn test_toast_entries() {
        let catalog = SelectorCatalog::from_json(CATALOG).unwrap();
        let hits = catalog.toast_entries(&ScopeContext::default(), 0.0);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_bad_scope_is_rejected() {
        let json = r#"{"entries":[{"scope":"galaxy","description":"x","strategy":{"kind":"test_id","id":"x"},"confidence":0.5,"last_used":"2026-01-01T00:00:00Z"}]}"#;
        assert!(SelectorCatalog::from_json(json).is_err());
    }

    #[test]
    fn test_knowledge_base_threshold() {
        let kb = KnowledgeBase::from_json(
            r#"{"suggestions":[
                {"description":"Export","strategy":{"kind":"test_id","id":"export"},"confidence":0.4},
                {"description":"export","strategy":{"kind":"text","text":"Export CSV"},"confidence":0.8}
            ]}"#,
        )
        .unwrap();
        let hits = kb.lookup("Export", 0.6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].confidence, 0.8);
    }
}
