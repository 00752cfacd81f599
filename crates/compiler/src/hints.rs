//! Machine hint extraction
//!
//! A hint is a bracketed group of `key=value` pairs embedded in a step, e.g.
//! `(role=button, name="Save")` or `[testid=save-btn]`. Hints are removed from
//! the prose before matching and carried as structured data instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ir::AriaRole;
use crate::selectors::LocatorStrategy;

static GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(([^()]*)\)|\[([^\[\]]*)\]").expect("hint group regex")
});

static PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z][A-Za-z-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^,\s]+))"#)
        .expect("hint pair regex")
});

const KEYS: &[&str] = &[
    "role", "name", "label", "testid", "testId", "data-testid", "text", "css", "exact",
];

/// Explicit locator supplied by the journey author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AriaRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
}

impl MachineHint {
    /// The locator this hint denotes, used verbatim
    pub fn strategy(&self) -> LocatorStrategy {
        let exact = self.exact.unwrap_or(false);
        if let Some(role) = self.role {
            return LocatorStrategy::Role {
                role,
                name: self.name.clone(),
                exact,
            };
        }
        if let Some(id) = &self.test_id {
            return LocatorStrategy::TestId { id: id.clone() };
        }
        if let Some(label) = &self.label {
            return LocatorStrategy::Label {
                text: label.clone(),
                exact,
            };
        }
        if let Some(text) = &self.text {
            return LocatorStrategy::Text {
                text: text.clone(),
                exact,
            };
        }
        LocatorStrategy::Structural {
            selector: self.css.clone().unwrap_or_default(),
        }
    }

    /// Stable textual form, used for element identity
    pub fn canonical(&self) -> String {
        self.strategy().canonical()
    }
}

/// Prose with hints removed, plus the hint if one was present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub prose: String,
    pub hint: Option<MachineHint>,
}

/// Split a raw step into prose and an optional machine hint.
///
/// Groups whose first key is not a hint key stay in the prose untouched.
pub fn extract(raw: &str) -> Result<Extracted, String> {
    let mut hint: Option<MachineHint> = None;
    let mut prose = String::with_capacity(raw.len());
    let mut last = 0;

    for caps in GROUP.captures_iter(raw) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");

        if !is_hint_group(inner) {
            continue;
        }
        if hint.is_some() {
            return Err("a step may carry only one machine hint".to_string());
        }
        hint = Some(parse_group(inner)?);
        prose.push_str(&raw[last..whole.start()]);
        last = whole.end();
    }
    prose.push_str(&raw[last..]);

    Ok(Extracted {
        prose: tidy(&prose),
        hint,
    })
}

fn is_hint_group(inner: &str) -> bool {
    PAIR.captures(inner.trim_start())
        .filter(|c| c.get(0).map(|m| m.start()) == Some(0))
        .and_then(|c| c.get(1))
        .map(|k| KEYS.contains(&k.as_str()))
        .unwrap_or(false)
}

fn parse_group(inner: &str) -> Result<MachineHint, String> {
    let mut hint = MachineHint::default();

    for caps in PAIR.captures_iter(inner) {
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        if value.is_empty() {
            return Err(format!("machine hint key '{}' has an empty value", key));
        }

        match key {
            "role" => {
                let role = AriaRole::parse(&value)
                    .ok_or_else(|| format!("machine hint has unknown role '{}'", value))?;
                hint.role = Some(role);
            }
            "name" => hint.name = Some(value),
            "label" => hint.label = Some(value),
            "testid" | "testId" | "data-testid" => hint.test_id = Some(value),
            "text" => hint.text = Some(value),
            "css" => hint.css = Some(value),
            "exact" => {
                let exact = match value.as_str() {
                    "true" => true,
                    "false" => false,
                    other => return Err(format!("machine hint 'exact' must be true or false, got '{}'", other)),
                };
                hint.exact = Some(exact);
            }
            other => return Err(format!("unknown machine hint key '{}'", other)),
        }
    }

    if hint.name.is_some() && hint.role.is_none() {
        return Err("machine hint 'name' requires 'role'".to_string());
    }
    let has_target = hint.role.is_some()
        || hint.label.is_some()
        || hint.test_id.is_some()
        || hint.text.is_some()
        || hint.css.is_some();
    if !has_target {
        return Err("machine hint names no locator (role, label, testid, text or css)".to_string());
    }

    Ok(hint)
}

fn tidy(prose: &str) -> String {
    let collapsed = prose.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .replace(" .", ".")
        .replace(" ,", ",")
        .replace(" !", "!")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_role_hint() {
        let out = extract(r#"Click the confirm element (role=button, name="Confirm order")."#).unwrap();
        assert_eq!(out.prose, "Click the confirm element.");
        let hint = out.hint.unwrap();
        assert_eq!(hint.role, Some(AriaRole::Button));
        assert_eq!(hint.name.as_deref(), Some("Confirm order"));
    }

    #[test]
    fn test_square_brackets_and_testid() {
        let out = extract("Click the export control [testid=export-btn]").unwrap();
        assert_eq!(out.prose, "Click the export control");
        assert_eq!(out.hint.unwrap().test_id.as_deref(), Some("export-btn"));
    }

    #[test]
    fn test_plain_parentheses_stay_in_prose() {
        let out = extract("Click the Save button (top right)").unwrap();
        assert_eq!(out.prose, "Click the Save button (top right)");
        assert!(out.hint.is_none());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = extract("Click it (role=widget)").unwrap_err();
        assert!(err.contains("unknown role"));
    }

    #[test]
    fn test_name_without_role_is_rejected() {
        assert!(extract("Click it (name=Save)").is_err());
    }

    #[test]
    fn test_two_hints_are_rejected() {
        assert!(extract("Click (testid=a) then (testid=b)").is_err());
    }
}
