//! Step normalization
//!
//! The glossary rewrites only the leading verb phrase of a step. Synonyms are
//! applied when they cannot move the step into a different pattern family;
//! `select` is the one verb whose meaning depends on the rest of the step.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::GlossaryConfig;

static SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:the\s+user|user|i|we|they)\s+").expect("subject regex"));

static FILLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:should|can|then|and|now|will|must)\s+").expect("filler regex"));

static LEADING_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]+)").expect("leading word regex"));

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'|“[^”]*”"#).expect("quoted text regex"));

/// Verbs recognised for de-inflection
const VERBS: &[&str] = &[
    "assert", "browse", "check", "choose", "clear", "click", "confirm", "enter", "ensure",
    "expect", "fill", "go", "hit", "input", "key", "make", "navigate", "open", "pick", "press",
    "push", "see", "select", "set", "submit", "tap", "type", "uncheck", "verify", "visit", "wait",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Always,
    /// Only when a URL or path follows
    PathFollows,
    /// Only when no URL or path follows
    NoPathFollows,
}

#[derive(Debug, Clone)]
struct Rule {
    synonym: String,
    canonical: String,
    gate: Gate,
}

/// A single rewrite applied to a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

/// Result of normalizing one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Normalized {
    pub text: String,
    pub substitutions: Vec<Substitution>,
    /// `select` was kept because the step picks from a list
    pub preserved_select: bool,
}

/// Canonical-term table, built once per run and shared read-only
#[derive(Debug, Clone)]
pub struct Glossary {
    rules: Vec<Rule>,
    list_context: Vec<String>,
}

impl Default for Glossary {
    fn default() -> Self {
        Self::new(&GlossaryConfig::default())
    }
}

impl Glossary {
    /// Built-in synonyms plus those from configuration
    pub fn new(config: &GlossaryConfig) -> Self {
        let mut rules = Vec::new();
        let mut add = |canonical: &str, synonyms: &[&str], gate: Gate| {
            for synonym in synonyms {
                rules.push(Rule {
                    synonym: synonym.to_string(),
                    canonical: canonical.to_string(),
                    gate,
                });
            }
        };
        add("click", &["tap", "hit", "press", "push"], Gate::Always);
        add("navigate to", &["go to", "visit", "browse to"], Gate::Always);
        add("navigate to", &["open"], Gate::PathFollows);
        add("click", &["open"], Gate::NoPathFollows);
        add("enter", &["type", "input", "key in"], Gate::Always);
        add("verify", &["ensure", "make sure", "confirm that", "assert", "check that", "expect"], Gate::Always);
        add("see", &["should see", "can see"], Gate::Always);
        add("select", &["choose", "pick"], Gate::Always);

        for (canonical, synonyms) in &config.synonyms {
            for synonym in synonyms {
                rules.push(Rule {
                    synonym: synonym.to_lowercase(),
                    canonical: canonical.to_lowercase(),
                    gate: Gate::Always,
                });
            }
        }

        // Longest phrase first; the sort is stable so declaration order breaks ties
        rules.sort_by(|a, b| b.synonym.len().cmp(&a.synonym.len()));

        Self {
            rules,
            list_context: config
                .list_context_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }

    /// Normalize one step's prose
    pub fn normalize(&self, text: &str) -> Normalized {
        let mut substitutions = Vec::new();
        let mut current = text.trim().to_string();

        if let Some(m) = SUBJECT.find(&current) {
            current = current[m.end()..].to_string();
        }
        while let Some(m) = FILLER.find(&current) {
            current = current[m.end()..].to_string();
        }

        if let Some(verb) = LEADING_WORD.captures(&current).and_then(|c| c.get(1)) {
            let word = verb.as_str().to_lowercase();
            if let Some(base) = base_form(&word) {
                if base != word {
                    substitutions.push(Substitution {
                        from: word.clone(),
                        to: base.to_string(),
                    });
                }
                current = format!("{}{}", base, &current[verb.end()..]);
            }
        }

        for rule in &self.rules {
            if !starts_with_phrase(&current, &rule.synonym) {
                continue;
            }
            let rest = &current[rule.synonym.len()..];
            let path_follows = next_token_is_path(rest);
            let passes = match rule.gate {
                Gate::Always => true,
                Gate::PathFollows => path_follows,
                Gate::NoPathFollows => !path_follows,
            };
            if !passes {
                continue;
            }
            if rule.synonym != rule.canonical {
                substitutions.push(Substitution {
                    from: rule.synonym.clone(),
                    to: rule.canonical.clone(),
                });
                current = format!("{}{}", rule.canonical, rest);
            }
            break;
        }

        let mut preserved_select = false;
        if starts_with_phrase(&current, "select") {
            if self.has_list_context(&current) {
                preserved_select = true;
            } else {
                substitutions.push(Substitution {
                    from: "select".to_string(),
                    to: "click".to_string(),
                });
                current = format!("click{}", &current["select".len()..]);
            }
        }

        if !substitutions.is_empty() {
            debug!("Normalized '{}' -> '{}'", text, current);
        }
        Normalized {
            text: current,
            substitutions,
            preserved_select,
        }
    }

    /// Whether any list-context word appears outside quoted text
    fn has_list_context(&self, text: &str) -> bool {
        let unquoted = QUOTED.replace_all(text, " ");
        unquoted
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .any(|w| {
                let w = w.to_lowercase();
                self.list_context.iter().any(|c| *c == w)
            })
    }
}

fn base_form(word: &str) -> Option<&'static str> {
    let candidates = [
        Some(word.to_string()),
        word.strip_suffix("ies").map(|s| format!("{}y", s)),
        word.strip_suffix("es").map(str::to_string),
        word.strip_suffix('s').map(str::to_string),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|c| VERBS.iter().find(|v| **v == c).copied())
}

/// Case-insensitive prefix match ending at a word boundary
fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    text.get(..phrase.len())
        .map_or(false, |p| p.eq_ignore_ascii_case(phrase))
        && text[phrase.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric())
}

fn next_token_is_path(rest: &str) -> bool {
    let token = rest
        .trim_start()
        .trim_start_matches(|c| c == '"' || c == '\'' || c == '`' || c == '“');
    let token = token.strip_prefix("the ").unwrap_or(token);
    token.starts_with('/') || token.starts_with("http://") || token.starts_with("https://")
}
