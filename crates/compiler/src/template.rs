//! Step template language
//!
//! A template is a sequence of tokens separated by whitespace:
//!
//! - `word`: literal, case-insensitive
//! - `(a|b c)`: one of several literal phrases
//! - `[tokens]`: optional tokens
//! - `{name}`: free text, quoted or not
//! - `{name:kind}`: typed capture, see [`CaptureKind`]
//!
//! Templates compile to one anchored regex. Trailing `.` or `!` is tolerated.

use regex::Regex;
use std::collections::BTreeMap;

use crate::error::{CompileError, CompileResult};

const ROLE_NOUNS: &str = "menu item|radio button|check box|text box|select box|checkbox|textbox|textarea|combobox|dropdown|listbox|heading|button|option|switch|toggle|dialog|picker|select|field|input|image|modal|radio|link|tab|row|cell";

const QUOTED: &str = r#""[^"]+"|'[^']+'|“[^”]+”"#;

/// Typed capture kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Any text, quoted or unquoted
    Free,
    /// A single token
    Word,
    /// URL or path starting with `/` or `http`
    Path,
    /// Quoted text only
    Quoted,
    /// A role noun such as `button` or `dropdown`
    Role,
    /// success, error, warning or info
    Toast,
    /// HTTP method
    Method,
    /// Three-digit status code
    Status,
}

impl CaptureKind {
    fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "" => CaptureKind::Free,
            "word" => CaptureKind::Word,
            "path" => CaptureKind::Path,
            "quoted" => CaptureKind::Quoted,
            "role" => CaptureKind::Role,
            "toast" => CaptureKind::Toast,
            "method" => CaptureKind::Method,
            "status" => CaptureKind::Status,
            _ => return None,
        };
        Some(kind)
    }

    fn pattern(&self) -> String {
        match self {
            CaptureKind::Free => format!("{}|.+?", QUOTED),
            CaptureKind::Word => format!(r#"{}|[^\s"'“”]+?"#, QUOTED),
            CaptureKind::Path => r#"["'“`]?(?:https?://|/)[^\s"'”`]*?["'”`]?"#.to_string(),
            CaptureKind::Quoted => QUOTED.to_string(),
            CaptureKind::Role => ROLE_NOUNS.to_string(),
            CaptureKind::Toast => "success|error|warning|info|confirmation|failure".to_string(),
            CaptureKind::Method => "GET|POST|PUT|PATCH|DELETE".to_string(),
            CaptureKind::Status => r"[1-5]\d\d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Alternation(Vec<String>),
    Optional(Vec<Token>),
    Capture { name: String, kind: CaptureKind },
}

/// A captured value with its quotes removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub value: String,
    pub quoted: bool,
}

/// Named captures of one match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(BTreeMap<String, Capture>);

impl Captures {
    pub fn get(&self, name: &str) -> Option<&Capture> {
        self.0.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|c| c.value.as_str())
    }

    pub fn is_quoted(&self, name: &str) -> bool {
        self.0.get(name).map(|c| c.quoted).unwrap_or(false)
    }
}

/// A compiled template
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl Template {
    pub fn compile(source: &str) -> CompileResult<Self> {
        let err = |message: String| CompileError::Template {
            template: source.to_string(),
            message,
        };
        let tokens = tokenize(source).map_err(err)?;
        let mut names = Vec::new();
        collect_names(&tokens, &mut names);
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != names.len() {
            return Err(err("capture names must be unique".to_string()));
        }

        let mut body = String::new();
        emit(&tokens, &mut body, false);
        let pattern = format!(r"(?i)^\s*{}\s*[.!]?\s*$", body);
        let regex = Regex::new(&pattern).map_err(|e| err(e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            regex,
            names,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match the whole of `text`, returning unquoted captures
    pub fn matches(&self, text: &str) -> Option<Captures> {
        let caps = self.regex.captures(text)?;
        let mut out = BTreeMap::new();
        for name in &self.names {
            if let Some(m) = caps.name(name) {
                out.insert(name.clone(), unquote(m.as_str()));
            }
        }
        Some(Captures(out))
    }
}

fn unquote(raw: &str) -> Capture {
    let trimmed = raw.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')] {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return Capture {
                value: inner.trim().to_string(),
                quoted: true,
            };
        }
    }
    Capture {
        value: trimmed.to_string(),
        quoted: false,
    }
}

fn collect_names(tokens: &[Token], names: &mut Vec<String>) {
    for token in tokens {
        match token {
            Token::Capture { name, .. } => names.push(name.clone()),
            Token::Optional(inner) => collect_names(inner, names),
            _ => {}
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let (tokens, end) = parse_seq(&chars, 0, None)?;
    if end != chars.len() {
        return Err(format!("unexpected '{}' at {}", chars[end], end));
    }
    Ok(tokens)
}

fn parse_seq(chars: &[char], mut i: usize, until: Option<char>) -> Result<(Vec<Token>, usize), String> {
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if Some(c) == until {
            return Ok((tokens, i + 1));
        }
        match c {
            '[' => {
                let (inner, next) = parse_seq(chars, i + 1, Some(']'))?;
                if inner.is_empty() {
                    return Err("empty optional group".to_string());
                }
                tokens.push(Token::Optional(inner));
                i = next;
            }
            '(' => {
                let close = find(chars, i, ')')?;
                let body: String = chars[i + 1..close].iter().collect();
                let alternatives: Vec<String> = body
                    .split('|')
                    .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
                    .collect();
                if alternatives.iter().any(|a| a.is_empty()) {
                    return Err("empty alternative".to_string());
                }
                tokens.push(Token::Alternation(alternatives));
                i = close + 1;
            }
            '{' => {
                let close = find(chars, i, '}')?;
                let body: String = chars[i + 1..close].iter().collect();
                let (name, kind) = body.split_once(':').unwrap_or((body.as_str(), ""));
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!("invalid capture name '{}'", name));
                }
                let kind = CaptureKind::parse(kind).ok_or_else(|| format!("unknown capture kind '{}'", kind))?;
                tokens.push(Token::Capture {
                    name: name.to_string(),
                    kind,
                });
                i = close + 1;
            }
            ']' | ')' | '}' => return Err(format!("unbalanced '{}'", c)),
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !"[](){}".contains(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
            }
        }
    }
    match until {
        Some(c) => Err(format!("missing '{}'", c)),
        None => Ok((tokens, i)),
    }
}

fn find(chars: &[char], from: usize, target: char) -> Result<usize, String> {
    chars[from..]
        .iter()
        .position(|&c| c == target)
        .map(|p| from + p)
        .ok_or_else(|| format!("missing '{}'", target))
}

fn phrase(text: &str) -> String {
    text.split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

fn token_pattern(token: &Token) -> String {
    match token {
        Token::Literal(word) => phrase(word),
        Token::Alternation(alts) => {
            let inner: Vec<String> = alts.iter().map(|a| phrase(a)).collect();
            format!("(?:{})", inner.join("|"))
        }
        Token::Capture { name, kind } => format!("(?P<{}>{})", name, kind.pattern()),
        Token::Optional(inner) => {
            let mut body = String::new();
            emit(inner, &mut body, false);
            format!("(?:{})", body)
        }
    }
}

/// Append tokens to `out`; `need_sep` says whether whitespace must precede
/// the next required token. Optional tokens carry their own separator.
fn emit(tokens: &[Token], out: &mut String, mut need_sep: bool) -> bool {
    for token in tokens {
        let pattern = token_pattern(token);
        if matches!(token, Token::Optional(_)) {
            if need_sep {
                out.push_str(&format!(r"(?:\s+{})?", pattern));
            } else {
                out.push_str(&format!(r"(?:{}\s+)?", pattern));
            }
        } else {
            if need_sep {
                out.push_str(r"\s+");
            }
            out.push_str(&pattern);
            need_sep = true;
        }
    }
    need_sep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_words() {
        let t = Template::compile("click [the] {name} {role:role}").unwrap();
        let caps = t.matches("click the Save button").unwrap();
        assert_eq!(caps.value("name"), Some("Save"));
        assert_eq!(caps.value("role"), Some("button"));
        assert!(t.matches("click Save button.").is_some());
    }

    #[test]
    fn test_leading_optional() {
        let t = Template::compile("[(a|an)] {type:toast} toast appears").unwrap();
        assert!(t.matches("A success toast appears").is_some());
        assert!(t.matches("error toast appears!").is_some());
    }

    #[test]
    fn test_quoted_and_unquoted_are_equal() {
        let t = Template::compile("{type:toast} toast appears with {message}").unwrap();
        let quoted = t.matches(r#"success toast appears with "Saved""#).unwrap();
        let bare = t.matches("success toast appears with Saved").unwrap();
        assert_eq!(quoted.value("message"), bare.value("message"));
        assert!(quoted.is_quoted("message"));
        assert!(!bare.is_quoted("message"));
    }

    #[test]
    fn test_quoted_kind_requires_quotes() {
        let t = Template::compile("click {label:quoted}").unwrap();
        assert!(t.matches("click Save").is_none());
        assert_eq!(t.matches("click 'Save'").unwrap().value("label"), Some("Save"));
    }

    #[test]
    fn test_path_capture() {
        let t = Template::compile("navigate to {url:path}").unwrap();
        assert_eq!(t.matches("Navigate to /orders/new").unwrap().value("url"), Some("/orders/new"));
        assert!(t.matches("Navigate to the orders page").is_none());
    }

    #[test]
    fn test_invalid_templates() {
        assert!(Template::compile("click {name:colour}").is_err());
        assert!(Template::compile("click [the").is_err());
        assert!(Template::compile("{a} and {a}").is_err());
    }
}
