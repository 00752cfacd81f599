//! Ordered step templates
//!
//! Each normalized step is tried against the table in declaration order and
//! the first template whose builder accepts the captures wins. A step that
//! matches nothing becomes `CustomStep` with a reason naming the missing
//! anchor.

use serde::Serialize;
use tracing::debug;

use crate::error::CompileResult;
use crate::hints::MachineHint;
use crate::ir::{AriaRole, IrOp, LocatorRequest, ResponsePredicate, ToastType, ValueSpec};
use crate::template::{Captures, Template};

/// Pattern families, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Navigation,
    UrlWait,
    ResponseWait,
    Toast,
    Selection,
    Fill,
    TestIdClick,
    Click,
    TextAssertion,
    VisibilityAssertion,
    HintFallback,
}

/// What a template needs before it may match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The template text itself carries the anchor
    InText,
    /// Only match when the step has a machine hint
    Hint,
}

type Builder = fn(&Captures, Option<&MachineHint>) -> Option<IrOp>;

struct PatternDef {
    name: &'static str,
    family: Family,
    source: String,
    requires: Anchor,
    build: Builder,
}

fn def(name: &'static str, family: Family, source: impl Into<String>, build: Builder) -> PatternDef {
    PatternDef {
        name,
        family,
        source: source.into(),
        requires: Anchor::InText,
        build,
    }
}

fn hinted(name: &'static str, family: Family, source: impl Into<String>, build: Builder) -> PatternDef {
    PatternDef {
        requires: Anchor::Hint,
        ..def(name, family, source, build)
    }
}

/// Optional visibility suffix shared by assertion templates
fn visible(prefix: &str) -> String {
    format!("{} [(is|are|to be|becomes|appears) (visible|displayed|shown|present)]", prefix)
}

fn table() -> Vec<PatternDef> {
    use Family::*;

    vec![
        // Navigation
        def("goto", Navigation, "navigate to [the] {url:path} [page]", build_goto),
        // URL waits
        def(
            "wait-url",
            UrlWait,
            "wait (for|until) [the] [page] (url|address) [(to contain|to match|to be|to include|contains|matches|is|includes)] {pattern}",
            build_wait_url,
        ),
        def(
            "verify-url",
            UrlWait,
            "(see|verify) [that] [the] [page] (url|address) (contains|matches|is|includes|to contain|to be) {pattern}",
            build_wait_url,
        ),
        def(
            "redirected",
            UrlWait,
            "[verify] [that] [the user] [(is|are|gets|get)] (redirected|taken|sent|navigated) to [the] {url:path} [page]",
            build_redirect,
        ),
        // Response waits
        def(
            "wait-response-status",
            ResponseWait,
            "wait for [the] {method:method} {url:path} (response|request|call) [to] (return|returns|with|returning) [status] {status:status}",
            build_wait_response,
        ),
        def(
            "wait-response-method",
            ResponseWait,
            "wait for [the] {method:method} {url:path} [(response|request|call)]",
            build_wait_response,
        ),
        def(
            "wait-response-from",
            ResponseWait,
            "wait for [the] [{method:method}] (response|request|call) (from|to) {url:path} [with status {status:status}]",
            build_wait_response,
        ),
        def(
            "wait-response",
            ResponseWait,
            "wait for [the] {url:path} (response|request|call)",
            build_wait_response,
        ),
        // Toasts: message after the verb, message before the verb, untyped
        def(
            "toast-after",
            Toast,
            "[(see|verify)] [that] [(a|an|the)] {type:toast} (toast|notification|snackbar|message|banner) (appears|is shown|is displayed|shows up|pops up) (with|saying|reading|containing) [(the message|message|the text|text)] {message}",
            build_toast,
        ),
        def(
            "toast-any-after",
            Toast,
            "[(see|verify)] [that] [(a|an|the)] (toast|notification|snackbar) (appears|is shown|is displayed|shows up|pops up) (with|saying|reading|containing) [(the message|message|the text|text)] {message}",
            build_toast,
        ),
        def(
            "toast-before",
            Toast,
            "[(see|verify)] [that] [(a|an|the)] [{type:toast}] (toast|notification|snackbar) {message:quoted} (appears|is shown|is displayed|shows up|pops up)",
            build_toast,
        ),
        def(
            "toast-quoted-first",
            Toast,
            "[(see|verify)] [that] [(a|an|the)] {message:quoted} [{type:toast}] (toast|notification|snackbar) (appears|is shown|is displayed|shows up|pops up)",
            build_toast,
        ),
        def(
            "toast-see",
            Toast,
            "(see|verify) [that] [(a|an|the)] [{type:toast}] (toast|notification|snackbar) (with|saying|reading|containing) [(the message|message|the text|text)] {message}",
            build_toast,
        ),
        // Selection
        def(
            "select-from-role",
            Selection,
            "select [the] {option} [option] (from|in) [the] {name} {role:role}",
            build_select,
        ),
        def(
            "select-from-quoted",
            Selection,
            "select [the] {option} [option] (from|in) [the] {label:quoted} [(list|options)]",
            build_select_labelled,
        ),
        // Fill
        def(
            "enter-in-role",
            Fill,
            "enter {value} (in|into|as) [the] {name} {role:role}",
            build_fill,
        ),
        def(
            "fill-role-with",
            Fill,
            "fill [in] [out] [the] {name} {role:role} with {value}",
            build_fill,
        ),
        def(
            "set-role-to",
            Fill,
            "set [the] {name} {role:role} to {value}",
            build_fill,
        ),
        def(
            "fill-quoted-with",
            Fill,
            "fill [in] [the] {label:quoted} with {value}",
            build_fill_labelled,
        ),
        def(
            "enter-in-quoted",
            Fill,
            "enter {value} (in|into) [the] {label:quoted}",
            build_fill_labelled,
        ),
        // Clicks by test id
        def(
            "click-testid",
            TestIdClick,
            "click [on] [the] [(element|control|item|button|link)] with (test id|testid|test-id|data-testid) {id:word}",
            build_click_testid,
        ),
        // Clicks
        def(
            "click-role",
            Click,
            "click [on] [the] {name} {role:role}",
            build_click,
        ),
        def(
            "click-role-named",
            Click,
            "click [on] [the] {role:role} (named|labelled|labeled|called|titled|with text) {name}",
            build_click,
        ),
        def(
            "check-role",
            Click,
            "(check|tick) [the] {name} {role:role}",
            build_click,
        ),
        def(
            "click-quoted",
            Click,
            "click [on] [the] {text:quoted} [{noun:word}]",
            build_click_text,
        ),
        // Text assertions
        def(
            "expect-text-role",
            TextAssertion,
            "(see|verify) [that] [the] {name} {role:role} (contains|shows|displays|reads|has text|has the text|includes|to contain|to have text) {text}",
            build_expect_text,
        ),
        // Visibility assertions
        def(
            "expect-visible-role",
            VisibilityAssertion,
            visible("(see|verify) [that] [the] {name} {role:role}"),
            build_expect_visible,
        ),
        def(
            "expect-visible-role-named",
            VisibilityAssertion,
            visible("(see|verify) [that] [the] {role:role} (named|labelled|labeled|called|titled) {name}"),
            build_expect_visible,
        ),
        def(
            "expect-visible-testid",
            VisibilityAssertion,
            visible("(see|verify) [that] [the] (element|control|item) with (test id|testid|test-id|data-testid) {id:word}"),
            build_expect_visible_testid,
        ),
        def(
            "expect-page-text",
            VisibilityAssertion,
            "(see|verify) [that] [the] (page|screen) (shows|displays|contains|includes) [the] [(text|message)] {text:quoted}",
            build_expect_visible_text,
        ),
        def(
            "expect-visible-text",
            VisibilityAssertion,
            visible("(see|verify) [that] [the] [(text|message)] {text:quoted}"),
            build_expect_visible_text,
        ),
        // Hint-only fallbacks
        hinted("hint-click", HintFallback, "click [on] [the] {target}", build_hint_click),
        hinted(
            "hint-enter",
            HintFallback,
            "enter {value} (in|into|as) [the] {target}",
            build_hint_fill,
        ),
        hinted(
            "hint-fill",
            HintFallback,
            "fill [in] [out] [the] {target} with {value}",
            build_hint_fill,
        ),
        hinted(
            "hint-select",
            HintFallback,
            "select [the] {option} [option] (from|in) [the] {target}",
            build_hint_select,
        ),
        hinted(
            "hint-expect-text",
            HintFallback,
            "(see|verify) [that] [the] {target} (contains|shows|displays|reads|has text|includes|to contain) {text}",
            build_hint_expect_text,
        ),
        hinted(
            "hint-expect-visible",
            HintFallback,
            visible("(see|verify) [that] [the] {target}"),
            build_hint_expect_visible,
        ),
    ]
}

// ============================================================================
// Engine
// ============================================================================

struct CompiledPattern {
    def: PatternDef,
    template: Template,
}

/// Result of matching one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepMatch {
    pub op: IrOp,
    /// Name of the winning template, absent for gaps
    pub template: Option<String>,
    pub family: Option<Family>,
}

/// Compiled template table
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
}

impl std::fmt::Debug for PatternEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternEngine")
            .field("templates", &self.patterns.len())
            .finish()
    }
}

impl PatternEngine {
    pub fn new() -> CompileResult<Self> {
        let patterns = table()
            .into_iter()
            .map(|def| {
                let template = Template::compile(&def.source)?;
                Ok(CompiledPattern { def, template })
            })
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Template names in table order
    pub fn template_names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|p| p.def.name).collect()
    }

    /// Map one normalized step to an IR operation
    pub fn match_step(&self, text: &str, hint: Option<&MachineHint>) -> StepMatch {
        for pattern in &self.patterns {
            if pattern.def.requires == Anchor::Hint && hint.is_none() {
                continue;
            }
            let Some(caps) = pattern.template.matches(text) else {
                continue;
            };
            if let Some(op) = (pattern.def.build)(&caps, hint) {
                debug!("'{}' matched template {}", text, pattern.def.name);
                return StepMatch {
                    op,
                    template: Some(pattern.def.name.to_string()),
                    family: Some(pattern.def.family),
                };
            }
        }
        StepMatch {
            op: IrOp::CustomStep {
                reason: gap_reason(text),
            },
            template: None,
            family: None,
        }
    }
}

/// Explain a mapping gap by verb family with a concrete rewording
pub fn gap_reason(text: &str) -> String {
    let verb = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let acts_on_element = matches!(
        verb.as_str(),
        "click" | "check" | "tick" | "enter" | "fill" | "set" | "select" | "see" | "verify"
    );
    if acts_on_element && names_container(text) {
        return format!(
            "target in \"{}\" is scoped to a container: quote the element's own name ('Click the \"Save\" button') or add a machine hint (role=button, name=\"Save\"); container-scoped locators are not generated",
            text
        );
    }
    match verb.as_str() {
        "uncheck" | "untick" | "toggle" => format!(
            "\"{}\" depends on the control's current state: state the result instead ('Check the Remember me checkbox') or list it in autogen.blockedSteps",
            text
        ),
        "click" | "check" | "tick" => format!(
            "no locator anchor in \"{}\": rewrite as 'Click the \"Confirm\" button' or add a machine hint (role=button, name=\"Confirm\")",
            text
        ),
        "enter" | "fill" | "set" => format!(
            "no locator anchor for the field in \"{}\": rewrite as 'Enter \"value\" in the Email field' or add a machine hint (label=\"Email\")",
            text
        ),
        "select" => format!(
            "no locator anchor for the list in \"{}\": rewrite as 'Select \"USA\" from the Country dropdown' or add a machine hint (role=combobox, name=\"Country\")",
            text
        ),
        "see" | "verify" => format!(
            "no locator anchor for the assertion in \"{}\": name the element with a role noun ('the \"Total\" heading'), quote the expected text, or add a machine hint (testid=order-total)",
            text
        ),
        "navigate" => format!(
            "no URL or path in \"{}\": rewrite as 'Navigate to /orders'",
            text
        ),
        "wait" => format!(
            "no condition to wait on in \"{}\": wait for a URL ('Wait for the URL to contain /orders') or a response ('Wait for the POST /api/orders response'); fixed delays are not generated",
            text
        ),
        _ => format!(
            "no template matches \"{}\" and it has no locator anchor: start the step with click, enter, select, navigate to, wait for or verify, or list it in autogen.blockedSteps",
            text
        ),
    }
}

// ============================================================================
// Builders
// ============================================================================

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "it", "them", "element", "item", "thing", "on", "one", "some",
];

/// Prepositions that place an element inside another one
const SCOPING: &[&str] = &["in", "inside", "within", "on", "of", "under"];

const ARTICLES: &[&str] = &["the", "a", "an"];

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches('"').to_ascii_lowercase())
        .collect()
}

/// A role noun followed by a scoping preposition, e.g. `button in`
fn names_container(text: &str) -> bool {
    words(text)
        .windows(2)
        .any(|pair| AriaRole::from_noun(&pair[0]).is_some() && SCOPING.contains(&pair[1].as_str()))
}

/// Whether an unquoted name refers to an element through its container, e.g.
/// `Save button in the` or `Save in the modal`
fn is_scoped(name: &str) -> bool {
    names_container(name)
        || words(name)
            .windows(2)
            .any(|pair| SCOPING.contains(&pair[0].as_str()) && ARTICLES.contains(&pair[1].as_str()))
}

/// Reject empty and filler targets
fn target(caps: &Captures, name: &str) -> Option<String> {
    let capture = caps.get(name)?;
    let value = capture.value.trim();
    if value.is_empty() {
        return None;
    }
    if !capture.quoted && STOPWORDS.contains(&value.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}

fn with_hint(mut request: LocatorRequest, hint: Option<&MachineHint>) -> LocatorRequest {
    request.hint = hint.cloned();
    request
}

/// Element named by a role noun and an accessible name
fn role_request(caps: &Captures, hint: Option<&MachineHint>) -> Option<LocatorRequest> {
    let noun = caps.value("role")?;
    let role = AriaRole::from_noun(noun)?;
    let name = target(caps, "name")?;
    let quoted = caps.is_quoted("name");
    if !quoted && is_scoped(&name) {
        return None;
    }
    let label = matches!(role, AriaRole::Textbox | AriaRole::Combobox | AriaRole::Checkbox)
        .then(|| name.clone());
    Some(with_hint(
        LocatorRequest {
            description: format!("{} {}", name, noun.to_ascii_lowercase()),
            role: Some(role),
            name: Some(name.clone()),
            label,
            text: quoted.then_some(name),
            ..Default::default()
        },
        hint,
    ))
}

fn label_request(caps: &Captures, hint: Option<&MachineHint>) -> Option<LocatorRequest> {
    let label = target(caps, "label")?;
    Some(with_hint(
        LocatorRequest {
            description: label.clone(),
            label: Some(label),
            ..Default::default()
        },
        hint,
    ))
}

fn hint_request(caps: &Captures, hint: Option<&MachineHint>) -> Option<LocatorRequest> {
    hint?;
    let description = caps.value("target").map(str::trim).filter(|t| !t.is_empty())?;
    Some(with_hint(
        LocatorRequest {
            description: description.to_string(),
            ..Default::default()
        },
        hint,
    ))
}

fn value_spec(caps: &Captures, name: &str) -> Option<ValueSpec> {
    let capture = caps.get(name)?;
    if capture.quoted {
        Some(ValueSpec::Literal(capture.value.clone()))
    } else if capture.value.is_empty() {
        None
    } else {
        Some(ValueSpec::parse(&capture.value))
    }
}

fn build_goto(caps: &Captures, _: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Goto {
        target: caps.value("url")?.to_string(),
    })
}

fn build_wait_url(caps: &Captures, _: Option<&MachineHint>) -> Option<IrOp> {
    let pattern = target(caps, "pattern")?;
    Some(IrOp::WaitForUrl { pattern })
}

fn build_redirect(caps: &Captures, _: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::WaitForUrl {
        pattern: caps.value("url")?.to_string(),
    })
}

fn build_wait_response(caps: &Captures, _: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::WaitForResponse {
        predicate: ResponsePredicate {
            url_contains: caps.value("url")?.to_string(),
            method: caps.value("method").map(str::to_ascii_uppercase),
            status: caps.value("status").and_then(|s| s.parse().ok()),
        },
    })
}

fn build_toast(caps: &Captures, _: Option<&MachineHint>) -> Option<IrOp> {
    let message = caps.value("message")?.trim();
    if message.is_empty() {
        return None;
    }
    Some(IrOp::ExpectToast {
        toast_type: caps.value("type").map(ToastType::parse).unwrap_or(ToastType::Any),
        message: message.to_string(),
    })
}

fn build_select(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Select {
        locator: role_request(caps, hint)?,
        option: target(caps, "option")?,
    })
}

fn build_select_labelled(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    let mut locator = label_request(caps, hint)?;
    locator.role = Some(AriaRole::Combobox);
    locator.name = locator.label.clone();
    Some(IrOp::Select {
        locator,
        option: target(caps, "option")?,
    })
}

fn build_fill(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Fill {
        locator: role_request(caps, hint)?,
        value: value_spec(caps, "value")?,
    })
}

fn build_fill_labelled(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Fill {
        locator: label_request(caps, hint)?,
        value: value_spec(caps, "value")?,
    })
}

fn build_click_testid(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    let id = target(caps, "id")?;
    Some(IrOp::Click {
        locator: with_hint(
            LocatorRequest {
                description: format!("{} element", id),
                test_id: Some(id),
                ..Default::default()
            },
            hint,
        ),
    })
}

fn build_click(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Click {
        locator: role_request(caps, hint)?,
    })
}

fn text_request(caps: &Captures, hint: Option<&MachineHint>) -> Option<LocatorRequest> {
    if !caps.is_quoted("text") {
        return None;
    }
    let text = target(caps, "text")?;
    Some(with_hint(
        LocatorRequest {
            description: text.clone(),
            text: Some(text),
            ..Default::default()
        },
        hint,
    ))
}

fn build_click_text(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Click {
        locator: text_request(caps, hint)?,
    })
}

fn build_expect_text(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::ExpectText {
        locator: role_request(caps, hint)?,
        text: target(caps, "text")?,
    })
}

fn build_expect_visible(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::ExpectVisible {
        locator: role_request(caps, hint)?,
    })
}

fn build_expect_visible_testid(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    let id = target(caps, "id")?;
    Some(IrOp::ExpectVisible {
        locator: with_hint(
            LocatorRequest {
                description: format!("{} element", id),
                test_id: Some(id),
                ..Default::default()
            },
            hint,
        ),
    })
}

fn build_expect_visible_text(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::ExpectVisible {
        locator: text_request(caps, hint)?,
    })
}

fn build_hint_click(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Click {
        locator: hint_request(caps, hint)?,
    })
}

fn build_hint_fill(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Fill {
        locator: hint_request(caps, hint)?,
        value: value_spec(caps, "value")?,
    })
}

fn build_hint_select(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::Select {
        locator: hint_request(caps, hint)?,
        option: target(caps, "option")?,
    })
}

fn build_hint_expect_text(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::ExpectText {
        locator: hint_request(caps, hint)?,
        text: target(caps, "text")?,
    })
}

fn build_hint_expect_visible(caps: &Captures, hint: Option<&MachineHint>) -> Option<IrOp> {
    Some(IrOp::ExpectVisible {
        locator: hint_request(caps, hint)?,
    })
}
