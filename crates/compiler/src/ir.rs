//! Intermediate representation
//!
//! The IR is the only interface between step matching and code generation.
//! Every variant except `CustomStep` carries enough structure to be rendered
//! without looking at the step prose again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hints::MachineHint;

/// ARIA roles the compiler can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AriaRole {
    Button,
    Link,
    Tab,
    Checkbox,
    Radio,
    Switch,
    Menuitem,
    Option,
    Heading,
    Textbox,
    Combobox,
    Listbox,
    Dialog,
    Row,
    Cell,
    Img,
    Alert,
    Status,
}

impl AriaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AriaRole::Button => "button",
            AriaRole::Link => "link",
            AriaRole::Tab => "tab",
            AriaRole::Checkbox => "checkbox",
            AriaRole::Radio => "radio",
            AriaRole::Switch => "switch",
            AriaRole::Menuitem => "menuitem",
            AriaRole::Option => "option",
            AriaRole::Heading => "heading",
            AriaRole::Textbox => "textbox",
            AriaRole::Combobox => "combobox",
            AriaRole::Listbox => "listbox",
            AriaRole::Dialog => "dialog",
            AriaRole::Row => "row",
            AriaRole::Cell => "cell",
            AriaRole::Img => "img",
            AriaRole::Alert => "alert",
            AriaRole::Status => "status",
        }
    }

    /// Parse an ARIA role name as written in a machine hint
    pub fn parse(value: &str) -> Option<Self> {
        let role = match value.trim().to_ascii_lowercase().as_str() {
            "button" => AriaRole::Button,
            "link" => AriaRole::Link,
            "tab" => AriaRole::Tab,
            "checkbox" => AriaRole::Checkbox,
            "radio" => AriaRole::Radio,
            "switch" => AriaRole::Switch,
            "menuitem" => AriaRole::Menuitem,
            "option" => AriaRole::Option,
            "heading" => AriaRole::Heading,
            "textbox" => AriaRole::Textbox,
            "combobox" => AriaRole::Combobox,
            "listbox" => AriaRole::Listbox,
            "dialog" => AriaRole::Dialog,
            "row" => AriaRole::Row,
            "cell" => AriaRole::Cell,
            "img" => AriaRole::Img,
            "alert" => AriaRole::Alert,
            "status" => AriaRole::Status,
            _ => return None,
        };
        Some(role)
    }

    /// Map a role noun used in prose ("dropdown", "field") to its ARIA role
    pub fn from_noun(noun: &str) -> Option<Self> {
        let normalized = noun
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let role = match normalized.as_str() {
            "button" => AriaRole::Button,
            "link" => AriaRole::Link,
            "tab" => AriaRole::Tab,
            "checkbox" | "check box" => AriaRole::Checkbox,
            "radio" | "radio button" => AriaRole::Radio,
            "switch" | "toggle" => AriaRole::Switch,
            "menu item" | "menuitem" => AriaRole::Menuitem,
            "option" => AriaRole::Option,
            "heading" => AriaRole::Heading,
            "field" | "input" | "textbox" | "text box" | "textarea" | "box" => AriaRole::Textbox,
            "dropdown" | "combobox" | "select" | "select box" | "picker" | "menu" => AriaRole::Combobox,
            "listbox" | "list" => AriaRole::Listbox,
            "dialog" | "modal" => AriaRole::Dialog,
            "row" => AriaRole::Row,
            "cell" => AriaRole::Cell,
            "image" | "img" => AriaRole::Img,
            _ => return None,
        };
        Some(role)
    }

    /// Suffix used when naming generated accessor functions
    pub fn accessor_suffix(&self) -> &'static str {
        match self {
            AriaRole::Button => "Button",
            AriaRole::Link => "Link",
            AriaRole::Tab => "Tab",
            AriaRole::Checkbox => "Checkbox",
            AriaRole::Radio => "Radio",
            AriaRole::Switch => "Switch",
            AriaRole::Menuitem => "MenuItem",
            AriaRole::Option => "Option",
            AriaRole::Heading => "Heading",
            AriaRole::Textbox => "Field",
            AriaRole::Combobox => "Dropdown",
            AriaRole::Listbox => "List",
            AriaRole::Dialog => "Dialog",
            AriaRole::Row => "Row",
            AriaRole::Cell => "Cell",
            AriaRole::Img => "Image",
            AriaRole::Alert => "Alert",
            AriaRole::Status => "Status",
        }
    }
}

impl fmt::Display for AriaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a matched template knows about the element a step refers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorRequest {
    /// Human description, e.g. "Save button"
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AriaRole>,

    /// Accessible name to pair with `role`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,

    /// Visible text, only set when the author quoted it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<MachineHint>,
}

impl LocatorRequest {
    /// Logical identity of the element, stable across locator substitutions
    pub fn element_key(&self) -> String {
        if let Some(hint) = &self.hint {
            return format!("hint:{}", hint.canonical());
        }
        let fold = |s: &str| {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        };
        if let (Some(role), Some(name)) = (self.role, &self.name) {
            return format!("{}:{}", role, fold(name));
        }
        if let Some(label) = &self.label {
            return format!("label:{}", fold(label));
        }
        if let Some(id) = &self.test_id {
            return format!("testid:{}", id);
        }
        if let Some(text) = &self.text {
            return format!("text:{}", fold(text));
        }
        format!("desc:{}", fold(&self.description))
    }

    /// Whether the request names anything a locator can be derived from
    pub fn has_anchor(&self) -> bool {
        self.hint.is_some()
            || (self.role.is_some() && self.name.is_some())
            || self.label.is_some()
            || self.test_id.is_some()
            || self.text.is_some()
    }
}

/// Value typed into a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ValueSpec {
    Literal(String),
    /// Read from an environment variable at test time (`$NAME` in prose)
    Env(String),
}

impl ValueSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix('$') {
            let valid = !name.is_empty()
                && name.starts_with(|c: char| c.is_ascii_uppercase())
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if valid {
                return ValueSpec::Env(name.to_string());
            }
        }
        ValueSpec::Literal(raw.to_string())
    }
}

/// Toast flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastType {
    Success,
    Error,
    Warning,
    Info,
    Any,
}

impl ToastType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "confirmation" => ToastType::Success,
            "error" | "failure" => ToastType::Error,
            "warning" => ToastType::Warning,
            "info" => ToastType::Info,
            _ => ToastType::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToastType::Success => "success",
            ToastType::Error => "error",
            ToastType::Warning => "warning",
            ToastType::Info => "info",
            ToastType::Any => "any",
        }
    }
}

/// Predicate for `WaitForResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePredicate {
    pub url_contains: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// One IR operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrOp {
    Goto {
        target: String,
    },
    Click {
        locator: LocatorRequest,
    },
    Fill {
        locator: LocatorRequest,
        value: ValueSpec,
    },
    Select {
        locator: LocatorRequest,
        option: String,
    },
    ExpectVisible {
        locator: LocatorRequest,
    },
    ExpectText {
        locator: LocatorRequest,
        text: String,
    },
    ExpectToast {
        toast_type: ToastType,
        message: String,
    },
    WaitForUrl {
        pattern: String,
    },
    WaitForResponse {
        predicate: ResponsePredicate,
    },
    CustomStep {
        reason: String,
    },
}

/// Operation kinds, used for promotion signatures and accessor naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Goto,
    Click,
    Fill,
    Select,
    ExpectVisible,
    ExpectText,
    ExpectToast,
    WaitForUrl,
    WaitForResponse,
    CustomStep,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Goto => "goto",
            OpKind::Click => "click",
            OpKind::Fill => "fill",
            OpKind::Select => "select",
            OpKind::ExpectVisible => "expect_visible",
            OpKind::ExpectText => "expect_text",
            OpKind::ExpectToast => "expect_toast",
            OpKind::WaitForUrl => "wait_for_url",
            OpKind::WaitForResponse => "wait_for_response",
            OpKind::CustomStep => "custom_step",
        }
    }

    /// Interactions get an action function in the owning module
    pub fn is_action(&self) -> bool {
        matches!(self, OpKind::Click | OpKind::Fill | OpKind::Select)
    }
}

impl IrOp {
    pub fn kind(&self) -> OpKind {
        match self {
            IrOp::Goto { .. } => OpKind::Goto,
            IrOp::Click { .. } => OpKind::Click,
            IrOp::Fill { .. } => OpKind::Fill,
            IrOp::Select { .. } => OpKind::Select,
            IrOp::ExpectVisible { .. } => OpKind::ExpectVisible,
            IrOp::ExpectText { .. } => OpKind::ExpectText,
            IrOp::ExpectToast { .. } => OpKind::ExpectToast,
            IrOp::WaitForUrl { .. } => OpKind::WaitForUrl,
            IrOp::WaitForResponse { .. } => OpKind::WaitForResponse,
            IrOp::CustomStep { .. } => OpKind::CustomStep,
        }
    }

    /// The element this operation touches, if any
    pub fn locator(&self) -> Option<&LocatorRequest> {
        match self {
            IrOp::Click { locator }
            | IrOp::Fill { locator, .. }
            | IrOp::Select { locator, .. }
            | IrOp::ExpectVisible { locator }
            | IrOp::ExpectText { locator, .. } => Some(locator),
            _ => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, IrOp::CustomStep { .. })
    }

    /// Short human-readable label derived from the IR alone
    pub fn summary(&self) -> String {
        match self {
            IrOp::Goto { target } => format!("Navigate to {}", target),
            IrOp::Click { locator } => format!("Click {}", locator.description),
            IrOp::Fill { locator, value } => match value {
                ValueSpec::Literal(v) => format!("Fill {} with \"{}\"", locator.description, v),
                ValueSpec::Env(name) => format!("Fill {} with ${}", locator.description, name),
            },
            IrOp::Select { locator, option } => {
                format!("Select \"{}\" in {}", option, locator.description)
            }
            IrOp::ExpectVisible { locator } => format!("Expect {} to be visible", locator.description),
            IrOp::ExpectText { locator, text } => {
                format!("Expect {} to contain \"{}\"", locator.description, text)
            }
            IrOp::ExpectToast { toast_type, message } => match toast_type {
                ToastType::Any => format!("Expect toast \"{}\"", message),
                t => format!("Expect {} toast \"{}\"", t.as_str(), message),
            },
            IrOp::WaitForUrl { pattern } => format!("Wait for URL {}", pattern),
            IrOp::WaitForResponse { predicate } => match &predicate.method {
                Some(method) => format!("Wait for {} {} response", method, predicate.url_contains),
                None => format!("Wait for {} response", predicate.url_contains),
            },
            IrOp::CustomStep { .. } => "Manual step".to_string(),
        }
    }
}
