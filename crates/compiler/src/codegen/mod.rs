//! Playwright code generation
//!
//! Tests read as a list of `test.step` blocks that call module functions;
//! the module functions own every locator. Output is split into managed
//! regions so regeneration can merge with files already on disk.

pub mod ts;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::config::CodegenConfig;
use crate::error::{CompileError, CompileResult};
use crate::ir::{IrOp, OpKind, ResponsePredicate, ValueSpec};
use crate::managed::{Region, RenderedFile};
use crate::pipeline::{CompiledJourney, CompiledStep};
use crate::promotion::PromotionPlan;
use crate::selectors::{ElementKind, LocatorStrategy, ResolvedElement};
use ts::{camel_ident, capitalize, quote, regex_literal};

/// Module alias used for the journey's own functions
pub const JOURNEY_NS: &str = "journey";

/// Module alias used for promoted functions
pub const SHARED_NS: &str = "shared";

/// Base name of the shared module file
pub const SHARED_MODULE: &str = "shared";

// ============================================================================
// Heal tuning
// ============================================================================

/// Adjustments the heal loop may make to one element's functions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTuning {
    /// Index into the element's candidates; 0 is the primary locator
    pub candidate: usize,
    /// Force exact name matching
    pub exact: bool,
    /// Condition-based wait before interacting, in milliseconds
    pub wait_ms: Option<u64>,
}

/// Per-element tuning keyed by element identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub elements: BTreeMap<String, ElementTuning>,
}

impl Tuning {
    pub fn get(&self, key: &str) -> ElementTuning {
        self.elements.get(key).cloned().unwrap_or_default()
    }

    pub fn entry(&mut self, key: &str) -> &mut ElementTuning {
        self.elements.entry(key.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Locator strategy an element renders with under `tuning`
pub fn effective_strategy(element: &ResolvedElement, tuning: &ElementTuning) -> CompileResult<LocatorStrategy> {
    let spec = element.candidate(tuning.candidate).ok_or_else(|| CompileError::Template {
        template: element.key.clone(),
        message: format!(
            "candidate {} requested but the element has {}",
            tuning.candidate,
            element.candidate_count()
        ),
    })?;
    if tuning.exact {
        Ok(spec.strategy.with_exact().unwrap_or_else(|| spec.strategy.clone()))
    } else {
        Ok(spec.strategy.clone())
    }
}

// ============================================================================
// Naming
// ============================================================================

/// Accessor base name for an element, e.g. `saveButton` or `successToast`
pub fn base_name(element: &ResolvedElement) -> String {
    match &element.kind {
        ElementKind::Toast { toast_type } => match toast_type {
            crate::ir::ToastType::Any => "toast".to_string(),
            t => format!("{}Toast", t.as_str()),
        },
        ElementKind::Standard => camel_ident(&element.description),
    }
}

fn action_name(kind: OpKind, base: &str) -> Option<String> {
    let verb = match kind {
        OpKind::Click => "click",
        OpKind::Fill => "fill",
        OpKind::Select => "select",
        _ => return None,
    };
    Some(format!("{}{}", verb, capitalize(base)))
}

fn wait_name(base: &str) -> String {
    format!("waitFor{}", capitalize(base))
}

/// Unique name within a module, suffixing `2`, `3`, ... on collision
fn unique(base: String, taken: &mut BTreeSet<String>) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone)]
struct Binding {
    namespace: &'static str,
    name: String,
}

// ============================================================================
// Output
// ============================================================================

/// Rendered files for one journey; paths are relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyArtifacts {
    pub test_path: PathBuf,
    pub test: RenderedFile,
    pub module_path: PathBuf,
    pub module: RenderedFile,
}

/// Renders journeys into Playwright sources
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    config: CodegenConfig,
}

impl CodeGenerator {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    pub fn test_path(&self, compiled: &CompiledJourney) -> PathBuf {
        self.config
            .tests_dir
            .join(compiled.journey.tier.as_str())
            .join(format!("{}.spec.ts", compiled.journey.slug()))
    }

    pub fn module_path(&self, compiled: &CompiledJourney) -> PathBuf {
        self.config
            .modules_dir
            .join(format!("{}.ts", compiled.journey.slug()))
    }

    pub fn shared_path(&self) -> PathBuf {
        self.config.modules_dir.join(format!("{}.ts", SHARED_MODULE))
    }

    /// Render the test and module files of one journey
    pub fn render_journey(
        &self,
        compiled: &CompiledJourney,
        plan: &PromotionPlan,
        tuning: &Tuning,
    ) -> CompileResult<JourneyArtifacts> {
        let journey_id = compiled.journey.id.as_str();
        let bindings = self.bind(compiled, plan);
        let test_path = self.test_path(compiled);
        let module_path = self.module_path(compiled);

        // Module: every element not promoted for this journey
        let mut module = vec![Region::new(
            "imports",
            "import type { Locator, Page } from '@playwright/test';",
        )];
        for key in element_order(compiled) {
            let (Some(element), Some(binding)) = (compiled.elements.get(&key), bindings.get(&key)) else {
                continue;
            };
            if binding.namespace != JOURNEY_NS {
                continue;
            }
            let element_tuning = tuning.get(&key);
            let strategy = effective_strategy(element, &element_tuning)?;
            module.extend(element_functions(
                element,
                &binding.name,
                &strategy,
                &compiled.ops_for(&key),
                element_tuning.wait_ms,
            ));
        }

        // Test file
        let test_dir = test_path.parent().unwrap_or_else(|| Path::new(""));
        let uses = |ns: &str| bindings.values().any(|b| b.namespace == ns);
        let mut imports = vec!["import { test, expect } from '@playwright/test';".to_string()];
        if uses(JOURNEY_NS) {
            imports.push(format!(
                "import * as {} from {};",
                JOURNEY_NS,
                quote(&relative_import(test_dir, &module_path))
            ));
        }
        if uses(SHARED_NS) {
            imports.push(format!(
                "import * as {} from {};",
                SHARED_NS,
                quote(&relative_import(test_dir, &self.shared_path()))
            ));
        }

        let mut test = vec![
            Region::new("imports", imports.join("\n")),
            Region::new("header", header(compiled)),
        ];
        let armed = armed_response_waits(&compiled.steps);
        for step in &compiled.steps {
            let body = render_step(step, &bindings, tuning, &armed)?;
            test.push(Region::new(format!("step-{}", step.ordinal), body));
        }
        test.push(Region::new("footer", "  });\n});"));

        tracing::debug!(
            "Rendered {} with {} module regions",
            journey_id,
            module.len()
        );

        Ok(JourneyArtifacts {
            test_path,
            test: RenderedFile::new(test),
            module_path,
            module: RenderedFile::new(module),
        })
    }

    /// Render the shared module from a promotion plan
    pub fn render_shared(&self, plan: &PromotionPlan) -> CompileResult<Option<RenderedFile>> {
        if plan.is_empty() {
            return Ok(None);
        }
        let mut regions = vec![Region::new(
            "imports",
            "import type { Locator, Page } from '@playwright/test';",
        )];
        for (name, shared) in &plan.shared {
            let strategy = effective_strategy(&shared.element, &ElementTuning::default())?;
            regions.extend(element_functions(&shared.element, name, &strategy, &shared.ops, None));
        }
        Ok(Some(RenderedFile::new(regions)))
    }

    /// Assign every element a namespace and a function base name
    fn bind(&self, compiled: &CompiledJourney, plan: &PromotionPlan) -> BTreeMap<String, Binding> {
        let mut bindings = BTreeMap::new();
        let mut taken = BTreeSet::new();
        for key in element_order(compiled) {
            let Some(element) = compiled.elements.get(&key) else {
                continue;
            };
            let binding = match plan.shared_name(&compiled.journey.id, &key) {
                Some(name) => Binding {
                    namespace: SHARED_NS,
                    name: name.to_string(),
                },
                None => Binding {
                    namespace: JOURNEY_NS,
                    name: unique(base_name(element), &mut taken),
                },
            };
            bindings.insert(key, binding);
        }
        bindings
    }
}

/// Element keys in order of first use, then any unused ones
fn element_order(compiled: &CompiledJourney) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let used = compiled.steps.iter().filter_map(|s| s.element.as_ref());
    for key in used.chain(compiled.elements.keys()) {
        if seen.insert(key.clone()) {
            order.push(key.clone());
        }
    }
    order
}

fn header(compiled: &CompiledJourney) -> String {
    let journey = &compiled.journey;
    let mut title = journey.title.clone();
    title.push_str(&format!(" @{}", journey.tier));
    for tag in &journey.tags {
        let tag = tag.trim_start_matches('@');
        if !tag.is_empty() {
            title.push_str(&format!(" @{}", tag));
        }
    }
    let mut lines = vec![format!(
        "test.describe({}, () => {{",
        quote(&format!("{}: {}", journey.id, journey.title))
    )];
    if !journey.acceptance_criteria.is_empty() {
        lines.push("  // Acceptance criteria:".to_string());
        for criterion in &journey.acceptance_criteria {
            lines.push(format!("  // - {}", criterion));
        }
    }
    lines.push(format!("  test({}, async ({{ page }}) => {{", quote(&title)));
    lines.join("\n")
}

fn value_expr(value: &ValueSpec) -> String {
    match value {
        ValueSpec::Literal(text) => quote(text),
        ValueSpec::Env(name) => format!("process.env.{} ?? ''", name),
    }
}

fn response_var(ordinal: u32) -> String {
    format!("response{}", ordinal)
}

fn response_wait(predicate: &ResponsePredicate) -> String {
    let mut checks = vec![format!("response.url().includes({})", quote(&predicate.url_contains))];
    if let Some(method) = &predicate.method {
        checks.push(format!("response.request().method() === {}", quote(method)));
    }
    if let Some(status) = predicate.status {
        checks.push(format!("response.status() === {}", status));
    }
    format!("page.waitForResponse((response) => {})", checks.join(" && "))
}

/// Response waits that directly follow the action triggering them, keyed by
/// the action's ordinal. The wait is started before the action runs.
fn armed_response_waits(steps: &[CompiledStep]) -> BTreeMap<u32, &CompiledStep> {
    steps
        .windows(2)
        .filter(|pair| {
            matches!(pair[1].op, IrOp::WaitForResponse { .. })
                && matches!(
                    pair[0].op,
                    IrOp::Goto { .. } | IrOp::Click { .. } | IrOp::Fill { .. } | IrOp::Select { .. }
                )
        })
        .map(|pair| (pair[0].ordinal, &pair[1]))
        .collect()
}

fn render_step(
    step: &CompiledStep,
    bindings: &BTreeMap<String, Binding>,
    tuning: &Tuning,
    armed: &BTreeMap<u32, &CompiledStep>,
) -> CompileResult<String> {
    let binding = |step: &CompiledStep| -> CompileResult<(&Binding, String)> {
        let key = step.element.as_ref().ok_or_else(|| missing(step))?;
        let binding = bindings.get(key).ok_or_else(|| missing(step))?;
        Ok((binding, format!("{}.{}", binding.namespace, binding.name)))
    };
    let wait_line = |step: &CompiledStep, args: &str| -> Option<String> {
        let key = step.element.as_ref()?;
        let binding = bindings.get(key)?;
        tuning.get(key).wait_ms.map(|_| {
            format!(
                "await {}.{}(page{});",
                binding.namespace,
                wait_name(&binding.name),
                args
            )
        })
    };

    let mut body: Vec<String> = Vec::new();
    match &step.op {
        IrOp::Goto { target } => body.push(format!("await page.goto({});", quote(target))),
        IrOp::WaitForUrl { pattern } => body.push(format!("await page.waitForURL({});", url_matcher(pattern))),
        IrOp::WaitForResponse { predicate } => {
            if armed.values().any(|wait| wait.ordinal == step.ordinal) {
                body.push(format!("await {};", response_var(step.ordinal)));
            } else {
                body.push(format!("await {};", response_wait(predicate)));
            }
        }
        IrOp::Click { .. } => {
            let (b, _) = binding(step)?;
            body.push(format!("await {}.{}(page);", b.namespace, call(OpKind::Click, &b.name)));
        }
        IrOp::Fill { value, .. } => {
            let (b, _) = binding(step)?;
            body.push(format!(
                "await {}.{}(page, {});",
                b.namespace,
                call(OpKind::Fill, &b.name),
                value_expr(value)
            ));
        }
        IrOp::Select { option, .. } => {
            let (b, _) = binding(step)?;
            body.push(format!(
                "await {}.{}(page, {});",
                b.namespace,
                call(OpKind::Select, &b.name),
                quote(option)
            ));
        }
        IrOp::ExpectVisible { .. } => {
            let (_, accessor) = binding(step)?;
            body.extend(wait_line(step, ""));
            body.push(format!("await expect({}(page)).toBeVisible();", accessor));
        }
        IrOp::ExpectText { text, .. } => {
            let (_, accessor) = binding(step)?;
            body.extend(wait_line(step, ""));
            body.push(format!("await expect({}(page)).toContainText({});", accessor, quote(text)));
        }
        IrOp::ExpectToast { message, .. } => {
            let (_, accessor) = binding(step)?;
            let message = quote(message);
            body.extend(wait_line(step, &format!(", {}", message)));
            body.push(format!("await expect({}(page, {})).toBeVisible();", accessor, message));
        }
        IrOp::CustomStep { reason } => {
            body.push(format!(
                "test.fixme(true, {});",
                quote(&format!("Step {} blocked: {}", step.ordinal, reason))
            ));
        }
    }

    let label = quote(&format!("Step {}: {}", step.ordinal, step.title));
    let mut lines = Vec::new();
    if let Some(wait) = armed.get(&step.ordinal) {
        if let IrOp::WaitForResponse { predicate } = &wait.op {
            lines.push(format!(
                "    const {} = {};",
                response_var(wait.ordinal),
                response_wait(predicate)
            ));
        }
    }
    lines.push(format!("    await test.step({}, async () => {{", label));
    lines.extend(body.into_iter().map(|l| format!("      {}", l)));
    lines.push("    });".to_string());
    Ok(lines.join("\n"))
}

fn call(kind: OpKind, base: &str) -> String {
    action_name(kind, base).unwrap_or_else(|| base.to_string())
}

fn missing(step: &CompiledStep) -> CompileError {
    CompileError::Template {
        template: format!("step-{}", step.ordinal),
        message: "operation has no resolved element".to_string(),
    }
}

/// `waitForURL` argument: a glob when the pattern has wildcards, otherwise a
/// substring regex
fn url_matcher(pattern: &str) -> String {
    if pattern.contains('*') {
        if pattern.starts_with("http") || pattern.starts_with("**") {
            quote(pattern)
        } else {
            quote(&format!("**{}", pattern))
        }
    } else {
        regex_literal(pattern)
    }
}

/// Locator, wait and action functions for one element
fn element_functions(
    element: &ResolvedElement,
    name: &str,
    strategy: &LocatorStrategy,
    ops: &BTreeSet<OpKind>,
    wait_ms: Option<u64>,
) -> Vec<Region> {
    let toast = element.is_toast();
    let (params, args) = if toast {
        ("page: Page, message: string", "page, message")
    } else {
        ("page: Page", "page")
    };
    let locator = if toast {
        format!("page.{}.filter({{ hasText: message }})", strategy.expression())
    } else {
        format!("page.{}", strategy.expression())
    };

    let mut doc = format!("/** {} */", element.description.replace("*/", "* /"));
    if let Some(debt) = &element.debt {
        if strategy.is_structural() {
            doc.push_str(&format!("\n// Selector debt: {}", debt.remediation));
        }
    }

    let mut regions = vec![Region::new(
        name.to_string(),
        format!(
            "{}\nexport function {}({}): Locator {{\n  return {};\n}}",
            doc, name, params, locator
        ),
    )];

    if let Some(timeout) = wait_ms {
        let wait = wait_name(name);
        regions.push(Region::new(
            wait.clone(),
            format!(
                "export async function {}({}): Promise<void> {{\n  await {}({}).waitFor({{ state: 'visible', timeout: {} }});\n}}",
                wait, params, name, args, timeout
            ),
        ));
    }

    for kind in ops {
        let Some(action) = action_name(*kind, name) else {
            continue;
        };
        let (extra_param, call) = match kind {
            OpKind::Fill => (", value: string", "fill(value)"),
            OpKind::Select => (", option: string", "selectOption(option)"),
            _ => ("", "click()"),
        };
        let mut lines = vec![format!(
            "export async function {}(page: Page{}): Promise<void> {{",
            action, extra_param
        )];
        if wait_ms.is_some() {
            lines.push(format!("  await {}(page);", wait_name(name)));
        }
        lines.push(format!("  await {}(page).{};", name, call));
        lines.push("}".to_string());
        regions.push(Region::new(action, lines.join("\n")));
    }
    regions
}

/// Import specifier from a directory to a module file, without extension
pub fn relative_import(from_dir: &Path, target: &Path) -> String {
    let normal = |p: &Path| -> Vec<String> {
        p.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    };
    let from = normal(from_dir);
    let mut to = normal(&target.with_extension(""));
    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();
    let ups = from.len() - common;
    let rest: Vec<String> = to.drain(common..).collect();
    let mut spec = if ups == 0 {
        "./".to_string()
    } else {
        "../".repeat(ups)
    };
    spec.push_str(&rest.join("/"));
    spec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_import() {
        assert_eq!(
            relative_import(Path::new("tests/smoke"), Path::new("modules/jrn-1.ts")),
            "../../modules/jrn-1"
        );
        assert_eq!(relative_import(Path::new("a"), Path::new("a/b.ts")), "./b");
    }

    #[test]
    fn test_url_matcher() {
        assert_eq!(url_matcher("/orders/*"), "'**/orders/*'");
        assert_eq!(url_matcher("/orders"), r"/\/orders/");
    }

    #[test]
    fn test_unique_names() {
        let mut taken = BTreeSet::new();
        assert_eq!(unique("saveButton".to_string(), &mut taken), "saveButton");
        assert_eq!(unique("saveButton".to_string(), &mut taken), "saveButton2");
    }
}
