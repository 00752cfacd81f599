//! Code generation, managed-region merging and promotion on a real filesystem

use std::fs;
use std::path::Path;

use stepwright_compiler::journey;
use stepwright_compiler::{
    ArtifactWriter, CompileContext, CompileError, Compilation, CompiledJourney, Emitter, PromotionPlan,
    StepwrightConfig, Tuning,
};

fn document(id: &str, steps: &[&str]) -> String {
    let mut doc = format!(
        "---\nid: {}\ntitle: Journey {}\nstatus: clarified\ntier: smoke\nactor: buyer\ntags: [checkout]\n---\n\n## Steps\n\n",
        id, id
    );
    for (i, step) in steps.iter().enumerate() {
        doc.push_str(&format!("{}. {}\n", i + 1, step));
    }
    doc
}

fn compile(ctx: &CompileContext, id: &str, steps: &[&str]) -> CompiledJourney {
    let parsed = journey::parse(&document(id, steps), None).unwrap();
    match ctx.compile(parsed).unwrap() {
        Compilation::Compiled(compiled) => compiled,
        Compilation::Manual { reason, .. } => panic!("not compiled: {}", reason),
    }
}

fn order_steps() -> Vec<&'static str> {
    vec![
        "Navigate to /orders/new",
        "Enter \"Widget\" in the Product field",
        "Click the \"Place order\" button",
        "Verify a success toast appears with \"Order placed\"",
    ]
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

#[test]
fn test_tests_call_modules_only() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let compiled = compile(&ctx, "JRN-0001", &order_steps());
    emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let test = read(dir.path(), "tests/smoke/jrn-0001.spec.ts");
    let module = read(dir.path(), "modules/jrn-0001.ts");

    assert!(test.contains("import * as journey from '../../modules/jrn-0001';"));
    assert!(test.contains("test('Journey JRN-0001 @smoke @checkout', async ({ page }) => {"));
    assert!(test.contains("await test.step('Step 1: Navigate to /orders/new', async () => {"));
    assert!(test.contains("await page.goto('/orders/new');"));
    assert!(test.contains("await journey.fillProductField(page, 'Widget');"));
    assert!(test.contains("await journey.clickPlaceOrderButton(page);"));
    assert!(test.contains("await expect(journey.successToast(page, 'Order placed')).toBeVisible();"));
    assert!(!test.contains("page.getBy"));
    assert!(!test.contains("page.locator("));
    assert!(!test.contains("waitForTimeout"));

    assert!(module.contains("export function placeOrderButton(page: Page): Locator {"));
    assert!(module.contains("return page.getByRole('button', { name: 'Place order' });"));
    assert!(module.contains("export async function clickPlaceOrderButton(page: Page): Promise<void> {"));
    assert!(module.contains("export function successToast(page: Page, message: string): Locator {"));
    assert!(module.contains("return page.getByRole('status').filter({ hasText: message });"));
}

#[test]
fn test_blocked_step_renders_fixme() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let compiled = compile(&ctx, "JRN-0002", &["Navigate to /orders", "Click the confirm element"]);
    emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();
    let test = read(dir.path(), "tests/smoke/jrn-0002.spec.ts");
    assert!(test.contains("test.fixme(true, 'Step 2 blocked: no locator anchor"));
}

#[test]
fn test_response_wait_starts_before_its_action() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let compiled = compile(
        &ctx,
        "JRN-0003",
        &[
            "Wait for the GET /api/session response",
            "Click the \"Place order\" button",
            "Wait for the POST /api/orders response",
        ],
    );
    emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();
    let test = read(dir.path(), "tests/smoke/jrn-0003.spec.ts");

    let armed = "const response3 = page.waitForResponse((response) => response.url().includes('/api/orders') && response.request().method() === 'POST');";
    let click = "await journey.clickPlaceOrderButton(page);";
    let awaited = "await response3;";
    let (a, c, w) = (
        test.find(armed).unwrap(),
        test.find(click).unwrap(),
        test.find(awaited).unwrap(),
    );
    assert!(a < c && c < w);
    assert!(test.find("await test.step('Step 2").unwrap() > a);

    // Nothing precedes the first wait, so it stays inline
    assert!(test.contains(
        "await page.waitForResponse((response) => response.url().includes('/api/session') && response.request().method() === 'GET');"
    ));
}

#[test]
fn test_regeneration_preserves_manual_edits() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let compiled = compile(&ctx, "JRN-0001", &order_steps());
    emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let test_path = dir.path().join("tests/smoke/jrn-0001.spec.ts");
    let mut edited = fs::read_to_string(&test_path).unwrap();
    edited.push_str("\n// Reviewed by QA\n");
    fs::write(&test_path, &edited).unwrap();

    let files = emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();
    assert!(files.iter().all(|f| !f.changed));
    assert_eq!(fs::read_to_string(&test_path).unwrap(), edited);
}

#[test]
fn test_hand_edited_region_blocks_the_journey() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let compiled = compile(&ctx, "JRN-0001", &order_steps());
    emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let test_path = dir.path().join("tests/smoke/jrn-0001.spec.ts");
    let edited = fs::read_to_string(&test_path)
        .unwrap()
        .replace("await page.goto('/orders/new');", "await page.goto('/orders/new?debug=1');");
    fs::write(&test_path, &edited).unwrap();

    let mut steps = order_steps();
    steps.push("Click the \"Done\" button");
    let changed = compile(&ctx, "JRN-0001", &steps);
    let module_before = read(dir.path(), "modules/jrn-0001.ts");

    match emitter
        .emit_journey(&changed, &PromotionPlan::empty(), &Tuning::default())
        .unwrap_err()
    {
        CompileError::GenerationConflict { region, .. } => assert_eq!(region, "step-1"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(fs::read_to_string(&test_path).unwrap(), edited);
    assert_eq!(read(dir.path(), "modules/jrn-0001.ts"), module_before);
}

#[test]
fn test_shared_elements_are_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let a = compile(&ctx, "JRN-0010", &["Navigate to /a", "Click the \"Save\" button"]);
    let b = compile(&ctx, "JRN-0011", &["Navigate to /b", "Click the \"Save\" button"]);

    let plan = ctx.plan_promotion(&[&a, &b]);
    assert_eq!(plan.shared_name("JRN-0010", "button:save"), Some("saveButton"));
    assert_eq!(plan.shared_name("JRN-0011", "button:save"), Some("saveButton"));

    emitter.emit_journey(&a, &plan, &Tuning::default()).unwrap();
    emitter.emit_journey(&b, &plan, &Tuning::default()).unwrap();
    assert!(emitter.emit_shared(&plan).unwrap().is_some());

    let shared = read(dir.path(), "modules/shared.ts");
    assert!(shared.contains("export function saveButton(page: Page): Locator {"));
    assert!(shared.contains("export async function clickSaveButton(page: Page): Promise<void> {"));

    let test = read(dir.path(), "tests/smoke/jrn-0010.spec.ts");
    assert!(test.contains("import * as shared from '../../modules/shared';"));
    assert!(test.contains("await shared.clickSaveButton(page);"));
    assert!(!read(dir.path(), "modules/jrn-0010.ts").contains("saveButton"));
}

#[test]
fn test_similar_elements_keep_their_own_locator() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StepwrightConfig::default();
    config.codegen.promotion_similarity = 0.6;
    let ctx = CompileContext::from_config(config).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
    let a = compile(&ctx, "JRN-0010", &["Click the \"Save\" button"]);
    let b = compile(&ctx, "JRN-0011", &["Click the \"Save draft\" button"]);
    let c = compile(&ctx, "JRN-0012", &["Click the \"Save\" button"]);

    let plan = ctx.plan_promotion(&[&a, &b, &c]);
    assert_eq!(plan.shared_name("JRN-0010", "button:save"), Some("saveButton"));
    assert_eq!(plan.shared_name("JRN-0012", "button:save"), Some("saveButton"));
    assert_eq!(plan.shared_name("JRN-0011", "button:save draft"), None);
    assert_eq!(plan.near_duplicates.len(), 1);
    assert_eq!(plan.near_duplicates[0].journey_id, "JRN-0011");
    assert_eq!(plan.near_duplicates[0].like_journey, "JRN-0010");

    emitter.emit_journey(&b, &plan, &Tuning::default()).unwrap();
    let test = read(dir.path(), "tests/smoke/jrn-0011.spec.ts");
    let module = read(dir.path(), "modules/jrn-0011.ts");
    assert!(test.contains("await journey.clickSaveDraftButton(page);"));
    assert!(!test.contains("shared."));
    assert!(module.contains("return page.getByRole('button', { name: 'Save draft' });"));
}

#[test]
fn test_similar_elements_alone_are_not_promoted() {
    let mut config = StepwrightConfig::default();
    config.codegen.promotion_similarity = 0.6;
    let ctx = CompileContext::from_config(config).unwrap();
    let a = compile(&ctx, "JRN-0010", &["Click the \"Save\" button"]);
    let b = compile(&ctx, "JRN-0011", &["Click the \"Save draft\" button"]);

    let plan = ctx.plan_promotion(&[&a, &b]);
    assert!(plan.is_empty());
    assert_eq!(plan.shared_name("JRN-0011", "button:save draft"), None);
    assert_eq!(plan.near_duplicates.len(), 1);
}

#[test]
fn test_promotion_disabled_without_modules() {
    let mut config = StepwrightConfig::default();
    config.codegen.generate_modules = false;
    let ctx = CompileContext::from_config(config).unwrap();
    let a = compile(&ctx, "JRN-0010", &["Click the \"Save\" button"]);
    let b = compile(&ctx, "JRN-0011", &["Click the \"Save\" button"]);
    assert!(ctx.plan_promotion(&[&a, &b]).is_empty());
}

#[test]
fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), true));
    let compiled = compile(&ctx, "JRN-0001", &order_steps());
    let files = emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].content.contains("stepwright:begin header"));
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}
