//! The verify and heal loop against scripted runners

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stepwright_compiler::journey;
use stepwright_compiler::{
    ArtifactWriter, CompileContext, Compilation, CompiledJourney, Emitter, OutcomeStatus, PromotionPlan,
    StepwrightConfig, Tuning,
};
use stepwright_verify::{
    verify_all, BlockReason, ExecRequest, RunOutcome, RunReport, TestExecutor, TestFailure, VerifyResult,
    VerifySession, VerifyState,
};

const SAVE_NOT_FOUND: &str =
    "Error: locator.click: Timeout 30000ms exceeded.\nCall log:\n  - waiting for getByRole('button', { name: 'Save' })";

const SAVE_NOT_VISIBLE: &str = "Error: locator.click: Timeout 5000ms exceeded.\nCall log:\n  - waiting for getByRole('button', { name: 'Save' })\n  - element is not visible";

/// Replays a fixed sequence of reports, then repeats the fallback
struct ScriptedExecutor {
    script: Mutex<VecDeque<RunReport>>,
    fallback: RunReport,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(script: Vec<RunReport>, fallback: RunReport) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(&self, _request: &ExecRequest, _cancel: CancellationToken) -> VerifyResult<RunReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

fn failed(message: &str) -> RunReport {
    RunReport::failed(
        vec![TestFailure {
            title: "t".to_string(),
            message: message.to_string(),
            attachments: Vec::new(),
        }],
        Duration::from_millis(10),
    )
}

fn passed() -> RunReport {
    RunReport::passed(Duration::from_millis(10))
}

fn document(id: &str) -> String {
    format!(
        "---\nid: {}\ntitle: Save settings\nstatus: clarified\ntier: smoke\nactor: admin\n---\n\n## Acceptance Criteria\n\n- Settings are saved\n\n## Steps\n\n1. Navigate to /settings\n2. Click the \"Save\" button\n3. Verify the Saved heading is visible\n",
        id
    )
}

fn compile(ctx: &CompileContext, id: &str) -> CompiledJourney {
    match ctx.compile(journey::parse(&document(id), None).unwrap()).unwrap() {
        Compilation::Compiled(compiled) => compiled,
        Compilation::Manual { reason, .. } => panic!("not compiled: {}", reason),
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    ctx: CompileContext,
    emitter: Arc<Emitter>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let ctx = CompileContext::from_config(StepwrightConfig::default()).unwrap();
    let emitter = Arc::new(Emitter::new(ctx.config(), ArtifactWriter::new(&root, false)));
    Fixture {
        _dir: dir,
        root,
        ctx,
        emitter,
    }
}

fn expect_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| l.contains("expect("))
        .map(|l| l.trim().to_string())
        .collect()
}

#[tokio::test]
async fn test_heal_keeps_assertions_and_passes() {
    let fx = fixture();
    let compiled = compile(&fx.ctx, "JRN-0100");
    fx.emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let test_path = fx.root.join("tests/smoke/jrn-0100.spec.ts");
    let module_path = fx.root.join("modules/jrn-0100.ts");
    let asserts_before = expect_lines(&test_path);
    let module_before = fs::read_to_string(&module_path).unwrap();
    assert!(!asserts_before.is_empty());

    let executor = Arc::new(ScriptedExecutor::new(vec![failed(SAVE_NOT_FOUND)], passed()));
    let session = VerifySession::new(executor.clone(), fx.emitter.clone(), fx.ctx.config().verify.clone());
    let outcome = session
        .run(&compiled, PromotionPlan::empty(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, VerifyState::Passed);
    assert_eq!(outcome.runs, 2);
    assert_eq!(executor.calls(), 2);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].failure, "selector_not_found");
    assert_eq!(outcome.attempts[0].element.as_deref(), Some("button:save"));
    assert_eq!(outcome.attempts[0].result, "passed");
    assert!(!outcome.tuning.is_empty());

    assert_eq!(expect_lines(&test_path), asserts_before);
    assert_ne!(fs::read_to_string(&module_path).unwrap(), module_before);
    assert!(!fs::read_to_string(&module_path).unwrap().contains("waitForTimeout"));

    let mut generation = compiled.outcome(Vec::new());
    outcome.apply_to(&mut generation);
    assert_eq!(generation.status, OutcomeStatus::Passed);
    assert_eq!(generation.heal_attempts.len(), 1);
}

#[tokio::test]
async fn test_heal_budget_terminates_the_loop() {
    let fx = fixture();
    let compiled = compile(&fx.ctx, "JRN-0101");
    fx.emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new(Vec::new(), failed(SAVE_NOT_VISIBLE)));
    let config = fx.ctx.config().verify.clone();
    assert_eq!(config.heal_budget, 3);
    let session = VerifySession::new(executor.clone(), fx.emitter.clone(), config);
    let outcome = session
        .run(&compiled, PromotionPlan::empty(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.state,
        VerifyState::Blocked {
            reason: BlockReason::BudgetExhausted
        }
    );
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.runs, 4);
    assert_eq!(executor.calls(), 4);
    assert!(outcome.attempts.iter().all(|a| a.failure == "timing_race"));
    assert_eq!(outcome.tuning.get("button:save").wait_ms, Some(20000));

    let mut generation = compiled.outcome(Vec::new());
    outcome.apply_to(&mut generation);
    assert_eq!(generation.status, OutcomeStatus::Blocked);
    let verification = generation.verification.unwrap();
    assert!(verification.reason.unwrap().starts_with("budget_exhausted"));
}

#[tokio::test]
async fn test_missing_element_without_alternates_stops_after_wait() {
    let fx = fixture();
    let doc = document("JRN-0104").replace("Click the \"Save\" button", "Click the Save button");
    let compiled = match fx.ctx.compile(journey::parse(&doc, None).unwrap()).unwrap() {
        Compilation::Compiled(compiled) => compiled,
        Compilation::Manual { reason, .. } => panic!("not compiled: {}", reason),
    };
    assert_eq!(compiled.elements["button:save"].candidate_count(), 1);
    fx.emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new(Vec::new(), failed(SAVE_NOT_FOUND)));
    let session = VerifySession::new(executor.clone(), fx.emitter.clone(), fx.ctx.config().verify.clone());
    let outcome = session
        .run(&compiled, PromotionPlan::empty(), CancellationToken::new())
        .await
        .unwrap();

    // A condition wait is the only heal for a missing element with one locator
    assert_eq!(
        outcome.state,
        VerifyState::Blocked {
            reason: BlockReason::NoPermissibleHeal
        }
    );
    assert_eq!(executor.calls(), 2);
    assert_eq!(outcome.attempts.len(), 2);
    assert!(outcome.attempts[0].action.starts_with("add_wait"), "{}", outcome.attempts[0].action);
    assert_eq!(outcome.attempts[0].result, "failed: selector_not_found");
    assert_eq!(outcome.attempts[1].action, "none");

    let mut generation = compiled.outcome(Vec::new());
    outcome.apply_to(&mut generation);
    let reason = generation.verification.unwrap().reason.unwrap();
    assert!(reason.starts_with("no_permissible_heal: no heal left for selector_not_found on button:save"), "{}", reason);
    assert!(reason.contains("1 locator candidate(s)"));
    assert!(reason.contains("last failure: Error: locator.click"));
}

#[tokio::test]
async fn test_unclassifiable_failure_blocks_immediately() {
    let fx = fixture();
    let compiled = compile(&fx.ctx, "JRN-0102");
    fx.emitter
        .emit_journey(&compiled, &PromotionPlan::empty(), &Tuning::default())
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new(
        Vec::new(),
        failed("expect(received).toBe(expected)\nExpected: 3\nReceived: 2"),
    ));
    let session = VerifySession::new(executor.clone(), fx.emitter.clone(), fx.ctx.config().verify.clone());
    let outcome = session
        .run(&compiled, PromotionPlan::empty(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome.state,
        VerifyState::Blocked {
            reason: BlockReason::Unclassifiable
        }
    );
    assert!(outcome.attempts.is_empty());
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_timeout_blocks_without_healing() {
    let fx = fixture();
    let compiled = compile(&fx.ctx, "JRN-0103");
    let executor = Arc::new(ScriptedExecutor::new(
        Vec::new(),
        RunReport::interrupted(RunOutcome::TimedOut, Duration::from_secs(300)),
    ));
    let session = VerifySession::new(executor, fx.emitter.clone(), fx.ctx.config().verify.clone());
    let outcome = session
        .run(&compiled, PromotionPlan::empty(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome.state,
        VerifyState::Blocked {
            reason: BlockReason::Timeout
        }
    );
    assert_eq!(outcome.runs, 1);
    assert!(outcome.attempts.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_running() {
    let fx = fixture();
    let compiled = compile(&fx.ctx, "JRN-0104");
    let executor = Arc::new(ScriptedExecutor::new(Vec::new(), passed()));
    let session = VerifySession::new(executor.clone(), fx.emitter.clone(), fx.ctx.config().verify.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = session.run(&compiled, PromotionPlan::empty(), cancel).await.unwrap();
    assert_eq!(
        outcome.state,
        VerifyState::Blocked {
            reason: BlockReason::Cancelled
        }
    );
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_verify_all_orders_results() {
    let fx = fixture();
    let journeys = vec![compile(&fx.ctx, "JRN-0202"), compile(&fx.ctx, "JRN-0201")];
    for compiled in &journeys {
        fx.emitter
            .emit_journey(compiled, &PromotionPlan::empty(), &Tuning::default())
            .unwrap();
    }
    let mut config = fx.ctx.config().verify.clone();
    config.concurrency = 1;
    let executor = Arc::new(ScriptedExecutor::new(Vec::new(), passed()));

    let results = verify_all(
        executor.clone(),
        fx.emitter.clone(),
        &config,
        &PromotionPlan::empty(),
        journeys,
        CancellationToken::new(),
    )
    .await;

    let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["JRN-0201", "JRN-0202"]);
    assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().passed()));
    assert_eq!(executor.calls(), 2);
}
