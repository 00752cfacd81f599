//! The verify and heal loop for one journey

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepwright_compiler::codegen::effective_strategy;
use stepwright_compiler::{
    CompiledJourney, Emitter, Evidence, GenerationOutcome, HealAttempt, OutcomeStatus, PromotionPlan, Tuning,
    VerificationSummary, VerifyConfig,
};

use crate::classify::{classify, ElementProbe, Failure};
use crate::error::VerifyResult;
use crate::executor::{ExecRequest, TestExecutor};
use crate::heal::{HealAction, HealPlanner, HealPolicy};
use crate::report::RunOutcome;
use crate::state::{BlockReason, StateMachine, VerifyEvent, VerifyState};

/// Action recorded for an attempt where no heal could be applied
const NO_ACTION: &str = "none";

/// How verification of one journey ended
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub journey_id: String,
    pub state: VerifyState,
    pub attempts: Vec<HealAttempt>,
    /// Tuning in effect at the end, as written to disk
    pub tuning: Tuning,
    pub runs: u32,
    /// First line of the last failure
    pub failure: Option<String>,
    pub evidence: Evidence,
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        self.state == VerifyState::Passed
    }

    /// Fold the verification result into a generation outcome
    pub fn apply_to(&self, outcome: &mut GenerationOutcome) {
        outcome.status = if self.passed() {
            OutcomeStatus::Passed
        } else {
            OutcomeStatus::Blocked
        };
        outcome.heal_attempts = self.attempts.clone();
        let reason = match self.state {
            VerifyState::Blocked { reason } => {
                // The closing attempt explains why the heal loop stopped early
                let stopped = match reason {
                    BlockReason::NoPermissibleHeal => self
                        .attempts
                        .last()
                        .filter(|a| a.action == NO_ACTION)
                        .map(|a| a.result.as_str()),
                    _ => None,
                };
                Some(match (stopped, self.failure.as_deref()) {
                    (Some(stopped), Some(failure)) => format!("{}: {} (last failure: {})", reason, stopped, failure),
                    (Some(detail), None) | (None, Some(detail)) => format!("{}: {}", reason, detail),
                    (None, None) => reason.to_string(),
                })
            }
            _ => None,
        };
        outcome.verification = Some(VerificationSummary {
            state: self.state.name().to_string(),
            reason,
            runs: self.runs,
            evidence: self.evidence.clone(),
        });
    }
}

/// Runs one compiled journey until it passes or is blocked
pub struct VerifySession<E: TestExecutor + ?Sized> {
    executor: Arc<E>,
    emitter: Arc<Emitter>,
    config: VerifyConfig,
    planner: HealPlanner,
    policy: HealPolicy,
}

impl<E: TestExecutor + ?Sized> VerifySession<E> {
    pub fn new(executor: Arc<E>, emitter: Arc<Emitter>, config: VerifyConfig) -> Self {
        Self {
            executor,
            emitter,
            planner: HealPlanner::new(&config),
            policy: HealPolicy,
            config,
        }
    }

    /// Verify a journey whose files are already written. `plan` is this
    /// run's promotion plan; demotions stay local to the session.
    pub async fn run(
        &self,
        compiled: &CompiledJourney,
        mut plan: PromotionPlan,
        cancel: CancellationToken,
    ) -> VerifyResult<VerifyOutcome> {
        let journey_id = compiled.journey.id.clone();
        let out_dir = self.emitter.writer().out_dir().to_path_buf();
        let request = ExecRequest {
            test_file: self.emitter.generator().test_path(compiled),
            working_dir: out_dir.clone(),
            timeout: Duration::from_secs(self.config.timeout_secs),
        };

        let mut machine = StateMachine::new(self.config.heal_budget);
        let mut tuning = Tuning::default();
        let mut attempts: Vec<HealAttempt> = Vec::new();
        let mut evidence = Evidence::default();
        let mut last_failure = None;

        machine.fire(VerifyEvent::Start)?;
        info!("Verifying {}", journey_id);

        loop {
            let report = if cancel.is_cancelled() {
                None
            } else {
                Some(self.executor.execute(&request, cancel.clone()).await?)
            };

            let outcome = report.as_ref().map(|r| r.outcome).unwrap_or(RunOutcome::Cancelled);
            match outcome {
                RunOutcome::Passed => {
                    if let Some(last) = attempts.last_mut() {
                        last.result = "passed".to_string();
                    }
                    machine.fire(VerifyEvent::RunPassed)?;
                    info!("{} passed after {} run(s)", journey_id, machine.runs());
                    break;
                }
                RunOutcome::TimedOut => {
                    last_failure = Some(format!("run exceeded {}s", self.config.timeout_secs));
                    machine.fire(VerifyEvent::TimedOut)?;
                    break;
                }
                RunOutcome::Cancelled => {
                    machine.fire(VerifyEvent::Cancelled)?;
                    break;
                }
                RunOutcome::Failed => {}
            }

            let Some(report) = report else { break };
            let failure = classify(&report, &probes(compiled, &tuning), &out_dir);
            debug!(
                "{} failed as {} (element {:?})",
                journey_id, failure.class, failure.element
            );
            evidence = failure.evidence.clone();
            last_failure = failure.message.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string);
            if let Some(last) = attempts.last_mut() {
                last.result = format!("failed: {}", failure.class);
            }

            machine.fire(VerifyEvent::RunFailed(failure.class))?;
            let attempt = match machine.fire(VerifyEvent::Escalate)? {
                VerifyState::Healing { attempt } => attempt,
                state => {
                    warn!("{} {}", journey_id, state);
                    break;
                }
            };

            match self.heal(compiled, &failure, &mut tuning, &mut plan)? {
                Ok(action) => {
                    info!("{}: heal {} applied {}", journey_id, attempt, action);
                    attempts.push(HealAttempt {
                        attempt,
                        failure: failure.class.to_string(),
                        element: failure.element.clone(),
                        action: action.to_string(),
                        result: "applied".to_string(),
                        evidence: failure.evidence.clone(),
                    });
                    machine.fire(VerifyEvent::HealApplied)?;
                }
                Err(reason) => {
                    warn!("{}: no permissible heal ({})", journey_id, reason);
                    attempts.push(HealAttempt {
                        attempt,
                        failure: failure.class.to_string(),
                        element: failure.element.clone(),
                        action: NO_ACTION.to_string(),
                        result: reason,
                        evidence: failure.evidence.clone(),
                    });
                    machine.fire(VerifyEvent::NoHeal)?;
                    break;
                }
            }
        }

        let state = machine.state();
        Ok(VerifyOutcome {
            journey_id,
            state,
            attempts,
            tuning,
            runs: machine.runs(),
            failure: if state == VerifyState::Passed { None } else { last_failure },
            evidence: if state == VerifyState::Passed {
                Evidence::default()
            } else {
                evidence
            },
        })
    }

    /// Propose, render and policy-check one heal, then write it. The inner
    /// `Err` explains why no heal could be applied.
    fn heal(
        &self,
        compiled: &CompiledJourney,
        failure: &Failure,
        tuning: &mut Tuning,
        plan: &mut PromotionPlan,
    ) -> VerifyResult<Result<HealAction, String>> {
        let Some(key) = failure.element.as_deref() else {
            return Ok(Err("failure names no known element".to_string()));
        };
        let Some(element) = compiled.elements.get(key) else {
            return Ok(Err(format!("unknown element {}", key)));
        };
        let Some(action) = self.planner.propose(failure, element, &tuning.get(key)) else {
            return Ok(Err(format!(
                "no heal left for {} on {} ({} locator candidate(s), wait {})",
                failure.class,
                key,
                element.candidate_count(),
                tuning
                    .get(key)
                    .wait_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "none".to_string())
            )));
        };

        let mut next_tuning = tuning.clone();
        action.apply(next_tuning.entry(key));
        let mut next_plan = plan.clone();
        next_plan.demote(&compiled.journey.id, key);

        let before = self.emitter.plan_journey(compiled, plan, tuning)?;
        let after = self.emitter.plan_journey(compiled, &next_plan, &next_tuning)?;
        if let Err(violation) = self.policy.validate(&before, &after) {
            return Ok(Err(format!("{} rejected: {}", action, violation)));
        }

        self.emitter.writer().commit(&after)?;
        *tuning = next_tuning;
        *plan = next_plan;
        Ok(Ok(action))
    }
}

/// Locator expressions the journey currently renders, for naming the failing
/// element
fn probes(compiled: &CompiledJourney, tuning: &Tuning) -> Vec<ElementProbe> {
    compiled
        .elements
        .values()
        .filter_map(|element| {
            let strategy = effective_strategy(element, &tuning.get(&element.key)).ok()?;
            Some(ElementProbe {
                key: element.key.clone(),
                expression: strategy.expression(),
            })
        })
        .collect()
}
