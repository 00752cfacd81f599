//! Verification state machine
//!
//! ```text
//!  Generated --start--> Running --passed--> Passed
//!                          |  \--failed--> Failed --escalate--> Healing --heal applied--> Running
//!                          |                  |                    \--no heal--> Blocked
//!                          \--timeout/cancel--+--unclassifiable/budget--> Blocked
//! ```
//!
//! `Passed` and `Blocked` are terminal. Every other transition is rejected.

use serde::Serialize;
use std::fmt;

use crate::classify::FailureClass;
use crate::error::{VerifyError, VerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Timeout,
    Cancelled,
    Unclassifiable,
    BudgetExhausted,
    NoPermissibleHeal,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Timeout => "timeout",
            BlockReason::Cancelled => "cancelled",
            BlockReason::Unclassifiable => "unclassifiable",
            BlockReason::BudgetExhausted => "budget_exhausted",
            BlockReason::NoPermissibleHeal => "no_permissible_heal",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerifyState {
    Generated,
    Running { attempt: u32 },
    Passed,
    Failed { class: FailureClass },
    Healing { attempt: u32 },
    Blocked { reason: BlockReason },
}

impl VerifyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerifyState::Passed | VerifyState::Blocked { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            VerifyState::Generated => "generated",
            VerifyState::Running { .. } => "running",
            VerifyState::Passed => "passed",
            VerifyState::Failed { .. } => "failed",
            VerifyState::Healing { .. } => "healing",
            VerifyState::Blocked { .. } => "blocked",
        }
    }
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyState::Running { attempt } | VerifyState::Healing { attempt } => {
                write!(f, "{}({})", self.name(), attempt)
            }
            VerifyState::Failed { class } => write!(f, "failed({})", class),
            VerifyState::Blocked { reason } => write!(f, "blocked({})", reason),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyEvent {
    Start,
    RunPassed,
    RunFailed(FailureClass),
    TimedOut,
    Cancelled,
    /// Decide between healing and blocking after a failure
    Escalate,
    HealApplied,
    NoHeal,
}

/// Tracks one journey's verification and enforces the heal budget
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: VerifyState,
    budget: u32,
    heals: u32,
    runs: u32,
}

impl StateMachine {
    pub fn new(budget: u32) -> Self {
        Self {
            state: VerifyState::Generated,
            budget,
            heals: 0,
            runs: 0,
        }
    }

    pub fn state(&self) -> VerifyState {
        self.state
    }

    /// Heal attempts started so far
    pub fn heals(&self) -> u32 {
        self.heals
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn fire(&mut self, event: VerifyEvent) -> VerifyResult<VerifyState> {
        use VerifyEvent as E;
        use VerifyState as S;

        let next = match (self.state, event) {
            (S::Generated, E::Start) | (S::Healing { .. }, E::HealApplied) => {
                self.runs += 1;
                S::Running { attempt: self.runs }
            }
            (S::Running { .. }, E::RunPassed) => S::Passed,
            (S::Running { .. }, E::RunFailed(class)) => S::Failed { class },
            (S::Running { .. }, E::TimedOut) => S::Blocked {
                reason: BlockReason::Timeout,
            },
            (S::Running { .. }, E::Cancelled) | (S::Healing { .. }, E::Cancelled) => S::Blocked {
                reason: BlockReason::Cancelled,
            },
            (S::Failed { class }, E::Escalate) => {
                if class == FailureClass::Unclassifiable {
                    S::Blocked {
                        reason: BlockReason::Unclassifiable,
                    }
                } else if self.heals >= self.budget {
                    S::Blocked {
                        reason: BlockReason::BudgetExhausted,
                    }
                } else {
                    self.heals += 1;
                    S::Healing { attempt: self.heals }
                }
            }
            (S::Healing { .. }, E::NoHeal) => S::Blocked {
                reason: BlockReason::NoPermissibleHeal,
            },
            (from, to) => {
                return Err(VerifyError::IllegalTransition {
                    from: from.to_string(),
                    to: format!("{:?}", to),
                })
            }
        };
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_on_first_run() {
        let mut sm = StateMachine::new(3);
        sm.fire(VerifyEvent::Start).unwrap();
        assert_eq!(sm.fire(VerifyEvent::RunPassed).unwrap(), VerifyState::Passed);
        assert_eq!(sm.runs(), 1);
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn test_budget_bounds_the_loop() {
        let mut sm = StateMachine::new(2);
        sm.fire(VerifyEvent::Start).unwrap();
        let mut transitions = 1;
        while !sm.state().is_terminal() {
            let event = match sm.state() {
                VerifyState::Running { .. } => VerifyEvent::RunFailed(FailureClass::TimingRace),
                VerifyState::Failed { .. } => VerifyEvent::Escalate,
                VerifyState::Healing { .. } => VerifyEvent::HealApplied,
                other => panic!("unexpected state {}", other),
            };
            sm.fire(event).unwrap();
            transitions += 1;
            assert!(transitions <= 3 * 2 + 3);
        }
        assert_eq!(
            sm.state(),
            VerifyState::Blocked {
                reason: BlockReason::BudgetExhausted
            }
        );
        assert_eq!(sm.heals(), 2);
        assert_eq!(sm.runs(), 3);
    }

    #[test]
    fn test_unclassifiable_blocks_without_healing() {
        let mut sm = StateMachine::new(3);
        sm.fire(VerifyEvent::Start).unwrap();
        sm.fire(VerifyEvent::RunFailed(FailureClass::Unclassifiable)).unwrap();
        assert_eq!(
            sm.fire(VerifyEvent::Escalate).unwrap(),
            VerifyState::Blocked {
                reason: BlockReason::Unclassifiable
            }
        );
        assert_eq!(sm.heals(), 0);
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut sm = StateMachine::new(1);
        assert!(matches!(
            sm.fire(VerifyEvent::RunPassed),
            Err(VerifyError::IllegalTransition { .. })
        ));
        sm.fire(VerifyEvent::Start).unwrap();
        sm.fire(VerifyEvent::RunPassed).unwrap();
        assert!(sm.fire(VerifyEvent::Start).is_err());
        assert_eq!(sm.state(), VerifyState::Passed);
    }

    #[test]
    fn test_zero_budget_blocks_on_first_failure() {
        let mut sm = StateMachine::new(0);
        sm.fire(VerifyEvent::Start).unwrap();
        sm.fire(VerifyEvent::RunFailed(FailureClass::SelectorNotFound)).unwrap();
        assert_eq!(
            sm.fire(VerifyEvent::Escalate).unwrap(),
            VerifyState::Blocked {
                reason: BlockReason::BudgetExhausted
            }
        );
    }
}
