//! Process exit signal

use stepwright_compiler::OutcomeStatus;

/// What the process reports to its caller. When several journeys are
/// processed the most severe signal wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitSignal {
    /// Fully compiled, and passing when verified
    #[default]
    Success,
    /// Structural error, generation conflict or any other hard error
    HardError,
    /// Compiled with blocked steps left for manual completion
    BlockedSteps,
    /// Compiled but blocked by verification
    VerificationFailed,
}

impl ExitSignal {
    pub fn code(self) -> i32 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::HardError => 2,
            ExitSignal::BlockedSteps => 3,
            ExitSignal::VerificationFailed => 4,
        }
    }

    fn severity(self) -> u8 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::BlockedSteps => 1,
            ExitSignal::VerificationFailed => 2,
            ExitSignal::HardError => 3,
        }
    }

    pub fn worst(self, other: ExitSignal) -> ExitSignal {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Signal for a journey that produced an outcome
    pub fn for_status(status: OutcomeStatus) -> ExitSignal {
        match status {
            OutcomeStatus::Compiled | OutcomeStatus::Passed | OutcomeStatus::Manual => ExitSignal::Success,
            OutcomeStatus::CompiledWithBlockedSteps => ExitSignal::BlockedSteps,
            OutcomeStatus::Blocked => ExitSignal::VerificationFailed,
        }
    }
}

impl FromIterator<ExitSignal> for ExitSignal {
    fn from_iter<I: IntoIterator<Item = ExitSignal>>(iter: I) -> Self {
        iter.into_iter().fold(ExitSignal::Success, ExitSignal::worst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_severe_wins() {
        let all = [
            ExitSignal::BlockedSteps,
            ExitSignal::Success,
            ExitSignal::VerificationFailed,
        ];
        assert_eq!(all.into_iter().collect::<ExitSignal>(), ExitSignal::VerificationFailed);
        assert_eq!(
            ExitSignal::VerificationFailed.worst(ExitSignal::HardError).code(),
            2
        );
        assert_eq!(ExitSignal::Success.worst(ExitSignal::BlockedSteps).code(), 3);
        assert_eq!(std::iter::empty::<ExitSignal>().collect::<ExitSignal>().code(), 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ExitSignal::for_status(OutcomeStatus::Passed), ExitSignal::Success);
        assert_eq!(
            ExitSignal::for_status(OutcomeStatus::CompiledWithBlockedSteps).code(),
            3
        );
        assert_eq!(ExitSignal::for_status(OutcomeStatus::Blocked).code(), 4);
    }
}
