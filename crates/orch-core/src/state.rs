//! Orchestrator state machine: the fixed set of phases and the valid-transition table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestratorState {
    Initializing,
    Discovery,
    Planning,
    Executing,
    Verifying,
    Critiquing,
    SelfHealing,
    Complete,
    Failed,
}

impl OrchestratorState {
    /// Whether transitioning from `self` to `next` is permitted.
    pub fn can_transition_to(self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Initializing, Discovery)
                | (Discovery, Planning)
                | (Discovery, Failed)
                | (Planning, Executing)
                | (Planning, Failed)
                | (Executing, Verifying)
                | (Executing, Complete)
                | (Executing, Failed)
                | (Verifying, Critiquing)
                | (Verifying, Executing)
                | (Verifying, SelfHealing)
                | (Critiquing, Executing)
                | (Critiquing, SelfHealing)
                | (SelfHealing, Executing)
                | (SelfHealing, Failed)
                | (Executing, SelfHealing)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OrchestratorState::*;

    #[test]
    fn initializing_only_goes_to_discovery() {
        assert!(Initializing.can_transition_to(Discovery));
        assert!(!Initializing.can_transition_to(Planning));
        assert!(!Initializing.can_transition_to(Complete));
    }

    #[test]
    fn complete_and_failed_are_terminal() {
        for s in [
            Initializing,
            Discovery,
            Planning,
            Executing,
            Verifying,
            Critiquing,
            SelfHealing,
            Complete,
            Failed,
        ] {
            assert!(!Complete.can_transition_to(s) || s == Complete && false);
            assert!(!Failed.can_transition_to(s));
        }
    }

    #[test]
    fn self_healing_can_recover_or_abort() {
        assert!(SelfHealing.can_transition_to(Executing));
        assert!(SelfHealing.can_transition_to(Failed));
        assert!(!SelfHealing.can_transition_to(Complete));
    }

    #[test]
    fn executing_reaches_complete_directly_when_no_steps_remain() {
        assert!(Executing.can_transition_to(Complete));
    }
}
