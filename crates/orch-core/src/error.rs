//! Error taxonomy for the orchestration engine.
//!
//! One variant per category from the error-handling design: each carries enough
//! context to build retry feedback without the caller re-deriving it, and exposes
//! `severity()`/`recoverable()` so the orchestrator's propagation policy can stay
//! generic over the specific failure.

use crate::state::OrchestratorState;

/// Severity of an error, independent of whether it's recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    Warning,
    Critical,
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Skill '{0}' not found in registry")]
    SkillNotFound(String),

    #[error("Planning failed: {0}")]
    PlanningError(String),

    #[error("Step {step_id} execution failed: {reason}")]
    StepExecutionError { step_id: u32, reason: String },

    #[error("Step {step_id}: missing expected artifacts: {}", paths.join(", "))]
    ArtifactMissing { step_id: u32, paths: Vec<String> },

    #[error("Step {step_id}: hallucinated artifacts reported: {}", paths.join(", "))]
    ArtifactHallucinated { step_id: u32, paths: Vec<String> },

    #[error("Step {step_id}: critic rejected - {feedback}")]
    CriticRejection { step_id: u32, feedback: String },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: OrchestratorState,
        to: OrchestratorState,
    },

    #[error("Self-healing failed: replan for step {step_id} returned no steps")]
    SelfHealingFailed { step_id: u32 },

    #[error("LLM provider error: {0}")]
    LlmError(String),

    #[error("Tool server error: {0}")]
    ToolServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Filesystem error: {0}")]
    FileSystemError(#[from] std::io::Error),
}

impl AppError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::SkillNotFound(_)
            | AppError::InvalidStateTransition { .. }
            | AppError::SelfHealingFailed { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Warning,
        }
    }

    pub fn recoverable(&self) -> bool {
        !matches!(self.severity(), ErrorSeverity::Critical)
    }

    /// Render this error as `retry_feedback` text to hand to the next attempt's prompt.
    pub fn as_retry_feedback(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn app_error_is_send_sync() {
        assert_send_sync::<AppError>();
    }

    #[test]
    fn skill_not_found_message() {
        let e = AppError::SkillNotFound("pdf-merge".into());
        assert_eq!(e.to_string(), "Skill 'pdf-merge' not found in registry");
        assert_eq!(e.severity(), ErrorSeverity::Critical);
        assert!(!e.recoverable());
    }

    #[test]
    fn artifact_missing_message_joins_paths() {
        let e = AppError::ArtifactMissing {
            step_id: 2,
            paths: vec!["out/a.txt".into(), "out/b.txt".into()],
        };
        assert_eq!(
            e.to_string(),
            "Step 2: missing expected artifacts: out/a.txt, out/b.txt"
        );
        assert_eq!(e.severity(), ErrorSeverity::Warning);
        assert!(e.recoverable());
    }

    #[test]
    fn critic_rejection_is_recoverable_warning() {
        let e = AppError::CriticRejection {
            step_id: 5,
            feedback: "missing closing paren".into(),
        };
        assert!(e.recoverable());
        assert_eq!(e.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn invalid_transition_is_critical() {
        let e = AppError::InvalidStateTransition {
            from: OrchestratorState::Complete,
            to: OrchestratorState::Planning,
        };
        assert_eq!(e.severity(), ErrorSeverity::Critical);
        assert!(!e.recoverable());
    }

    #[test]
    fn self_healing_failed_is_critical() {
        let e = AppError::SelfHealingFailed { step_id: 3 };
        assert!(!e.recoverable());
    }

    #[test]
    fn filesystem_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("Filesystem error"));
        assert!(e.recoverable());
    }
}
