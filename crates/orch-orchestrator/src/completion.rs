//! Early-exit check wired in before each step: if the plan's completion
//! criteria are already satisfied (a resumed session already produced the
//! goal), the orchestrator can short-circuit straight to `Complete` instead
//! of redoing work. Grounded in the teacher domain's three-tier completion
//! check: artifacts, then signals, then command checks.

use std::path::Path;
use std::time::Duration;

use orch_core::types::CompletionCriteria;
use orch_memory::SessionMemory;

const COMMAND_CHECK_TIMEOUT_SECS: u64 = 5;

pub struct CompletionChecker;

impl CompletionChecker {
    pub fn new() -> Self {
        CompletionChecker
    }

    /// Returns `(true, reason)` on the first satisfied check, in order:
    /// required artifacts, then success signals, then command checks.
    pub async fn is_complete(
        &self,
        criteria: &CompletionCriteria,
        workspace_root: &Path,
        memory: &SessionMemory,
    ) -> (bool, String) {
        if criteria.is_empty() {
            return (false, String::new());
        }

        if let Some(found) = check_artifacts(criteria, workspace_root) {
            return (true, format!("required artifact already present: {found}"));
        }

        if let Some(signal) = check_signals(criteria, memory) {
            return (true, format!("success signal already observed: {signal}"));
        }

        if let Some(cmd) = check_commands(criteria, workspace_root).await {
            return (true, format!("command check already satisfied: {cmd}"));
        }

        (false, String::new())
    }
}

impl Default for CompletionChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_artifacts(criteria: &CompletionCriteria, workspace_root: &Path) -> Option<String> {
    for artifact in &criteria.required_artifacts {
        let candidate = Path::new(artifact);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            workspace_root.join(candidate)
        };
        if resolved.is_file() {
            return Some(artifact.clone());
        }
    }
    None
}

fn check_signals(criteria: &CompletionCriteria, memory: &SessionMemory) -> Option<String> {
    for signal in &criteria.success_signals {
        let signal_upper = signal.to_uppercase();

        let in_tool_history = memory
            .tool_history
            .iter()
            .any(|entry| entry.result.as_deref().unwrap_or_default().to_uppercase().contains(&signal_upper));
        if in_tool_history {
            return Some(signal.clone());
        }

        let in_artifacts = memory
            .artifacts
            .values()
            .flatten()
            .any(|path| path.to_uppercase().contains(&signal_upper));
        if in_artifacts {
            return Some(signal.clone());
        }
    }
    None
}

async fn check_commands(criteria: &CompletionCriteria, workspace_root: &Path) -> Option<String> {
    for cmd in &criteria.command_checks {
        let options = orch_process::SpawnOptions {
            cwd: Some(workspace_root.to_path_buf()),
            env: Vec::new(),
            idle_timeout: Duration::from_secs(COMMAND_CHECK_TIMEOUT_SECS),
        };
        let result = orch_process::run_and_capture("sh", &["-c".to_string(), cmd.clone()], options).await;
        if let Ok(result) = result {
            if result.exit_code == 0 {
                return Some(cmd.clone());
            }
        }
    }
    None
}
