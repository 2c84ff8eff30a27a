//! Top-level coordinator: sequences discovery, planning, execution, and the
//! retry/critic/replan loop. Grounded in the teacher domain's orchestrator
//! main loop, generalized to the `LlmProvider`/`SkillRegistry` boundaries.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use orch_core::error::AppError;
use orch_core::llm::{LlmProvider, Message};
use orch_core::state::OrchestratorState;
use orch_core::types::{AtomicPlannerInput, CriticDecision, CriticInput, Plan, SkillStep, StepExecutorInput};
use orch_critic::Critic;
use orch_executor::StepExecutor;
use orch_memory::SessionMemory;
use orch_planner::AtomicPlanner;
use orch_skills::SkillRegistry;
use orch_telemetry::Telemetry;
use orch_verifier::verify_artifacts;
use serde_json::json;

use crate::completion::CompletionChecker;

const IGNORED_DIR_NAMES: &[&str] = &[".git", ".venv", "node_modules", "__pycache__", "target", ".agent"];
const STEP_COMPLETE_SIGNAL: &str = "[STEP_COMPLETE]";
const STATUS_TEMPLATE: &str = "Task: {task_input}\n\nSOP progress:\n{sop_context}\n\nRoadmap:\n{roadmap}\n\nFile cache:\n{clipboard}\n\nAlerts:\n{alerts}\n\nStep {step_id}: {step_title}";

/// Tunables for one `Orchestrator` run. No config-file parsing lives here;
/// callers construct this directly or take the defaults.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub react_max_cycles: u32,
    pub max_react_steps: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig { max_retries: 2, react_max_cycles: 15, max_react_steps: 15 }
    }
}

/// Terminal result of a run: either state is `Complete` or `Failed`, with a
/// human-readable summary the caller can print.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub state: OrchestratorState,
    pub message: String,
}

pub struct Orchestrator<'a> {
    llm: &'a dyn LlmProvider,
    telemetry: &'a Telemetry,
    skills: SkillRegistry,
    memory: SessionMemory,
    state: OrchestratorState,
    config: OrchestratorConfig,
}

enum AttemptOutcome {
    Advance,
    Retry { feedback: String },
    Exhausted { reason: String },
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        llm: &'a dyn LlmProvider,
        telemetry: &'a Telemetry,
        skills: SkillRegistry,
        memory: SessionMemory,
    ) -> Self {
        Self::with_config(llm, telemetry, skills, memory, OrchestratorConfig::default())
    }

    pub fn with_config(
        llm: &'a dyn LlmProvider,
        telemetry: &'a Telemetry,
        skills: SkillRegistry,
        memory: SessionMemory,
        config: OrchestratorConfig,
    ) -> Self {
        Orchestrator { llm, telemetry, skills, memory, state: OrchestratorState::Initializing, config }
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) -> Result<(), AppError> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition { from: self.state, to: next });
        }
        self.telemetry.info(
            "orchestrator",
            "state_change",
            json!({"from": format!("{:?}", self.state), "to": format!("{:?}", next)}),
        );
        self.state = next;
        Ok(())
    }

    /// Runs the full discovery -> planning -> execution loop for `query`.
    /// Internal errors are caught, logged as a critical telemetry event, and
    /// folded into a `Failed` outcome rather than propagated to the caller —
    /// printing a pass/fail banner is a CLI concern outside this library.
    pub async fn run(&mut self, query: &str) -> OrchestratorOutcome {
        match self.run_inner(query).await {
            Ok(()) => OrchestratorOutcome { state: self.state, message: "mission complete".to_string() },
            Err(err) => {
                self.telemetry.error("orchestrator", "run_failed", json!({"reason": err.to_string()}));
                let _ = self.transition(OrchestratorState::Failed);
                OrchestratorOutcome { state: OrchestratorState::Failed, message: err.to_string() }
            }
        }
    }

    async fn run_inner(&mut self, query: &str) -> Result<(), AppError> {
        self.transition(OrchestratorState::Discovery)?;
        let skill_name = self.discover_skill(query).await?;

        let skill_content = self
            .skills
            .get_content(&skill_name)
            .map_err(|e| AppError::SkillNotFound(e.to_string()))?;
        let resources = self.skills.list_resources(&skill_name).unwrap_or_default();

        self.transition(OrchestratorState::Planning)?;
        let planner = AtomicPlanner::new(self.llm, self.telemetry);
        let mut plan = planner
            .plan(AtomicPlannerInput {
                query: query.to_string(),
                skill_content: skill_content.clone(),
                resources,
            })
            .await;

        if plan.steps.is_empty() {
            self.transition(OrchestratorState::Failed)?;
            return Err(AppError::PlanningError("planner produced zero steps".to_string()));
        }

        self.enforce_required_scripts(&skill_name, &mut plan);
        self.memory.save_plan(plan);
        self.memory.persist_plan_to_file();

        self.transition(OrchestratorState::Executing)?;

        let completion_checker = CompletionChecker::new();
        let mut step_idx = 0usize;

        'steps: loop {
            let steps_len = self.memory.get_plan().map(|p| p.steps.len()).unwrap_or(0);
            if step_idx >= steps_len {
                break;
            }

            let criteria = self.memory.get_plan().map(|p| p.completion_criteria.clone()).unwrap_or_default();
            let workspace_root = self.memory.workspace_root.clone();
            let (complete, reason) = completion_checker.is_complete(&criteria, &workspace_root, &self.memory).await;
            if complete {
                self.telemetry.info("orchestrator", "completion_checker_short_circuit", json!({"reason": reason}));
                break 'steps;
            }

            let step_id = self.memory.get_plan().map(|p| p.steps[step_idx].id);
            self.memory.set_current_step(step_id);
            self.memory.persist_plan_to_file();

            let mut retry_feedback: Option<String> = None;
            let mut outcome = AttemptOutcome::Retry { feedback: String::new() };

            for attempt in 1..=(self.config.max_retries + 1) {
                let step = self.memory.get_plan().unwrap().steps[step_idx].clone();
                outcome = self
                    .run_step_attempt(&skill_name, &skill_content, query, &step, attempt, retry_feedback.take())
                    .await;

                match &outcome {
                    AttemptOutcome::Advance => break,
                    AttemptOutcome::Retry { feedback } => retry_feedback = Some(feedback.clone()),
                    AttemptOutcome::Exhausted { .. } => break,
                }
            }

            match outcome {
                AttemptOutcome::Advance => {
                    step_idx += 1;
                }
                AttemptOutcome::Retry { .. } => {
                    // Exhausted the attempt budget while still in "retry" state: self-heal.
                    self.self_heal(&mut step_idx, &skill_name, &skill_content).await?;
                }
                AttemptOutcome::Exhausted { reason } => {
                    self.telemetry.warning("orchestrator", "step_exhausted", json!({"reason": reason}));
                    self.self_heal(&mut step_idx, &skill_name, &skill_content).await?;
                }
            }
        }

        self.transition(OrchestratorState::Complete)?;
        Ok(())
    }

    async fn self_heal(&mut self, step_idx: &mut usize, skill_name: &str, skill_content: &str) -> Result<(), AppError> {
        self.transition(OrchestratorState::SelfHealing)?;
        let plan = self.memory.get_plan().cloned().unwrap_or_default();
        let failed_step = plan.steps.get(*step_idx).cloned().unwrap_or_default();

        let planner = AtomicPlanner::new(self.llm, self.telemetry);
        let suffix = planner
            .replan(&failed_step, "exhausted retry budget", skill_content)
            .await;

        if suffix.steps.is_empty() {
            self.transition(OrchestratorState::Failed)?;
            return Err(AppError::SelfHealingFailed { step_id: failed_step.id });
        }

        let mut new_steps: Vec<SkillStep> = plan.steps[..*step_idx].to_vec();
        new_steps.extend(suffix.steps);
        for (idx, step) in new_steps.iter_mut().enumerate() {
            step.id = (idx + 1) as u32;
        }

        let mut new_plan = Plan { steps: new_steps, reasoning: plan.reasoning, completion_criteria: plan.completion_criteria };
        self.enforce_required_scripts(skill_name, &mut new_plan);
        self.memory.save_plan(new_plan);
        self.memory.persist_plan_to_file();

        self.transition(OrchestratorState::Executing)?;
        // step_idx stays the same: the first recovery step executes next.
        Ok(())
    }

    async fn run_step_attempt(
        &mut self,
        skill_name: &str,
        skill_content: &str,
        query: &str,
        step: &SkillStep,
        attempt: u32,
        retry_feedback: Option<String>,
    ) -> AttemptOutcome {
        if step.is_script_step() {
            match self.run_script_step(skill_name, step, query).await {
                Some(outcome) => return outcome,
                None => { /* script failed; fall through to LLM path */ }
            }
        }

        self.run_llm_step(skill_name, skill_content, query, step, attempt, retry_feedback).await
    }

    /// Returns `Some(outcome)` on script success or final-attempt script
    /// failure; `None` to fall through to the LLM path.
    async fn run_script_step(&mut self, skill_name: &str, step: &SkillStep, query: &str) -> Option<AttemptOutcome> {
        let (script_name, args) = resolve_script_invocation(step, query)?;
        let active_folder = self.memory.active_folder();
        let result = self
            .skills
            .run_script(skill_name, &script_name, &args, Some(&active_folder))
            .await;

        match result {
            Ok(output) if output.starts_with("[SUCCESS]") => {
                if script_name.to_lowercase().contains("init") {
                    if let Some(newest) = find_newest_subdirectory(&active_folder) {
                        self.memory.set_project_root(&newest);
                    }
                }
                self.memory.update_step_status(step.id, orch_core::types::StepStatus::Done);
                Some(AttemptOutcome::Advance)
            }
            _ => None,
        }
    }

    async fn run_llm_step(
        &mut self,
        skill_name: &str,
        skill_content: &str,
        query: &str,
        step: &SkillStep,
        attempt: u32,
        retry_feedback: Option<String>,
    ) -> AttemptOutcome {
        let active_folder = self.memory.active_folder();
        let roadmap = self.memory.get_roadmap();
        let recent_paths = self.memory.get_recent_file_paths(2);
        let clipboard_subset = self.memory.get_clipboard_subset(&recent_paths);
        let clipboard_rendered = clipboard_subset
            .iter()
            .map(|(path, content)| format!("### {path}\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut alerts = Vec::new();
        if let Some(feedback) = &retry_feedback {
            alerts.push(format!("Previous attempt feedback: {feedback}"));
        }

        let input = StepExecutorInput {
            task_input: if step.task_query.is_empty() { query.to_string() } else { step.task_query.clone() },
            active_folder: active_folder.to_string_lossy().into_owned(),
            roadmap: roadmap.clone(),
            session_context: json!({
                "artifacts": self.memory.artifacts,
                "env_vars": self.memory.env_vars,
            })
            .to_string(),
            expectations: step.expected_artifacts.clone(),
            clipboard: clipboard_rendered,
            step_content: step.content.clone(),
            sop_context: render_sop(self.memory.get_plan().map(|p| p.steps.as_slice()).unwrap_or(&[]), step.id),
            skill_context: skill_content.to_string(),
            alerts,
        };

        // Already in Executing on entry (set by the step loop, or by the
        // Verifying/Critiquing -> Executing transitions below on a retry);
        // no redundant self-transition here.
        let executor = StepExecutor::new(self.llm, self.telemetry)
            .with_cycle_limits(self.config.react_max_cycles, self.config.max_react_steps);
        let output = executor
            .execute(skill_name, step, attempt, input, STATUS_TEMPLATE, &mut self.memory)
            .await;

        if !output.success {
            return retry_or_exhaust(attempt, self.config.max_retries, output.feedback);
        }

        let _ = self.transition(OrchestratorState::Verifying);
        let verify_outcome = verify_artifacts(&output.output, &active_folder, &step.expected_artifacts, step.id, &mut self.memory);

        let step_complete_signal = output.output.contains(STEP_COMPLETE_SIGNAL);
        let artifacts_satisfied = !step.expected_artifacts.is_empty() && verify_outcome.missing.is_empty();
        let should_dispatch_to_critic = step_complete_signal || artifacts_satisfied || step.is_script_step();

        if !should_dispatch_to_critic {
            if !verify_outcome.missing.is_empty() {
                let _ = self.transition(OrchestratorState::Executing);
                self.memory.log_agent_feedback(step.id, "verifier", missing_feedback(&verify_outcome.missing), "verifier_missing");
                return retry_or_exhaust(attempt, self.config.max_retries, missing_feedback(&verify_outcome.missing));
            }
            if !verify_outcome.hallucinated.is_empty() && verify_outcome.verified.is_empty() {
                let _ = self.transition(OrchestratorState::Executing);
                self.memory.log_agent_feedback(step.id, "verifier", hallucinated_feedback(&verify_outcome.hallucinated), "verifier_hallucinated");
                return retry_or_exhaust(attempt, self.config.max_retries, hallucinated_feedback(&verify_outcome.hallucinated));
            }
        }

        let _ = self.transition(OrchestratorState::Critiquing);
        let critic = Critic::new(self.llm);
        let critic_input = CriticInput {
            step_id: step.id,
            step_title: step.title.clone(),
            worker_output: output.output.clone(),
            active_folder: active_folder.to_string_lossy().into_owned(),
            roadmap,
            global_context: skill_content.to_string(),
            expectations: step.expected_artifacts.clone(),
        };
        let verdict = critic.review(step, critic_input, &mut self.memory).await;

        match verdict.decision {
            CriticDecision::Approved => {
                self.memory.update_step_status(step.id, orch_core::types::StepStatus::Done);
                if let Some(newest) = find_newest_subdirectory(&active_folder) {
                    self.memory.update_active_folder(Some(&newest));
                }
                let _ = self.transition(OrchestratorState::Executing);
                AttemptOutcome::Advance
            }
            CriticDecision::Rejected => {
                let _ = self.transition(OrchestratorState::Executing);
                retry_or_exhaust(attempt, self.config.max_retries, verdict.feedback)
            }
        }
    }

    async fn discover_skill(&self, query: &str) -> Result<String, AppError> {
        let catalog = self
            .skills
            .list()
            .into_iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            Message::system(format!("Available skills:\n{catalog}")),
            Message::user(format!(
                "Which skill best matches this request? Respond with a line `SKILL_NAME: <name>`.\n\n{query}"
            )),
        ];

        let response = self
            .llm
            .chat(&messages, None)
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?;

        let name = response
            .content
            .lines()
            .find_map(|l| l.strip_prefix("SKILL_NAME:").map(|n| n.trim().to_string()));

        match name {
            Some(name) if self.skills.list().iter().any(|s| s.name == name) => Ok(name),
            _ => Err(AppError::SkillNotFound(query.to_string())),
        }
    }

    /// Inserts a synthetic step for every manual-mandated script not already
    /// referenced by an existing step, then re-indexes sequentially.
    fn enforce_required_scripts(&self, skill_name: &str, plan: &mut Plan) {
        let required = self.skills.required_scripts(skill_name).unwrap_or_default();
        for script in &required {
            if plan.steps.iter().any(|s| step_mentions_script(s, script)) {
                continue;
            }
            let anchor = plan.steps.iter().rposition(|s| required.iter().any(|r| step_mentions_script(s, r)));
            let insert_at = anchor.map(|i| i + 1).unwrap_or(plan.steps.len());
            let synthetic = SkillStep {
                title: format!("Run required script: {script}"),
                task_query: format!("scripts/{script}"),
                references: vec![format!("scripts/{script}")],
                ..Default::default()
            };
            plan.steps.insert(insert_at.min(plan.steps.len()), synthetic);
        }
        for (idx, step) in plan.steps.iter_mut().enumerate() {
            step.id = (idx + 1) as u32;
        }
    }
}

fn retry_or_exhaust(attempt: u32, max_retries: u32, feedback: String) -> AttemptOutcome {
    if attempt > max_retries {
        AttemptOutcome::Exhausted { reason: feedback }
    } else {
        AttemptOutcome::Retry { feedback }
    }
}

fn missing_feedback(missing: &[String]) -> String {
    format!("missing expected artifacts: {}", missing.join(", "))
}

fn hallucinated_feedback(hallucinated: &[String]) -> String {
    format!("reported files that do not exist: {}", hallucinated.join(", "))
}

fn step_mentions_script(step: &SkillStep, script: &str) -> bool {
    let haystacks = [step.title.as_str(), step.task_instruction.as_str(), step.task_query.as_str()];
    if haystacks.iter().any(|h| h.contains(script)) {
        return true;
    }
    step.references.iter().any(|r| r.contains(script))
}

fn render_sop(steps: &[SkillStep], current_step_id: u32) -> String {
    steps
        .iter()
        .map(|s| {
            let marker = if s.id == current_step_id {
                "[/]"
            } else if s.status == orch_core::types::StepStatus::Done {
                "[x]"
            } else {
                "[ ]"
            };
            format!("{marker} {}. {}", s.id, s.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses `{script_name} args...` out of a script step's task_query, or its
/// references if task_query is empty. Derives a default project name for
/// `init`-named scripts invoked with no arguments.
fn resolve_script_invocation(step: &SkillStep, query: &str) -> Option<(String, Vec<String>)> {
    if !step.task_query.trim().is_empty() {
        let mut tokens = step.task_query.split_whitespace();
        let first = tokens.next()?;
        let script_name = first.strip_prefix("scripts/").unwrap_or(first).to_string();
        let mut args: Vec<String> = tokens.map(String::from).collect();
        if script_name.to_lowercase().contains("init") && args.is_empty() {
            args.push(kebab_case_truncated(query, 40));
        }
        return Some((script_name, args));
    }

    let script_ref = step.references.iter().find(|r| r.contains("scripts/"))?;
    let script_name = script_ref.rsplit('/').next().unwrap_or(script_ref).to_string();
    let mut args = Vec::new();
    if script_name.to_lowercase().contains("init") {
        args.push(kebab_case_truncated(query, 40));
    }
    Some((script_name, args))
}

fn kebab_case_truncated(text: &str, max_len: usize) -> String {
    let kebab: String = text.to_lowercase().chars().map(|c| if c.is_alphanumeric() { c } else { '-' }).collect();
    let collapsed = kebab.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    collapsed.chars().take(max_len).collect()
}

fn find_newest_subdirectory(root: &Path) -> Option<PathBuf> {
    let mut newest: Option<(PathBuf, SystemTime)> = None;
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if IGNORED_DIR_NAMES.contains(&name.as_ref()) || name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if newest.as_ref().map(|(_, t)| modified > *t).unwrap_or(true) {
                        newest = Some((path, modified));
                    }
                }
            }
        }
    }
    newest.map(|(p, _)| p)
}
