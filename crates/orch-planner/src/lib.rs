//! Turns a skill manual + user query into an ordered list of steps via the
//! LLM, and produces recovery suffix plans when a step exhausts its retries.
//! Grounded in the teacher domain's atomic planner, generalized to the
//! `LlmProvider` trait boundary.

use orch_core::json_extract::{coerce_string_list, try_parse_json_object};
use orch_core::llm::{LlmProvider, Message};
use orch_core::types::{AtomicPlannerInput, CompletionCriteria, Plan, SkillStep};
use orch_telemetry::Telemetry;
use serde_json::{json, Value};

pub struct AtomicPlanner<'a> {
    llm: &'a dyn LlmProvider,
    telemetry: &'a Telemetry,
}

impl<'a> AtomicPlanner<'a> {
    pub fn new(llm: &'a dyn LlmProvider, telemetry: &'a Telemetry) -> Self {
        AtomicPlanner { llm, telemetry }
    }

    /// Produces a structured ordered step list from a skill manual + query.
    /// Falls back to a single whole-manual step if the LLM's JSON parses but
    /// names zero steps; returns an empty plan if no JSON can be extracted
    /// at all, or the LLM call itself errors.
    pub async fn plan(&self, input: AtomicPlannerInput) -> Plan {
        let messages = vec![
            Message::system(planning_system_prompt()),
            Message::user(planning_user_prompt(&input)),
        ];

        let response = match self.llm.chat(&messages, None).await {
            Ok(r) => r,
            Err(err) => {
                self.telemetry.warning(
                    "planner",
                    "planning_error",
                    json!({"reason": err.to_string()}),
                );
                return Plan::default();
            }
        };

        let Some(value) = try_parse_json_object(&response.content) else {
            self.telemetry.warning(
                "planner",
                "planning_error",
                json!({"reason": "no JSON object found in planner response"}),
            );
            return Plan::default();
        };

        let reasoning = value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut steps = parse_steps(&value, &input.skill_content);
        if steps.is_empty() {
            steps = vec![fallback_single_step(&input)];
        }

        let completion_criteria = CompletionCriteria::derive_from_steps(&steps);
        Plan { steps, reasoning, completion_criteria }
    }

    /// Produces a suffix plan intended to replace `failed_step` and
    /// everything after it. An empty-steps plan signals the orchestrator to
    /// abort (self-healing failed).
    pub async fn replan(
        &self,
        failed_step: &SkillStep,
        failure_reason: &str,
        skill_manual: &str,
    ) -> Plan {
        let messages = vec![
            Message::system(planning_system_prompt()),
            Message::user(replan_user_prompt(failed_step, failure_reason, skill_manual)),
        ];

        let response = match self.llm.chat(&messages, None).await {
            Ok(r) => r,
            Err(err) => {
                self.telemetry.warning(
                    "planner",
                    "replan_error",
                    json!({"step_id": failed_step.id, "reason": err.to_string()}),
                );
                return Plan::default();
            }
        };

        let Some(value) = try_parse_json_object(&response.content) else {
            self.telemetry.warning(
                "planner",
                "replan_error",
                json!({"step_id": failed_step.id, "reason": "no JSON object found in replan response"}),
            );
            return Plan::default();
        };

        let reasoning = value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let steps = parse_steps(&value, skill_manual);
        let completion_criteria = CompletionCriteria::derive_from_steps(&steps);
        Plan { steps, reasoning, completion_criteria }
    }
}

fn parse_steps(value: &Value, skill_content: &str) -> Vec<SkillStep> {
    let Some(raw_steps) = value.get("steps").and_then(Value::as_array) else {
        return Vec::new();
    };

    raw_steps
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let expected_artifacts = coerce_string_list(raw.get("expected_artifacts"))
                .or_else(|| coerce_string_list(raw.get("expected_files")))
                .unwrap_or_default()
                .into_iter()
                .map(|a| normalize_artifact(&a))
                .collect();

            SkillStep {
                id: (idx + 1) as u32,
                title: raw.get("title").and_then(Value::as_str).unwrap_or("Untitled step").to_string(),
                task_instruction: raw.get("task_instruction").and_then(Value::as_str).unwrap_or_default().to_string(),
                task_query: raw.get("task_query").and_then(Value::as_str).unwrap_or_default().to_string(),
                content: raw.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
                references: coerce_string_list(raw.get("references")).unwrap_or_default(),
                expected_artifacts,
                skill_raw_context: skill_content.to_string(),
                status: Default::default(),
                allow_rollback: false,
            }
        })
        .collect()
}

/// Strips a leading `./` or `/`; wildcards and parenthetical comments are not
/// stripped here (the prompt forbids them) — if the LLM emits them anyway,
/// they're recorded verbatim and left for the verifier's smart-find to
/// resolve or reject.
fn normalize_artifact(artifact: &str) -> String {
    let trimmed = artifact.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.strip_prefix('/').unwrap_or(trimmed).to_string()
}

fn fallback_single_step(input: &AtomicPlannerInput) -> SkillStep {
    SkillStep {
        id: 1,
        title: "Execute skill".to_string(),
        task_instruction: input.query.clone(),
        task_query: input.query.clone(),
        content: input.skill_content.clone(),
        skill_raw_context: input.skill_content.clone(),
        ..Default::default()
    }
}

fn planning_system_prompt() -> String {
    "You are a planning assistant. Given a skill manual and a user query, \
     produce a JSON object of the form \
     {\"reasoning\": string, \"steps\": [{\"title\": string, \"task_instruction\": string, \
     \"task_query\": string, \"expected_artifacts\": [string], \"references\": [string]}]}. \
     Respond with only that JSON object, optionally inside a ```json fence. \
     Do not use wildcards or parenthetical comments inside file paths."
        .to_string()
}

fn planning_user_prompt(input: &AtomicPlannerInput) -> String {
    format!(
        "Skill manual:\n{}\n\nBundled resources:\n{}\n\nUser query:\n{}",
        input.skill_content, input.resources, input.query
    )
}

fn replan_user_prompt(failed_step: &SkillStep, failure_reason: &str, skill_manual: &str) -> String {
    format!(
        "The step \"{}\" (id {}) failed: {}\n\nProduce a recovery suffix plan, in the same JSON \
         schema, to replace that step and everything after it.\n\nSkill manual:\n{}",
        failed_step.title, failed_step.id, failure_reason, skill_manual
    )
}
