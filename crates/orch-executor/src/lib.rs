//! Spawns one ephemeral worker per step attempt and drives a bounded ReAct
//! loop until it emits a completion signal. Grounded in the teacher domain's
//! execution cycle: a short-lived LLM session bound to the tool server,
//! nudged forward across cycles rather than restarted.

use std::collections::HashMap;

use orch_core::json_extract::{extract_worker_signal, WorkerSignal};
use orch_core::llm::{History, HistoryMessage, LlmProvider, Message, Role};
use orch_core::types::{SkillStep, StepExecutorInput, StepExecutorOutput};
use orch_memory::SessionMemory;
use orch_telemetry::Telemetry;
use serde_json::{json, Value};

const DEFAULT_REACT_MAX_CYCLES: u32 = 15;
const DEFAULT_MAX_REACT_STEPS: u32 = 15;
const CONTINUE_NUDGE: &str = "Continue execution. Output JSON when done.";

pub struct StepExecutor<'a> {
    llm: &'a dyn LlmProvider,
    telemetry: &'a Telemetry,
    react_max_cycles: u32,
    max_react_steps: u32,
}

impl<'a> StepExecutor<'a> {
    pub fn new(llm: &'a dyn LlmProvider, telemetry: &'a Telemetry) -> Self {
        StepExecutor {
            llm,
            telemetry,
            react_max_cycles: DEFAULT_REACT_MAX_CYCLES,
            max_react_steps: DEFAULT_MAX_REACT_STEPS,
        }
    }

    pub fn with_cycle_limits(mut self, react_max_cycles: u32, max_react_steps: u32) -> Self {
        self.react_max_cycles = react_max_cycles;
        self.max_react_steps = max_react_steps;
        self
    }

    /// Runs one step attempt's ReAct loop to completion, error, or budget
    /// exhaustion.
    pub async fn execute(
        &self,
        skill_name: &str,
        step: &SkillStep,
        attempt: u32,
        input: StepExecutorInput,
        prompt_template: &str,
        memory: &mut SessionMemory,
    ) -> StepExecutorOutput {
        let worker_name = format!("Worker-{skill_name}-{}-{attempt}", step.id);
        let first_user_prompt = input.to_user_status_view(prompt_template, step.id, &step.title);

        let mut messages = vec![Message::system(input.to_system_protocol_view())];

        for cycle in 0..self.react_max_cycles {
            let user_text = if cycle == 0 { first_user_prompt.clone() } else { CONTINUE_NUDGE.to_string() };
            messages.push(Message::user(user_text));

            let response = match self.llm.chat(&messages, Some(self.max_react_steps)).await {
                Ok(r) => r,
                Err(err) => {
                    self.telemetry.warning(
                        "executor",
                        "worker_llm_error",
                        json!({"step_id": step.id, "worker": worker_name, "reason": err.to_string()}),
                    );
                    return StepExecutorOutput {
                        success: false,
                        output: String::new(),
                        feedback: err.to_string(),
                    };
                }
            };

            record_tool_activity(&worker_name, step.id, cycle, response.history.as_ref(), memory);

            match extract_worker_signal(&response.content) {
                WorkerSignal::Success { summary, .. } => {
                    return StepExecutorOutput {
                        success: true,
                        output: response.content.clone(),
                        feedback: summary,
                    };
                }
                WorkerSignal::Unrecognized { .. } => {
                    messages.push(Message { role: Role::Assistant, content: response.content });
                }
            }
        }

        StepExecutorOutput {
            success: false,
            output: String::new(),
            feedback: "exhausted ReAct cycle budget without a completion signal".to_string(),
        }
    }
}

/// Logs every tool call from the worker's recent history and, for
/// `read_file`/`read_multiple_files` calls with a single `path` argument,
/// stores the matching tool result into the clipboard.
fn record_tool_activity(
    worker_name: &str,
    step_id: u32,
    cycle: u32,
    history: &dyn History,
    memory: &mut SessionMemory,
) {
    let messages = history.messages();

    let mut results: HashMap<String, String> = HashMap::new();
    for msg in &messages {
        if let HistoryMessage::Tool { call_id, content } = msg {
            results.insert(call_id.clone(), content.clone());
        }
    }

    for msg in &messages {
        let HistoryMessage::Assistant { tool_calls } = msg else { continue };
        for call in tool_calls {
            let args: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
            let result = results.get(&call.id).cloned();
            memory.log_tool_usage(worker_name, step_id, cycle, call.name.clone(), args.clone(), result.clone());

            if call.name == "read_file" || call.name == "read_multiple_files" {
                if let (Some(path), Some(content)) = (args.get("path").and_then(Value::as_str), result) {
                    memory.update_clipboard(path, content);
                }
            }
        }
    }
}
