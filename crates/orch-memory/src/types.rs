//! Append-only log entry shapes stored inside `SessionMemory`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHistoryEntry {
    pub agent_name: String,
    pub step_id: u32,
    pub cycle: u32,
    pub tool_name: String,
    pub args: Value,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub step_id: u32,
    pub agent_name: String,
    pub feedback: String,
    /// e.g. "critic_rejection", "verifier_missing", "verifier_hallucinated".
    pub kind: String,
}
