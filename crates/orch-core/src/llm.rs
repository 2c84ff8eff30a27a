//! Trait boundaries for the two out-of-scope external collaborators: the LLM
//! provider and the tool-server-driven message history it produces.
//!
//! Concrete implementations (a real LLM client wired to a real tool server)
//! live outside this crate; the orchestration engine only depends on these
//! traits, which breaks the Orchestrator/Planner/Executor <-> provider cycle
//! by construction (the provider never holds a reference back into the
//! engine, only the plain data it's handed).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One message in a chat transcript handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Message { role: Role::User, content: content.into() }
    }
}

/// A single tool invocation as recorded in an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Tool/function name, e.g. `read_file`.
    pub name: String,
    /// Raw JSON-encoded arguments, as produced by the provider.
    pub arguments: String,
}

/// An entry in the opaque per-worker message history the provider hands back.
/// Mirrors the shape of a typical tool-calling chat transcript without
/// committing to any one provider's wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HistoryMessage {
    Assistant { tool_calls: Vec<ToolCall> },
    Tool { call_id: String, content: String },
    User { content: String },
}

/// Adapter over a provider-specific transcript, giving the engine a uniform
/// way to walk tool calls without knowing the provider's internal message type.
pub trait History: Send + Sync {
    fn messages(&self) -> Vec<HistoryMessage>;
}

/// A history with no messages, useful for tests and trivial providers.
pub struct EmptyHistory;
impl History for EmptyHistory {
    fn messages(&self) -> Vec<HistoryMessage> {
        Vec::new()
    }
}

/// Response from one `LlmProvider::chat` call.
pub struct ChatResponse {
    pub content: String,
    pub history: Box<dyn History>,
}

/// The out-of-scope LLM provider boundary: an async request/response call
/// that transparently drives tool calls against a tool server up to
/// `max_iterations` inner iterations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        max_iterations: Option<u32>,
    ) -> anyhow::Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHistory(Vec<HistoryMessage>);
    impl History for FixedHistory {
        fn messages(&self) -> Vec<HistoryMessage> {
            self.0.clone()
        }
    }

    #[test]
    fn empty_history_has_no_messages() {
        assert!(EmptyHistory.messages().is_empty());
    }

    #[test]
    fn fixed_history_round_trips_tool_calls() {
        let h = FixedHistory(vec![HistoryMessage::Assistant {
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"a.txt"}"#.into(),
            }],
        }]);
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            HistoryMessage::Assistant { tool_calls } => {
                assert_eq!(tool_calls[0].name, "read_file");
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("hi").role, Role::System);
        assert_eq!(Message::user("hi").role, Role::User);
    }
}
