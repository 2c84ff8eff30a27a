//! LLM-based auditor: for technical steps, inspects produced files and
//! approves or rejects with feedback. Non-technical steps are auto-approved
//! with no LLM call. Grounded in the teacher domain's critic handover
//! (`CriticInput::to_xml`) and verdict parsing.

use orch_core::llm::{LlmProvider, Message};
use orch_core::types::{CriticDecision, CriticInput, CriticOutput, SkillStep};
use orch_memory::SessionMemory;

pub struct Critic<'a> {
    llm: &'a dyn LlmProvider,
}

impl<'a> Critic<'a> {
    pub fn new(llm: &'a dyn LlmProvider) -> Self {
        Critic { llm }
    }

    /// Reviews one step attempt. Every verdict, approved or rejected, is
    /// appended to `agent_feedback_history`.
    pub async fn review(
        &self,
        step: &SkillStep,
        input: CriticInput,
        memory: &mut SessionMemory,
    ) -> CriticOutput {
        if !step.is_technical() {
            let output = CriticOutput {
                decision: CriticDecision::Approved,
                feedback: "(non-technical step, auto-approved)".to_string(),
            };
            memory.log_agent_feedback(step.id, "critic", &output.feedback, "critic_auto_approved");
            return output;
        }

        let messages = vec![Message::system(critic_system_prompt()), Message::user(input.to_xml())];
        let output = match self.llm.chat(&messages, None).await {
            Ok(response) => CriticOutput::from_raw(&response.content),
            Err(err) => CriticOutput {
                decision: CriticDecision::Rejected,
                feedback: format!("critic LLM call failed: {err}"),
            },
        };

        let kind = match output.decision {
            CriticDecision::Approved => "critic_approved",
            CriticDecision::Rejected => "critic_rejected",
        };
        memory.log_agent_feedback(step.id, "critic", &output.feedback, kind);
        output
    }
}

fn critic_system_prompt() -> String {
    "You are a meticulous technical auditor. Use read-file tools to inspect the work described \
     in <WorkerOutput> against <ExpectedArtifacts> and <GlobalContext>. Reply with [APPROVED] if \
     the work is correct and complete, or [REJECTED] followed by a numbered list of concrete fixes."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orch_core::llm::{ChatResponse, EmptyHistory};
    use tempfile::tempdir;

    struct FixedProvider(String);

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _max_iterations: Option<u32>,
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse { content: self.0.clone(), history: Box::new(EmptyHistory) })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _max_iterations: Option<u32>,
        ) -> anyhow::Result<ChatResponse> {
            anyhow::bail!("provider unavailable")
        }
    }

    fn critic_input(step_id: u32) -> CriticInput {
        CriticInput {
            step_id,
            step_title: "Implement parser".to_string(),
            worker_output: "wrote parser.rs".to_string(),
            active_folder: "/tmp/proj".to_string(),
            roadmap: "proj/\n  parser.rs".to_string(),
            global_context: "manual".to_string(),
            expectations: vec!["parser.rs".to_string()],
        }
    }

    #[tokio::test]
    async fn non_technical_step_is_auto_approved_without_llm_call() {
        let provider = FailingProvider;
        let critic = Critic::new(&provider);
        let dir = tempdir().unwrap();
        let mut memory = SessionMemory::new(dir.path());
        let step = SkillStep { id: 1, title: "Write the README".to_string(), ..Default::default() };

        let output = critic.review(&step, critic_input(1), &mut memory).await;
        assert_eq!(output.decision, CriticDecision::Approved);
        assert!(output.feedback.contains("auto-approved"));
    }

    #[tokio::test]
    async fn technical_step_is_approved_on_approved_verdict() {
        let provider = FixedProvider("[APPROVED]\nClean implementation.".to_string());
        let critic = Critic::new(&provider);
        let dir = tempdir().unwrap();
        let mut memory = SessionMemory::new(dir.path());
        let step = SkillStep { id: 2, title: "Implement the parser".to_string(), ..Default::default() };

        let output = critic.review(&step, critic_input(2), &mut memory).await;
        assert_eq!(output.decision, CriticDecision::Approved);
        assert_eq!(memory.agent_feedback_history.len(), 1);
        assert_eq!(memory.agent_feedback_history[0].kind, "critic_approved");
    }

    #[tokio::test]
    async fn technical_step_is_rejected_with_fix_list() {
        let provider = FixedProvider("[REJECTED]\n1. Missing error handling.".to_string());
        let critic = Critic::new(&provider);
        let dir = tempdir().unwrap();
        let mut memory = SessionMemory::new(dir.path());
        let step = SkillStep { id: 3, title: "Build the CLI".to_string(), ..Default::default() };

        let output = critic.review(&step, critic_input(3), &mut memory).await;
        assert_eq!(output.decision, CriticDecision::Rejected);
        assert!(output.feedback.contains("Missing error handling"));
        assert_eq!(memory.agent_feedback_history[0].kind, "critic_rejected");
    }

    #[tokio::test]
    async fn llm_error_on_technical_step_is_treated_as_rejection() {
        let provider = FailingProvider;
        let critic = Critic::new(&provider);
        let dir = tempdir().unwrap();
        let mut memory = SessionMemory::new(dir.path());
        let step = SkillStep { id: 4, title: "Implement feature".to_string(), ..Default::default() };

        let output = critic.review(&step, critic_input(4), &mut memory).await;
        assert_eq!(output.decision, CriticDecision::Rejected);
    }
}
