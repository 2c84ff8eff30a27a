//! Shared data model: Skill, SkillStep, Plan, CompletionCriteria, and the DTOs
//! exchanged between AtomicPlanner / StepExecutor / Critic.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An immutable, discovered skill (directory of SKILL.md + scripts/ + references/).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub manual_path: PathBuf,
    pub directory_path: PathBuf,
    /// Ordered, deduplicated script filenames referenced in the manual body.
    pub required_scripts: Vec<String>,
}

/// Summary view returned by `SkillRegistry::list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
}

impl From<&Skill> for SkillSummary {
    fn from(s: &Skill) -> Self {
        SkillSummary {
            name: s.name.clone(),
            description: s.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

/// A single atomic step in a plan. The contract between AtomicPlanner and StepExecutor.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SkillStep {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub task_instruction: String,
    #[serde(default)]
    pub task_query: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
    #[serde(default)]
    pub skill_raw_context: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub allow_rollback: bool,
}

impl SkillStep {
    /// True when this step's title/query/references name a bundled script rather
    /// than free-form LLM work.
    pub fn is_script_step(&self) -> bool {
        let haystacks = [
            self.task_query.as_str(),
            self.title.as_str(),
            self.task_instruction.as_str(),
        ];
        if haystacks.iter().any(|h| {
            h.contains("scripts/") || {
                let lc = h.to_lowercase();
                lc.contains("script") || lc.contains("run")
            }
        }) {
            return true;
        }
        self.references.iter().any(|r| r.contains("scripts/"))
    }

    /// Technical-keyword heuristic used by the Critic to decide whether an
    /// LLM audit is warranted.
    pub fn is_technical(&self) -> bool {
        const KEYWORDS: [&str; 6] =
            ["develop", "code", "build", "script", "implement", "create"];
        let title_lc = self.title.to_lowercase();
        KEYWORDS.iter().any(|kw| title_lc.contains(kw))
    }
}

/// Declarative, derived completion conditions for early exit.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CompletionCriteria {
    #[serde(default)]
    pub required_artifacts: Vec<String>,
    #[serde(default)]
    pub success_signals: Vec<String>,
    #[serde(default)]
    pub command_checks: Vec<String>,
    #[serde(default)]
    pub completion_message: String,
}

impl CompletionCriteria {
    pub fn is_empty(&self) -> bool {
        self.required_artifacts.is_empty()
            && self.success_signals.is_empty()
            && self.command_checks.is_empty()
    }

    pub const DEFAULT_SUCCESS_SIGNALS: [&'static str; 4] = [
        "MISSION_COMPLETE",
        "TASK_DONE",
        "BUNDLE_SUCCESS",
        "[STEP_COMPLETE]",
    ];

    /// Derive criteria from a finished plan: the last step's expected artifacts
    /// are primary; if empty, fall back to the deduplicated union of all steps'.
    pub fn derive_from_steps(steps: &[SkillStep]) -> CompletionCriteria {
        let Some(final_step) = steps.last() else {
            return CompletionCriteria::default();
        };

        let mut unique_all = Vec::new();
        for step in steps {
            for artifact in &step.expected_artifacts {
                if !unique_all.contains(artifact) {
                    unique_all.push(artifact.clone());
                }
            }
        }

        let required = if !final_step.expected_artifacts.is_empty() {
            final_step.expected_artifacts.clone()
        } else {
            unique_all
        };

        CompletionCriteria {
            required_artifacts: required,
            success_signals: Self::DEFAULT_SUCCESS_SIGNALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            command_checks: Vec::new(),
            completion_message: format!(
                "Plan has {} steps, final: {}",
                steps.len(),
                final_step.title
            ),
        }
    }
}

/// Ordered sequence of steps plus reasoning and derived completion criteria.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<SkillStep>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub completion_criteria: CompletionCriteria,
}

/// Input for `AtomicPlanner::plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicPlannerInput {
    pub query: String,
    pub skill_content: String,
    pub resources: String,
}

/// Input for `StepExecutor` per-attempt context envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepExecutorInput {
    pub task_input: String,
    pub active_folder: String,
    pub roadmap: String,
    pub session_context: String,
    #[serde(default)]
    pub expectations: Vec<String>,
    #[serde(default)]
    pub clipboard: String,
    #[serde(default)]
    pub step_content: String,
    #[serde(default)]
    pub sop_context: String,
    #[serde(default)]
    pub skill_context: String,
    #[serde(default)]
    pub alerts: Vec<String>,
}

impl StepExecutorInput {
    /// Static system context: the skill manual. Stable across ReAct cycles.
    pub fn to_system_protocol_view(&self) -> String {
        format!("<SkillManual>\n{}\n</SkillManual>", self.skill_context)
    }

    /// Dynamic user status context, rendered against a caller-supplied template.
    ///
    /// The template may reference `{task_input}`, `{sop_context}`, `{roadmap}`,
    /// `{clipboard}`, `{alerts}`, `{step_id}`, `{step_title}` placeholders.
    pub fn to_user_status_view(&self, template: &str, step_id: u32, step_title: &str) -> String {
        let alerts_str = if self.alerts.is_empty() {
            String::new()
        } else {
            self.alerts
                .iter()
                .map(|a| format!("- {a}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        template
            .replace("{task_input}", &self.task_input)
            .replace("{sop_context}", &self.sop_context)
            .replace("{roadmap}", &self.roadmap)
            .replace("{clipboard}", &self.clipboard)
            .replace("{alerts}", &alerts_str)
            .replace("{step_id}", &step_id.to_string())
            .replace("{step_title}", step_title)
    }
}

/// Output of one StepExecutor attempt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepExecutorOutput {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub feedback: String,
}

/// Input handed to the Critic for a technical step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CriticInput {
    pub step_id: u32,
    pub step_title: String,
    pub worker_output: String,
    pub active_folder: String,
    pub roadmap: String,
    #[serde(default)]
    pub global_context: String,
    #[serde(default)]
    pub expectations: Vec<String>,
}

fn xml_section_or_none(s: &str) -> &str {
    if s.is_empty() { "(None)" } else { s }
}

impl CriticInput {
    /// Serializes the handover context to XML for the LLM auditor.
    pub fn to_xml(&self) -> String {
        format!(
            "<CriticContext>\n\
             <StepID>{}</StepID>\n\
             <StepTitle>{}</StepTitle>\n\
             <ActiveFolder>{}</ActiveFolder>\n\
             <WorkerOutput>\n{}\n</WorkerOutput>\n\
             <GlobalContext>\n{}\n</GlobalContext>\n\
             <ProjectRoadmap>\n{}\n</ProjectRoadmap>\n\
             <ExpectedArtifacts>{}</ExpectedArtifacts>\n\
             </CriticContext>",
            self.step_id,
            self.step_title,
            self.active_folder,
            xml_section_or_none(&self.worker_output),
            xml_section_or_none(&self.global_context),
            xml_section_or_none(&self.roadmap),
            self.expectations.join(", "),
        )
    }
}

/// Output of a Critic pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CriticOutput {
    pub decision: CriticDecision,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriticDecision {
    Approved,
    Rejected,
}

impl Default for CriticDecision {
    fn default() -> Self {
        CriticDecision::Rejected
    }
}

impl CriticOutput {
    /// Parses a critic auditor's raw text reply. Decision is extracted by
    /// substring match on `[APPROVED]`; anything else is a rejection.
    pub fn from_raw(raw: &str) -> CriticOutput {
        let decision = if raw.contains("[APPROVED]") {
            CriticDecision::Approved
        } else {
            CriticDecision::Rejected
        };
        CriticOutput {
            decision,
            feedback: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_is_script_step_via_task_query() {
        let step = SkillStep {
            task_query: "scripts/build.sh --release".into(),
            ..Default::default()
        };
        assert!(step.is_script_step());
    }

    #[test]
    fn step_is_script_step_via_title() {
        let step = SkillStep {
            title: "Run the build script".into(),
            ..Default::default()
        };
        assert!(step.is_script_step());
    }

    #[test]
    fn step_is_script_step_via_run_keyword_without_script_word() {
        let step = SkillStep { title: "Run the build".into(), ..Default::default() };
        assert!(step.is_script_step());
    }

    #[test]
    fn non_script_step_is_not_flagged() {
        let step = SkillStep {
            title: "Write the README".into(),
            task_query: "describe the API".into(),
            ..Default::default()
        };
        assert!(!step.is_script_step());
    }

    #[test]
    fn technical_keywords_are_case_insensitive() {
        let step = SkillStep {
            title: "Implement the parser".into(),
            ..Default::default()
        };
        assert!(step.is_technical());
        let step2 = SkillStep {
            title: "Write documentation".into(),
            ..Default::default()
        };
        assert!(!step2.is_technical());
    }

    #[test]
    fn completion_criteria_derives_from_final_step() {
        let steps = vec![
            SkillStep {
                id: 1,
                expected_artifacts: vec!["a.txt".into()],
                ..Default::default()
            },
            SkillStep {
                id: 2,
                title: "final".into(),
                expected_artifacts: vec!["b.txt".into(), "c.txt".into()],
                ..Default::default()
            },
        ];
        let criteria = CompletionCriteria::derive_from_steps(&steps);
        assert_eq!(criteria.required_artifacts, vec!["b.txt", "c.txt"]);
        assert_eq!(criteria.success_signals.len(), 4);
    }

    #[test]
    fn completion_criteria_falls_back_to_union_when_final_step_empty() {
        let steps = vec![
            SkillStep {
                id: 1,
                expected_artifacts: vec!["a.txt".into()],
                ..Default::default()
            },
            SkillStep {
                id: 2,
                expected_artifacts: vec![],
                ..Default::default()
            },
        ];
        let criteria = CompletionCriteria::derive_from_steps(&steps);
        assert_eq!(criteria.required_artifacts, vec!["a.txt"]);
    }

    #[test]
    fn completion_criteria_empty_plan_is_empty() {
        let criteria = CompletionCriteria::derive_from_steps(&[]);
        assert!(criteria.is_empty());
    }

    #[test]
    fn critic_input_to_xml_contains_fields() {
        let input = CriticInput {
            step_id: 3,
            step_title: "Implement parser".into(),
            worker_output: "wrote parser.rs".into(),
            active_folder: "/tmp/proj".into(),
            roadmap: "proj/\n  parser.rs".into(),
            global_context: "manual text".into(),
            expectations: vec!["parser.rs".into()],
        };
        let xml = input.to_xml();
        assert!(xml.contains("<StepID>3</StepID>"));
        assert!(xml.contains("wrote parser.rs"));
        assert!(xml.contains("<ExpectedArtifacts>parser.rs</ExpectedArtifacts>"));
    }

    #[test]
    fn critic_output_parses_approved() {
        let out = CriticOutput::from_raw("[APPROVED]\nLooks good.");
        assert_eq!(out.decision, CriticDecision::Approved);
    }

    #[test]
    fn critic_output_parses_rejected() {
        let out = CriticOutput::from_raw("[REJECTED] 1. Missing closing paren on line 4.");
        assert_eq!(out.decision, CriticDecision::Rejected);
        assert!(out.feedback.contains("closing paren"));
    }

    #[test]
    fn step_executor_input_user_status_view_substitutes_placeholders() {
        let input = StepExecutorInput {
            task_input: "build the thing".into(),
            sop_context: "[x] step1\n[ ] step2".into(),
            roadmap: "root/\n  a.txt".into(),
            clipboard: "".into(),
            alerts: vec!["context switched to src/".into()],
            ..Default::default()
        };
        let template = "Task: {task_input}\nSOP:\n{sop_context}\nAlerts:\n{alerts}\nStep {step_id}: {step_title}";
        let rendered = input.to_user_status_view(template, 2, "Write code");
        assert!(rendered.contains("Task: build the thing"));
        assert!(rendered.contains("- context switched to src/"));
        assert!(rendered.contains("Step 2: Write code"));
    }
}
