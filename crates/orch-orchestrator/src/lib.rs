pub mod completion;
pub mod orchestrator;

pub use completion::CompletionChecker;
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorOutcome};
