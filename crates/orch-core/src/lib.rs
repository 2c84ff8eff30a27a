//! Shared types, errors, and pure-text helpers used across the orchestration
//! engine crates. Nothing in this crate touches the filesystem or a process
//! except `tree::render_tree`, which only reads directory entries.

pub mod error;
pub mod frontmatter;
pub mod json_extract;
pub mod llm;
pub mod scripts;
pub mod state;
pub mod tree;
pub mod types;

pub use error::{AppError, ErrorSeverity};
pub use state::OrchestratorState;
