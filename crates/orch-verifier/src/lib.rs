//! Disk-truth check for worker output: confirms claimed and expected
//! artifacts actually exist, and registers what's found into session memory
//! inline with the scan. Grounded in the teacher's file-existence verifier.

use std::path::{Path, PathBuf};

use orch_core::json_extract::extract_reported_files;
use orch_memory::SessionMemory;

/// Bounded recursion depth for the basename fallback search.
const SMART_FIND_MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub verified: Vec<String>,
    pub missing: Vec<String>,
    pub hallucinated: Vec<String>,
}

/// Verifies a step attempt's claimed + expected artifacts against disk.
/// Registers every verified path into `memory` under `step_id` as it's found.
pub fn verify_artifacts(
    raw_output: &str,
    active_folder: &Path,
    expected_artifacts: &[String],
    step_id: u32,
    memory: &mut SessionMemory,
) -> VerifyOutcome {
    let mut outcome = VerifyOutcome::default();

    for reported in extract_reported_files(raw_output) {
        let normalized = normalize_path(&reported);
        match locate(active_folder, &normalized) {
            Some(found_rel) => {
                record_verified(&mut outcome, &found_rel);
                memory.register_artifact(step_id, Path::new(&found_rel));
            }
            None => outcome.hallucinated.push(normalized),
        }
    }

    for expected in expected_artifacts {
        let normalized = normalize_path(expected);
        match locate(active_folder, &normalized) {
            Some(found_rel) => {
                record_verified(&mut outcome, &found_rel);
                memory.register_artifact(step_id, Path::new(&found_rel));
            }
            None => outcome.missing.push(normalized),
        }
    }

    outcome
}

fn record_verified(outcome: &mut VerifyOutcome, path: &str) {
    if !outcome.verified.contains(&path.to_string()) {
        outcome.verified.push(path.to_string());
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.strip_prefix('/').unwrap_or(trimmed).to_string()
}

/// Literal check first (exists + nonzero size), then a bounded-depth
/// basename search. Returns the path relative to `active_folder`.
fn locate(active_folder: &Path, normalized: &str) -> Option<String> {
    let literal = active_folder.join(normalized);
    if is_nonempty_file(&literal) {
        return Some(normalized.to_string());
    }

    let basename = Path::new(normalized).file_name()?;
    let found = smart_find(active_folder, basename.to_string_lossy().as_ref(), SMART_FIND_MAX_DEPTH)?;
    Some(found.to_string_lossy().into_owned())
}

fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Bounded-depth search for a file by basename, relative to `root`.
fn smart_find(root: &Path, basename: &str, max_depth: usize) -> Option<PathBuf> {
    fn walk(dir: &Path, basename: &str, depth: usize, max_depth: usize, root: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        let mut subdirs = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() {
                if path.file_name().map(|n| n == basename).unwrap_or(false) {
                    return path.strip_prefix(root).ok().map(|p| p.to_path_buf());
                }
            } else if path.is_dir() {
                subdirs.push(path);
            }
        }
        if depth >= max_depth {
            return None;
        }
        for sub in subdirs {
            if let Some(found) = walk(&sub, basename, depth + 1, max_depth, root) {
                return Some(found);
            }
        }
        None
    }
    walk(root, basename, 0, max_depth, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn memory_in(dir: &Path) -> SessionMemory {
        SessionMemory::new(dir)
    }

    #[test]
    fn literal_match_is_verified() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("out.txt"), "data").unwrap();
        let mut memory = memory_in(dir.path());
        let outcome = verify_artifacts(
            r#"{"status":"success","created_files":["out.txt"]}"#,
            dir.path(),
            &["out.txt".to_string()],
            1,
            &mut memory,
        );
        assert_eq!(outcome.verified, vec!["out.txt"]);
        assert!(outcome.missing.is_empty());
        assert!(outcome.hallucinated.is_empty());
    }

    #[test]
    fn smart_find_locates_file_in_subdirectory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("main.rs"), "fn main(){}").unwrap();
        let mut memory = memory_in(dir.path());
        let outcome = verify_artifacts(
            r#"{"status":"success","created_files":["main.rs"]}"#,
            dir.path(),
            &[],
            1,
            &mut memory,
        );
        assert_eq!(outcome.verified, vec!["src/main.rs"]);
    }

    #[test]
    fn reported_file_not_found_anywhere_is_hallucinated() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path());
        let outcome = verify_artifacts(
            r#"{"status":"success","created_files":["ghost.txt"]}"#,
            dir.path(),
            &[],
            1,
            &mut memory,
        );
        assert_eq!(outcome.hallucinated, vec!["ghost.txt"]);
    }

    #[test]
    fn expected_artifact_not_found_is_missing() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path());
        let outcome = verify_artifacts(
            "no structured output",
            dir.path(),
            &["expected.txt".to_string()],
            1,
            &mut memory,
        );
        assert_eq!(outcome.missing, vec!["expected.txt"]);
    }

    #[test]
    fn empty_file_is_not_counted_as_verified() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        let mut memory = memory_in(dir.path());
        let outcome = verify_artifacts(
            r#"{"status":"success","created_files":["empty.txt"]}"#,
            dir.path(),
            &[],
            1,
            &mut memory,
        );
        assert_eq!(outcome.hallucinated, vec!["empty.txt"]);
    }

    #[test]
    fn verified_artifacts_are_registered_into_session_memory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("out.txt"), "data").unwrap();
        let mut memory = memory_in(dir.path());
        verify_artifacts(
            r#"{"status":"success","created_files":["out.txt"]}"#,
            dir.path(),
            &[],
            7,
            &mut memory,
        );
        assert_eq!(memory.artifacts["7"].len(), 1);
    }
}
