//! `SessionMemory`: the sole mutable shared state crossing step boundaries.
//! Every mutating method commits the whole struct to `.agent_state.json`
//! before returning, so a crash mid-run always leaves a resumable file.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use orch_core::tree::render_tree;
use orch_core::types::Plan;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FeedbackEntry, ToolHistoryEntry};

const STATE_FILE_NAME: &str = ".agent_state.json";
const IGNORED_DIR_NAMES: &[&str] =
    &[".git", ".venv", "node_modules", "__pycache__", "target", ".agent"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub cwd_rel: PathBuf,
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    #[serde(default)]
    pub artifacts: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub clipboard: HashMap<String, String>,
    #[serde(default)]
    pub tool_history: Vec<ToolHistoryEntry>,
    #[serde(default)]
    pub agent_feedback_history: Vec<FeedbackEntry>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub current_step_id: Option<u32>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub step_outputs: HashMap<u32, String>,
}

impl SessionMemory {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        SessionMemory {
            workspace_root: workspace_root.into(),
            cwd_rel: PathBuf::new(),
            project_root: None,
            artifacts: HashMap::new(),
            clipboard: HashMap::new(),
            tool_history: Vec::new(),
            agent_feedback_history: Vec::new(),
            plan: None,
            current_step_id: None,
            env_vars: HashMap::new(),
            step_outputs: HashMap::new(),
        }
    }

    /// Rehydrates from `{workspace_root}/.agent_state.json` if present and
    /// consistent with `workspace_root`; otherwise starts a fresh session.
    /// A state file that fails to parse as JSON is renamed aside rather than
    /// aborting construction.
    pub fn load_or_init(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let state_path = workspace_root.join(STATE_FILE_NAME);

        let Ok(raw) = fs::read_to_string(&state_path) else {
            let fresh = Self::new(workspace_root);
            fresh.persist();
            return fresh;
        };

        let mut value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => {
                quarantine_corrupt_file(&state_path);
                let fresh = Self::new(workspace_root);
                fresh.persist();
                return fresh;
            }
        };

        migrate_legacy_active_folder(&mut value);

        match serde_json::from_value::<SessionMemory>(value) {
            Ok(rehydrated) if normalize_lexical(&rehydrated.workspace_root) == normalize_lexical(&workspace_root) => {
                rehydrated
            }
            _ => {
                quarantine_corrupt_file(&state_path);
                let fresh = Self::new(workspace_root);
                fresh.persist();
                fresh
            }
        }
    }

    pub fn active_folder(&self) -> PathBuf {
        self.workspace_root.join(&self.cwd_rel)
    }

    /// Resolves `candidate` relative to the workspace root, rejecting any
    /// path that would escape it.
    fn relative_within_workspace(&self, candidate: &Path) -> Option<PathBuf> {
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace_root.join(candidate)
        };
        let normalized = normalize_lexical(&absolute);
        let root_normalized = normalize_lexical(&self.workspace_root);
        normalized
            .strip_prefix(&root_normalized)
            .ok()
            .map(|p| p.to_path_buf())
    }

    pub fn update_active_folder(&mut self, new_dir: Option<&Path>) {
        match new_dir {
            Some(dir) if dir.is_dir() => {
                if let Some(rel) = self.relative_within_workspace(dir) {
                    self.cwd_rel = rel;
                }
            }
            Some(_) => {}
            None => {
                if let Some(newest) = self.find_most_recently_modified_file() {
                    if let Some(parent) = newest.parent() {
                        if let Some(rel) = self.relative_within_workspace(parent) {
                            self.cwd_rel = rel;
                        }
                    }
                }
            }
        }
        self.persist();
    }

    fn find_most_recently_modified_file(&self) -> Option<PathBuf> {
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        let mut stack = vec![self.workspace_root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else { continue };
            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if IGNORED_DIR_NAMES.contains(&name.as_ref()) || name.starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(meta) = entry.metadata() {
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

    pub fn set_project_root(&mut self, path: &Path) {
        self.project_root = Some(path.to_path_buf());
        if let Some(rel) = self.relative_within_workspace(path) {
            self.cwd_rel = rel;
        }
        self.persist();
    }

    pub fn log_tool_usage(
        &mut self,
        agent_name: impl Into<String>,
        step_id: u32,
        cycle: u32,
        tool_name: impl Into<String>,
        args: Value,
        result: Option<String>,
    ) {
        self.tool_history.push(ToolHistoryEntry {
            agent_name: agent_name.into(),
            step_id,
            cycle,
            tool_name: tool_name.into(),
            args,
            result,
        });
        self.persist();
    }

    pub fn log_agent_feedback(
        &mut self,
        step_id: u32,
        agent_name: impl Into<String>,
        feedback: impl Into<String>,
        kind: impl Into<String>,
    ) {
        self.agent_feedback_history.push(FeedbackEntry {
            step_id,
            agent_name: agent_name.into(),
            feedback: feedback.into(),
            kind: kind.into(),
        });
        self.persist();
    }

    pub fn update_clipboard(&mut self, path: &str, content: impl Into<String>) {
        let key = self.to_relative_key(path);
        self.clipboard.insert(key, content.into());
        self.persist();
    }

    fn to_relative_key(&self, path: &str) -> String {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            if let Some(rel) = self.relative_within_workspace(candidate) {
                return rel.to_string_lossy().into_owned();
            }
        }
        path.to_string()
    }

    /// Walks `tool_history` backward and returns unique paths read via
    /// `read_file` / `read_multiple_files` across the most recent
    /// `lookback_steps` distinct step ids.
    pub fn get_recent_file_paths(&self, lookback_steps: usize) -> Vec<String> {
        let mut seen_steps: Vec<u32> = Vec::new();
        let mut paths: Vec<String> = Vec::new();

        for entry in self.tool_history.iter().rev() {
            if !seen_steps.contains(&entry.step_id) {
                if seen_steps.len() >= lookback_steps {
                    break;
                }
                seen_steps.push(entry.step_id);
            }

            if entry.tool_name != "read_file" && entry.tool_name != "read_multiple_files" {
                continue;
            }

            if let Some(path) = entry.args.get("path").and_then(Value::as_str) {
                if !paths.contains(&path.to_string()) {
                    paths.push(path.to_string());
                }
            }
            if let Some(list) = entry.args.get("paths").and_then(Value::as_array) {
                for v in list {
                    if let Some(path) = v.as_str() {
                        if !paths.contains(&path.to_string()) {
                            paths.push(path.to_string());
                        }
                    }
                }
            }
        }
        paths
    }

    /// Pure lookup: returns clipboard entries matching any of `paths`, under
    /// both relative and workspace-absolute forms.
    pub fn get_clipboard_subset(&self, paths: &[String]) -> HashMap<String, String> {
        let mut subset = HashMap::new();
        for path in paths {
            let candidates = [path.clone(), self.to_relative_key(path)];
            for candidate in candidates {
                if let Some(content) = self.clipboard.get(&candidate) {
                    subset.insert(candidate, content.clone());
                    break;
                }
            }
        }
        subset
    }

    pub fn save_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.persist();
    }

    pub fn get_plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn set_current_step(&mut self, step_id: Option<u32>) {
        self.current_step_id = step_id;
        self.persist();
    }

    /// A step already marked done never regresses to an earlier status.
    pub fn update_step_status(&mut self, step_id: u32, status: orch_core::types::StepStatus) {
        if let Some(plan) = &mut self.plan {
            if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                if step.status == orch_core::types::StepStatus::Done
                    && status != orch_core::types::StepStatus::Done
                {
                    return;
                }
                step.status = status;
            }
        }
        self.persist();
    }

    /// Best-effort timestamped debug snapshot; failures are logged and never
    /// propagate to the caller.
    pub fn persist_plan_to_file(&self) {
        let Some(plan) = &self.plan else { return };
        let unix_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let dir = self.workspace_root.join(".agent").join("memory").join("plans");
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %err, "failed to create plan snapshot directory");
            return;
        }
        let path = dir.join(format!("plan_{unix_ts}.json"));
        match serde_json::to_string_pretty(plan) {
            Ok(json) => {
                if let Err(err) = fs::write(&path, json) {
                    tracing::warn!(error = %err, path = %path.display(), "failed to write plan snapshot");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize plan snapshot"),
        }
    }

    pub fn register_artifact(&mut self, step_id: u32, path: &Path) {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.active_folder().join(path)
        };
        let absolute = absolute.to_string_lossy().into_owned();
        let entry = self.artifacts.entry(step_id.to_string()).or_default();
        if !entry.contains(&absolute) {
            entry.push(absolute);
        }
        self.persist();
    }

    /// Bounded-depth ASCII tree of the active folder: root plus two levels,
    /// max 8 entries per directory.
    pub fn get_roadmap(&self) -> String {
        render_tree(&self.active_folder(), 2, 8)
    }

    pub fn get_tool_history(&self, step_id: Option<u32>) -> Vec<ToolHistoryEntry> {
        match step_id {
            Some(id) => self.tool_history.iter().filter(|e| e.step_id == id).cloned().collect(),
            None => self.tool_history.clone(),
        }
    }

    fn persist(&self) {
        let state_path = self.workspace_root.join(STATE_FILE_NAME);
        let Ok(json) = serde_json::to_string_pretty(self) else {
            tracing::warn!("failed to serialize session memory");
            return;
        };
        if let Err(err) = atomic_write(&state_path, &json) {
            tracing::warn!(error = %err, "failed to persist session memory");
        }
    }
}

fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}

fn quarantine_corrupt_file(state_path: &Path) {
    let unix_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let quarantined = state_path.with_file_name(format!("{STATE_FILE_NAME}.corrupt-{unix_ts}"));
    if let Err(err) = fs::rename(state_path, &quarantined) {
        tracing::warn!(error = %err, "failed to quarantine corrupt state file");
    }
}

/// If the loaded JSON predates `cwd_rel` and instead carries an absolute
/// `active_folder` key, derive `cwd_rel` from it before typed deserialization.
fn migrate_legacy_active_folder(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else { return };
    if obj.contains_key("cwd_rel") {
        return;
    }
    let Some(legacy) = obj.get("active_folder").and_then(Value::as_str) else { return };
    let Some(workspace_root) = obj.get("workspace_root").and_then(Value::as_str) else { return };

    let legacy_path = normalize_lexical(Path::new(legacy));
    let root_path = normalize_lexical(Path::new(workspace_root));
    if let Ok(rel) = legacy_path.strip_prefix(&root_path) {
        obj.insert("cwd_rel".to_string(), Value::String(rel.to_string_lossy().into_owned()));
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_core::types::{Plan, SkillStep, StepStatus};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn active_folder_is_join_of_root_and_cwd_rel() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.cwd_rel = PathBuf::from("sub/dir");
        assert_eq!(mem.active_folder(), dir.path().join("sub/dir"));
    }

    #[test]
    fn update_active_folder_rejects_escape_outside_workspace() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        let outside = std::env::temp_dir().join("definitely-outside-workspace-xyz");
        fs::create_dir_all(&outside).unwrap();
        mem.update_active_folder(Some(&outside));
        assert_eq!(mem.cwd_rel, PathBuf::new());
        let _ = fs::remove_dir_all(&outside);
    }

    #[test]
    fn update_active_folder_accepts_subdirectory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("project")).unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.update_active_folder(Some(&dir.path().join("project")));
        assert_eq!(mem.cwd_rel, PathBuf::from("project"));
    }

    #[test]
    fn persists_on_every_mutation_and_reloads() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.log_tool_usage("worker", 1, 0, "write_file", json!({"path": "a.txt"}), None);

        let reloaded = SessionMemory::load_or_init(dir.path());
        assert_eq!(reloaded.tool_history.len(), 1);
        assert_eq!(reloaded.tool_history[0].tool_name, "write_file");
    }

    #[test]
    fn corrupt_state_file_is_quarantined_and_fresh_session_starts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".agent_state.json"), "{ not json").unwrap();
        let mem = SessionMemory::load_or_init(dir.path());
        assert!(mem.tool_history.is_empty());
        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn mismatched_workspace_root_resets_session() {
        let dir = tempdir().unwrap();
        let other_dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(other_dir.path());
        mem.log_tool_usage("worker", 1, 0, "write_file", json!({}), None);
        fs::copy(
            other_dir.path().join(".agent_state.json"),
            dir.path().join(".agent_state.json"),
        )
        .unwrap();

        let reloaded = SessionMemory::load_or_init(dir.path());
        assert!(reloaded.tool_history.is_empty());
    }

    #[test]
    fn register_artifact_deduplicates_and_normalizes() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.register_artifact(1, Path::new("out.txt"));
        mem.register_artifact(1, Path::new("out.txt"));
        assert_eq!(mem.artifacts["1"].len(), 1);
    }

    #[test]
    fn step_status_never_regresses_from_done() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        let step = SkillStep { id: 1, status: StepStatus::Done, ..Default::default() };
        mem.save_plan(Plan { steps: vec![step], reasoning: String::new(), completion_criteria: Default::default() });
        mem.update_step_status(1, StepStatus::Pending);
        assert_eq!(mem.plan.unwrap().steps[0].status, StepStatus::Done);
    }

    #[test]
    fn get_recent_file_paths_collects_read_calls_across_lookback_window() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.log_tool_usage("w", 1, 0, "read_file", json!({"path": "a.txt"}), None);
        mem.log_tool_usage("w", 2, 0, "write_file", json!({"path": "b.txt"}), None);
        mem.log_tool_usage("w", 3, 0, "read_file", json!({"path": "c.txt"}), None);

        let recent = mem.get_recent_file_paths(2);
        assert!(recent.contains(&"c.txt".to_string()));
        assert!(!recent.contains(&"a.txt".to_string()));
    }

    #[test]
    fn get_clipboard_subset_matches_relative_and_absolute_forms() {
        let dir = tempdir().unwrap();
        let mut mem = SessionMemory::new(dir.path());
        mem.update_clipboard("notes.txt", "hello");
        let abs = dir.path().join("notes.txt").to_string_lossy().into_owned();
        let subset = mem.get_clipboard_subset(&[abs]);
        assert_eq!(subset.len(), 1);
    }
}
