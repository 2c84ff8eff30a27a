//! Discovers skills on disk, exposes their metadata and bundled resources,
//! and runs their scripts. Grounded in the teacher's skill command surface,
//! generalized from a CLI-facing view into a library the orchestrator drives
//! directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use orch_core::frontmatter::{parse_frontmatter, strip_frontmatter};
use orch_core::scripts::{extract_required_scripts, interpreter_for};
use orch_core::tree::{render_tree, DEFAULT_IGNORED_DIRS};
use orch_core::types::{Skill, SkillSummary};
use orch_telemetry::Telemetry;
use serde_json::json;

const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 300;
const MAX_OUTPUT_LINES: usize = 200;

pub struct SkillRegistry {
    skills_root: PathBuf,
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    /// Scans `{skills_root}/**/SKILL.md` (recursive, any depth), parsing the
    /// leading frontmatter block. Entries missing both `name` and
    /// `description` are skipped with a warning telemetry event rather than
    /// aborting discovery.
    pub fn discover(skills_root: impl Into<PathBuf>, telemetry: &Telemetry) -> Self {
        let skills_root = skills_root.into();
        let mut skills = HashMap::new();

        for manual_path in find_skill_manuals(&skills_root) {
            let dir_path = manual_path.parent().unwrap_or(&skills_root).to_path_buf();
            let Ok(raw) = std::fs::read_to_string(&manual_path) else {
                continue;
            };

            let Some(frontmatter) = parse_frontmatter(&raw) else {
                telemetry.warning(
                    "skill_registry",
                    "skill_skipped_malformed_frontmatter",
                    json!({"directory": dir_path.to_string_lossy()}),
                );
                continue;
            };

            let required_scripts = extract_required_scripts(&raw);
            skills.insert(
                frontmatter.name.clone(),
                Skill {
                    name: frontmatter.name,
                    description: frontmatter.description,
                    manual_path,
                    directory_path: dir_path,
                    required_scripts,
                },
            );
        }

        SkillRegistry { skills_root, skills }
    }

    pub fn list(&self) -> Vec<SkillSummary> {
        let mut summaries: Vec<SkillSummary> = self.skills.values().map(SkillSummary::from).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    fn get(&self, name: &str) -> anyhow::Result<&Skill> {
        self.skills
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("skill not found: {name}"))
    }

    /// Composed view: metadata header + bounded directory tree (depth 3) +
    /// full manual body.
    pub fn get_content(&self, name: &str) -> anyhow::Result<String> {
        let skill = self.get(name)?;
        let raw = std::fs::read_to_string(&skill.manual_path)?;
        let body = strip_frontmatter(&raw);
        let tree = render_tree(&skill.directory_path, 3, usize::MAX);

        Ok(format!(
            "# {}\n\n{}\n\n## Directory Structure\n```\n{}\n```\n\n{}",
            skill.name, skill.description, tree, body
        ))
    }

    /// Enumerates files under the skill's `scripts/`, `references/`, and
    /// `assets/` subdirectories.
    pub fn list_resources(&self, name: &str) -> anyhow::Result<String> {
        let skill = self.get(name)?;
        let mut sections = Vec::new();
        for subdir in ["scripts", "references", "assets"] {
            let dir = skill.directory_path.join(subdir);
            let mut files = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.filter_map(|e| e.ok()) {
                    if entry.path().is_file() {
                        files.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
            files.sort();
            if !files.is_empty() {
                sections.push(format!("{subdir}/:\n{}", files.join("\n")));
            }
        }
        Ok(sections.join("\n\n"))
    }

    /// Reads a bundled reference file. Rejects `..` and absolute paths.
    /// Falls back to `references/{relative_path}` when the path isn't found
    /// directly under the skill directory.
    pub fn read_reference(&self, name: &str, relative_path: &str) -> anyhow::Result<String> {
        let skill = self.get(name)?;
        let candidate = Path::new(relative_path);
        if candidate.is_absolute() || candidate.components().any(|c| c == std::path::Component::ParentDir) {
            anyhow::bail!("path traversal rejected: {relative_path}");
        }

        let direct = skill.directory_path.join(candidate);
        if direct.is_file() {
            return Ok(std::fs::read_to_string(direct)?);
        }

        let under_references = skill.directory_path.join("references").join(candidate);
        if under_references.is_file() {
            return Ok(std::fs::read_to_string(under_references)?);
        }

        anyhow::bail!("reference not found: {relative_path}")
    }

    /// Regex-extracted, order-preserving, deduplicated script references in
    /// the manual body.
    pub fn required_scripts(&self, name: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.get(name)?.required_scripts.clone())
    }

    /// Runs a bundled script with `project_root` (or the process cwd if
    /// absent) as its working directory, returning a string prefixed
    /// `[SUCCESS]` or `[FAILURE]`.
    pub async fn run_script(
        &self,
        name: &str,
        script_name: &str,
        args: &[String],
        project_root: Option<&Path>,
    ) -> anyhow::Result<String> {
        let skill = self.get(name)?;
        let script_path = skill.directory_path.join("scripts").join(script_name);
        if !script_path.is_file() {
            anyhow::bail!("script not found: {script_name}");
        }

        let (program, full_args) = match interpreter_for(script_name) {
            Some(interpreter) => {
                let mut full_args = vec![script_path.to_string_lossy().into_owned()];
                full_args.extend(args.iter().cloned());
                (interpreter.to_string(), full_args)
            }
            None => (script_path.to_string_lossy().into_owned(), args.to_vec()),
        };

        let options = orch_process::SpawnOptions {
            cwd: project_root.map(|p| p.to_path_buf()),
            env: Vec::new(),
            idle_timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
        };

        let result = orch_process::run_and_capture(&program, &full_args, options).await?;
        Ok(format_script_result(&result))
    }

    pub fn skills_root(&self) -> &Path {
        &self.skills_root
    }
}

fn format_script_result(result: &orch_process::ExecutionResult) -> String {
    if result.succeeded() {
        format!("[SUCCESS] {}", cap_lines(&result.output))
    } else {
        let combined = if result.stderr_output.is_empty() {
            result.output.clone()
        } else {
            format!("{}\n{}", result.output, result.stderr_output)
        };
        format!("[FAILURE] exit {}: {}", result.exit_code, cap_lines(&combined))
    }
}

fn cap_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= MAX_OUTPUT_LINES {
        return text.to_string();
    }
    let mut capped = lines[..MAX_OUTPUT_LINES].join("\n");
    capped.push_str(&format!("\n... ({} more lines truncated)", lines.len() - MAX_OUTPUT_LINES));
    capped
}

/// Recursively finds every `SKILL.md` under `root`, skipping the same
/// noise directories `render_tree` skips.
fn find_skill_manuals(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if DEFAULT_IGNORED_DIRS.contains(&name.as_ref()) || name.starts_with('.') {
                    continue;
                }
                stack.push(path);
            } else if path.file_name().map(|n| n == "SKILL.md").unwrap_or(false) {
                found.push(path);
            }
        }
    }

    found
}
