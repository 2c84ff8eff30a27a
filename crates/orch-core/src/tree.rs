//! Bounded-depth ASCII directory tree rendering, shared by SkillRegistry's
//! directory-structure view and SessionMemory's roadmap.
//!
//! Style grounded in box-drawing (`├── ` / `└── ` / `│   `) tree rendering,
//! generalized from the teacher repo's dependency-graph terminal renderer to
//! walk a real filesystem directory instead of an in-memory DAG.

use std::path::Path;

pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "venv",
    "node_modules",
    "__pycache__",
    "target",
    ".agent",
];

/// Renders a bounded-depth tree of `root`.
///
/// `max_depth` counts the root as depth 0; subdirectories at depth <= `max_depth`
/// are descended into. `max_entries_per_dir` caps how many files/dirs are shown
/// per directory, with a `… N more` truncation line once exceeded.
pub fn render_tree(root: &Path, max_depth: usize, max_entries_per_dir: usize) -> String {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{root_name}/")];
    walk(root, 0, max_depth, max_entries_per_dir, "", &mut lines);
    lines.join("\n")
}

fn walk(
    dir: &Path,
    depth: usize,
    max_depth: usize,
    max_entries_per_dir: usize,
    prefix: &str,
    lines: &mut Vec<String>,
) {
    if depth > max_depth {
        return;
    }

    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };

    let mut entries: Vec<_> = read_dir
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') || DEFAULT_IGNORED_DIRS.contains(&name.as_ref())
        })
        .filter(|e| !DEFAULT_IGNORED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        .collect();
    entries.sort_by_key(|e| (e.path().is_file(), e.file_name()));

    let total = entries.len();
    let shown = entries.into_iter().take(max_entries_per_dir).collect::<Vec<_>>();

    for (i, entry) in shown.iter().enumerate() {
        let is_last_shown = i + 1 == shown.len() && total <= max_entries_per_dir;
        let branch = if is_last_shown { "└── " } else { "├── " };
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.path().is_dir();
        let display_name = if is_dir { format!("{name}/") } else { name };
        lines.push(format!("{prefix}{branch}{display_name}"));

        if is_dir {
            let child_prefix = if is_last_shown {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            walk(
                &entry.path(),
                depth + 1,
                max_depth,
                max_entries_per_dir,
                &child_prefix,
                lines,
            );
        }
    }

    if total > max_entries_per_dir {
        lines.push(format!("{prefix}… {} more", total - max_entries_per_dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn renders_simple_tree() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), "y").unwrap();

        let tree = render_tree(dir.path(), 2, 8);
        assert!(tree.contains("a.txt"));
        assert!(tree.contains("sub/"));
        assert!(tree.contains("b.txt"));
    }

    #[test]
    fn skips_ignored_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules").join("pkg.json"), "{}").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main(){}").unwrap();

        let tree = render_tree(dir.path(), 2, 8);
        assert!(tree.contains("main.rs"));
        assert!(!tree.contains("node_modules"));
        assert!(!tree.contains("pkg.json"));
    }

    #[test]
    fn stops_recursing_past_max_depth() {
        let dir = tempdir().unwrap();
        let deep = dir.path().join("l1").join("l2").join("l3");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("buried.txt"), "z").unwrap();

        let tree = render_tree(dir.path(), 1, 8);
        assert!(tree.contains("l1/"));
        assert!(!tree.contains("buried.txt"));
    }

    #[test]
    fn truncates_after_max_entries() {
        let dir = tempdir().unwrap();
        for i in 0..12 {
            fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let tree = render_tree(dir.path(), 1, 8);
        assert!(tree.contains("more"));
    }
}
