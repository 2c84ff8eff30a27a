//! Pure text-processing helpers shared by SkillRegistry and the Orchestrator's
//! required-script enforcement pass.

use regex::Regex;
use std::sync::LazyLock;

static SCRIPT_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scripts/([A-Za-z0-9._-]+\.(?:sh|py|js))").unwrap());

/// Extracts script filenames referenced as `scripts/foo.sh` in manual text,
/// in first-occurrence order, deduplicated.
pub fn extract_required_scripts(content: &str) -> Vec<String> {
    let mut ordered = Vec::new();
    for caps in SCRIPT_REF_RE.captures_iter(content) {
        let name = caps[1].to_string();
        if !ordered.contains(&name) {
            ordered.push(name);
        }
    }
    ordered
}

/// Chooses an interpreter for a script by its file extension.
pub fn interpreter_for(script_name: &str) -> Option<&'static str> {
    if script_name.ends_with(".py") {
        Some("python3")
    } else if script_name.ends_with(".sh") {
        Some("bash")
    } else if script_name.ends_with(".js") {
        Some("node")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_first_occurrence_order_deduped() {
        let content = "Run scripts/init.sh then scripts/bundle.sh.\nLater, scripts/init.sh again.";
        let scripts = extract_required_scripts(content);
        assert_eq!(scripts, vec!["init.sh", "bundle.sh"]);
    }

    #[test]
    fn ignores_non_matching_extensions() {
        let content = "See scripts/notes.txt for context, run scripts/build.sh";
        let scripts = extract_required_scripts(content);
        assert_eq!(scripts, vec!["build.sh"]);
    }

    #[test]
    fn no_scripts_returns_empty() {
        assert!(extract_required_scripts("nothing here").is_empty());
    }

    #[test]
    fn interpreter_selection_by_extension() {
        assert_eq!(interpreter_for("init.py"), Some("python3"));
        assert_eq!(interpreter_for("init.sh"), Some("bash"));
        assert_eq!(interpreter_for("init.js"), Some("node"));
        assert_eq!(interpreter_for("init"), None);
    }
}
