//! Frontmatter parsing for SKILL.md manuals: a leading `---` delimited block
//! with `name:` and `description:` keys, followed by the markdown body.

/// Parsed frontmatter fields. Both `name` and `description` are required;
/// callers treat a `None` return as "skip this entry, log a warning".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontmatter {
    pub name: String,
    pub description: String,
}

/// Parses the leading `---\n...\n---` frontmatter block out of a SKILL.md's
/// raw content. Returns `None` if the block is missing or lacks either
/// required key.
pub fn parse_frontmatter(content: &str) -> Option<Frontmatter> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content.trim_start().strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let block = &rest[..end];

    let mut name = None;
    let mut description = None;
    for line in block.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = strip_quotes(value.trim());
            match key {
                "name" => name = Some(value.to_string()),
                "description" => description = Some(value.to_string()),
                _ => {}
            }
        }
    }

    match (name, description) {
        (Some(n), Some(d)) if !n.is_empty() && !d.is_empty() => {
            Some(Frontmatter { name: n, description: d })
        }
        _ => None,
    }
}

/// Returns the markdown body following the frontmatter block, or the whole
/// content if there is no frontmatter block.
pub fn strip_frontmatter(content: &str) -> &str {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => content,
    }
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_frontmatter() {
        let content = "---\nname: pdf-merge\ndescription: Merge PDF files\n---\n# PDF Merge\nBody text.";
        let fm = parse_frontmatter(content).unwrap();
        assert_eq!(fm.name, "pdf-merge");
        assert_eq!(fm.description, "Merge PDF files");
    }

    #[test]
    fn parses_quoted_values() {
        let content = "---\nname: \"pdf-merge\"\ndescription: 'Merge PDF files'\n---\nBody";
        let fm = parse_frontmatter(content).unwrap();
        assert_eq!(fm.name, "pdf-merge");
        assert_eq!(fm.description, "Merge PDF files");
    }

    #[test]
    fn missing_description_is_skipped() {
        let content = "---\nname: pdf-merge\n---\nBody";
        assert!(parse_frontmatter(content).is_none());
    }

    #[test]
    fn missing_frontmatter_block_is_skipped() {
        let content = "# PDF Merge\nNo frontmatter here.";
        assert!(parse_frontmatter(content).is_none());
    }

    #[test]
    fn empty_value_is_treated_as_missing() {
        let content = "---\nname:\ndescription: x\n---\nBody";
        assert!(parse_frontmatter(content).is_none());
    }

    #[test]
    fn strip_frontmatter_returns_body_only() {
        let content = "---\nname: a\ndescription: b\n---\n# Title\nBody text.";
        assert_eq!(strip_frontmatter(content), "# Title\nBody text.");
    }

    #[test]
    fn strip_frontmatter_passthrough_when_absent() {
        let content = "# Title\nNo frontmatter.";
        assert_eq!(strip_frontmatter(content), content);
    }
}
