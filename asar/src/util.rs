use asar_format::Entry;

use crate::error::{Error, Result};

/// Compile glob patterns given on the command line.
pub fn parse_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|source| Error::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Check if an archive-relative path or its file name matches any pattern
pub fn matches_any(rel: &str, patterns: &[glob::Pattern]) -> bool {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    patterns
        .iter()
        .any(|pattern| pattern.matches(rel) || pattern.matches(name))
}

/// Format file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    use humansize::{file_size_opts as options, FileSize};
    bytes
        .file_size(options::BINARY)
        .unwrap_or_else(|_| bytes.to_string())
}

/// Short label for an entry's kind, as shown by `list --long`
pub fn kind(entry: &Entry<'_, '_>) -> &'static str {
    if entry.is_dir() {
        "dir"
    } else if entry.is_link() {
        "link"
    } else if entry.is_executable() {
        "exec"
    } else {
        "file"
    }
}

/// Resolve a link target found on disk to a path relative to the archive
/// root. `parent` is the archive path of the directory holding the link.
/// Returns `None` when the target leaves the archive.
pub fn resolve_link(parent: &str, target: &str) -> Option<String> {
    if target.starts_with('/') {
        return None;
    }

    let mut parts: Vec<&str> = parent.split('/').filter(|x| !x.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_nested_names() {
        let patterns = parse_patterns(&["*.node".into(), "docs/**".into()]).unwrap();
        assert!(matches_any("native.node", &patterns));
        assert!(matches_any("lib/build/native.node", &patterns));
        assert!(matches_any("docs/a/b.md", &patterns));
        assert!(!matches_any("lib/index.js", &patterns));
    }

    #[test]
    fn invalid_pattern() {
        assert!(matches!(
            parse_patterns(&["[".into()]),
            Err(Error::InvalidPattern { pattern, .. }) if pattern == "["
        ));
    }

    #[test]
    fn links_resolve_within_archive() {
        assert_eq!(resolve_link("a/b", "c.txt").as_deref(), Some("a/b/c.txt"));
        assert_eq!(resolve_link("a/b", "../c.txt").as_deref(), Some("a/c.txt"));
        assert_eq!(resolve_link("", "./x/./y").as_deref(), Some("x/y"));
        assert_eq!(resolve_link("a", "../../etc/passwd"), None);
        assert_eq!(resolve_link("a", "/etc/passwd"), None);
        assert_eq!(resolve_link("a", ".."), None);
    }
}
