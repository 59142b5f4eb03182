//! Architectural Enforcement
//!
//! Source scanners backing the workspace's architectural tests:
//! - No sleep calls in production code (wait on I/O or cancellation instead)
//! - No `unwrap()` / `expect()` in production code (propagate errors)
//!
//! Test code is exempt: everything from the first `#[cfg(test)]` in a file
//! onwards, and files that are themselves test-only modules.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden call found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the call was found in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Files that only exist under `#[cfg(test)]` and are skipped entirely
pub const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// Production lines of a source file: `(1-based line number, line)`
///
/// Stops at the first `#[cfg(test)]`. Comment tails are stripped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Scan one file's production code for any of `patterns`
#[must_use]
pub fn scan_source(path: &Path, content: &str, patterns: &[&str]) -> Vec<Violation> {
    production_lines(content)
        .into_iter()
        .filter(|(_, code)| patterns.iter().any(|p| code.contains(p)))
        .map(|(line, _)| Violation {
            path: path.to_path_buf(),
            line,
            text: content.lines().nth(line - 1).unwrap_or_default().trim().to_string(),
        })
        .collect()
}

/// Scan every `.rs` file under `dir` (relative to the workspace root)
#[must_use]
pub fn scan_directory(dir: &str, patterns: &[&str]) -> Vec<Violation> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if TEST_ONLY_FILES.contains(&file_name) {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        violations.extend(scan_source(path, &content, patterns));
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sleep_in_production_code() {
        let code = "fn bad() {\n    tokio::time::sleep(d).await;\n}\n";
        let found = scan_source(Path::new("bad.rs"), code, &["::sleep("]);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].text, "tokio::time::sleep(d).await;");
    }

    #[test]
    fn test_ignores_test_module_and_comments() {
        let code = "\
fn good() {
    // tokio::time::sleep(d) would block progress
}

#[cfg(test)]
mod tests {
    fn helper() { tokio::time::sleep(d); value.unwrap(); }
}
";
        let found = scan_source(Path::new("good.rs"), code, &["::sleep(", ".unwrap()"]);
        assert!(found.is_empty(), "unexpected: {found:?}");
    }

    #[test]
    fn test_unwrap_or_is_not_unwrap() {
        let code = "fn f() { let x = y.unwrap_or_default(); let z = w.unwrap_or(1); }\n";
        assert!(scan_source(Path::new("f.rs"), code, &[".unwrap()"]).is_empty());
    }
}
