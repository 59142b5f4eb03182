//! Integration Test: Production Code Rules
//!
//! **Policy**: strategy and dispatch code waits on I/O or cancellation, never
//! on a timer, and propagates errors instead of panicking.
//! **Exceptions**: test code (`#[cfg(test)]` modules and test-only files).

use architectural_enforcement::{scan_directory, Violation};

const PRODUCTION_DIRS: &[&str] = &["modelpool/core/src", "modelpool/cli/src"];

fn scan_all(patterns: &[&str]) -> Vec<Violation> {
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_directory(dir, patterns))
        .collect()
}

fn report(kind: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {kind} found in production code:\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} {kind} violation(s).", violations.len());
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_all(&["::sleep(", ".sleep("]);
    report("sleep call(s)", &violations);
}

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = scan_all(&[".unwrap()", ".expect("]);
    report("unwrap/expect call(s)", &violations);
}

#[test]
fn test_scanned_directories_exist() {
    let root = architectural_enforcement::workspace_root();
    for dir in PRODUCTION_DIRS {
        assert!(root.join(dir).exists(), "missing source directory {dir}");
    }
}
