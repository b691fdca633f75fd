//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, async `reqwest`.
//! Synchronous helpers (config loading before the stage starts) may use
//! `std::fs`.

use architectural_enforcement::{code_part, is_in_async_function, production_sources, violation};

const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);

            // The blocking HTTP client is never acceptable
            if code.contains("reqwest::blocking") {
                violations.push(format!("Blocking HTTP client: {}", violation(&file, idx)));
                continue;
            }

            if !is_in_async_function(&file.lines, idx) {
                continue;
            }

            for (pattern, kind) in BLOCKING {
                if code.contains(pattern) {
                    violations.push(format!("{kind}: {}", violation(&file, idx)));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async production code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
