//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors. `unwrap()` and `expect()`
//! are for tests only; the `unwrap_or*` family is fine.

use architectural_enforcement::{code_part, production_sources, violation};

fn panics(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

/// Test that production code does not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            if panics(code_part(line)) {
                violations.push(violation(&file, idx));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: unwrap()/expect() found in production code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }

        panic!(
            "\nFound {} panic violation(s) in production code.\nPropagate the error instead.",
            violations.len()
        );
    }
}

#[test]
fn test_panic_detection() {
    assert!(panics("let x = y.unwrap();"));
    assert!(panics("let x = y.expect(\"present\");"));
    assert!(!panics("let x = y.unwrap_or_default();"));
    assert!(!panics("let x = y.unwrap_or_else(|_| z);"));
}
