//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread to wait. Every delay
//! on the stage is a tokio timer (clip playback, fallback bound, readiness
//! polling, status rotation, perpetual retry) so a paused test clock
//! controls all of them.

use architectural_enforcement::{code_part, production_sources, violation};

const FORBIDDEN: &[&str] = &["std::thread::sleep", "thread::sleep("];

/// Test that production code does not call `std::thread::sleep`
#[test]
fn test_no_thread_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if FORBIDDEN.iter().any(|pattern| code.contains(pattern)) {
                violations.push(violation(&file, idx));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Thread sleeps found in production code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        eprintln!("\n✅ Use tokio::time::sleep / tokio::time::interval instead");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// The scan must actually see the stage sources, or it proves nothing
#[test]
fn test_scan_covers_stage_sources() {
    let files = production_sources();
    assert!(files.iter().any(|f| f.path.ends_with("stage/core/src/stage.rs")));
    assert!(files.iter().any(|f| f.path.ends_with("stage/daemon/src/main.rs")));
}
