//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No thread sleeps in production code (timers go through tokio)
//! - No blocking I/O inside async functions
//! - No panicking `unwrap()`/`expect()` in production code
//!
//! The helpers below find production sources and strip the parts the rules
//! do not apply to (comments, trailing `#[cfg(test)]` modules).

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories checked by every rule, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["stage/core/src", "stage/daemon/src"];

/// One production source file, cut at its test module
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Lines up to (not including) the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every `.rs` file under [`PRODUCTION_DIRS`]
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(SourceFile {
                path: relative,
                lines: production_lines(&content),
            });
        }
    }

    files
}

/// Lines before the first `#[cfg(test)]` attribute
#[must_use]
pub fn production_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

/// The code part of a line, without a trailing `//` comment
///
/// Only `//` outside string literals counts, so URLs survive.
#[must_use]
pub fn code_part(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return &line[..idx - 1],
            _ => {}
        }
        prev = ch;
    }
    line
}

/// Whether the closest enclosing `fn` above `idx` is `async`
#[must_use]
pub fn is_in_async_function(lines: &[String], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        let code = code_part(line).trim();
        if let Some(pos) = code.find("fn ") {
            let prefix = &code[..pos];
            if prefix.is_empty() || prefix.ends_with(' ') {
                return prefix.contains("async");
            }
        }
    }
    false
}

/// Format a violation as `path:line - code`
#[must_use]
pub fn violation(file: &SourceFile, idx: usize) -> String {
    format!(
        "{}:{} - {}",
        file.path.display(),
        idx + 1,
        file.lines[idx].trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_code_part_strips_comments_not_urls() {
        assert_eq!(code_part("let x = 1; // note"), "let x = 1; ");
        assert_eq!(
            code_part(r#"let url = "http://host/x"; // c"#),
            r#"let url = "http://host/x"; "#
        );
        assert_eq!(code_part("/// docs"), "");
    }

    #[test]
    fn test_production_lines_stop_at_tests() {
        let src = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n";
        assert_eq!(production_lines(src), vec!["fn a() {}".to_string(), String::new()]);
    }

    #[test]
    fn test_async_function_detection() {
        let src = lines(&[
            "pub async fn load() {",
            "    let x = std::fs::read(p);",
            "}",
            "fn sync_load() {",
            "    let y = std::fs::read(p);",
            "}",
        ]);
        assert!(is_in_async_function(&src, 1));
        assert!(!is_in_async_function(&src, 4));
    }

    #[test]
    fn test_workspace_root_contains_stage() {
        assert!(workspace_root().join("stage").exists());
    }
}
