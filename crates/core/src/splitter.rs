//! Splits a generated markdown document into named Terraform files.
//!
//! The model is asked to answer with one `# <name>.tf` header per file, each
//! followed by a fenced code block. Headers open a new buffer, fences toggle
//! capture, and only fenced lines under an active header are kept. When the
//! reply ignores the header convention the fenced bodies (or, failing that,
//! the whole reply) become [`DEFAULT_FILE_NAME`].

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::file_set::{FileSet, DEFAULT_FILE_NAME};

const FENCE: &str = "```";

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#+\s+(.+\.tf)$").expect("header pattern is valid"))
}

pub fn split_document(text: &str) -> FileSet {
    let trimmed = text.trim();
    let mut files = FileSet::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut in_fence = false;

    for line in trimmed.lines() {
        if let Some(name) = header_file_name(line) {
            flush(&mut files, current.take());
            current = Some((name.to_string(), Vec::new()));
            in_fence = false;
        } else if is_fence(line) {
            in_fence = !in_fence;
        } else if in_fence {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
        }
    }
    flush(&mut files, current.take());

    if files.is_empty() {
        let blocks = fenced_blocks(trimmed);
        let content = if blocks.is_empty() { trimmed.to_string() } else { blocks.join("\n\n") };
        files.insert(DEFAULT_FILE_NAME, content);
    }

    files
}

fn header_file_name(line: &str) -> Option<&str> {
    header_pattern()
        .captures(line.trim_end())
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

fn is_fence(line: &str) -> bool {
    line.trim().starts_with(FENCE)
}

// Headers with no captured lines are dropped; a repeated name keeps the last body.
fn flush(files: &mut FileSet, buffer: Option<(String, Vec<&str>)>) {
    if let Some((name, lines)) = buffer {
        if !lines.is_empty() {
            files.insert(name, lines.join("\n"));
        }
    }
}

/// Bodies of every closed fenced block, info strings dropped and trimmed.
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut body: Option<Vec<&str>> = None;

    for line in text.lines() {
        if is_fence(line) {
            match body.take() {
                Some(lines) => blocks.push(lines.join("\n").trim().to_string()),
                None => body = Some(Vec::new()),
            }
        } else if let Some(lines) = body.as_mut() {
            lines.push(line);
        }
    }

    blocks
}
