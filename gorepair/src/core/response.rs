//! Split oracle output into per-file code fragments.
//!
//! Conventions, tried in order:
//! 1. one or more `**name.go**` labels, each followed by a fenced block;
//! 2. a `CODE:` marker, with `(test file)` on the label line to target the test file;
//! 3. the whole response, with any fences stripped.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static BOLD_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\*\*([^*\n]+?)\*\*:?[ \t]*\n?\s*```[A-Za-z]*[ \t]*\n(.*?)```")
        .expect("valid file label regex")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n(.*?)```").expect("valid fence regex")
});

const CODE_MARKER: &str = "CODE:";
const TEST_FILE_TAG: &str = "(test file)";

/// Code destined for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePatch {
    pub file: String,
    pub code: String,
}

/// File names the response may target.
#[derive(Debug, Clone, Copy)]
pub struct ResponseTargets<'a> {
    pub source: &'a str,
    pub test: &'a str,
    /// Used when the response names no file.
    pub default: &'a str,
}

/// Split a response into file patches, in encounter order.
pub fn split_response(response: &str, targets: &ResponseTargets<'_>) -> Vec<FilePatch> {
    let labelled: Vec<FilePatch> = BOLD_FILE_RE
        .captures_iter(response)
        .map(|caps| FilePatch {
            file: resolve_label(&caps[1], targets),
            code: caps[2].trim().to_string(),
        })
        .collect();
    if !labelled.is_empty() {
        return labelled;
    }

    if let Some((label, code)) = response.split_once(CODE_MARKER) {
        let file = if label.contains(TEST_FILE_TAG) {
            targets.test
        } else {
            targets.source
        };
        return vec![FilePatch {
            file: file.to_string(),
            code: strip_fences(code),
        }];
    }

    vec![FilePatch {
        file: targets.default.to_string(),
        code: strip_fences(response),
    }]
}

/// Contents of the fenced blocks in `text`, or the trimmed text when it has none.
pub fn strip_fences(text: &str) -> String {
    let blocks: Vec<&str> = FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect();
    if blocks.is_empty() {
        text.trim().trim_matches('`').trim().to_string()
    } else {
        blocks.join("\n\n")
    }
}

fn resolve_label(label: &str, targets: &ResponseTargets<'_>) -> String {
    let named = label
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| c == '`' || c == ':' || c == '"' || c == '\''))
        .find(|word| word.ends_with(".go"));
    match named {
        Some(name) => name.to_string(),
        None if label.contains(TEST_FILE_TAG) => targets.test.to_string(),
        None => targets.default.to_string(),
    }
}
