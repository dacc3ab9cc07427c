//! Map toolchain diagnostics back to the code that caused them.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::parser::parse;
use crate::core::render::{ImportStyle, render_declaration, render_imports};
use crate::core::types::{Diagnostic, DiagnosticKind, SourceUnit};

/// Lines shown on each side of a diagnostic with no enclosing declaration.
pub const CONTEXT_RADIUS: usize = 10;

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+):\d+").expect("valid position regex"));

/// `path:LINE[:COL]: message`. The column is absent for `t.Errorf` output.
static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([^\s:]+\.go):(\d+)(?::(\d+))?:\s*(.*?)\s*$").expect("valid diagnostic regex")
});

/// Line number of the first `path:LINE:COL` position in `text`.
pub fn extract_line_number(text: &str) -> Option<usize> {
    POSITION_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Every positioned line in toolchain output, in order.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    DIAGNOSTIC_RE
        .captures_iter(output)
        .filter_map(|caps| {
            let file = caps.get(1)?.as_str().to_string();
            let line = caps.get(2)?.as_str().parse().ok()?;
            let column = caps.get(3).and_then(|m| m.as_str().parse().ok());
            let message = caps.get(4).map_or("", |m| m.as_str()).to_string();
            let kind = if message.contains("imported and not used")
                || message.contains("imported but not used")
                || message.contains(") and not used")
            {
                DiagnosticKind::UnusedImport
            } else if column.is_none() {
                DiagnosticKind::TestFailure
            } else {
                DiagnosticKind::CompileError
            };
            Some(Diagnostic {
                file,
                line,
                column: column.unwrap_or(0),
                message,
                kind,
            })
        })
        .collect()
}

/// Text of the declaration containing `line`, or a window of raw lines around it.
pub fn locate_declaration(unit: &SourceUnit, source: &str, line: usize) -> String {
    if let Some(block) = &unit.imports
        && block.range.contains(line)
    {
        return render_imports(block, &ImportStyle::default());
    }
    match unit.decls.iter().find(|decl| decl.range.contains(line)) {
        Some(decl) => render_declaration(decl),
        None => context_window(source, line),
    }
}

/// Like [`locate_declaration`], parsing `source` first. Unparseable source
/// falls back to the line window.
pub fn locate_in_source(source: &str, line: usize) -> String {
    match parse(source) {
        Ok(unit) => locate_declaration(&unit, source, line),
        Err(_) => context_window(source, line),
    }
}

/// Lines `line-10 ..= line+10` (1-based, inclusive), clamped to the file.
pub fn context_window(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start = line.saturating_sub(CONTEXT_RADIUS).max(1);
    let end = line.saturating_add(CONTEXT_RADIUS).min(lines.len());
    if start > end {
        return String::new();
    }
    lines[start - 1..end].join("\n")
}
