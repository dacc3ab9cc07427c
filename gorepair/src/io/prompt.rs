//! Prompt builder for oracle requests.
//!
//! Templates are minijinja documents split into sections by
//! `<!-- section:KEY required|droppable -->` markers. When a rendered prompt is
//! over budget, droppable sections go first, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const VERIFY_REQUEST_TEMPLATE: &str = include_str!("prompts/verify_request.md");
const START_TEMPLATE: &str = include_str!("prompts/start.md");
const OPTIMIZE_TEMPLATE: &str = include_str!("prompts/optimize.md");
const ADD_TESTS_TEMPLATE: &str = include_str!("prompts/add_tests.md");
const FIX_BUILD_TEMPLATE: &str = include_str!("prompts/fix_build.md");
const FIX_TESTS_TEMPLATE: &str = include_str!("prompts/fix_tests.md");
const FIX_PATCH_TEMPLATE: &str = include_str!("prompts/fix_patch.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("valid section regex")
});

/// Drop order when over budget, least useful first.
const DROP_ORDER: [&str; 5] = ["output", "test_source", "located", "source", "request"];

const TRUNCATED_NOTE: &str = "\n[truncated]";

/// Which template to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    VerifyRequest,
    Start,
    Optimize,
    AddTests,
    FixBuild,
    FixTests,
    FixPatch,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::VerifyRequest => "verify_request",
            PromptKind::Start => "start",
            PromptKind::Optimize => "optimize",
            PromptKind::AddTests => "add_tests",
            PromptKind::FixBuild => "fix_build",
            PromptKind::FixTests => "fix_tests",
            PromptKind::FixPatch => "fix_patch",
        }
    }

    fn source(self) -> &'static str {
        match self {
            PromptKind::VerifyRequest => VERIFY_REQUEST_TEMPLATE,
            PromptKind::Start => START_TEMPLATE,
            PromptKind::Optimize => OPTIMIZE_TEMPLATE,
            PromptKind::AddTests => ADD_TESTS_TEMPLATE,
            PromptKind::FixBuild => FIX_BUILD_TEMPLATE,
            PromptKind::FixTests => FIX_TESTS_TEMPLATE,
            PromptKind::FixPatch => FIX_PATCH_TEMPLATE,
        }
    }

    const ALL: [PromptKind; 7] = [
        PromptKind::VerifyRequest,
        PromptKind::Start,
        PromptKind::Optimize,
        PromptKind::AddTests,
        PromptKind::FixBuild,
        PromptKind::FixTests,
        PromptKind::FixPatch,
    ];
}

/// A diagnostic paired with the code it points into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedCode {
    pub file: String,
    pub line: usize,
    pub message: String,
    pub code: String,
}

/// Values available to every template. Templates use the subset they need.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInputs {
    pub request: String,
    /// File the step writes by default.
    pub target: String,
    pub file: String,
    pub source: String,
    pub test_file: String,
    pub test_source: Option<String>,
    pub package: String,
    /// Signatures of functions created or updated so far.
    pub functions: Vec<String>,
    /// Raw toolchain output.
    pub output: String,
    pub located: Vec<LocatedCode>,
    pub failing: Vec<String>,
    pub test_code: String,
    pub patch_file: String,
    pub patch_error: String,
    pub patch_code: String,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(mode)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if content.is_empty() {
            continue;
        }
        sections.push(ParsedSection {
            key: key.as_str().to_string(),
            required: mode.as_str() == "required",
            content,
        });
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(section = key, bytes_dropped = sections[idx].content.len(), "dropped section for budget");
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    let keep = if allowed > TRUNCATED_NOTE.len() {
        allowed - TRUNCATED_NOTE.len()
    } else {
        allowed
    };
    let mut cut = keep.min(last.content.len());
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    if allowed > TRUNCATED_NOTE.len() {
        last.content.push_str(TRUNCATED_NOTE);
    }
    debug!(section = %last.key, before_len, after_len = last.content.len(), "truncated section for budget");
}

/// Renders templates and enforces the byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for kind in PromptKind::ALL {
            env.add_template(kind.as_str(), kind.source())
                .with_context(|| format!("load {} template", kind.as_str()))?;
        }
        Ok(Self { env, budget_bytes })
    }

    pub fn build(&self, kind: PromptKind, inputs: &PromptInputs) -> Result<String> {
        let template = self
            .env
            .get_template(kind.as_str())
            .with_context(|| format!("get {} template", kind.as_str()))?;
        let rendered = template
            .render(inputs)
            .with_context(|| format!("render {} template", kind.as_str()))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PromptInputs {
        PromptInputs {
            request: "add a Sub function".to_string(),
            target: "calc.go".to_string(),
            file: "calc.go".to_string(),
            source: "package calc\n\nfunc Add(a, b int) int { return a + b }".to_string(),
            test_file: "calc_test.go".to_string(),
            package: "calc".to_string(),
            functions: vec!["func Sub(a, b int) int".to_string()],
            ..PromptInputs::default()
        }
    }

    /// Verifies every template renders with its contract and without markers.
    #[test]
    fn every_template_renders() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        for kind in PromptKind::ALL {
            let prompt = builder.build(kind, &inputs()).expect("render");
            assert!(prompt.contains("### Contract"), "{} has contract", kind.as_str());
            assert!(!prompt.contains("<!-- section"), "{} markers stripped", kind.as_str());
        }
    }

    /// Verifies the start prompt embeds the request and the full source.
    #[test]
    fn start_embeds_request_and_source() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder.build(PromptKind::Start, &inputs()).expect("render");
        let request_pos = prompt.find("add a Sub function").expect("request");
        let source_pos = prompt.find("func Add(a, b int) int").expect("source");
        assert!(request_pos < source_pos);
        assert!(!prompt.contains("<tests>"), "no test section without test source");
    }

    /// Verifies the add-tests prompt lists signatures and names the test file.
    #[test]
    fn add_tests_lists_signatures() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder.build(PromptKind::AddTests, &inputs()).expect("render");
        assert!(prompt.contains("- `func Sub(a, b int) int`"));
        assert!(prompt.contains("**calc_test.go**"));
    }

    /// Verifies the build output is dropped before the located code.
    #[test]
    fn budget_drops_raw_output_first() {
        let builder = PromptBuilder::new(700).expect("builder");
        let prompt = builder
            .build(
                PromptKind::FixBuild,
                &PromptInputs {
                    output: "noise ".repeat(500),
                    located: vec![LocatedCode {
                        file: "calc.go".to_string(),
                        line: 3,
                        message: "undefined: x".to_string(),
                        code: "func Add() int { return x }".to_string(),
                    }],
                    ..inputs()
                },
            )
            .expect("render");
        assert!(!prompt.contains("### Build Output"));
        assert!(prompt.contains("`calc.go:3`: undefined: x"));
        assert!(prompt.contains("return x"));
    }

    /// Verifies an oversized required section is truncated with a marker.
    #[test]
    fn truncates_when_required_sections_exceed_budget() {
        let builder = PromptBuilder::new(300).expect("builder");
        let prompt = builder
            .build(
                PromptKind::FixPatch,
                &PromptInputs {
                    patch_file: "calc.go".to_string(),
                    patch_error: "parse error at 1:1: unexpected".to_string(),
                    patch_code: "x".repeat(1_000),
                    ..inputs()
                },
            )
            .expect("render");
        assert!(prompt.ends_with("[truncated]"));
        assert!(prompt.len() <= 300 + 4);
    }
}
