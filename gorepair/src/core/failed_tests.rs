//! Failed-test grouper.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::SourceUnit;

static FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--- FAIL: (\S+)").expect("valid fail regex"));

/// Failing test names from `go test` output.
///
/// Names are grouped by top-level test in order of first appearance. A test
/// with failing subtests is represented by those subtests only.
pub fn failed_tests(output: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for caps in FAIL_RE.captures_iter(output) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }

    let mut parents: Vec<&str> = Vec::new();
    for name in &seen {
        let parent = top_level_name(name);
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    let mut failing = Vec::new();
    for parent in parents {
        for name in seen.iter().filter(|name| top_level_name(name) == parent) {
            let prefix = format!("{name}/");
            let has_failing_child = seen.iter().any(|other| other.starts_with(&prefix));
            if !has_failing_child {
                failing.push(name.clone());
            }
        }
    }
    failing
}

/// Source of the top-level test functions behind `names`, in file order,
/// separated by blank lines. Unknown names are skipped.
pub fn test_code(unit: &SourceUnit, names: &[String]) -> String {
    let wanted: BTreeSet<&str> = names.iter().map(|name| top_level_name(name)).collect();
    unit.functions()
        .filter(|decl| decl.receiver.is_none() && wanted.contains(decl.name.as_str()))
        .map(|decl| decl.payload.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn top_level_name(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse;

    /// Verifies a parent with failing subtests is replaced by its subtests.
    #[test]
    fn parent_with_children_yields_children() {
        let output = "--- FAIL: TestA (0.00s)\n    --- FAIL: TestA/sub1 (0.00s)\n    --- FAIL: TestA/sub2 (0.00s)\nFAIL\n";
        assert_eq!(failed_tests(output), vec!["TestA/sub1", "TestA/sub2"]);
    }

    /// Verifies a parent without subtests stands for itself and order is kept.
    #[test]
    fn childless_parent_is_its_own_unit() {
        let output = "--- FAIL: TestB (0.01s)\n--- FAIL: TestA (0.00s)\n    --- FAIL: TestA/x (0.00s)\n--- FAIL: TestB (0.01s)\n";
        assert_eq!(failed_tests(output), vec!["TestB", "TestA/x"]);
    }

    /// Verifies only the deepest failing level of nested subtests is kept.
    #[test]
    fn nested_subtests_keep_leaves() {
        let output = "--- FAIL: TestA\n--- FAIL: TestA/group\n--- FAIL: TestA/group/case\n";
        assert_eq!(failed_tests(output), vec!["TestA/group/case"]);
    }

    /// Verifies test code is recovered once per function, in file order.
    #[test]
    fn recovers_test_code_in_file_order() {
        let unit = parse(
            "package p\n\nimport \"testing\"\n\nfunc TestA(t *testing.T) {}\n\nfunc helper() {}\n\nfunc TestB(t *testing.T) {}\n",
        )
        .expect("parse");
        let names = vec![
            "TestB".to_string(),
            "TestA/sub1".to_string(),
            "TestA/sub2".to_string(),
            "TestMissing".to_string(),
        ];
        assert_eq!(
            test_code(&unit, &names),
            "func TestA(t *testing.T) {}\n\nfunc TestB(t *testing.T) {}"
        );
    }
}
