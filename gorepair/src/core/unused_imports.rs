//! Unused-import resolver.
//!
//! Finds `"path" imported and not used` diagnostics and strips those paths from
//! the import aggregate. Finding nothing is not an error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::merge::remove_imports;
use crate::core::types::SourceUnit;

static UNUSED_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^(?:\s*([^\s:]+\.go):\d+:\d+:\s*)?.*?"([^"]+)" imported (?:as \S+ )?(?:and|but) not used"#,
    )
    .expect("valid unused import regex")
});

/// Unused import paths keyed by the base name of the file they were reported
/// in. Diagnostics without a file land under the empty key.
pub fn unused_imports_by_file(output: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut by_file: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for caps in UNUSED_IMPORT_RE.captures_iter(output) {
        let Some(path) = caps.get(2) else { continue };
        let file = caps
            .get(1)
            .and_then(|m| Path::new(m.as_str()).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        by_file
            .entry(file)
            .or_default()
            .insert(path.as_str().to_string());
    }
    by_file
}

/// All unused import paths in `output`, regardless of file.
pub fn unused_imports(output: &str) -> BTreeSet<String> {
    unused_imports_by_file(output).into_values().flatten().collect()
}

/// Remove `paths` from `unit`, returning the unit and how many specs were dropped.
pub fn resolve(unit: SourceUnit, paths: &BTreeSet<String>) -> (SourceUnit, usize) {
    let before = unit.import_paths().len();
    let unit = remove_imports(unit, paths);
    let removed = before - unit.import_paths().len();
    (unit, removed)
}
