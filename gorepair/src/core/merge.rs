//! Declaration merger: apply a parsed patch onto a parsed base unit.
//!
//! Rules:
//! - imports: ordered set union, base first, one aggregate;
//! - const/var/type: matched by name within a namespace, replaced in place, else appended.
//!   A patch spec that redeclares some names of a multi-name base spec
//!   (`var a, b = 1, 2`) takes those names out of it;
//! - functions: matched by `(receiver, name)`, replaced or appended, and reported.
//!
//! Base declarations the patch does not address are never removed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::parser::split_value_spec;
use crate::core::types::{
    Body, Declaration, Group, GroupId, ImportBlock, Namespace, SourceUnit,
};

/// Functions created or updated by one merge, as signature lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Result of [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub unit: SourceUnit,
    pub report: MergeReport,
}

/// Merge `patch` into `base`.
pub fn merge(base: &SourceUnit, patch: &SourceUnit) -> Merged {
    let mut unit = base.clone();
    let mut report = MergeReport::default();

    if unit.package.is_none() {
        unit.package.clone_from(&patch.package);
    }
    if unit.preamble.is_empty() {
        unit.preamble.clone_from(&patch.preamble);
    }
    if unit.trailer.is_empty() {
        unit.trailer.clone_from(&patch.trailer);
    }

    if let Some(patch_imports) = &patch.imports {
        merge_imports(&mut unit, patch_imports);
    }

    let mut index = DeclIndex::build(&unit.decls);
    let mut new_groups: BTreeMap<GroupId, GroupId> = BTreeMap::new();

    for incoming in &patch.decls {
        let hits = index.find_all(&unit.decls, incoming);
        match hits.first().copied() {
            Some(pos) if incoming.is_function() => {
                let existing = &unit.decls[pos];
                if incoming.is_stub() {
                    // A stub in the patch stands for "unchanged".
                    continue;
                }
                let signature = signature_of(incoming);
                if existing.body == Body::Stub {
                    report.created.push(signature);
                } else {
                    report.updated.push(signature);
                }
                replace_in_place(&mut unit.decls[pos], incoming);
            }
            Some(_) => {
                if replace_values(&mut unit.decls, &hits, incoming) {
                    index = DeclIndex::build(&unit.decls);
                }
            }
            None => {
                let mut appended = incoming.clone();
                appended.group = incoming.group.map(|patch_group| {
                    *new_groups.entry(patch_group).or_insert_with(|| {
                        let template = patch.groups.get(patch_group).cloned();
                        unit.groups.push(template.unwrap_or_else(|| Group {
                            keyword: incoming.kind.keyword(),
                            doc: Vec::new(),
                            tail: Vec::new(),
                            closing: None,
                        }));
                        unit.groups.len() - 1
                    })
                });
                if incoming.is_function() {
                    report.created.push(signature_of(incoming));
                }
                index.insert(&appended, unit.decls.len());
                unit.decls.push(appended);
            }
        }
    }

    Merged { unit, report }
}

/// Drop import specs by path. An aggregate left empty is removed entirely.
pub fn remove_imports(mut unit: SourceUnit, paths: &BTreeSet<String>) -> SourceUnit {
    if let Some(block) = unit.imports.as_mut() {
        block.specs.retain(|spec| !paths.contains(&spec.name));
        if block.specs.is_empty() {
            unit.imports = None;
        }
    }
    unit
}

fn merge_imports(unit: &mut SourceUnit, patch: &ImportBlock) {
    let block = unit.imports.get_or_insert_with(|| ImportBlock {
        doc: patch.doc.clone(),
        specs: Vec::new(),
        range: patch.range,
    });
    for spec in &patch.specs {
        match block.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => {
                // Same path: take the patch's alias, keep position and spacing.
                existing.payload.clone_from(&spec.payload);
            }
            None => {
                let mut added = spec.clone();
                added.spaced = false;
                block.specs.push(added);
            }
        }
    }
    if block.specs.is_empty() {
        unit.imports = None;
    }
}

/// Apply a value or type spec onto the base specs in `hits` that share a name
/// with it. Returns `true` if declarations were inserted or removed.
///
/// The first hit takes the incoming spec. Names the patch does not redeclare
/// stay behind in a reduced spec; a spec whose values cannot be paired with
/// its names is replaced whole.
fn replace_values(decls: &mut Vec<Declaration>, hits: &[usize], incoming: &Declaration) -> bool {
    let first = hits[0];
    let mut reshaped = false;
    for &pos in hits.iter().rev() {
        let remainder = without_names(&decls[pos], &incoming.names);
        match (pos == first, remainder) {
            (true, None) => replace_in_place(&mut decls[pos], incoming),
            (true, Some(reduced)) => {
                let mut added = incoming.clone();
                added.group = reduced.group;
                added.spaced = false;
                decls[pos] = reduced;
                decls.insert(pos + 1, added);
                reshaped = true;
            }
            (false, None) => {
                decls.remove(pos);
                reshaped = true;
            }
            (false, Some(reduced)) => decls[pos] = reduced,
        }
    }
    reshaped
}

/// `decl` without the names in `dropped`, or `None` if nothing would remain
/// or its names cannot be separated.
fn without_names(decl: &Declaration, dropped: &[String]) -> Option<Declaration> {
    let remaining: Vec<String> = decl
        .names
        .iter()
        .filter(|name| !dropped.contains(name))
        .cloned()
        .collect();
    if remaining.is_empty() || decl.kind.is_type() {
        return None;
    }
    let payload = split_value_spec(decl.kind.keyword(), &decl.payload)?.keep(&remaining)?;
    let mut reduced = decl.clone();
    reduced.name.clone_from(&remaining[0]);
    reduced.names = remaining;
    reduced.payload = payload;
    Some(reduced)
}

fn replace_in_place(existing: &mut Declaration, incoming: &Declaration) {
    existing.kind = incoming.kind;
    existing.name.clone_from(&incoming.name);
    existing.names.clone_from(&incoming.names);
    existing.payload.clone_from(&incoming.payload);
    existing.body = incoming.body;
    existing.signature.clone_from(&incoming.signature);
    existing.receiver.clone_from(&incoming.receiver);
    if !incoming.doc.is_empty() {
        existing.doc.clone_from(&incoming.doc);
    }
}

fn signature_of(decl: &Declaration) -> String {
    decl.signature.clone().unwrap_or_else(|| decl.name.clone())
}

/// Identity used for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclKey {
    namespace: Namespace,
    receiver: Option<String>,
    name: String,
}

impl DeclKey {
    fn of(decl: &Declaration) -> Self {
        Self {
            namespace: decl.kind.namespace(),
            receiver: decl.receiver.clone(),
            name: decl.name.clone(),
        }
    }

    fn all(decl: &Declaration) -> Vec<Self> {
        if decl.names.len() < 2 {
            return vec![Self::of(decl)];
        }
        decl.names
            .iter()
            .map(|name| Self {
                namespace: decl.kind.namespace(),
                receiver: decl.receiver.clone(),
                name: name.clone(),
            })
            .collect()
    }
}

/// Insertion-ordered lookup from identity to position in `decls`.
///
/// Multi-name specs are indexed under each name. Blank identifiers and `init`
/// may be declared many times, so those match only an identical payload.
struct DeclIndex {
    entries: Vec<(DeclKey, usize)>,
}

impl DeclIndex {
    fn build(decls: &[Declaration]) -> Self {
        let mut index = Self {
            entries: Vec::with_capacity(decls.len()),
        };
        for (pos, decl) in decls.iter().enumerate() {
            index.insert(decl, pos);
        }
        index
    }

    fn insert(&mut self, decl: &Declaration, pos: usize) {
        for key in DeclKey::all(decl) {
            self.entries.push((key, pos));
        }
    }

    /// Positions of the base declarations `incoming` redeclares, ascending.
    fn find_all(&self, decls: &[Declaration], incoming: &Declaration) -> Vec<usize> {
        if is_repeatable(incoming) {
            let key = DeclKey::of(incoming);
            return self
                .entries
                .iter()
                .filter(|(candidate, _)| *candidate == key)
                .map(|(_, pos)| *pos)
                .find(|pos| decls[*pos].payload == incoming.payload)
                .into_iter()
                .collect();
        }
        let keys: Vec<DeclKey> = DeclKey::all(incoming)
            .into_iter()
            .filter(|key| key.name != "_")
            .collect();
        let hits: BTreeSet<usize> = self
            .entries
            .iter()
            .filter(|(candidate, _)| keys.contains(candidate))
            .map(|(_, pos)| *pos)
            .collect();
        hits.into_iter().collect()
    }
}

fn is_repeatable(decl: &Declaration) -> bool {
    (!decl.names.is_empty() && decl.names.iter().all(|name| name == "_"))
        || (decl.is_function() && decl.receiver.is_none() && decl.name == "init")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse;
    use crate::core::render::{ImportStyle, render_text};

    fn merge_text(base: &str, patch: &str) -> (String, MergeReport) {
        let base = parse(base).expect("parse base");
        let patch = parse(patch).expect("parse patch");
        let merged = merge(&base, &patch);
        (
            render_text(&merged.unit, &ImportStyle::default()),
            merged.report,
        )
    }

    const BASE: &str = "package p

import \"fmt\"

const Limit = 1

type Box struct {
\tN int
}

func (b *Box) Show() {
\tfmt.Println(b.N)
}

func Helper() int {
\treturn 1
}
";

    /// Verifies merging a unit with its own rendering changes nothing.
    #[test]
    fn merge_with_self_is_idempotent() {
        let base = parse(BASE).expect("parse");
        let rendered = render_text(&base, &ImportStyle::default());
        let reparsed = parse(&rendered).expect("reparse");
        let merged = merge(&base, &reparsed);
        assert_eq!(render_text(&merged.unit, &ImportStyle::default()), rendered);
    }

    /// Verifies the canonical end-to-end replacement keeps one `Foo`.
    #[test]
    fn replaces_function_body_once() {
        let (out, report) = merge_text(
            "package p\nfunc Foo() int { return 1 }\n",
            "func Foo() int { return 2 }\n",
        );
        assert_eq!(out.matches("return 2").count(), 1);
        assert_eq!(out.matches("func Foo").count(), 1);
        assert!(!out.contains("return 1"));
        assert_eq!(report.updated, vec!["func Foo() int"]);
        assert!(report.created.is_empty());
    }

    /// Verifies unknown functions are appended after existing declarations and reported.
    #[test]
    fn appends_new_function_and_reports_created() {
        let (out, report) = merge_text(BASE, "func Extra() {}\n");
        assert!(out.trim_end().ends_with("func Extra() {}"));
        assert_eq!(report.created, vec!["func Extra()"]);
        assert!(report.updated.is_empty());
    }

    /// Verifies a stub base function is replaced and counted as created only.
    #[test]
    fn stub_base_is_replaced_as_created() {
        let (out, report) = merge_text(
            "package p\n\nfunc Todo() int {\n\t// ...\n}\n",
            "func Todo() int { return 7 }\n",
        );
        assert!(out.contains("return 7"));
        assert!(!out.contains("// ..."));
        assert_eq!(report.created, vec!["func Todo() int"]);
        assert!(report.updated.is_empty());
    }

    /// Verifies a stub in the patch keeps the base function untouched.
    #[test]
    fn stub_patch_keeps_base() {
        let (out, report) = merge_text(BASE, "func Helper() int {\n\t...\n}\n");
        assert!(out.contains("\treturn 1\n"));
        assert!(report.is_empty());
    }

    /// Verifies methods match on receiver type as well as name.
    #[test]
    fn methods_match_on_receiver() {
        let (out, report) = merge_text(
            BASE,
            "func (x *Box) Show() { fmt.Println(x.N + 1) }\nfunc Show() {}\n",
        );
        assert!(out.contains("func (x *Box) Show() { fmt.Println(x.N + 1) }"));
        assert!(out.contains("\nfunc Show() {}"));
        assert_eq!(report.updated, vec!["func (x *Box) Show()"]);
        assert_eq!(report.created, vec!["func Show()"]);
    }

    /// Verifies the import union contains each path once, base entries first.
    #[test]
    fn import_union_is_a_set() {
        let base = parse("package p\n\nimport (\n\t\"x\"\n\t\"fmt\"\n)\n").expect("base");
        let patch = parse("import (\n\t\"os\"\n\t\"x\"\n)\n").expect("patch");
        let merged = merge(&base, &patch);
        assert_eq!(merged.unit.import_paths(), vec!["x", "fmt", "os"]);
    }

    /// Verifies values replace in place and keep their position.
    #[test]
    fn values_replace_in_place() {
        let (out, _) = merge_text(BASE, "const Limit = 5\n");
        let limit = out.find("const Limit = 5").expect("limit");
        let box_pos = out.find("type Box").expect("box");
        assert!(limit < box_pos);
        assert!(!out.contains("Limit = 1"));
    }

    /// Verifies a type may change kind in place (struct to interface).
    #[test]
    fn types_share_one_namespace() {
        let base = parse(BASE).expect("base");
        let patch = parse("type Box interface{ Show() }\n").expect("patch");
        let merged = merge(&base, &patch);
        let boxes: Vec<_> = merged.unit.decls.iter().filter(|d| d.name == "Box").collect();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].kind, crate::core::types::DeclKind::TypeInterface);
    }

    /// Verifies new specs from one patch group stay grouped together.
    #[test]
    fn appended_group_members_stay_grouped() {
        let (out, _) = merge_text(BASE, "const (\n\tLimit = 2\n\tA = 1\n\tB = 2\n)\n");
        assert!(out.contains("const Limit = 2"));
        assert!(out.contains("const (\n\tA = 1\n\tB = 2\n)"));
    }

    /// Verifies declarations the patch does not mention survive.
    #[test]
    fn untouched_declarations_survive() {
        let (out, _) = merge_text(BASE, "func Helper() int { return 3 }\n");
        assert!(out.contains("type Box struct"));
        assert!(out.contains("func (b *Box) Show()"));
        assert!(out.contains("const Limit = 1"));
    }

    /// Verifies removing the only import drops the aggregate entirely.
    #[test]
    fn removing_only_import_drops_aggregate() {
        let unit = parse("package p\n\nimport \"fmt\"\n\nfunc A() {}\n").expect("parse");
        let paths = BTreeSet::from(["fmt".to_string()]);
        let unit = remove_imports(unit, &paths);
        assert!(unit.imports.is_none());
        assert_eq!(
            render_text(&unit, &ImportStyle::default()),
            "package p\n\nfunc A() {}\n"
        );
    }

    /// Verifies untargeted declarations keep `...` lines in raw strings byte for byte.
    #[test]
    fn untargeted_raw_strings_survive_byte_for_byte() {
        let base = "package p\n\nconst usage = `\nUsage:\n...more options\n`\n\nfunc A() {}\n";
        let (out, _) = merge_text(base, "func A() { run() }\n");
        assert!(out.contains("const usage = `\nUsage:\n...more options\n`"));
        assert!(!out.contains("//."));
    }

    /// Verifies a complete patch whose literal holds `...` lines still replaces the base.
    #[test]
    fn dotted_literal_in_patch_is_not_a_stub() {
        let (out, report) = merge_text(
            "package p\n\nfunc Help() string {\n\treturn \"\"\n}\n",
            "func Help() string {\n\treturn `\n...see docs\n`\n}\n",
        );
        assert_eq!(report.updated, vec!["func Help() string"]);
        assert!(out.contains("\n...see docs\n"));
        assert!(!out.contains("return \"\""));
    }

    /// Verifies redeclaring one name of a multi-name spec splits it instead of duplicating.
    #[test]
    fn redeclared_name_is_split_out_of_multi_name_spec() {
        let (out, _) = merge_text("package p\n\nvar a, b = 1, 2\n", "var b = 3\n");
        assert_eq!(out, "package p\n\nvar a = 1\n\nvar b = 3\n");
    }

    /// Verifies a multi-name patch spec absorbs the single specs it redeclares.
    #[test]
    fn multi_name_patch_replaces_each_base_spec() {
        let (out, _) = merge_text(
            "package p\n\nvar a = 1\n\nvar b = 2\n\nvar c = 3\n",
            "var a, b = 5, 6\n",
        );
        assert_eq!(out, "package p\n\nvar a, b = 5, 6\n\nvar c = 3\n");
    }

    /// Verifies a split inside a group keeps both specs in the group.
    #[test]
    fn grouped_split_stays_in_group() {
        let (out, _) = merge_text(
            "package p\n\nconst (\n\tx, y = 1, 2\n\tz = 3\n)\n",
            "const y = 9\n",
        );
        assert_eq!(out, "package p\n\nconst (\n\tx = 1\n\ty = 9\n\tz = 3\n)\n");
    }

    /// Verifies a spec assigned from one call is replaced whole when any name is redeclared.
    #[test]
    fn unsplittable_spec_is_replaced_whole() {
        let (out, _) = merge_text("package p\n\nvar a, b = f()\n", "var b = 3\n");
        assert_eq!(out, "package p\n\nvar b = 3\n");
    }

    /// Verifies repeated `init` functions are not collapsed into one.
    #[test]
    fn init_functions_are_not_collapsed() {
        let base = "package p\n\nfunc init() { a() }\n\nfunc init() { b() }\n";
        let (out, _) = merge_text(base, base);
        assert_eq!(out.matches("func init()").count(), 2);
        let (out, _) = merge_text(base, "func init() { c() }\n");
        assert_eq!(out.matches("func init()").count(), 3);
    }
}
