//! Structural parser: Go source text to an ordered list of top-level declarations.
//!
//! Built on the tree-sitter Go grammar, which accepts a `source_file` without a
//! package clause. Header-less fragments (a lone function, a `const (...)` group)
//! therefore parse directly and come back with `package: None`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

use crate::core::errors::ParseError;
use crate::core::types::{
    Body, DeclKind, Declaration, Group, ImportBlock, SourceRange, SourceUnit,
};

/// Lines that start with a `...` placeholder.
static PLACEHOLDER_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(\.\.\.)").expect("valid placeholder regex"));

/// Same byte length as `...`, so masked offsets match the input.
const PLACEHOLDER_MASK: &str = "//.";

/// Parse Go source (or a header-less fragment) into a [`SourceUnit`].
///
/// A line starting with `...` is a placeholder unless it lies inside a string
/// literal or a comment. Placeholders are masked as `//.` comments; every other
/// byte of the result is sliced from `text` unchanged.
pub fn parse(text: &str) -> Result<SourceUnit, ParseError> {
    let mut parser = go_parser()?;
    let placeholders = find_placeholders(&mut parser, text)?;
    let masked = mask(text, &placeholders);
    let tree = parse_tree(&mut parser, &masked)?;

    let mut builder = UnitBuilder::new(&masked, placeholders);
    let root = tree.root_node();
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        builder.top_level(node)?;
    }
    Ok(builder.finish())
}

fn go_parser() -> Result<Parser, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|err| ParseError {
            line: 1,
            column: 1,
            message: format!("load go grammar: {err}"),
        })?;
    Ok(parser)
}

fn parse_tree(parser: &mut Parser, text: &str) -> Result<Tree, ParseError> {
    parser.parse(text, None).ok_or_else(|| ParseError {
        line: 1,
        column: 1,
        message: "parser produced no tree".to_string(),
    })
}

/// Byte offsets of `...` placeholders outside string literals and comments.
///
/// Every candidate is masked for a trial parse, then kept only if the trial
/// tree does not place it inside a literal or an existing comment.
fn find_placeholders(parser: &mut Parser, text: &str) -> Result<BTreeSet<usize>, ParseError> {
    let candidates: BTreeSet<usize> = PLACEHOLDER_LINE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.start())
        .collect();
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let trial = parse_tree(parser, &mask(text, &candidates))?;
    let root = trial.root_node();
    Ok(candidates
        .into_iter()
        .filter(|&pos| !inside_literal_or_comment(root, pos))
        .collect())
}

fn inside_literal_or_comment(root: Node<'_>, pos: usize) -> bool {
    let mut node = root.descendant_for_byte_range(pos, pos + 1);
    while let Some(current) = node {
        match current.kind() {
            "raw_string_literal" | "interpreted_string_literal" | "rune_literal" => return true,
            "comment" if current.start_byte() < pos => return true,
            _ => {}
        }
        node = current.parent();
    }
    false
}

fn mask(text: &str, placeholders: &BTreeSet<usize>) -> String {
    let mut masked = text.to_string();
    for &pos in placeholders {
        masked.replace_range(pos..pos + PLACEHOLDER_MASK.len(), PLACEHOLDER_MASK);
    }
    masked
}

/// Consecutive comment lines waiting to be attached to the next item.
#[derive(Debug, Default)]
struct CommentRun {
    lines: Vec<String>,
    start_row: Option<usize>,
    end_row: Option<usize>,
}

impl CommentRun {
    fn push(&mut self, text: &str, start_row: usize, end_row: usize) {
        if let Some(prev) = self.end_row
            && start_row > prev + 1
        {
            self.lines.push(String::new());
        }
        if self.start_row.is_none() {
            self.start_row = Some(start_row);
        }
        self.lines.push(text.to_string());
        self.end_row = Some(end_row);
    }

    fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Take the run as the doc of an item starting at `row`, keeping a blank
    /// separator line when the two are not adjacent.
    fn take_before(&mut self, row: usize) -> Vec<String> {
        let end_row = self.end_row;
        let mut lines = self.take();
        if let Some(prev) = end_row
            && row > prev + 1
        {
            lines.push(String::new());
        }
        lines
    }

    fn take(&mut self) -> Vec<String> {
        self.start_row = None;
        self.end_row = None;
        std::mem::take(&mut self.lines)
    }
}

/// Where a same-line trailing comment should be appended.
#[derive(Debug, Clone, Copy)]
enum Target {
    Decl(usize),
    ImportSpec(usize),
    /// Closing paren of a `const`/`var`/`type` group.
    Group(usize),
    Nothing,
}

struct SpecItem<'t> {
    node: Node<'t>,
    doc: Vec<String>,
    spaced: bool,
    trailing: Vec<String>,
}

#[derive(Default)]
struct SpecScan<'t> {
    items: Vec<SpecItem<'t>>,
    run: CommentRun,
    prev_end: Option<usize>,
}

struct UnitBuilder<'a> {
    /// Input with placeholders masked; all node slices come from here.
    src: &'a str,
    /// Offsets of masked placeholders.
    placeholders: BTreeSet<usize>,
    unit: SourceUnit,
    comments: CommentRun,
    last: Option<(Target, usize)>,
}

impl<'a> UnitBuilder<'a> {
    fn new(src: &'a str, placeholders: BTreeSet<usize>) -> Self {
        Self {
            src,
            placeholders,
            unit: SourceUnit::default(),
            comments: CommentRun::default(),
            last: None,
        }
    }

    fn finish(mut self) -> SourceUnit {
        self.unit.trailer = self.comments.take();
        self.unit
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        self.src.get(node.byte_range()).unwrap_or_default()
    }

    fn top_level(&mut self, node: Node<'_>) -> Result<(), ParseError> {
        match node.kind() {
            "comment" => {
                self.comment(node);
                Ok(())
            }
            "package_clause" => self.package(node),
            "import_declaration" => self.imports(node),
            "const_declaration" | "var_declaration" | "type_declaration" => self.value_decl(node),
            "function_declaration" | "method_declaration" => self.function(node),
            "ERROR" => Err(error_at(node, self.text(node))),
            other => Err(ParseError {
                line: node.start_position().row + 1,
                column: node.start_position().column + 1,
                message: format!("unexpected top-level {other}"),
            }),
        }
    }

    fn comment(&mut self, node: Node<'_>) {
        let text = self.text(node);
        let start = node.start_position().row;
        if self.comments.is_empty()
            && let Some((target, end_row)) = self.last
            && end_row == start
        {
            let payload = match target {
                Target::Decl(idx) => self.unit.decls.get_mut(idx).map(|d| &mut d.payload),
                Target::ImportSpec(idx) => self
                    .unit
                    .imports
                    .as_mut()
                    .and_then(|block| block.specs.get_mut(idx))
                    .map(|d| &mut d.payload),
                Target::Group(idx) => self
                    .unit
                    .groups
                    .get_mut(idx)
                    .map(|g| g.closing.get_or_insert_with(String::new)),
                Target::Nothing => None,
            };
            if let Some(payload) = payload {
                if !payload.is_empty() {
                    payload.push(' ');
                }
                payload.push_str(text);
                return;
            }
        }
        self.comments.push(text, start, node.end_position().row);
    }

    fn package(&mut self, node: Node<'_>) -> Result<(), ParseError> {
        check_errors(node, self.src)?;
        self.unit.preamble = self.comments.take_before(node.start_position().row);
        let mut cursor = node.walk();
        let name = node
            .named_children(&mut cursor)
            .find(|child| child.kind() == "package_identifier")
            .map(|child| self.text(child).to_string());
        self.unit.package = name;
        self.last = Some((Target::Nothing, node.end_position().row));
        Ok(())
    }

    fn imports(&mut self, node: Node<'_>) -> Result<(), ParseError> {
        check_errors(node, self.src)?;
        let doc = self.comments.take_before(node.start_position().row);
        let grouped = is_parenthesised(self.text(node), "import");
        let mut scan = SpecScan::default();
        self.scan_specs(node, &mut scan);
        let tail = scan.run.take();

        let mut specs = Vec::with_capacity(scan.items.len());
        for item in scan.items {
            let path_node = item.node.child_by_field_name("path").ok_or_else(|| {
                error_at(item.node, "import spec without path")
            })?;
            let path = self
                .text(path_node)
                .trim_matches(|c| c == '"' || c == '`')
                .to_string();
            specs.push(Declaration {
                kind: DeclKind::Import,
                names: vec![path.clone()],
                name: path,
                receiver: None,
                payload: with_trailing(self.text(item.node), &item.trailing),
                body: Body::Complete,
                signature: None,
                doc: item.doc,
                group: None,
                spaced: item.spaced,
                range: range_of(item.node),
            });
        }

        let block = self.unit.imports.get_or_insert_with(|| ImportBlock {
            doc: Vec::new(),
            specs: Vec::new(),
            range: range_of(node),
        });
        block.doc.extend(doc);
        block.range.end_line = node.end_position().row + 1;
        block.specs.extend(specs);
        let last_spec = block.specs.len().checked_sub(1);

        for line in tail {
            self.comments.lines.push(line);
        }
        self.last = match (grouped, last_spec) {
            (false, Some(idx)) => Some((Target::ImportSpec(idx), node.end_position().row)),
            _ => Some((Target::Nothing, node.end_position().row)),
        };
        Ok(())
    }

    fn value_decl(&mut self, node: Node<'_>) -> Result<(), ParseError> {
        check_errors(node, self.src)?;
        let keyword = match node.kind() {
            "const_declaration" => "const",
            "var_declaration" => "var",
            _ => "type",
        };
        let doc = self.comments.take_before(node.start_position().row);
        let grouped = is_parenthesised(self.text(node), keyword);
        let mut scan = SpecScan::default();
        self.scan_specs(node, &mut scan);

        if grouped {
            let group = self.unit.groups.len();
            self.unit.groups.push(Group {
                keyword,
                doc,
                tail: scan.run.take(),
                closing: None,
            });
            for item in scan.items {
                let decl = self.spec_decl(keyword, &item, Some(group), item.doc.clone())?;
                self.unit.decls.push(decl);
            }
            self.last = Some((Target::Group(group), node.end_position().row));
        } else {
            let Some(item) = scan.items.first() else {
                return Err(error_at(node, "declaration without spec"));
            };
            let mut decl = self.spec_decl(keyword, item, None, doc)?;
            decl.range = range_of(node);
            self.unit.decls.push(decl);
            self.last = Some((
                Target::Decl(self.unit.decls.len() - 1),
                node.end_position().row,
            ));
        }
        Ok(())
    }

    fn spec_decl(
        &self,
        keyword: &str,
        item: &SpecItem<'_>,
        group: Option<usize>,
        doc: Vec<String>,
    ) -> Result<Declaration, ParseError> {
        let mut cursor = item.node.walk();
        let names: Vec<String> = item
            .node
            .children_by_field_name("name", &mut cursor)
            .filter(|n| n.is_named())
            .map(|n| self.text(n).to_string())
            .collect();
        let name = names
            .first()
            .cloned()
            .ok_or_else(|| error_at(item.node, "spec without name"))?;
        let kind = match keyword {
            "const" => DeclKind::Const,
            "var" => DeclKind::Var,
            _ => match item.node.child_by_field_name("type").map(|n| n.kind()) {
                Some("struct_type") => DeclKind::TypeStruct,
                Some("interface_type") => DeclKind::TypeInterface,
                _ => DeclKind::TypeOther,
            },
        };
        Ok(Declaration {
            kind,
            name,
            names,
            receiver: None,
            payload: with_trailing(self.text(item.node), &item.trailing),
            body: Body::Complete,
            signature: None,
            doc,
            group,
            spaced: item.spaced,
            range: range_of(item.node),
        })
    }

    fn function(&mut self, node: Node<'_>) -> Result<(), ParseError> {
        let body_node = node.child_by_field_name("body");
        let stub = body_node.is_none_or(|body| self.is_placeholder_body(body));
        if !stub {
            check_errors(node, self.src)?;
        }

        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .ok_or_else(|| error_at(node, "function without name"))?;
        let receiver = node
            .child_by_field_name("receiver")
            .and_then(|list| {
                let mut cursor = list.walk();
                list.named_children(&mut cursor)
                    .find(|child| child.kind() == "parameter_declaration")
            })
            .and_then(|param| param.child_by_field_name("type"))
            .map(|ty| normalise_type(self.text(ty)));
        let text = self.text(node);
        let signature = match body_node {
            Some(body) => self
                .src
                .get(node.start_byte()..body.start_byte())
                .unwrap_or(text)
                .trim_end(),
            None => text.trim_end(),
        };

        let doc = self.comments.take_before(node.start_position().row);
        self.unit.decls.push(Declaration {
            kind: DeclKind::Function,
            names: vec![name.clone()],
            name,
            receiver,
            payload: text.to_string(),
            body: if stub { Body::Stub } else { Body::Complete },
            signature: Some(signature.to_string()),
            doc,
            group: None,
            spaced: false,
            range: range_of(node),
        });
        self.last = Some((
            Target::Decl(self.unit.decls.len() - 1),
            node.end_position().row,
        ));
        Ok(())
    }

    /// A body is a placeholder when one of its own statements is a masked `...`
    /// line or a `// ...` comment, or when the body holds an unparsable `...`
    /// such as `{ ... }`. Comments inside nested blocks do not count.
    fn is_placeholder_body(&self, body: Node<'_>) -> bool {
        let mut cursor = body.walk();
        let statements = body
            .named_children(&mut cursor)
            .flat_map(|child| {
                if child.kind() == "statement_list" {
                    let mut inner = child.walk();
                    child.named_children(&mut inner).collect::<Vec<_>>()
                } else {
                    vec![child]
                }
            })
            .collect::<Vec<_>>();
        statements.into_iter().any(|stmt| match stmt.kind() {
            "comment" => {
                self.placeholders.contains(&stmt.start_byte()) || {
                    let text = self.text(stmt);
                    let inner = text
                        .strip_prefix("//")
                        .or_else(|| text.strip_prefix("/*"))
                        .unwrap_or(text);
                    inner.trim_start().starts_with("...")
                }
            }
            _ => false,
        }) || has_placeholder_error(body, self.src)
    }

    /// Collect specs (descending into `*_spec_list`) with their comments.
    fn scan_specs<'t>(&self, container: Node<'t>, scan: &mut SpecScan<'t>) {
        let mut cursor = container.walk();
        for child in container.named_children(&mut cursor) {
            let kind = child.kind();
            let start = child.start_position().row;
            if kind == "comment" {
                if scan.run.is_empty()
                    && scan.prev_end == Some(start)
                    && let Some(last) = scan.items.last_mut()
                {
                    last.trailing.push(self.text(child).to_string());
                    continue;
                }
                scan.run.push(self.text(child), start, child.end_position().row);
            } else if kind.ends_with("_spec_list") {
                self.scan_specs(child, scan);
            } else if kind.ends_with("_spec") || kind == "type_alias" {
                let first_row = scan.run.start_row.unwrap_or(start);
                let spaced = scan.prev_end.is_some_and(|prev| first_row > prev + 1);
                let doc = scan.run.take_before(start);
                scan.prev_end = Some(child.end_position().row);
                scan.items.push(SpecItem {
                    node: child,
                    doc,
                    spaced,
                    trailing: Vec::new(),
                });
            }
        }
    }
}


/// A multi-name value spec taken apart name by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValueSpecParts {
    names: Vec<String>,
    ty: Option<String>,
    /// One expression per name, or empty when only a type is given.
    values: Vec<String>,
    comments: Vec<String>,
}

impl ValueSpecParts {
    /// Spec payload declaring only the names in `keep`, or `None` if none remain.
    pub(crate) fn keep(&self, keep: &[String]) -> Option<String> {
        let picked: Vec<usize> = (0..self.names.len())
            .filter(|&i| keep.contains(&self.names[i]))
            .collect();
        if picked.is_empty() {
            return None;
        }
        let join = |items: &[String]| {
            picked
                .iter()
                .map(|&i| items[i].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut payload = join(&self.names);
        if let Some(ty) = &self.ty {
            payload.push(' ');
            payload.push_str(ty);
        }
        if !self.values.is_empty() {
            payload.push_str(" = ");
            payload.push_str(&join(&self.values));
        }
        for comment in &self.comments {
            payload.push(' ');
            payload.push_str(comment);
        }
        Some(payload)
    }
}

/// Split the payload of a `const`/`var` spec that declares several names.
///
/// `None` when the names cannot be separated: a single name, a multi-value
/// call (`a, b = f()`), or a const spec relying on implicit repetition.
pub(crate) fn split_value_spec(keyword: &str, payload: &str) -> Option<ValueSpecParts> {
    let text = format!("{keyword} {payload}\n");
    let mut parser = go_parser().ok()?;
    let tree = parser.parse(&text, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }
    let slice = |node: Node<'_>| text.get(node.byte_range()).unwrap_or_default().to_string();

    let decl = root.named_child(0)?;
    let mut cursor = decl.walk();
    let spec = decl
        .named_children(&mut cursor)
        .find(|child| child.kind().ends_with("_spec"))?;

    let mut cursor = spec.walk();
    let names: Vec<String> = spec
        .children_by_field_name("name", &mut cursor)
        .filter(|n| n.is_named())
        .map(slice)
        .collect();
    let ty = spec.child_by_field_name("type").map(slice);
    let values: Vec<String> = match spec.child_by_field_name("value") {
        Some(list) => {
            let mut cursor = list.walk();
            list.named_children(&mut cursor)
                .filter(|n| n.kind() != "comment")
                .map(slice)
                .collect()
        }
        None => Vec::new(),
    };
    if names.len() < 2 {
        return None;
    }
    if (values.is_empty() && ty.is_none()) || (!values.is_empty() && values.len() != names.len())
    {
        return None;
    }

    let mut comments = Vec::new();
    collect_comments(root, &text, &mut comments);
    Some(ValueSpecParts {
        names,
        ty,
        values,
        comments,
    })
}

fn collect_comments(node: Node<'_>, src: &str, out: &mut Vec<String>) {
    if node.kind() == "comment" {
        out.push(src.get(node.byte_range()).unwrap_or_default().to_string());
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_comments(child, src, out);
    }
}

fn has_placeholder_error(node: Node<'_>, src: &str) -> bool {
    if !node.has_error() {
        return false;
    }
    if node.is_error()
        && src
            .get(node.byte_range())
            .unwrap_or_default()
            .trim_start()
            .starts_with("...")
    {
        return true;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .any(|child| has_placeholder_error(child, src))
}

fn is_parenthesised(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword)
        .is_some_and(|rest| rest.trim_start().starts_with('('))
}

fn normalise_type(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn with_trailing(text: &str, trailing: &[String]) -> String {
    let mut payload = text.to_string();
    for comment in trailing {
        payload.push(' ');
        payload.push_str(comment);
    }
    payload
}

fn range_of(node: Node<'_>) -> SourceRange {
    SourceRange {
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

fn check_errors(node: Node<'_>, src: &str) -> Result<(), ParseError> {
    match first_error(node) {
        Some(bad) => Err(error_at(bad, src.get(bad.byte_range()).unwrap_or_default())),
        None => Ok(()),
    }
}

fn first_error<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

fn error_at(node: Node<'_>, snippet: &str) -> ParseError {
    let position = node.start_position();
    let message = if node.is_missing() {
        format!("missing {}", node.kind())
    } else {
        let first_line = snippet.lines().next().unwrap_or_default().trim();
        let shown: String = first_line.chars().take(40).collect();
        format!("unexpected `{shown}`")
    };
    ParseError {
        line: position.row + 1,
        column: position.column + 1,
        message,
    }
}
