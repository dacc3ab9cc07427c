//! Reassemble a [`SourceUnit`] into source text.

use crate::core::errors::FormatError;
use crate::core::types::{DeclKind, Declaration, ImportBlock, SourceUnit};

/// External canonicalizing formatter (e.g. `gofmt`).
pub trait Formatter {
    fn format(&self, source: &str) -> Result<String, FormatError>;
}

/// Import grouping rules applied when rendering the import aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStyle {
    /// Split imports into std / third-party / local blocks.
    pub group: bool,
    /// Path prefixes that count as local (e.g. `github.com/acme/`).
    pub local_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ImportClass {
    Std,
    ThirdParty,
    Local,
}

impl ImportStyle {
    fn classify(&self, path: &str) -> ImportClass {
        if self
            .local_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
        {
            return ImportClass::Local;
        }
        let first = path.split('/').next().unwrap_or(path);
        if first.contains('.') {
            ImportClass::ThirdParty
        } else {
            ImportClass::Std
        }
    }
}

/// Render and canonicalize a unit.
pub fn render<F: Formatter + ?Sized>(
    unit: &SourceUnit,
    style: &ImportStyle,
    formatter: &F,
) -> Result<String, FormatError> {
    formatter.format(&render_text(unit, style))
}

/// Render a unit without canonicalization: header, imports, then each
/// declaration (or parenthesised group) separated by a blank line.
pub fn render_text(unit: &SourceUnit, style: &ImportStyle) -> String {
    let mut chunks: Vec<String> = Vec::new();

    let mut header = String::new();
    push_doc(&mut header, &unit.preamble, "");
    match &unit.package {
        Some(name) => {
            header.push_str("package ");
            header.push_str(name);
        }
        None => {
            let trimmed = header.trim_end().len();
            header.truncate(trimmed);
        }
    }
    if !header.is_empty() {
        chunks.push(header);
    }

    if let Some(block) = &unit.imports
        && !block.specs.is_empty()
    {
        chunks.push(render_imports(block, style));
    }

    let mut idx = 0;
    while idx < unit.decls.len() {
        let decl = &unit.decls[idx];
        match decl.group {
            Some(group) => {
                let end = unit.decls[idx..]
                    .iter()
                    .position(|d| d.group != Some(group))
                    .map_or(unit.decls.len(), |offset| idx + offset);
                chunks.push(render_group(unit, group, &unit.decls[idx..end]));
                idx = end;
            }
            None => {
                let mut chunk = String::new();
                push_doc(&mut chunk, &decl.doc, "");
                chunk.push_str(&render_declaration(decl));
                chunks.push(chunk);
                idx += 1;
            }
        }
    }

    if !unit.trailer.is_empty() {
        chunks.push(unit.trailer.join("\n").trim_end().to_string());
    }

    let mut out = chunks.join("\n\n");
    out.push('\n');
    out
}

/// Standalone text of one declaration, keyword included, doc excluded.
pub fn render_declaration(decl: &Declaration) -> String {
    match decl.kind {
        DeclKind::Function => decl.payload.clone(),
        kind => format!("{} {}", kind.keyword(), decl.payload),
    }
}

/// Render the import aggregate.
pub fn render_imports(block: &ImportBlock, style: &ImportStyle) -> String {
    let mut out = String::new();
    push_doc(&mut out, &block.doc, "");

    if !style.group
        && let [only] = block.specs.as_slice()
        && only.doc.is_empty()
    {
        out.push_str("import ");
        out.push_str(&only.payload);
        return out;
    }

    out.push_str("import (\n");
    if style.group {
        let mut classes: Vec<ImportClass> =
            block.specs.iter().map(|s| style.classify(&s.name)).collect();
        classes.sort();
        classes.dedup();
        for (pos, class) in classes.iter().enumerate() {
            if pos > 0 {
                out.push('\n');
            }
            for spec in block
                .specs
                .iter()
                .filter(|s| style.classify(&s.name) == *class)
            {
                push_spec(&mut out, spec);
            }
        }
    } else {
        for (pos, spec) in block.specs.iter().enumerate() {
            if pos > 0 && spec.spaced {
                out.push('\n');
            }
            push_spec(&mut out, spec);
        }
    }
    out.push(')');
    out
}

fn render_group(unit: &SourceUnit, group: usize, members: &[Declaration]) -> String {
    let mut out = String::new();
    let (keyword, doc, tail, closing) = match unit.groups.get(group) {
        Some(g) => (
            g.keyword,
            g.doc.as_slice(),
            g.tail.as_slice(),
            g.closing.as_deref(),
        ),
        None => (
            members.first().map_or("var", |d| d.kind.keyword()),
            &[][..],
            &[][..],
            None,
        ),
    };
    push_doc(&mut out, doc, "");
    out.push_str(keyword);
    out.push_str(" (\n");
    for (pos, member) in members.iter().enumerate() {
        if pos > 0 && member.spaced {
            out.push('\n');
        }
        push_spec(&mut out, member);
    }
    push_doc(&mut out, tail, "\t");
    out.push(')');
    if let Some(comment) = closing {
        out.push(' ');
        out.push_str(comment);
    }
    out
}

fn push_spec(out: &mut String, spec: &Declaration) {
    push_doc(out, &spec.doc, "\t");
    out.push('\t');
    out.push_str(&spec.payload);
    out.push('\n');
}

fn push_doc(out: &mut String, lines: &[String], indent: &str) {
    for line in lines {
        if !line.is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
        out.push('\n');
    }
}
