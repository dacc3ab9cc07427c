//! Shared data types for parsed Go source and toolchain diagnostics.

use serde::Serialize;

/// Kind of a top-level declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Import,
    Const,
    Var,
    TypeStruct,
    TypeInterface,
    /// Named type that is neither a struct nor an interface (`type ID string`).
    TypeOther,
    Function,
}

impl DeclKind {
    /// Keyword that introduces this kind at top level.
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Import => "import",
            DeclKind::Const => "const",
            DeclKind::Var => "var",
            DeclKind::TypeStruct | DeclKind::TypeInterface | DeclKind::TypeOther => "type",
            DeclKind::Function => "func",
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            DeclKind::TypeStruct | DeclKind::TypeInterface | DeclKind::TypeOther
        )
    }

    /// Merge namespace: named types share one namespace, everything else is per kind.
    pub fn namespace(self) -> Namespace {
        match self {
            DeclKind::Import => Namespace::Import,
            DeclKind::Const => Namespace::Const,
            DeclKind::Var => Namespace::Var,
            DeclKind::TypeStruct | DeclKind::TypeInterface | DeclKind::TypeOther => {
                Namespace::Type
            }
            DeclKind::Function => Namespace::Func,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Import,
    Const,
    Var,
    Type,
    Func,
}

/// Completeness of a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Complete,
    /// Body elided with a `...` placeholder (or missing entirely).
    Stub,
}

/// Inclusive 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SourceRange {
    pub start_line: usize,
    pub end_line: usize,
}

impl SourceRange {
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Index into [`SourceUnit::groups`].
pub type GroupId = usize;

/// A parenthesised `const (...)`, `var (...)` or `type (...)` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub keyword: &'static str,
    pub doc: Vec<String>,
    /// Comments after the last spec, before the closing paren.
    pub tail: Vec<String>,
    /// Comment on the same line as the closing paren.
    pub closing: Option<String>,
}

/// One top-level named unit of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclKind,
    /// Import path for imports, first declared name otherwise.
    pub name: String,
    /// Every declared name, in order. More than one only for value specs
    /// such as `var a, b = 1, 2`.
    pub names: Vec<String>,
    /// Normalised receiver type for methods (`*Server`).
    pub receiver: Option<String>,
    /// Source text of the value or type spec (without keyword) or of the whole function.
    pub payload: String,
    pub body: Body,
    /// `func (T) Name(params) results`, functions only.
    pub signature: Option<String>,
    /// Leading comment lines. An empty entry stands for a blank line.
    pub doc: Vec<String>,
    pub group: Option<GroupId>,
    /// A blank line precedes this spec inside its group.
    pub spaced: bool,
    pub range: SourceRange,
}

impl Declaration {
    pub fn is_function(&self) -> bool {
        self.kind == DeclKind::Function
    }

    pub fn is_stub(&self) -> bool {
        self.body == Body::Stub
    }
}

/// The single import aggregate of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportBlock {
    pub doc: Vec<String>,
    /// Each spec is a [`DeclKind::Import`] declaration named by its path.
    pub specs: Vec<Declaration>,
    pub range: SourceRange,
}

impl ImportBlock {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.name.as_str())
    }
}

/// Parsed content of one Go file (or a header-less fragment).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceUnit {
    /// Comments and build tags before the package clause.
    pub preamble: Vec<String>,
    pub package: Option<String>,
    pub imports: Option<ImportBlock>,
    pub decls: Vec<Declaration>,
    pub groups: Vec<Group>,
    /// Comments after the last declaration.
    pub trailer: Vec<String>,
}

impl SourceUnit {
    pub fn import_paths(&self) -> Vec<&str> {
        self.imports
            .as_ref()
            .map(|block| block.paths().collect())
            .unwrap_or_default()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.iter().filter(|decl| decl.is_function())
    }

    pub fn find_function(&self, receiver: Option<&str>, name: &str) -> Option<&Declaration> {
        self.functions()
            .find(|decl| decl.name == name && decl.receiver.as_deref() == receiver)
    }
}

/// Category of a toolchain diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    CompileError,
    UnusedImport,
    TestFailure,
}

/// One `path:LINE:COL: message` record from toolchain output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub kind: DiagnosticKind,
}
