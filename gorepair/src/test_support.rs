//! Test-only fakes for running the repair loop without Go or a network.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::errors::{FormatError, OracleError};
use crate::core::render::Formatter;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::toolchain::{ToolOutput, Toolchain};

/// Oracle that replays canned responses and records every prompt.
///
/// Once the script runs out it answers with [`OracleError::EmptyResponse`].
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Result<String, OracleError>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<Result<String, OracleError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Script of successful replies only.
    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok((*r).to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(OracleError::EmptyResponse))
    }
}

/// Toolchain with scripted build and test results.
///
/// Unscripted builds and tests succeed with empty output.
#[derive(Default)]
pub struct ScriptedToolchain {
    builds: RefCell<VecDeque<ToolOutput>>,
    tests: RefCell<VecDeque<ToolOutput>>,
    unused: Vec<String>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builds(mut self, builds: Vec<ToolOutput>) -> Self {
        self.builds = RefCell::new(builds.into());
        self
    }

    pub fn with_tests(mut self, tests: Vec<ToolOutput>) -> Self {
        self.tests = RefCell::new(tests.into());
        self
    }

    pub fn with_unused(mut self, names: &[&str]) -> Self {
        self.unused = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Names of the methods invoked, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }
}

/// Failed tool run with `output`.
pub fn failed(output: &str) -> ToolOutput {
    ToolOutput {
        ok: false,
        output: output.to_string(),
    }
}

/// Successful tool run with no output.
pub fn passed() -> ToolOutput {
    ToolOutput {
        ok: true,
        output: String::new(),
    }
}

impl Toolchain for ScriptedToolchain {
    fn ensure_module(&self, _dir: &Path) -> Result<()> {
        self.record("ensure_module");
        Ok(())
    }

    fn sync_dependencies(&self, _dir: &Path) -> Result<bool> {
        self.record("sync_dependencies");
        Ok(true)
    }

    fn fix_imports(&self, _file: &Path) -> Result<bool> {
        self.record("fix_imports");
        Ok(true)
    }

    fn build(&self, _dir: &Path) -> Result<ToolOutput> {
        self.record("build");
        Ok(self.builds.borrow_mut().pop_front().unwrap_or_else(passed))
    }

    fn test(&self, _dir: &Path) -> Result<ToolOutput> {
        self.record("test");
        Ok(self.tests.borrow_mut().pop_front().unwrap_or_else(passed))
    }

    fn find_unused_symbols(&self, _file: &Path) -> Vec<String> {
        self.record("find_unused_symbols");
        self.unused.clone()
    }
}

/// Formatter that returns its input unchanged.
pub struct PassthroughFormatter;

impl Formatter for PassthroughFormatter {
    fn format(&self, source: &str) -> Result<String, FormatError> {
        Ok(source.to_string())
    }
}

/// Formatter that rejects everything.
pub struct RejectingFormatter;

impl Formatter for RejectingFormatter {
    fn format(&self, _source: &str) -> Result<String, FormatError> {
        Err(FormatError {
            message: "1:1: expected 'package', found 'EOF'".to_string(),
        })
    }
}

/// Temporary Go module with a `go.mod`.
pub struct TempModule {
    dir: TempDir,
}

impl TempModule {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp module")?;
        let module = Self { dir };
        module.write("go.mod", "module example.com/demo\n\ngo 1.22\n")?;
        Ok(module)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let path = self.dir.path().join(name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}
