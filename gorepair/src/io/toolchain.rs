//! Go toolchain collaborator.
//!
//! The [`Toolchain`] trait keeps the repair loop independent of real `go`
//! binaries. [`GoToolchain`] shells out with a deadline per command; tests use a
//! scripted toolchain instead.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::FormatError;
use crate::core::render::Formatter;
use crate::io::config::ToolchainConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

static UNUSED_FUNC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"func (\w+) is unused").expect("valid unused func regex"));

/// Result of a build or test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

/// External build/test/import-fix/analysis executables.
pub trait Toolchain {
    /// Create `go.mod` in `dir` if none exists.
    fn ensure_module(&self, dir: &Path) -> Result<()>;
    /// Best-effort `go mod tidy` (and `go mod vendor` when vendoring).
    fn sync_dependencies(&self, dir: &Path) -> Result<bool>;
    /// Best-effort `goimports -w`.
    fn fix_imports(&self, file: &Path) -> Result<bool>;
    fn build(&self, dir: &Path) -> Result<ToolOutput>;
    fn test(&self, dir: &Path) -> Result<ToolOutput>;
    /// Unused function names in `file`. Errors are swallowed.
    fn find_unused_symbols(&self, file: &Path) -> Vec<String>;
}

/// Toolchain backed by `go`, `goimports` and `staticcheck` on `PATH`.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    cfg: ToolchainConfig,
}

impl GoToolchain {
    pub fn new(cfg: ToolchainConfig) -> Self {
        Self { cfg }
    }

    fn run(&self, program: &str, args: &[&str], dir: &Path) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);
        run_command_with_timeout(cmd, None, self.cfg.timeout(), self.cfg.output_limit_bytes)
            .with_context(|| format!("run {program} {}", args.join(" ")))
    }
}

impl Toolchain for GoToolchain {
    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn ensure_module(&self, dir: &Path) -> Result<()> {
        if dir.join("go.mod").exists() {
            return Ok(());
        }
        let name = dir
            .canonicalize()
            .ok()
            .and_then(|abs| abs.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "app".to_string());
        info!(module = %name, "initialising go module");
        let out = self.run("go", &["mod", "init", &name], dir)?;
        if !out.success() {
            anyhow::bail!("go mod init failed: {}", out.combined().trim());
        }
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn sync_dependencies(&self, dir: &Path) -> Result<bool> {
        let tidy = self.run("go", &["mod", "tidy"], dir)?;
        if !tidy.success() {
            warn!(output = %tidy.combined().trim(), "go mod tidy failed");
            return Ok(false);
        }
        if dir.join("vendor").is_dir() {
            let vendor = self.run("go", &["mod", "vendor"], dir)?;
            if !vendor.success() {
                warn!(output = %vendor.combined().trim(), "go mod vendor failed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    #[instrument(skip_all, fields(file = %file.display()))]
    fn fix_imports(&self, file: &Path) -> Result<bool> {
        let dir = file.parent().unwrap_or(Path::new("."));
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let out = self.run("goimports", &["-w", &name], dir)?;
        if !out.success() {
            warn!(output = %out.combined().trim(), "goimports failed");
        }
        Ok(out.success())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn build(&self, dir: &Path) -> Result<ToolOutput> {
        let out = self.run("go", &["build", "./..."], dir)?;
        debug!(ok = out.success(), "go build finished");
        Ok(ToolOutput {
            ok: out.success(),
            output: out.combined(),
        })
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn test(&self, dir: &Path) -> Result<ToolOutput> {
        let out = self.run("go", &["test", "./..."], dir)?;
        debug!(ok = out.success(), "go test finished");
        Ok(ToolOutput {
            ok: out.success(),
            output: out.combined(),
        })
    }

    #[instrument(skip_all, fields(file = %file.display()))]
    fn find_unused_symbols(&self, file: &Path) -> Vec<String> {
        let dir = file.parent().unwrap_or(Path::new("."));
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        match self.run("staticcheck", &[&name], dir) {
            Ok(out) => unused_functions(&out.combined()),
            Err(err) => {
                debug!(err = %err, "staticcheck unavailable");
                Vec::new()
            }
        }
    }
}

/// Function names from `staticcheck` "func X is unused" findings, deduplicated.
pub fn unused_functions(output: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in UNUSED_FUNC_RE.captures_iter(output) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// [`Formatter`] that pipes source through `gofmt`.
#[derive(Debug, Clone)]
pub struct Gofmt {
    cfg: ToolchainConfig,
}

impl Gofmt {
    pub fn new(cfg: ToolchainConfig) -> Self {
        Self { cfg }
    }
}

impl Formatter for Gofmt {
    fn format(&self, source: &str) -> Result<String, FormatError> {
        let out = run_command_with_timeout(
            Command::new("gofmt"),
            Some(source.as_bytes()),
            self.cfg.timeout(),
            self.cfg.output_limit_bytes.max(source.len() * 2),
        )
        .map_err(|err| FormatError {
            message: format!("{err:#}"),
        })?;
        if !out.success() {
            return Err(FormatError {
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        String::from_utf8(out.stdout).map_err(|err| FormatError {
            message: format!("gofmt produced invalid utf-8: {err}"),
        })
    }
}
