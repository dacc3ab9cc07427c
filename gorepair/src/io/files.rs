//! Filesystem access confined to one Go module, plus CLI output modes.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use similar::TextDiff;
use tracing::debug;

/// Files of one module, addressed by names relative to its root.
///
/// Names come from oracle output, so absolute paths and `..` are rejected.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `name` inside the module.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let rel = Path::new(name);
        if name.trim().is_empty() {
            bail!("empty file name");
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("file name escapes module root: {name}"),
            }
        }
        Ok(self.root.join(rel))
    }

    /// Contents of `name`, or `None` if it does not exist.
    pub fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.resolve(name)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        debug!(file = %path.display(), bytes = contents.len(), "wrote file");
        Ok(())
    }

    /// Write `header` to `name` unless it already exists. Returns whether it was created.
    pub fn create_if_absent(&self, name: &str, header: &str) -> Result<bool> {
        if self.read(name)?.is_some() {
            return Ok(false);
        }
        self.write(name, header)?;
        Ok(true)
    }
}

/// How `gorepair patch` reports its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Replace the base file.
    Write,
    /// Print the merged source.
    #[default]
    Stdout,
    /// Print a unified diff against the base.
    Diff,
    /// Print the base file name if the merge changed it.
    List,
}

/// Emit a merge result for `path` according to `mode`.
pub fn emit<W: Write>(
    mode: OutputMode,
    path: &Path,
    before: &str,
    after: &str,
    out: &mut W,
) -> Result<()> {
    match mode {
        OutputMode::Write => {
            fs::write(path, after).with_context(|| format!("write {}", path.display()))?;
        }
        OutputMode::Stdout => out.write_all(after.as_bytes()).context("write stdout")?,
        OutputMode::Diff => {
            let name = path.display().to_string();
            out.write_all(unified_diff(&name, before, after).as_bytes())
                .context("write stdout")?;
        }
        OutputMode::List => {
            if before != after {
                writeln!(out, "{}", path.display()).context("write stdout")?;
            }
        }
    }
    Ok(())
}

/// Unified diff with `a/` and `b/` headers. Empty when nothing changed.
pub fn unified_diff(name: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .to_string()
}
