//! Per-attempt artifacts under `.gorepair/sessions/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::merge::MergeReport;
use crate::core::steps::StepId;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Passed,
    BuildFailed,
    TestsFailed,
    PatchRejected,
    OracleFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub session: String,
    pub seq: u32,
    pub step: StepId,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Files written by this attempt, in write order.
    pub files: Vec<String>,
    pub report: MergeReport,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub toolchain_log_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(root: &Path, session: &str, seq: u32, step: StepId, attempt: u32) -> Self {
        let dir = root
            .join(".gorepair")
            .join("sessions")
            .join(session)
            .join(format!("{seq:02}-{step}-{attempt}"));
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.md"),
            toolchain_log_path: dir.join("toolchain.log"),
            dir,
        }
    }
}

pub struct AttemptRecord<'a> {
    pub root: &'a Path,
    pub meta: &'a AttemptMeta,
    pub prompt: &'a str,
    pub response: Option<&'a str>,
    pub toolchain_log: Option<&'a str>,
}

pub fn write_attempt(record: &AttemptRecord<'_>) -> Result<AttemptPaths> {
    let meta = record.meta;
    let paths = AttemptPaths::new(record.root, &meta.session, meta.seq, meta.step, meta.attempt);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, meta)?;
    write_text(&paths.prompt_path, record.prompt)?;
    if let Some(response) = record.response {
        write_text(&paths.response_path, response)?;
    }
    if let Some(log) = record.toolchain_log {
        write_text(&paths.toolchain_log_path, log)?;
    }
    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize attempt meta")?;
    buf.push('\n');
    write_text(path, &buf)
}
