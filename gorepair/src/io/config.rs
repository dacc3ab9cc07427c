//! Configuration stored in `<module>/.gorepair.toml`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::render::ImportStyle;

/// File name looked up in the module directory.
pub const CONFIG_FILE_NAME: &str = ".gorepair.toml";

/// What to do when a step runs out of attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnExhaustion {
    /// Log and move on to the next step.
    #[default]
    Continue,
    /// Stop the plan with an error.
    Abort,
}

/// gorepair configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GorepairConfig {
    /// Oracle calls allowed per step.
    pub max_attempts: u32,

    pub on_exhaustion: OnExhaustion,

    /// Ask the oracle whether a request is about Go code before running it.
    pub verify_requests: bool,

    /// Prompt size limit before droppable sections are removed.
    pub prompt_budget_bytes: usize,

    pub oracle: OracleConfig,
    pub toolchain: ToolchainConfig,
    pub imports: ImportsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Chat completions endpoint.
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Deadline for each `go`, `goimports`, `gofmt` or `staticcheck` call.
    pub command_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            output_limit_bytes: 100_000,
        }
    }
}

impl ToolchainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ImportsConfig {
    /// Split imports into std / third-party / local blocks.
    pub group: bool,
    pub local_prefixes: Vec<String>,
}

impl ImportsConfig {
    pub fn style(&self) -> ImportStyle {
        ImportStyle {
            group: self.group,
            local_prefixes: self.local_prefixes.clone(),
        }
    }
}

impl Default for GorepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            on_exhaustion: OnExhaustion::Continue,
            verify_requests: true,
            prompt_budget_bytes: 60_000,
            oracle: OracleConfig::default(),
            toolchain: ToolchainConfig::default(),
            imports: ImportsConfig::default(),
        }
    }
}

impl GorepairConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.oracle.url.trim().is_empty() {
            return Err(anyhow!("oracle.url must not be empty"));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(anyhow!("oracle.model must not be empty"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.toolchain.command_timeout_secs == 0 {
            return Err(anyhow!("toolchain.command_timeout_secs must be > 0"));
        }
        if self.toolchain.output_limit_bytes == 0 {
            return Err(anyhow!("toolchain.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load the config at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<GorepairConfig> {
    let cfg = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<GorepairConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => GorepairConfig::default(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Write `cfg` as TOML, replacing `path` atomically (temp file + rename).
pub fn write_config(path: &Path, cfg: &GorepairConfig) -> Result<()> {
    cfg.validate()?;
    let body = toml::to_string_pretty(cfg).context("serialize config toml")?;
    let contents = format!("{CONFIG_HEADER}\n{body}");
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

const CONFIG_HEADER: &str = "# gorepair settings for this module. Missing keys use the defaults.\n";

/// Write the default config into `module_dir`, returning its path.
///
/// An existing file is kept unless `force` is set.
pub fn init_config(module_dir: &Path, force: bool) -> Result<PathBuf> {
    let path = module_dir.join(CONFIG_FILE_NAME);
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &GorepairConfig::default())?;
    Ok(path)
}
