//! Typed errors for the patch engine and its collaborators.

use thiserror::Error;

use crate::core::steps::StepId;

/// Source or patch text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Rendered text rejected by the canonicalizing formatter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("format error: {message}")]
pub struct FormatError {
    pub message: String,
}

/// Failure of the code-generation oracle. Never retried.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("oracle api error {code}: {message}")]
    Api { code: String, message: String },
    #[error("oracle returned an empty response")]
    EmptyResponse,
}

/// A step ran out of attempts and the run is configured to abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {step} exhausted {attempts} attempts without success")]
pub struct AttemptsExhaustedError {
    pub step: StepId,
    pub attempts: u32,
}

/// Why an oracle response could not be applied to the working files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("{file}: {source}")]
    Parse { file: String, source: ParseError },
    #[error("{file}: {source}")]
    Format {
        file: String,
        /// Unformatted text that the formatter rejected.
        rendered: String,
        source: FormatError,
    },
}

impl PatchError {
    pub fn file(&self) -> &str {
        match self {
            PatchError::Parse { file, .. } | PatchError::Format { file, .. } => file,
        }
    }
}
