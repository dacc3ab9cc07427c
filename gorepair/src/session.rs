//! Outer session loop: one job per incoming request.

use std::io::BufRead;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::controller::{JobOutcome, Repairer};
use crate::core::render::Formatter;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::{PromptInputs, PromptKind};
use crate::io::toolchain::Toolchain;

/// Request that ends an interactive session.
pub const EXIT_REQUEST: &str = "exit";

/// Where change requests come from.
pub trait RequestSource {
    /// Next request, or `None` when there are no more.
    fn next_request(&mut self) -> Result<Option<String>>;
}

/// One request per non-blank line until EOF or `exit`.
pub struct LineRequests<R> {
    reader: R,
}

impl<R: BufRead> LineRequests<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> RequestSource for LineRequests<R> {
    fn next_request(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).context("read request")?;
            if read == 0 {
                return Ok(None);
            }
            let request = line.trim();
            if request.is_empty() {
                continue;
            }
            if request.eq_ignore_ascii_case(EXIT_REQUEST) {
                return Ok(None);
            }
            return Ok(Some(request.to_string()));
        }
    }
}

/// A single request given up front.
pub struct SingleRequest(Option<String>);

impl SingleRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self(Some(request.into()))
    }
}

impl RequestSource for SingleRequest {
    fn next_request(&mut self) -> Result<Option<String>> {
        Ok(self.0.take())
    }
}

/// Reason why [`run_sessions`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStop {
    /// The request source ran dry (EOF or `exit`).
    SourceExhausted,
    MaxSessions { limit: u32 },
}

/// Summary of a session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub run_id: String,
    /// Requests taken from the source, including rejected ones.
    pub sessions: u32,
    pub rejected: u32,
    pub stop: SessionStop,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// File every job works on, relative to the module root.
    pub file: String,
    pub max_sessions: Option<u32>,
    /// Ask the oracle whether each request is about Go code first.
    pub verify: bool,
}

/// Identifier shared by all sessions of one process.
pub fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    millis.to_string()
}

/// Run one job per request until the source is exhausted or the session limit is hit.
///
/// Oracle, filesystem and abort-on-exhaustion errors end the loop.
#[instrument(skip_all, fields(run_id = %run_id, file = %cfg.file))]
pub fn run_sessions<O, T, F, S, C>(
    repairer: &Repairer<'_, O, T, F>,
    source: &mut S,
    cfg: &SessionConfig,
    run_id: &str,
    mut on_job: C,
) -> Result<SessionOutcome>
where
    O: Oracle,
    T: Toolchain,
    F: Formatter,
    S: RequestSource + ?Sized,
    C: FnMut(&JobOutcome),
{
    let mut sessions = 0u32;
    let mut rejected = 0u32;
    let stop = loop {
        if let Some(limit) = cfg.max_sessions
            && sessions >= limit
        {
            break SessionStop::MaxSessions { limit };
        }
        let Some(request) = source.next_request()? else {
            break SessionStop::SourceExhausted;
        };
        sessions += 1;

        if cfg.verify && !verify_request(repairer, &request)? {
            warn!(request = %request, "request is not about Go code, skipping");
            rejected += 1;
            continue;
        }

        let session = format!("{run_id}-{sessions:03}");
        info!(session = %session, "starting session");
        let outcome = repairer.run_job(&session, &request, &cfg.file)?;
        on_job(&outcome);
    };

    Ok(SessionOutcome {
        run_id: run_id.to_string(),
        sessions,
        rejected,
        stop,
    })
}

/// Ask the oracle whether `request` is a request for Go code.
pub fn verify_request<O: Oracle, T: Toolchain, F: Formatter>(
    repairer: &Repairer<'_, O, T, F>,
    request: &str,
) -> Result<bool> {
    let prompt = repairer.prompts().build(
        PromptKind::VerifyRequest,
        &PromptInputs {
            request: request.to_string(),
            ..PromptInputs::default()
        },
    )?;
    let answer = repairer
        .oracle()
        .generate(&OracleRequest::new(prompt, &repairer.config().oracle))
        .context("verify request")?;
    Ok(parse_verdict(&answer))
}

/// `true` if the answer starts with "true" or "yes", ignoring case and quoting.
pub fn parse_verdict(answer: &str) -> bool {
    let word = answer
        .trim()
        .trim_start_matches(['`', '"', '\'', '*'])
        .to_ascii_lowercase();
    word.starts_with("true") || word.starts_with("yes")
}
