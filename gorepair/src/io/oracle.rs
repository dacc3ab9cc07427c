//! Oracle abstraction for code generation.
//!
//! The [`Oracle`] trait decouples the repair loop from the model backend.
//! [`OpenAiOracle`] talks to an OpenAI-compatible chat completions endpoint;
//! tests use scripted oracles that return canned responses.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::errors::OracleError;
use crate::io::config::OracleConfig;

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl OracleRequest {
    pub fn new(prompt: impl Into<String>, cfg: &OracleConfig) -> Self {
        Self {
            prompt: prompt.into(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

/// Abstraction over code-generation backends.
pub trait Oracle {
    /// Return the completion text for `request`. Failures are not retried by callers.
    fn generate(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

/// Oracle backed by an OpenAI-compatible HTTP API.
pub struct OpenAiOracle {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
}

impl OpenAiOracle {
    /// Build a client from config, reading the key from `cfg.api_key_env`.
    pub fn from_config(cfg: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| anyhow!("missing API key: set {}", cfg.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            api_key,
        })
    }
}

impl Oracle for OpenAiOracle {
    #[instrument(skip_all, fields(model = %request.model, prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        info!(url = %self.url, "calling oracle");
        let body = ChatRequest {
            model: &request.model,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        debug!(status = status.as_u16(), bytes = text.len(), "oracle responded");
        parse_chat_response(status.as_u16(), &text)
    }
}

/// Interpret a chat completions body. Split out so it can be tested without HTTP.
fn parse_chat_response(status: u16, text: &str) -> Result<String, OracleError> {
    let parsed: Option<ChatResponse> = serde_json::from_str(text).ok();
    if let Some(ChatResponse {
        error: Some(err), ..
    }) = &parsed
    {
        let code = match &err.code {
            Some(serde_json::Value::String(code)) => code.clone(),
            Some(other) => other.to_string(),
            None => status.to_string(),
        };
        return Err(OracleError::Api {
            code,
            message: err.message.clone(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(OracleError::Api {
            code: status.to_string(),
            message: text.chars().take(500).collect(),
        });
    }
    let parsed = parsed.ok_or_else(|| OracleError::Transport("malformed response body".to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(OracleError::EmptyResponse);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies the first choice's content is returned.
    #[test]
    fn returns_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"func A() {}"}}]}"#;
        assert_eq!(parse_chat_response(200, body).expect("content"), "func A() {}");
    }

    /// Verifies an error object in the body becomes an API error with its code.
    #[test]
    fn error_body_becomes_api_error() {
        let body = r#"{"error":{"code":"invalid_api_key","message":"bad key"}}"#;
        match parse_chat_response(401, body) {
            Err(OracleError::Api { code, message }) => {
                assert_eq!(code, "invalid_api_key");
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Verifies a reply without choices is an empty response.
    #[test]
    fn empty_choices_are_empty_response() {
        let body = r#"{"choices":[]}"#;
        assert!(matches!(
            parse_chat_response(200, body),
            Err(OracleError::EmptyResponse)
        ));
    }

    /// Verifies a non-JSON failure keeps the HTTP status as the code.
    #[test]
    fn non_json_failure_uses_status() {
        match parse_chat_response(502, "bad gateway") {
            Err(OracleError::Api { code, .. }) => assert_eq!(code, "502"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
