//! Oracle backend for OpenAI-compatible chat completion endpoints.

use std::env;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{IncrementalRequest, InitialRequest, Oracle, OracleError};
use crate::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, PromptBuilder, PromptPack};

#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    /// Base URL up to and excluding `/chat/completions`.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token. No header is sent when unset.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub prompt_budget_bytes: usize,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            timeout: Duration::from_secs(120),
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct HttpOracle {
    client: Client,
    config: HttpOracleConfig,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Fatal(format!("build http client: {e}")))?;
        let api_key = env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(var = %config.api_key_env, "no api key in environment, sending unauthenticated requests");
        }
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    #[instrument(skip_all, fields(stage = stage, model = %self.config.model))]
    fn complete(&self, stage: &str, pack: &PromptPack) -> Result<String, OracleError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &pack.system,
                },
                ChatMessage {
                    role: "user",
                    content: &pack.content,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        info!(stage, "posting chat completion");
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().map_err(classify_transport)?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| OracleError::Transient(format!("read response body: {e}")))?;
        if !status.is_success() {
            warn!(stage, %status, "chat completion rejected");
            return Err(classify_status(status, &text));
        }
        let content = parse_completion(&text)?;
        debug!(stage, bytes = content.len(), "chat completion received");
        Ok(content)
    }
}

impl Oracle for HttpOracle {
    fn synthesize_initial(&self, request: &InitialRequest<'_>) -> Result<String, OracleError> {
        let pack = PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_initial(request)
            .map_err(|e| OracleError::Fatal(format!("render prompt: {e:#}")))?;
        self.complete("initial", &pack)
    }

    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError> {
        let pack = PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_incremental(request)
            .map_err(|e| OracleError::Fatal(format!("render prompt: {e:#}")))?;
        self.complete("incremental", &pack)
    }
}

fn classify_transport(err: reqwest::Error) -> OracleError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        OracleError::Transient(format!("http transport: {err}"))
    } else {
        OracleError::Fatal(format!("http transport: {err}"))
    }
}

/// 429 and 5xx are retryable; every other non-success status is terminal.
fn classify_status(status: StatusCode, body: &str) -> OracleError {
    let snippet: String = body.chars().take(300).collect();
    let msg = format!("http {status}: {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OracleError::Transient(msg)
    } else {
        OracleError::Fatal(msg)
    }
}

fn parse_completion(body: &str) -> Result<String, OracleError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::Fatal(format!("parse chat completion: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| OracleError::Fatal("chat completion has no content".to_string()))
}
