//! OpenAI-compatible chat-completions adapter (OpenAI, OpenRouter, Ollama,
//! LM Studio...).
//!
//! Implements [`ChatModel`] over `POST {base_url}/chat/completions` with
//! function tools and optional JSON-object output.

use std::time::Duration;

use async_trait::async_trait;
use hostess_core::{
    errors::Error,
    model::{
        client::ChatModel,
        types::{ChatMessage, ChatRequest, ChatResponse, ProviderKind, TokenUsage, ToolDefinition},
    },
    Result,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct OpenAiChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Extra attempts on 429 and 5xx.
    pub max_retries: u32,
}

impl OpenAiChatConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_retries: 1,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct OpenAiChatClient {
    cfg: OpenAiChatConfig,
    http: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(cfg: OpenAiChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self { cfg, http })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn to_wire<'a>(&'a self, req: &'a ChatRequest) -> WireRequest<'a> {
        let has_tools = !req.tools.is_empty();
        WireRequest {
            model: &self.cfg.model,
            messages: &req.messages,
            tools: has_tools.then_some(req.tools.as_slice()),
            tool_choice: has_tools.then_some("auto"),
            response_format: req.json_response.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    async fn send_once(&self, body: &WireRequest<'_>) -> std::result::Result<ChatResponse, Attempt> {
        let resp = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.cfg.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let retry = e.is_timeout() || e.is_connect();
                Attempt {
                    error: Error::External(format!("llm request error: {e}")),
                    retryable: retry,
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Attempt {
                error: Error::External(format!(
                    "llm request failed: {status} {}",
                    body.chars().take(300).collect::<String>()
                )),
                retryable: is_retryable(status),
            });
        }

        let raw = resp.text().await.map_err(|e| Attempt {
            error: Error::External(format!("llm response read error: {e}")),
            retryable: false,
        })?;
        parse_response(&raw).map_err(|error| Attempt {
            error,
            retryable: false,
        })
    }
}

struct Attempt {
    error: Error,
    retryable: bool,
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.to_wire(&req);
        debug!(
            model = %self.cfg.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            json = req.json_response,
            "chat completion request"
        );

        let mut attempt = 0u32;
        loop {
            match self.send_once(&body).await {
                Ok(resp) => return Ok(resp),
                Err(a) if a.retryable && attempt < self.cfg.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << attempt.min(5));
                    warn!(error = %a.error, attempt, ?delay, "chat completion failed, retrying");
                    sleep(delay).await;
                }
                Err(a) => return Err(a.error),
            }
        }
    }
}

// ============== Wire format ==============

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: ChatMessage,
}

fn parse_response(raw: &str) -> Result<ChatResponse> {
    let parsed: WireResponse = serde_json::from_str(raw)
        .map_err(|e| Error::External(format!("llm response is not valid JSON: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::External("llm response has no choices".to_string()))?;
    Ok(ChatResponse {
        message: choice.message,
        usage: parsed.usage,
    })
}
