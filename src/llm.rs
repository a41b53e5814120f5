//! Language model client used by the text-generating stages.
//!
//! Speaks the OpenAI-compatible chat completions protocol. The client is
//! built from an explicit [`LlmConfig`]; without a credential it can still be
//! constructed, but every request fails fast with
//! [`StageError::MissingCredential`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::StageError;

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

/// Connection settings for the language model backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Explicit API key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key (default: OPENAI_API_KEY)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout. None waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: None,
        }
    }
}

impl LlmConfig {
    /// The configured key, falling back to the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completion client.
pub struct LlmClient {
    http: Client,
    api_key: Option<String>,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a client, resolving the API key once.
    pub fn new(config: LlmConfig) -> Result<Self, StageError> {
        let mut builder =
            Client::builder().user_agent(concat!("chainaudit/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().map_err(StageError::HttpClient)?;
        Ok(Self::with_http_client(http, config))
    }

    /// Create a client around an existing HTTP client.
    pub fn with_http_client(http: Client, config: LlmConfig) -> Self {
        let api_key = config.resolve_api_key();
        Self {
            http,
            api_key,
            config,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a system + user prompt and return the reply text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, StageError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StageError::MissingCredential(self.config.api_key_env.clone()))?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        tracing::debug!(model = %self.config.model, prompt_len = user.len(), "sending completion request");
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(StageError::EmptyResponse)
    }
}
