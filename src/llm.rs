//! LLM adapter: grounded prompt → generated text.
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"ollama"` | [`OllamaGenerator`], `POST {url}/api/chat` |
//! | `"openai"` | [`OpenAiGenerator`], `POST {url}/v1/chat/completions` |
//! | `"disabled"` | [`DisabledGenerator`], every call fails |
//!
//! Generation is never retried: a slow or failing model surfaces as an error
//! to the caller rather than being hidden behind a second attempt.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::{PipelineError, Stage};
use crate::grounding::Prompt;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt) -> Result<String, PipelineError>;
}

pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn chat_messages(prompt: &Prompt) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": prompt.system },
        { "role": "user", "content": prompt.user },
    ])
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn transport_error(e: reqwest::Error, timeout: Duration, label: &str) -> PipelineError {
    if e.is_timeout() {
        PipelineError::GenerationTimeout { after: timeout }
    } else {
        PipelineError::at(Stage::QueryGenerate, format!("{} request failed: {}", label, e))
    }
}

async fn post_json(
    request: reqwest::RequestBuilder,
    timeout: Duration,
    label: &str,
) -> Result<serde_json::Value, PipelineError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, timeout, label))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::at(
            Stage::QueryGenerate,
            format!("{} API error {}: {}", label, status, body),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| transport_error(e, timeout, label))
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt),
            "stream": false,
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);
        let json = post_json(request, self.timeout, "Ollama").await?;
        json.pointer("/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::at(Stage::QueryGenerate, "Ollama response missing message.content")
            })
    }
}

// ============ OpenAI ============

/// Chat completions against OpenAI or any compatible server.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiGenerator {
    model: String,
    url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            timeout,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt),
            "temperature": 0,
        });
        let request = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = post_json(request, self.timeout, "OpenAI").await?;
        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::at(
                    Stage::QueryGenerate,
                    "OpenAI response missing choices[0].message.content",
                )
            })
    }
}

// ============ Disabled ============

/// Placeholder for deployments without a model. Questions that reach
/// generation fail; questions without evidence are still refused normally.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String, PipelineError> {
        Err(PipelineError::at(
            Stage::QueryGenerate,
            "llm.provider is 'disabled'",
        ))
    }
}
