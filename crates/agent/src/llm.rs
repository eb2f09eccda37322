use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use helios_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stateless text completion: one prompt in, one completion out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Stop sequence that keeps models from inventing their own tool observations.
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// Builds the configured inference client.
pub fn client_from_config(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build inference HTTP client")?;

    match config.provider {
        LlmProvider::Ollama => {
            Ok(Box::new(OllamaClient {
                http,
                base_url: resolved_base_url(config)?,
                model: config.model.clone(),
                structured_output: config.structured_output,
                max_retries: config.max_retries,
            }))
        }
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("openai provider requires llm.api_key"))?;
            Ok(Box::new(OpenAiClient {
                http,
                base_url: resolved_base_url(config)?,
                api_key,
                model: config.model.clone(),
                structured_output: config.structured_output,
                max_retries: config.max_retries,
            }))
        }
    }
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    structured_output: bool,
    max_retries: u32,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions<'a>,
}

#[derive(Serialize)]
struct OllamaOptions<'a> {
    stop: [&'a str; 1],
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: self.structured_output.then_some("json"),
            options: OllamaOptions { stop: [OBSERVATION_STOP], temperature: 0.0 },
        };

        let response: OllamaGenerateResponse =
            send_with_retry(self.max_retries, || self.http.post(&url).json(&body)).await?;
        Ok(response.response)
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    structured_output: bool,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stop: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: 0.0,
            stop: [OBSERVATION_STOP],
            response_format: self
                .structured_output
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response: ChatCompletionResponse = send_with_retry(self.max_retries, || {
            self.http.post(&url).bearer_auth(self.api_key.expose_secret()).json(&body)
        })
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion response carried no content"))
    }
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Deserialize)]
struct OllamaModelTag {
    name: String,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
}

#[derive(Serialize)]
struct OllamaPullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaPullResponse {
    #[serde(default)]
    status: String,
}

fn resolved_base_url(config: &LlmConfig) -> Result<String> {
    match (config.provider, &config.base_url) {
        (_, Some(url)) => Ok(url.trim_end_matches('/').to_string()),
        (LlmProvider::OpenAi, None) => Ok("https://api.openai.com".to_string()),
        (LlmProvider::Ollama, None) => bail!("ollama provider requires llm.base_url"),
    }
}

/// Ollama tags carry an implicit `:latest` suffix when none was given.
fn model_listed<'a>(names: impl IntoIterator<Item = &'a str>, model: &str) -> bool {
    let wanted = model.strip_suffix(":latest").unwrap_or(model);
    names.into_iter().any(|name| name.strip_suffix(":latest").unwrap_or(name) == wanted)
}

/// Asks the inference service whether the configured model is served and returns a
/// one-line description for diagnostics.
pub async fn check_model_available(config: &LlmConfig) -> Result<String> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build inference HTTP client")?;
    let base_url = resolved_base_url(config)?;

    match config.provider {
        LlmProvider::Ollama => {
            let url = format!("{base_url}/api/tags");
            let tags: OllamaTagsResponse =
                send_with_retry(config.max_retries, || http.get(&url)).await?;
            if !model_listed(tags.models.iter().map(|tag| tag.name.as_str()), &config.model) {
                bail!(
                    "model `{}` is not pulled on {base_url}; run `helios pull-model`",
                    config.model
                );
            }
            Ok(format!("model `{}` is available on {base_url}", config.model))
        }
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("openai provider requires llm.api_key"))?;
            let url = format!("{base_url}/v1/models/{}", config.model);
            let model: OpenAiModel = send_with_retry(config.max_retries, || {
                http.get(&url).bearer_auth(api_key.expose_secret())
            })
            .await?;
            Ok(format!("model `{}` is available on {base_url}", model.id))
        }
    }
}

/// Downloads the configured model into a local Ollama instance, waiting for the
/// service to answer first. Hosted providers manage their own models.
pub async fn pull_model(config: &LlmConfig) -> Result<String> {
    if config.provider != LlmProvider::Ollama {
        bail!("pulling models is only supported for the ollama provider");
    }
    let base_url = resolved_base_url(config)?;
    let ready_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build inference HTTP client")?;
    let tags_url = format!("{base_url}/api/tags");
    let _: OllamaTagsResponse = send_with_retry(config.max_retries, || ready_http.get(&tags_url))
        .await
        .context("ollama did not become ready")?;

    tracing::info!(
        event_name = "system.agent.llm.pull_started",
        model = %config.model,
        base_url = %base_url,
        "pulling model"
    );
    // Downloads can take far longer than a completion, so no request timeout here.
    let pull_http = reqwest::Client::builder()
        .build()
        .context("failed to build inference HTTP client")?;
    let pull_url = format!("{base_url}/api/pull");
    let body = OllamaPullRequest { model: &config.model, stream: false };
    let response: OllamaPullResponse =
        send_with_retry(config.max_retries, || pull_http.post(&pull_url).json(&body)).await?;
    if response.status != "success" {
        bail!("ollama reported pull status `{}`", response.status);
    }
    tracing::info!(
        event_name = "system.agent.llm.pull_finished",
        model = %config.model,
        "model pulled"
    );
    Ok(format!("model `{}` pulled into {base_url}", config.model))
}

/// Sends a request, retrying connection failures, timeouts and 5xx/429 responses with
/// exponential backoff. Other 4xx responses fail immediately.
async fn send_with_retry<T, F>(max_retries: u32, build: F) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json::<T>().await.context("malformed inference response");
                }
                let detail = response.text().await.unwrap_or_default();
                if !(status.is_server_error() || status.as_u16() == 429) {
                    bail!("inference service returned {status}: {detail}");
                }
                anyhow!("inference service returned {status}: {detail}")
            }
            Err(error) if error.is_connect() || error.is_timeout() => {
                anyhow::Error::new(error).context("inference service unreachable")
            }
            Err(error) => return Err(anyhow::Error::new(error).context("inference request failed")),
        };

        if attempt >= max_retries {
            return Err(outcome);
        }
        tracing::warn!(
            event_name = "system.agent.llm.retry",
            attempt = attempt + 1,
            max_retries,
            error = %outcome,
            "retrying inference request"
        );
        tokio::time::sleep(Duration::from_millis(250 * (1 << attempt.min(5)))).await;
        attempt += 1;
    }
}

/// Deterministic client that replays canned completions in order and records every prompt.
///
/// Once the script is exhausted each call fails, which exercises the inference-failure path.
#[derive(Default)]
pub struct ScriptedLlm {
    completions: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(completions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            completions: Mutex::new(completions.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.completions.lock().map(|queue| queue.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self
            .completions
            .lock()
            .map_err(|_| anyhow!("scripted completions lock poisoned"))?
            .pop_front();
        next.ok_or_else(|| anyhow!("scripted completions exhausted"))
    }
}
