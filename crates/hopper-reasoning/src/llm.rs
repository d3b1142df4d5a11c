use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hopper_core::config::{AppConfig, LlmProvider};
use hopper_core::error::{HopperError, Result};
use hopper_core::generation::{GenerationRequest, TextGenerator};

// ---------------------------------------------------------------------------
// Anthropic Messages API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

// ---------------------------------------------------------------------------
// llama.cpp server types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HopperError::Config(format!("failed to build HTTP client: {e}")))
}

/// Bounds a generation call, mapping an elapsed deadline to `HopperError::Timeout`.
async fn with_deadline<F>(timeout: Duration, op: F) -> Result<String>
where
    F: std::future::Future<Output = Result<String>>,
{
    tokio::time::timeout(timeout, op)
        .await
        .map_err(|_| HopperError::Timeout(format!("generation exceeded {}s", timeout.as_secs())))?
}

// ---------------------------------------------------------------------------
// AnthropicGenerator
// ---------------------------------------------------------------------------

pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl AnthropicGenerator {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            api_key: config.llm.anthropic_api_key.clone(),
            model: config.llm.model.clone(),
            timeout,
        })
    }

    async fn call_llm(&self, request: &GenerationRequest) -> Result<String> {
        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            system: request.system.clone(),
            temperature: request.temperature,
            stop_sequences: request.stop.clone(),
        };

        debug!(model = %self.model, "sending request to Anthropic API");

        let resp = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| HopperError::Generation(format!("HTTP request to Anthropic failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".into());
            return Err(HopperError::Generation(format!(
                "Anthropic API returned {status}: {body}"
            )));
        }

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| HopperError::Generation(format!("failed to parse Anthropic response: {e}")))?;

        let text = api_resp
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(HopperError::Generation(
                "Anthropic returned an empty response".into(),
            ));
        }

        debug!(
            stop_reason = ?api_resp.stop_reason,
            response_len = text.len(),
            "received Anthropic API response"
        );

        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        with_deadline(self.timeout, self.call_llm(request)).await
    }
}

// ---------------------------------------------------------------------------
// LlamaCppGenerator
// ---------------------------------------------------------------------------

/// Client for a local llama.cpp server (`/completion` endpoint).
pub struct LlamaCppGenerator {
    client: Client,
    url: String,
    timeout: Duration,
}

impl LlamaCppGenerator {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            url: config.llm.url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn render_prompt(request: &GenerationRequest) -> String {
        match &request.system {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        }
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let body = CompletionRequest {
            prompt: Self::render_prompt(request),
            n_predict: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop.clone(),
        };

        debug!(url = %self.url, "sending completion request to llama.cpp");

        let resp = self
            .client
            .post(format!("{}/completion", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| HopperError::Generation(format!("HTTP request to llama.cpp failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HopperError::Generation(format!(
                "llama.cpp returned {status}: {body}"
            )));
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| HopperError::Generation(format!("failed to parse llama.cpp response: {e}")))?;
        Ok(parsed.content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for LlamaCppGenerator {
    fn name(&self) -> &str {
        "llamacpp"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        with_deadline(self.timeout, self.complete(request)).await
    }
}

/// Fails only when the HTTP client cannot be built; a generator without
/// its request timeout is never handed out.
pub fn build_generator(config: &AppConfig) -> Result<Arc<dyn TextGenerator>> {
    Ok(match config.llm.provider {
        LlmProvider::Anthropic => Arc::new(AnthropicGenerator::new(config)?),
        LlmProvider::LlamaCpp => Arc::new(LlamaCppGenerator::new(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llamacpp_prompt_prepends_system() {
        let request = GenerationRequest::new("Bonjour").system("Tu es Hopper.");
        assert_eq!(
            LlamaCppGenerator::render_prompt(&request),
            "Tu es Hopper.\n\nBonjour"
        );
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout_error() {
        let result = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("late".to_string())
        })
        .await;
        assert!(matches!(result, Err(HopperError::Timeout(_))));
    }

    #[test]
    fn generators_are_built_for_each_provider() {
        let mut config = AppConfig::default();
        config.llm.timeout_secs = 7;
        for (provider, name) in [
            (LlmProvider::Anthropic, "anthropic"),
            (LlmProvider::LlamaCpp, "llamacpp"),
        ] {
            config.llm.provider = provider;
            let generator = build_generator(&config).unwrap();
            assert_eq!(generator.name(), name);
        }
        assert!(http_client(Duration::from_secs(7)).is_ok());
    }

    #[test]
    fn anthropic_request_omits_empty_stop() {
        let body = AnthropicRequest {
            model: "m".into(),
            max_tokens: 10,
            messages: vec![],
            system: None,
            temperature: 0.0,
            stop_sequences: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stop_sequences").is_none());
        assert!(json.get("system").is_none());
    }
}
