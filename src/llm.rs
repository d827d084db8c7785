// src/llm.rs

use crate::config::{LlmBackend, LlmSection};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` client (Ollama serves this under `/v1`).
pub struct ChatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    /// Probe the server root once before the first completion.
    probe_health: bool,
    healthy: AtomicBool,
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f64,
        probe_health: bool,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature,
            probe_health,
            healthy: AtomicBool::new(false),
        }
    }

    /// Resolve the configured backend into a concrete client.
    pub fn from_config(llm: &LlmSection) -> Result<Self, LlmError> {
        let endpoint = llm.endpoint();
        match llm.backend {
            LlmBackend::Ollama => {
                info!(
                    url = %endpoint.base_url,
                    model = %endpoint.model,
                    "Using Ollama (local) backend"
                );
                // required by API but ignored
                Ok(Self::new(
                    &endpoint.base_url,
                    &endpoint.model,
                    "ollama",
                    llm.temperature,
                    true,
                ))
            }
            LlmBackend::Remote => {
                let api_key = std::env::var("LLM_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
                info!(
                    url = %endpoint.base_url,
                    model = %endpoint.model,
                    "Using remote API backend"
                );
                Ok(Self::new(
                    &endpoint.base_url,
                    &endpoint.model,
                    api_key,
                    llm.temperature,
                    false,
                ))
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the Ollama server answers on its root URL.
    pub async fn check_health(&self) -> Result<(), LlmError> {
        // Ollama's health endpoint is at the root (not under /v1)
        let health_url = self.base_url.trim_end_matches("/v1");

        let unreachable = |reason: String| LlmError::Unreachable {
            url: self.base_url.clone(),
            reason: format!("{reason}. Start it with: ollama serve"),
        };

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama server is reachable");
                Ok(())
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                Err(unreachable(format!("status {}", resp.status())))
            }
            Err(e) => {
                warn!(error = %e, "Ollama server not reachable");
                Err(unreachable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if self.probe_health && !self.healthy.load(Ordering::Relaxed) {
            self.check_health().await?;
            self.healthy.store(true, Ordering::Relaxed);
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, prompt_chars = prompt.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        info!(chars = content.len(), "Received completion");
        Ok(content)
    }
}
