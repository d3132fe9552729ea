//! HTTP client for an OpenAI-compatible chat completions endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::CivicRagError;
use crate::errors::Result;
use crate::llm::Completer;

/// Upstream failure classification for the retry loop
enum UpstreamError {
    /// Worth retrying: timeouts, connect failures, 429, 5xx
    Transient { message: String, rate_limited: bool },
    /// Not worth retrying: auth failures and other 4xx responses
    Fatal(String),
}

/// Client for chat completions over HTTP
pub struct LlmClient {
    model: String,
    api_base: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    retry_base_delay: Duration,
    client: Client,
}

impl LlmClient {
    /// Create a new completion client
    ///
    /// # Errors
    /// - HTTP client build errors (invalid configuration)
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            model: config.chat_model().to_string(),
            api_base: config.api_base().trim_end_matches('/').to_string(),
            api_key: config.api_key().to_string(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens() as u32,
            max_retries: config.max_retries() as u32,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms()),
            client,
        })
    }

    /// Run one completion with explicit sampling parameters
    ///
    /// # Errors
    /// - Upstream failures that survive the retry policy
    /// - Responses without a completion choice
    pub async fn complete_with_params(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let mut attempt: u32 = 0;

        loop {
            match self
                .try_complete(system_prompt, user_prompt, temperature, max_tokens)
                .await
            {
                Ok(text) => return Ok(text),
                Err(UpstreamError::Fatal(message)) => {
                    return Err(CivicRagError::ProviderUnavailable(message));
                }
                Err(UpstreamError::Transient {
                    message,
                    rate_limited,
                }) => {
                    if attempt >= self.max_retries {
                        return Err(CivicRagError::ProviderUnavailable(format!(
                            "Completion request failed after {} retries: {message}",
                            self.max_retries
                        )));
                    }
                    let mut delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    if rate_limited {
                        delay *= 2;
                    }
                    warn!(
                        "Completion request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.max_retries,
                        delay,
                        message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single request attempt, classified for the retry loop
    async fn try_complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> std::result::Result<String, UpstreamError> {
        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct CompletionRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct CompletionResponse {
            choices: Vec<CompletionChoice>,
        }

        #[derive(Deserialize)]
        struct CompletionChoice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let url = format!("{}/chat/completions", self.api_base);
        debug!(
            "Calling completions API: {} (prompt {} chars)",
            url,
            user_prompt.len()
        );

        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    UpstreamError::Transient {
                        message: format!("Completion request failed: {e}"),
                        rate_limited: false,
                    }
                } else {
                    UpstreamError::Fatal(format!("Completion request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("Completions API error ({status}): {error_text}");
            if status.as_u16() == 429 {
                return Err(UpstreamError::Transient {
                    message,
                    rate_limited: true,
                });
            }
            if status.is_server_error() {
                return Err(UpstreamError::Transient {
                    message,
                    rate_limited: false,
                });
            }
            return Err(UpstreamError::Fatal(message));
        }

        let result: CompletionResponse = response.json().await.map_err(|e| {
            UpstreamError::Fatal(format!("Failed to parse completion response: {e}"))
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| UpstreamError::Fatal("No completion content in response".to_string()))
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.complete_with_params(system_prompt, user_prompt, self.temperature, self.max_tokens)
            .await
    }

    /// One attempt with no retries; a probe should report trouble, not
    /// wait out a backoff schedule.
    async fn probe(&self) -> Result<String> {
        self.try_complete("You are a connectivity probe.", "Test", 0.0, 8)
            .await
            .map_err(|e| match e {
                UpstreamError::Transient { message, .. } | UpstreamError::Fatal(message) => {
                    CivicRagError::ProviderUnavailable(message)
                }
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.provider.api_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_client_construction() {
        let client = LlmClient::new(&test_config()).unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let mut config = test_config();
        config.provider.api_base = "https://api.openai.com/v1/".to_string();
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.api_base, "https://api.openai.com/v1");
    }

    #[tokio::test]
    #[ignore = "Requires API key"]
    async fn test_complete_real_endpoint() {
        let config = AppConfig::load().unwrap();
        let client = LlmClient::new(&config).unwrap();
        let answer = client
            .complete("You are a terse assistant.", "Reply with the word ready.")
            .await
            .unwrap();
        assert!(!answer.is_empty());
    }
}
