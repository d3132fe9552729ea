//! HTTP client for an OpenAI-compatible embeddings endpoint

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::CivicRagError;
use crate::errors::Result;

/// Upstream failure classification for the retry loop
enum UpstreamError {
    /// Worth retrying: timeouts, connect failures, 429, 5xx
    Transient { message: String, rate_limited: bool },
    /// Not worth retrying: auth failures and other 4xx responses
    Fatal(String),
}

/// Client for generating embeddings over HTTP
pub struct EmbeddingClient {
    model: String,
    api_base: String,
    api_key: String,
    max_retries: u32,
    retry_base_delay: Duration,
    client: Client,
}

impl EmbeddingClient {
    /// Create a new embedding client
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
            model: config.embedding_model().to_string(),
            api_base: config.api_base().trim_end_matches('/').to_string(),
            api_key: config.api_key().to_string(),
            max_retries: config.max_retries() as u32,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms()),
            client,
        })
    }

    /// Embedding model this client requests
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate an embedding for a single text
    ///
    /// # Errors
    /// - Upstream failures that survive the retry policy
    /// - Responses with no embedding data
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        let mut vectors = self.post_embeddings(&input).await?;
        vectors.pop().ok_or_else(|| {
            CivicRagError::ProviderUnavailable("No embedding in response".to_string())
        })
    }

    /// Generate embeddings for a batch of texts in one upstream call
    ///
    /// Callers are responsible for keeping batches within the configured
    /// batch size; this method sends whatever it is given.
    ///
    /// # Errors
    /// - Upstream failures that survive the retry policy
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.post_embeddings(texts).await
    }

    /// POST to /embeddings with exponential backoff on transient failures
    async fn post_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;

        loop {
            match self.try_post(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(UpstreamError::Fatal(message)) => {
                    return Err(CivicRagError::ProviderUnavailable(message));
                }
                Err(UpstreamError::Transient {
                    message,
                    rate_limited,
                }) => {
                    if attempt >= self.max_retries {
                        return Err(CivicRagError::ProviderUnavailable(format!(
                            "Embeddings request failed after {} retries: {message}",
                            self.max_retries
                        )));
                    }
                    let mut delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    if rate_limited {
                        delay *= 2;
                    }
                    warn!(
                        "Embeddings request failed (attempt {}/{}), retrying in {:?}: {}",
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
    async fn try_post(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, UpstreamError> {
        #[derive(Serialize)]
        struct EmbeddingsRequest<'a> {
            input: &'a [String],
            model: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f32>,
        }

        let url = format!("{}/embeddings", self.api_base);
        debug!("Calling embeddings API: {} ({} items)", url, texts.len());

        let request = EmbeddingsRequest {
            input: texts,
            model: &self.model,
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
                        message: format!("Embeddings request failed: {e}"),
                        rate_limited: false,
                    }
                } else {
                    UpstreamError::Fatal(format!("Embeddings request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("Embeddings API error ({status}): {error_text}");
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

        let result: EmbeddingsResponse = response.json().await.map_err(|e| {
            UpstreamError::Fatal(format!("Failed to parse embeddings response: {e}"))
        })?;

        // Upstream response order is not contractual, the index field is.
        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
