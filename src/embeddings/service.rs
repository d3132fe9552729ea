//! Embedding generation service with batch partitioning and cancellation

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::client::EmbeddingClient;
use super::preprocess_text_for_embedding;
use super::Embedder;
use super::EmbeddingConfig;
use crate::errors::Result;

/// Result of a cancellable batch run
#[derive(Debug)]
pub struct BatchOutcome {
    /// Embeddings for the processed prefix of the input, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// Number of trailing inputs never sent upstream
    pub unprocessed: usize,
}

/// Service for generating embeddings with batch processing
pub struct EmbeddingService {
    client: Arc<EmbeddingClient>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    /// Create a new embedding service
    pub fn new(config: &crate::config::AppConfig) -> Result<Self> {
        let embedding_config = EmbeddingConfig::from_app_config(config);
        let client = EmbeddingClient::new(config)?;

        Ok(Self {
            client: Arc::new(client),
            config: embedding_config,
        })
    }

    /// Embed many texts, stopping between batches when `cancel` fires
    ///
    /// Texts are partitioned into batches of the configured size and issued
    /// with bounded concurrency. Output order matches input order. When the
    /// token fires, no further upstream calls are made and the outcome holds
    /// the embeddings computed so far plus the count of texts never sent.
    ///
    /// # Errors
    /// - `InvalidInput` if any text is empty or whitespace-only
    /// - Upstream failures that survive the retry policy
    pub async fn embed_many_cancellable(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        if texts.is_empty() {
            return Ok(BatchOutcome {
                embeddings: Vec::new(),
                unprocessed: 0,
            });
        }

        let mut processed = Vec::with_capacity(texts.len());
        for text in texts {
            processed.push(preprocess_text_for_embedding(text)?);
        }

        let batch_size = self.config.batch_size.max(1);
        let wave_width = self.config.max_concurrency.max(1);
        let batches: Vec<&[String]> = processed.chunks(batch_size).collect();
        debug!(
            "Embedding {} texts in {} batches (concurrency {})",
            texts.len(),
            batches.len(),
            wave_width
        );

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for wave in batches.chunks(wave_width) {
            if cancel.is_cancelled() {
                let unprocessed = texts.len() - embeddings.len();
                warn!(
                    "Embedding run cancelled with {} of {} texts unprocessed",
                    unprocessed,
                    texts.len()
                );
                return Ok(BatchOutcome {
                    embeddings,
                    unprocessed,
                });
            }

            let calls = wave.iter().map(|batch| self.client.embed_batch(batch));
            for batch in try_join_all(calls).await? {
                embeddings.extend(batch);
            }
        }

        Ok(BatchOutcome {
            embeddings,
            unprocessed: 0,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let processed = preprocess_text_for_embedding(text)?;
        self.client.embed(&processed).await
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let outcome = self
            .embed_many_cancellable(texts, &CancellationToken::new())
            .await?;
        Ok(outcome.embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_service() -> EmbeddingService {
        let mut config = AppConfig::default();
        config.provider.api_key = "test-key".to_string();
        EmbeddingService::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty_outcome() {
        let service = test_service();
        let outcome = service
            .embed_many_cancellable(&[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.embeddings.is_empty());
        assert_eq!(outcome.unprocessed, 0);
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_upstream() {
        let service = test_service();
        let texts = vec!["real complaint".to_string(), "   ".to_string()];
        let result = service
            .embed_many_cancellable(&texts, &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(crate::CivicRagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_sends_nothing() {
        let service = test_service();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let texts: Vec<String> = (0..7).map(|i| format!("complaint {i}")).collect();
        let outcome = service
            .embed_many_cancellable(&texts, &cancel)
            .await
            .unwrap();
        assert!(outcome.embeddings.is_empty());
        assert_eq!(outcome.unprocessed, 7);
    }

    #[test]
    fn test_batch_partition_counts() {
        let texts: Vec<String> = (0..120).map(|i| format!("t{i}")).collect();
        let batches: Vec<&[String]> = texts.chunks(50).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[2].len(), 20);
    }

    #[tokio::test]
    #[ignore = "Requires API key"]
    async fn test_embed_many_real_endpoint() {
        let config = AppConfig::load().unwrap();
        let service = EmbeddingService::new(&config).unwrap();
        let texts = vec![
            "Pothole on Atlantic Avenue".to_string(),
            "Loud music from neighboring apartment".to_string(),
        ];
        let embeddings = service.embed_many(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), service.dimension());
    }
}
