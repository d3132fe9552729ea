//! Embedding generation module
//!
//! Wraps an OpenAI-compatible embeddings endpoint behind a small capability
//! trait so the retrieval stack never talks HTTP directly.
//!
//! # Examples
//!
//! ```rust,no_run
//! use civicrag::embeddings::{Embedder, EmbeddingService};
//! use civicrag::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let service = EmbeddingService::new(&config)?;
//!
//!     let embedding = service.embed_one("Hydrant leaking on the corner").await?;
//!     println!("Generated embedding with {} dimensions", embedding.len());
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod service;

pub use client::EmbeddingClient;
pub use service::BatchOutcome;
pub use service::EmbeddingService;

use async_trait::async_trait;

use crate::errors::Result;

/// Default embedding dimension for OpenAI text-embedding-3-small
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Texts per upstream embeddings request
pub const EMBED_BATCH_SIZE: usize = 50;

/// Bound on concurrent upstream embedding requests
pub const MAX_UPSTREAM_CONCURRENCY: usize = 3;

/// Text-embedding capability consumed by the index and the retriever
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, output order matching input order
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector length this embedder produces
    fn dimension(&self) -> usize;

    /// Model identifier, recorded in the index sidecar
    fn model(&self) -> &str;
}

/// Configuration for embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl EmbeddingConfig {
    pub fn from_app_config(config: &crate::config::AppConfig) -> Self {
        Self {
            model: config.embedding_model().to_string(),
            dimension: config.embedding_dimension(),
            batch_size: config.embedding_batch_size(),
            max_concurrency: config.embedding_max_concurrency(),
        }
    }
}

/// Validate that a text is embeddable
pub fn validate_text_for_embedding(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(crate::CivicRagError::InvalidInput(
            "Cannot embed empty or whitespace-only text".to_string(),
        ));
    }
    Ok(())
}

/// Normalize a text before sending it upstream
///
/// Newlines are known to skew embedding quality on OpenAI-family models,
/// so they are flattened to spaces along with other whitespace runs.
pub fn preprocess_text_for_embedding(text: &str) -> Result<String> {
    validate_text_for_embedding(text)?;
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(flattened)
}
