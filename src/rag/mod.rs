//! RAG (Retrieval-Augmented Generation) module
//!
//! This module provides end-to-end RAG functionality for querying municipal
//! complaint data:
//! - Query normalization, expansion, and filter extraction
//! - Multi-strategy retrieval over the vector index
//! - Result reranking and diversity enforcement
//! - Context assembly from retrieved documents
//! - LLM-based answer generation
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use civicrag::config::AppConfig;
//! use civicrag::embeddings::{Embedder, EmbeddingService};
//! use civicrag::index::VectorIndex;
//! use civicrag::llm::{Completer, LlmClient};
//! use civicrag::rag::RagService;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::new(&config)?);
//!     let completer: Arc<dyn Completer> = Arc::new(LlmClient::new(&config)?);
//!     let index = Arc::new(VectorIndex::new(Arc::clone(&embedder)));
//!
//!     let service = RagService::new(index, embedder, completer, &config);
//!     let response = service
//!         .answer_question("What noise complaints are open in Brooklyn?", "")
//!         .await?;
//!     println!("Answer: {}", response.answer);
//!
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod loader;
pub mod pipeline;
pub mod query;
pub mod retriever;

pub use context::ContextAssembler;
pub use loader::DocumentLoader;
pub use pipeline::RagAnswer;
pub use pipeline::RagService;
pub use query::ProcessedQuery;
pub use query::QueryIntent;
pub use query::QueryProcessor;
pub use retriever::Retriever;
pub use retriever::RetrieverConfig;

use serde::Deserialize;
use serde::Serialize;

use crate::errors::CivicRagError;

/// Retrieval strategy options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Pure vector similarity search
    #[default]
    VectorOnly,
    /// Fused vector and keyword search
    Hybrid,
    /// Term-frequency keyword matching
    KeywordOnly,
    /// Vector search, widened with synonym expansion when results run short
    SemanticExpansion,
}

impl RetrievalStrategy {
    /// Parse a strategy name as it appears in config or operation input
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "vector_only" => Ok(Self::VectorOnly),
            "hybrid" => Ok(Self::Hybrid),
            "keyword_only" => Ok(Self::KeywordOnly),
            "semantic_expansion" => Ok(Self::SemanticExpansion),
            other => Err(CivicRagError::InvalidInput(format!(
                "Unknown retrieval strategy: {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VectorOnly => "vector_only",
            Self::Hybrid => "hybrid",
            Self::KeywordOnly => "keyword_only",
            Self::SemanticExpansion => "semantic_expansion",
        }
    }
}

/// How a document was matched during retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Vector similarity match
    Vector,
    /// Text keyword match
    Keyword,
    /// Combined vector and keyword match
    Hybrid,
}

impl RetrievalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in [
            RetrievalStrategy::VectorOnly,
            RetrievalStrategy::Hybrid,
            RetrievalStrategy::KeywordOnly,
            RetrievalStrategy::SemanticExpansion,
        ] {
            assert_eq!(
                RetrievalStrategy::from_name(strategy.as_str()).unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(RetrievalStrategy::from_name("bm25").is_err());
    }
}
