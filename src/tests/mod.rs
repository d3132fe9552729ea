//! Crate-internal test suites and shared fixtures.

pub mod index_tests;

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;

use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::models::Complaint;
use crate::models::Document;

/// Deterministic bag-of-words embedder.
///
/// Tokens hash into buckets, so identical texts embed identically and texts
/// sharing vocabulary land close together. That is enough to assert ranking
/// behavior without a live embeddings endpoint.
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = usize::try_from(u64::from_be_bytes(bytes) % self.dimension as u64)
                .unwrap_or_default();
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        "stub-embed"
    }
}

/// Document with complaint-shaped metadata.
pub fn document(content: &str, complaint_type: &str, borough: &str) -> Document {
    let metadata = HashMap::from([
        (
            "complaint_type".to_string(),
            serde_json::json!(complaint_type),
        ),
        ("borough".to_string(), serde_json::json!(borough)),
        ("status".to_string(), serde_json::json!("open")),
        ("document_type".to_string(), serde_json::json!("complaint")),
    ]);
    Document::new(content, metadata)
}

/// Minimal complaint record.
pub fn complaint(id: &str, complaint_type: &str, description: &str, borough: &str) -> Complaint {
    Complaint {
        id: Some(serde_json::Value::String(id.to_string())),
        complaint_type: complaint_type.to_string(),
        description: description.to_string(),
        borough: Some(borough.to_string()),
        address: None,
        agency: Some("NYPD".to_string()),
        status: Some("open".to_string()),
        priority: None,
        submitted_at: Some("2024-03-01T09:30:00".to_string()),
        resolved_at: None,
        analysis: None,
    }
}
