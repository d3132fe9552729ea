//! Vector index over complaint documents
//!
//! Documents and their embeddings live in parallel vectors behind a
//! `tokio::sync::RwLock`, so searches proceed concurrently while writes
//! are exclusive. Persistence is a JSON snapshot plus a manifest sidecar
//! that records what produced the index.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::embeddings::Embedder;
use crate::errors::CivicRagError;
use crate::errors::Result;
use crate::models::Document;

const INDEX_FILE: &str = "index.json";
const MANIFEST_FILE: &str = "manifest.json";

/// A document paired with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Sidecar metadata written next to the index snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub document_count: usize,
    pub embedding_dimension: usize,
    pub model_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
}

/// Compute cosine similarity between two vectors
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Cosine similarity shifted into [0, 1]
pub fn normalized_similarity(a: &[f32], b: &[f32]) -> f32 {
    ((cosine_similarity(a, b) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Vector index with embedding-backed search
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index backed by the given embedder
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Create an index from documents paired with precomputed vectors.
    ///
    /// Queries are still embedded with `embedder`, so the supplied vectors
    /// must match its dimension.
    ///
    /// # Errors
    /// - `InvalidInput` when the two slices are empty or of different lengths
    /// - `EmbeddingDimensionMismatch` when a vector has the wrong length
    pub fn from_precomputed(
        embedder: Arc<dyn Embedder>,
        documents: Vec<Document>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if documents.is_empty() || documents.len() != vectors.len() {
            return Err(CivicRagError::InvalidInput(format!(
                "Precomputed index needs matching documents and vectors, got {} and {}",
                documents.len(),
                vectors.len()
            )));
        }

        let expected = embedder.dimension();
        for vector in &vectors {
            if vector.len() != expected {
                return Err(CivicRagError::EmbeddingDimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        Ok(Self {
            embedder,
            state: RwLock::new(IndexState { documents, vectors }),
        })
    }

    /// Replace the index contents with embeddings for `documents`
    ///
    /// # Errors
    /// - `InvalidInput` when `documents` is empty
    /// - `EmbeddingDimensionMismatch` when a computed vector has the wrong length
    /// - Upstream embedding failures
    pub async fn build(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Err(CivicRagError::InvalidInput(
                "Cannot build an index from zero documents".to_string(),
            ));
        }

        let vectors = self.embed_documents(&documents).await?;
        let count = documents.len();

        let mut state = self.state.write().await;
        state.documents = documents;
        state.vectors = vectors;
        info!("Built vector index with {} documents", count);
        Ok(count)
    }

    /// Append `documents` to the index
    ///
    /// # Errors
    /// - `InvalidInput` when `documents` is empty
    /// - `EmbeddingDimensionMismatch` when a computed vector has the wrong length
    /// - Upstream embedding failures
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Err(CivicRagError::InvalidInput(
                "Cannot add an empty document batch".to_string(),
            ));
        }

        let vectors = self.embed_documents(&documents).await?;
        let added = documents.len();

        let mut state = self.state.write().await;
        state.documents.extend(documents);
        state.vectors.extend(vectors);
        debug!("Added {} documents, index now holds {}", added, state.documents.len());
        Ok(added)
    }

    async fn embed_documents(&self, documents: &[Document]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_many(&texts).await?;

        let expected = self.embedder.dimension();
        for vector in &vectors {
            if vector.len() != expected {
                return Err(CivicRagError::EmbeddingDimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(vectors)
    }

    /// Embed `query` and search the index
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<ScoredDocument>> {
        let vector = self.embedder.embed_one(query).await?;
        self.search_by_vector(&vector, k, threshold, filters).await
    }

    /// Search the index with a caller-supplied vector
    ///
    /// Scores are cosine similarity shifted into [0, 1]. Results below
    /// `threshold` are dropped, the rest are returned best-first, at most
    /// `k` of them. Filters match on metadata equality; a document missing
    /// a filtered key does not match. An empty index yields no results.
    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<ScoredDocument>> {
        let state = self.state.read().await;

        let mut scored: Vec<ScoredDocument> = state
            .documents
            .iter()
            .zip(state.vectors.iter())
            .filter(|(doc, _)| matches_filters(doc, filters))
            .map(|(doc, doc_vector)| ScoredDocument {
                document: doc.clone(),
                score: normalized_similarity(doc_vector, vector),
            })
            .filter(|s| s.score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Snapshot of every indexed document, for keyword scans
    pub async fn all_documents(&self) -> Vec<Document> {
        self.state.read().await.documents.clone()
    }

    /// Number of indexed documents
    pub async fn len(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Whether the index holds no documents
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.documents.is_empty()
    }

    /// Manifest describing the current in-memory index
    pub async fn manifest(&self) -> IndexManifest {
        let state = self.state.read().await;
        IndexManifest {
            document_count: state.documents.len(),
            embedding_dimension: self.embedder.dimension(),
            model_name: self.embedder.model().to_string(),
        }
    }

    /// Persist the index and its manifest under `dir`
    pub async fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let state = self.state.read().await;
        let manifest = IndexManifest {
            document_count: state.documents.len(),
            embedding_dimension: self.embedder.dimension(),
            model_name: self.embedder.model().to_string(),
        };

        let snapshot = serde_json::to_string(&*state)?;
        std::fs::write(dir.join(INDEX_FILE), snapshot)?;
        let sidecar = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(dir.join(MANIFEST_FILE), sidecar)?;

        info!(
            "Saved vector index ({} documents) to {}",
            manifest.document_count,
            dir.display()
        );
        Ok(())
    }

    /// Load a persisted index from `dir`
    ///
    /// # Errors
    /// - `VersionMismatch` when the manifest's dimension disagrees with the
    ///   embedder, or the snapshot does not match its manifest
    /// - `Io` when the directory has no persisted index
    pub async fn load<P: AsRef<Path>>(dir: P, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dir = dir.as_ref();

        let manifest_raw = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: IndexManifest = serde_json::from_str(&manifest_raw)?;

        if manifest.embedding_dimension != embedder.dimension() {
            return Err(CivicRagError::VersionMismatch(format!(
                "index was built with dimension {}, embedder produces {}",
                manifest.embedding_dimension,
                embedder.dimension()
            )));
        }
        if manifest.model_name != embedder.model() {
            warn!(
                "Index was built with model {}, embedder uses {}",
                manifest.model_name,
                embedder.model()
            );
        }

        let snapshot_raw = std::fs::read_to_string(dir.join(INDEX_FILE))?;
        let state: IndexState = serde_json::from_str(&snapshot_raw)?;

        if state.documents.len() != manifest.document_count
            || state.documents.len() != state.vectors.len()
        {
            return Err(CivicRagError::VersionMismatch(format!(
                "index snapshot holds {} documents but manifest records {}",
                state.documents.len(),
                manifest.document_count
            )));
        }

        info!(
            "Loaded vector index ({} documents) from {}",
            manifest.document_count,
            dir.display()
        );
        Ok(Self {
            embedder,
            state: RwLock::new(state),
        })
    }

    /// Remove the persisted index under `dir` and clear the in-memory
    /// contents. Returns whether any persisted files existed.
    pub async fn delete<P: AsRef<Path>>(&self, dir: P) -> Result<bool> {
        let dir = dir.as_ref();
        if !dir.join(MANIFEST_FILE).exists() && !dir.join(INDEX_FILE).exists() {
            return Ok(false);
        }
        for file in [INDEX_FILE, MANIFEST_FILE] {
            let path = dir.join(file);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }

        let mut state = self.state.write().await;
        state.documents.clear();
        state.vectors.clear();

        info!("Deleted vector index at {}", dir.display());
        Ok(true)
    }
}

fn matches_filters(
    document: &Document,
    filters: Option<&HashMap<String, serde_json::Value>>,
) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters
        .iter()
        .all(|(key, expected)| document.metadata.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.3, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_normalized_similarity_bounds() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((normalized_similarity(&a, &b) - 0.0).abs() < 1e-6);
        assert!((normalized_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0];
        assert!((normalized_similarity(&a, &c) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_filters_missing_key_is_non_match() {
        let doc = Document::new("noise complaint", HashMap::new());
        let mut filters = HashMap::new();
        filters.insert("borough".to_string(), serde_json::json!("BROOKLYN"));
        assert!(!matches_filters(&doc, Some(&filters)));
        assert!(matches_filters(&doc, None));
    }

    #[test]
    fn test_filters_all_must_match() {
        let mut metadata = HashMap::new();
        metadata.insert("borough".to_string(), serde_json::json!("QUEENS"));
        metadata.insert("status".to_string(), serde_json::json!("OPEN"));
        let doc = Document::new("pothole", metadata);

        let mut filters = HashMap::new();
        filters.insert("borough".to_string(), serde_json::json!("QUEENS"));
        assert!(matches_filters(&doc, Some(&filters)));

        filters.insert("status".to_string(), serde_json::json!("CLOSED"));
        assert!(!matches_filters(&doc, Some(&filters)));
    }
}
