//! Retrieval engine with multi-strategy search
//!
//! Each call runs the same pipeline: process the query, merge implicit and
//! caller filters, execute the selected strategy, then rerank, diversify,
//! and truncate to k. Failures inside the pipeline degrade to an empty
//! result instead of propagating, so generation can still answer.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::CivicRagError;
use crate::errors::Result;
use crate::index::VectorIndex;
use crate::models::Document;
use crate::rag::query::ProcessedQuery;
use crate::rag::query::QueryProcessor;
use crate::rag::RetrievalMethod;
use crate::rag::RetrievalStrategy;

/// Risk score above which reranking grants its bonus
const HIGH_RISK_BONUS_THRESHOLD: f64 = 0.7;

/// Retrieval tuning, sourced from the `[retrieval]` config section
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub strategy: RetrievalStrategy,
    pub k: usize,
    pub score_threshold: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub query_expansion: bool,
    pub max_query_terms: usize,
    pub rerank: bool,
    pub diversity_threshold: f32,
}

impl RetrieverConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let strategy = RetrievalStrategy::from_name(&config.retrieval.strategy)
            .unwrap_or_else(|_| {
                warn!(
                    "Unknown retrieval strategy '{}' in config, using vector_only",
                    config.retrieval.strategy
                );
                RetrievalStrategy::VectorOnly
            });

        Self {
            strategy,
            k: config.retrieval.top_k,
            score_threshold: config.retrieval.score_threshold,
            vector_weight: config.retrieval.vector_weight,
            keyword_weight: config.retrieval.keyword_weight,
            query_expansion: config.retrieval.query_expansion,
            max_query_terms: config.retrieval.max_query_terms,
            rerank: config.retrieval.rerank,
            diversity_threshold: config.retrieval.diversity_threshold,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::VectorOnly,
            k: 5,
            score_threshold: 0.0,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            query_expansion: false,
            max_query_terms: 10,
            rerank: true,
            diversity_threshold: 0.1,
        }
    }
}

/// Retriever over the vector index with keyword and hybrid strategies
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    query_processor: QueryProcessor,
    config: RetrieverConfig,
}

impl Retriever {
    /// Create a new retriever
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrieverConfig,
    ) -> Self {
        let query_processor = QueryProcessor::new(config.max_query_terms);
        Self {
            index,
            embedder,
            query_processor,
            config,
        }
    }

    /// Retrieval configuration in effect
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Query processor used for preprocessing
    pub fn query_processor(&self) -> &QueryProcessor {
        &self.query_processor
    }

    /// Main retrieval entry point
    ///
    /// Empty queries return an empty list with a warning. Any failure inside
    /// the pipeline is logged and degraded to an empty list; retrieval never
    /// fails the surrounding flow.
    pub async fn retrieve(
        &self,
        query: &str,
        filters: Option<&HashMap<String, serde_json::Value>>,
        strategy_override: Option<RetrievalStrategy>,
    ) -> Vec<Document> {
        if query.trim().is_empty() {
            warn!("Empty query provided");
            return Vec::new();
        }

        let strategy = strategy_override.unwrap_or(self.config.strategy);
        debug!(
            "Starting document retrieval: strategy={}, has_filters={}",
            strategy.as_str(),
            filters.is_some()
        );

        match self.retrieve_inner(query, filters, strategy).await {
            Ok(documents) => {
                debug!(
                    "Document retrieval completed: strategy={}, documents_found={}",
                    strategy.as_str(),
                    documents.len()
                );
                documents
            }
            Err(e) => {
                let degraded =
                    CivicRagError::RetrievalDegraded(format!("{}: {e}", strategy.as_str()));
                warn!("{degraded}; returning empty result");
                Vec::new()
            }
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        filters: Option<&HashMap<String, serde_json::Value>>,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<Document>> {
        let processed = self.query_processor.process(query);
        let combined_filters = self.combine_filters(&processed, filters);

        let mut documents = match strategy {
            RetrievalStrategy::VectorOnly => {
                self.vector_retrieval(&processed, &combined_filters).await?
            }
            RetrievalStrategy::KeywordOnly => self.keyword_retrieval(&processed).await?,
            RetrievalStrategy::Hybrid => {
                self.hybrid_retrieval(&processed, &combined_filters).await?
            }
            RetrievalStrategy::SemanticExpansion => {
                self.expansion_retrieval(&processed, &combined_filters)
                    .await?
            }
        };

        if self.config.rerank {
            documents = self.rerank(&processed.normalized, documents);
        }
        documents = self.ensure_diversity(documents);
        documents.truncate(self.config.k);
        Ok(documents)
    }

    /// Merge query-derived filters with caller-supplied ones
    ///
    /// Caller values win on key collision. The time_period key never reaches
    /// the index filter: documents carry no such metadata, so it would match
    /// nothing.
    fn combine_filters(
        &self,
        processed: &ProcessedQuery,
        caller: Option<&HashMap<String, serde_json::Value>>,
    ) -> HashMap<String, serde_json::Value> {
        let mut combined = self.query_processor.extract_filters(&processed.normalized);
        combined.remove("time_period");

        if let Some(caller) = caller {
            for (key, value) in caller {
                combined.insert(key.clone(), value.clone());
            }
        }
        combined
    }

    /// Pure vector similarity retrieval over the (possibly expanded) query
    async fn vector_retrieval(
        &self,
        processed: &ProcessedQuery,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<Document>> {
        let query_text = if self.config.query_expansion {
            &processed.expanded
        } else {
            &processed.normalized
        };
        self.vector_search_with_text(query_text, filters).await
    }

    async fn vector_search_with_text(
        &self,
        text: &str,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<Document>> {
        let vector = self.embedder.embed_one(text).await?;
        // Over-fetch to leave room for downstream filtering.
        let results = self
            .index
            .search_by_vector(
                &vector,
                self.config.k * 2,
                self.config.score_threshold,
                Some(filters),
            )
            .await?;

        let documents: Vec<Document> = results
            .into_iter()
            .map(|scored| {
                let mut doc = scored.document;
                doc.metadata
                    .insert("retrieval_score".to_string(), json!(scored.score));
                doc.metadata.insert(
                    "retrieval_method".to_string(),
                    json!(RetrievalMethod::Vector.as_str()),
                );
                doc
            })
            .collect();

        debug!("Vector retrieval completed: results_found={}", documents.len());
        Ok(documents)
    }

    /// Term-frequency keyword retrieval over every indexed document
    ///
    /// Metadata filters do not apply on this path; scoring is lexical only.
    async fn keyword_retrieval(&self, processed: &ProcessedQuery) -> Result<Vec<Document>> {
        if processed.terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.index.all_documents().await;
        if documents.is_empty() {
            warn!("No documents available for keyword retrieval");
            return Ok(Vec::new());
        }

        let mut scored: Vec<(Document, f32)> = documents
            .into_iter()
            .filter_map(|mut doc| {
                let score = keyword_score(&doc.content.to_lowercase(), &processed.terms);
                if score > 0.0 {
                    doc.metadata
                        .insert("retrieval_score".to_string(), json!(score));
                    doc.metadata.insert(
                        "retrieval_method".to_string(),
                        json!(RetrievalMethod::Keyword.as_str()),
                    );
                    Some((doc, score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let documents: Vec<Document> = scored
            .into_iter()
            .take(self.config.k * 2)
            .map(|(doc, _)| doc)
            .collect();

        debug!(
            "Keyword retrieval completed: query_terms={}, results_found={}",
            processed.terms.len(),
            documents.len()
        );
        Ok(documents)
    }

    /// Hybrid vector + keyword retrieval with weighted score fusion
    async fn hybrid_retrieval(
        &self,
        processed: &ProcessedQuery,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<Document>> {
        let vector_docs = self.vector_retrieval(processed, filters).await?;
        let keyword_docs = self.keyword_retrieval(processed).await?;

        debug!(
            "Hybrid retrieval: vector_results={}, keyword_results={}",
            vector_docs.len(),
            keyword_docs.len()
        );
        Ok(self.fuse_results(vector_docs, keyword_docs))
    }

    /// Fuse two result sets by content identity
    ///
    /// A document missing from one branch contributes 0 for that branch.
    /// Both component scores ride along as auxiliary metadata.
    fn fuse_results(
        &self,
        vector_docs: Vec<Document>,
        keyword_docs: Vec<Document>,
    ) -> Vec<Document> {
        struct Fused {
            document: Document,
            vector_score: f32,
            keyword_score: f32,
        }

        let mut fused: Vec<Fused> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for doc in vector_docs {
            let vector_score = doc.metadata_f64("retrieval_score").unwrap_or(0.0) as f32;
            by_key.insert(doc.content_key(), fused.len());
            fused.push(Fused {
                document: doc,
                vector_score,
                keyword_score: 0.0,
            });
        }

        for doc in keyword_docs {
            let keyword_score = doc.metadata_f64("retrieval_score").unwrap_or(0.0) as f32;
            match by_key.get(&doc.content_key()) {
                Some(&idx) => fused[idx].keyword_score = keyword_score,
                None => {
                    by_key.insert(doc.content_key(), fused.len());
                    fused.push(Fused {
                        document: doc,
                        vector_score: 0.0,
                        keyword_score,
                    });
                }
            }
        }

        let mut combined: Vec<(Document, f32)> = fused
            .into_iter()
            .map(|entry| {
                let combined_score = entry.vector_score * self.config.vector_weight
                    + entry.keyword_score * self.config.keyword_weight;

                let mut doc = entry.document;
                doc.metadata
                    .insert("retrieval_score".to_string(), json!(combined_score));
                doc.metadata.insert(
                    "retrieval_method".to_string(),
                    json!(RetrievalMethod::Hybrid.as_str()),
                );
                doc.metadata
                    .insert("vector_score".to_string(), json!(entry.vector_score));
                doc.metadata
                    .insert("keyword_score".to_string(), json!(entry.keyword_score));
                (doc, combined_score)
            })
            .collect();

        combined.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        combined.into_iter().map(|(doc, _)| doc).collect()
    }

    /// Vector retrieval that widens with synonym expansion when short on results
    async fn expansion_retrieval(
        &self,
        processed: &ProcessedQuery,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<Document>> {
        let original_results = self.vector_retrieval(processed, filters).await?;

        if original_results.len() >= self.config.k {
            return Ok(original_results);
        }

        debug!(
            "Expanding query after {} original results",
            original_results.len()
        );
        let expanded_results = self
            .vector_search_with_text(&processed.expanded, filters)
            .await?;

        let mut seen: HashSet<String> =
            original_results.iter().map(Document::content_key).collect();
        let mut combined = original_results;
        for doc in expanded_results {
            if seen.insert(doc.content_key()) {
                combined.push(doc);
            }
        }
        Ok(combined)
    }

    /// Rerank by retrieval score plus type-match and high-risk bonuses
    fn rerank(&self, normalized_query: &str, documents: Vec<Document>) -> Vec<Document> {
        if documents.is_empty() {
            return documents;
        }

        let query_tokens: Vec<&str> = normalized_query.split_whitespace().collect();

        let mut scored: Vec<(Document, f32)> = documents
            .into_iter()
            .map(|mut doc| {
                let base = doc.metadata_f64("retrieval_score").unwrap_or(0.0) as f32;

                let complaint_type = doc
                    .metadata_str("complaint_type")
                    .unwrap_or("")
                    .to_lowercase();
                let type_bonus = if query_tokens.iter().any(|t| complaint_type.contains(t)) {
                    0.1
                } else {
                    0.0
                };

                let risk_bonus = match doc.metadata_f64("risk_score") {
                    Some(risk) if risk > HIGH_RISK_BONUS_THRESHOLD => 0.05,
                    _ => 0.0,
                };

                let rerank_score = base + type_bonus + risk_bonus;
                doc.metadata
                    .insert("rerank_score".to_string(), json!(rerank_score));
                (doc, rerank_score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(doc, _)| doc).collect()
    }

    /// Greedy diversity filter; the top result is always kept
    fn ensure_diversity(&self, documents: Vec<Document>) -> Vec<Document> {
        if documents.len() <= 1 {
            return documents;
        }

        let mut iter = documents.into_iter();
        let mut diverse = Vec::with_capacity(self.config.k);
        if let Some(top) = iter.next() {
            diverse.push(top);
        }

        for candidate in iter {
            if diverse.len() >= self.config.k {
                break;
            }
            let redundant = diverse
                .iter()
                .any(|kept| documents_similar(kept, &candidate, self.config.diversity_threshold));
            if !redundant {
                diverse.push(candidate);
            }
        }

        diverse
    }
}

/// Sum of per-term normalized frequencies: count(term) / total tokens
///
/// No IDF weighting; plain term frequency is the scoring contract.
fn keyword_score(text_lower: &str, terms: &[String]) -> f32 {
    let tokens: Vec<&str> = text_lower.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let total = tokens.len() as f32;

    terms
        .iter()
        .map(|term| {
            let count = tokens.iter().filter(|t| *t == term).count() as f32;
            count / total
        })
        .sum()
}

/// Two documents are redundant when they share complaint type and borough
/// and their content overlap exceeds the Jaccard threshold
fn documents_similar(a: &Document, b: &Document, threshold: f32) -> bool {
    let type_a = a.metadata_str("complaint_type").unwrap_or("");
    let type_b = b.metadata_str("complaint_type").unwrap_or("");
    let borough_a = a.metadata_str("borough").unwrap_or("");
    let borough_b = b.metadata_str("borough").unwrap_or("");

    if type_a != type_b || borough_a != borough_b {
        return false;
    }

    let content_a = a.content.to_lowercase();
    let content_b = b.content.to_lowercase();
    let words_a: HashSet<&str> = content_a.split_whitespace().collect();
    let words_b: HashSet<&str> = content_b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return false;
    }

    let overlap = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    let jaccard = overlap as f32 / union as f32;

    jaccard > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str, pairs: &[(&str, serde_json::Value)]) -> Document {
        let metadata = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Document::new(content, metadata)
    }

    #[test]
    fn test_keyword_score_is_exact_term_frequency() {
        let terms = vec!["noise".to_string()];
        let text = "noise complaint about noise on the block near noise source tonight";
        // 3 occurrences out of 11 tokens
        let score = keyword_score(text, &terms);
        assert!((score - 3.0 / 11.0).abs() < f32::EPSILON);

        let quarter = keyword_score("noise one two three noise five six eight", &terms);
        assert_eq!(quarter, 0.25);
    }

    #[test]
    fn test_keyword_score_sums_over_terms() {
        let terms = vec!["noise".to_string(), "music".to_string()];
        let score = keyword_score("noise music noise pad", &terms);
        assert!((score - (2.0 / 4.0 + 1.0 / 4.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keyword_score_empty_text() {
        assert_eq!(keyword_score("", &["noise".to_string()]), 0.0);
    }

    #[test]
    fn test_documents_similar_requires_matching_metadata() {
        let a = doc(
            "loud music every night",
            &[
                ("complaint_type", serde_json::json!("Noise")),
                ("borough", serde_json::json!("BROOKLYN")),
            ],
        );
        let b = doc(
            "loud music every single night",
            &[
                ("complaint_type", serde_json::json!("Noise")),
                ("borough", serde_json::json!("QUEENS")),
            ],
        );
        // Different borough: never redundant, whatever the overlap.
        assert!(!documents_similar(&a, &b, 0.1));

        let c = doc(
            "loud music every single night",
            &[
                ("complaint_type", serde_json::json!("Noise")),
                ("borough", serde_json::json!("BROOKLYN")),
            ],
        );
        assert!(documents_similar(&a, &c, 0.1));
    }

    #[test]
    fn test_documents_similar_low_overlap_accepted() {
        let a = doc(
            "water leak in the basement",
            &[
                ("complaint_type", serde_json::json!("Water")),
                ("borough", serde_json::json!("BRONX")),
            ],
        );
        let b = doc(
            "flooding reported near intersection pumps overwhelmed",
            &[
                ("complaint_type", serde_json::json!("Water")),
                ("borough", serde_json::json!("BRONX")),
            ],
        );
        assert!(!documents_similar(&a, &b, 0.1));
    }
}
