//! Complaint-to-document conversion and chunking

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::models::{Complaint, Document, RiskLevel};

/// Converts complaint records into retrievable documents
///
/// Content is rendered as labeled lines so the downstream model can read it
/// without a schema, and metadata carries the filterable fields.
pub struct DocumentLoader {
    chunk_size: usize,
    chunk_overlap: usize,
    risk: crate::config::RiskConfig,
}

impl DocumentLoader {
    /// Create a loader with explicit chunking bounds
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize, risk: crate::config::RiskConfig) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            risk,
        }
    }

    /// Create a loader from application configuration
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
            config.risk.clone(),
        )
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub const fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Convert a single complaint into a document
    #[must_use]
    pub fn complaint_to_document(&self, complaint: &Complaint) -> Document {
        let content = format_complaint_content(complaint);
        let metadata = self.complaint_metadata(complaint);

        debug!(
            complaint_id = %complaint.id_string().unwrap_or_default(),
            content_length = content.len(),
            "Complaint converted to document"
        );

        Document::new(content, metadata)
    }

    /// Convert a batch of complaints into documents
    #[must_use]
    pub fn complaints_to_documents(&self, complaints: &[Complaint]) -> Vec<Document> {
        if complaints.is_empty() {
            return Vec::new();
        }

        let documents: Vec<Document> = complaints
            .iter()
            .map(|complaint| self.complaint_to_document(complaint))
            .collect();

        info!(
            complaint_count = complaints.len(),
            document_count = documents.len(),
            "Complaints loaded as documents"
        );

        documents
    }

    /// Convert complaints and split any oversized documents into chunks
    ///
    /// Documents at or under `chunk_size` characters pass through whole with
    /// `is_chunked: false`. Larger ones are split on word boundaries and each
    /// piece records its position in the original.
    #[must_use]
    pub fn load_and_chunk(&self, complaints: &[Complaint]) -> Vec<Document> {
        let documents = self.complaints_to_documents(complaints);
        if documents.is_empty() {
            return documents;
        }

        let mut chunked = Vec::with_capacity(documents.len());
        for document in documents {
            if document.content.chars().count() > self.chunk_size {
                let pieces = split_text(&document.content, self.chunk_size, self.chunk_overlap);
                let total = pieces.len();
                debug!(
                    original_length = document.content.len(),
                    chunk_count = total,
                    "Document chunked"
                );
                for (index, piece) in pieces.into_iter().enumerate() {
                    let mut metadata = document.metadata.clone();
                    metadata.insert("chunk_index".to_string(), json!(index));
                    metadata.insert("total_chunks".to_string(), json!(total));
                    metadata.insert("is_chunked".to_string(), json!(true));
                    chunked.push(Document::new(piece, metadata));
                }
            } else {
                let mut document = document;
                document
                    .metadata
                    .insert("is_chunked".to_string(), json!(false));
                chunked.push(document);
            }
        }

        info!(output_documents = chunked.len(), "Document chunking completed");
        chunked
    }

    fn complaint_metadata(&self, complaint: &Complaint) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();

        metadata.insert(
            "complaint_id".to_string(),
            json!(complaint.id_string().unwrap_or_default()),
        );
        metadata.insert("complaint_type".to_string(), json!(complaint.complaint_type));
        metadata.insert(
            "borough".to_string(),
            json!(complaint.borough.as_deref().unwrap_or_default()),
        );
        metadata.insert(
            "agency".to_string(),
            json!(complaint.agency.as_deref().unwrap_or_default()),
        );
        metadata.insert(
            "status".to_string(),
            json!(complaint.status.as_deref().unwrap_or_default()),
        );
        metadata.insert(
            "priority".to_string(),
            json!(complaint.priority.as_deref().unwrap_or_default()),
        );
        metadata.insert("document_type".to_string(), json!("complaint"));
        metadata.insert("source".to_string(), json!("nyc_311"));

        if let Some(analysis) = &complaint.analysis {
            metadata.insert("has_analysis".to_string(), json!(true));
            metadata.insert("risk_score".to_string(), json!(analysis.risk_score));
            metadata.insert("analysis_category".to_string(), json!(analysis.category));
            metadata.insert(
                "risk_level".to_string(),
                json!(RiskLevel::from_score(analysis.risk_score, &self.risk).as_str()),
            );
        } else {
            metadata.insert("has_analysis".to_string(), json!(false));
        }

        metadata
    }
}

/// Render a complaint as labeled lines of text
fn format_complaint_content(complaint: &Complaint) -> String {
    let mut parts = vec![
        format!("COMPLAINT TYPE: {}", complaint.complaint_type),
        format!("DESCRIPTION: {}", complaint.description),
        format!("LOCATION: {}", complaint.location()),
        format!(
            "RESPONSIBLE AGENCY: {}",
            complaint.agency.as_deref().unwrap_or("Unknown Agency")
        ),
        format!(
            "STATUS: {}",
            complaint.status.as_deref().unwrap_or("Unknown Status")
        ),
        format!(
            "SUBMITTED: {}",
            complaint
                .submitted_at
                .as_deref()
                .unwrap_or("Unknown submission time")
        ),
    ];

    if let Some(analysis) = &complaint.analysis {
        parts.push(format!("RISK SCORE: {}", analysis.risk_score));
        if !analysis.category.is_empty() {
            parts.push(format!("CATEGORY: {}", analysis.category));
        }
        if !analysis.summary.is_empty() {
            parts.push(format!("ANALYSIS: {}", analysis.summary));
        }
    }

    if let Some(priority) = &complaint.priority {
        parts.push(format!("PRIORITY: {priority}"));
    }

    if let Some(resolved_at) = &complaint.resolved_at {
        parts.push(format!("RESOLVED: {resolved_at}"));
    }

    parts.join("\n")
}

/// Split text into word-boundary chunks of at most `chunk_size` characters,
/// carrying up to `chunk_overlap` trailing characters into the next chunk
fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in words {
        let word_len = word.chars().count();
        let projected = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if !current.is_empty() && projected > chunk_size {
            chunks.push(current.join(" "));

            // Seed the next chunk with trailing words within the overlap budget
            let mut overlap: Vec<&str> = Vec::new();
            let mut overlap_len = 0usize;
            for prev in current.iter().rev() {
                let prev_len = prev.chars().count();
                let with_prev = if overlap.is_empty() {
                    prev_len
                } else {
                    overlap_len + 1 + prev_len
                };
                if with_prev > chunk_overlap {
                    break;
                }
                overlap.push(prev);
                overlap_len = with_prev;
            }
            overlap.reverse();
            current = overlap;
            current_len = overlap_len;
        }

        if current.is_empty() {
            current_len = word_len;
        } else {
            current_len += 1 + word_len;
        }
        current.push(word);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
