//! Context assembly from retrieved documents

use crate::models::Document;

/// Shown to the model when retrieval comes back empty
const NO_CONTEXT_MESSAGE: &str = "No relevant complaints found in the database.";

/// Assembler for creating bounded prompt context from ranked documents
pub struct ContextAssembler {
    max_context_length: usize,
}

impl ContextAssembler {
    /// Create a new context assembler
    #[must_use]
    pub const fn new(max_context_length: usize) -> Self {
        Self { max_context_length }
    }

    /// Render documents in ranked order, stopping at the length budget
    ///
    /// Each entry carries the document's key metadata inline so the model
    /// can cite type, borough, and status without parsing the body.
    #[must_use]
    pub fn assemble(&self, documents: &[Document]) -> String {
        if documents.is_empty() {
            return NO_CONTEXT_MESSAGE.to_string();
        }

        let mut context = String::new();
        let mut total_length = 0;

        for (idx, document) in documents.iter().enumerate() {
            let entry = self.format_entry(idx + 1, document);

            if total_length + entry.len() > self.max_context_length {
                break;
            }

            context.push_str(&entry);
            total_length += entry.len();
        }

        if context.is_empty() {
            return NO_CONTEXT_MESSAGE.to_string();
        }
        context
    }

    /// Format a single document entry with inline metadata
    fn format_entry(&self, position: usize, document: &Document) -> String {
        let mut header_parts = Vec::new();

        for key in ["complaint_type", "borough", "status"] {
            if let Some(value) = document.metadata_str(key) {
                if !value.is_empty() {
                    header_parts.push(format!("{key}: {value}"));
                }
            }
        }
        if let Some(score) = document.metadata_f64("retrieval_score") {
            header_parts.push(format!("score: {score:.3}"));
        }

        if header_parts.is_empty() {
            format!("\n[Complaint {}]\n{}\n", position, document.content)
        } else {
            format!(
                "\n[Complaint {}] ({})\n{}\n",
                position,
                header_parts.join(", "),
                document.content
            )
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(4000)
    }
}
