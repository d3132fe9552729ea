//! Complete RAG pipeline: Retrieve -> Assemble -> Generate

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::CivicRagError;
use crate::errors::Result;
use crate::index::VectorIndex;
use crate::llm::Completer;
use crate::llm::ComplaintPrompts;
use crate::rag::ContextAssembler;
use crate::rag::Retriever;
use crate::rag::RetrieverConfig;

/// Placeholder history for the first turn of a conversation
pub const NO_HISTORY: &str = "No previous conversation.";

/// Answer produced by one RAG query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub retrieval_method: String,
    pub model_used: String,
    pub question: String,
}

/// Complete RAG service
pub struct RagService {
    retriever: Retriever,
    context_assembler: ContextAssembler,
    completer: Arc<dyn Completer>,
}

impl RagService {
    /// Create a RAG service from shared components
    #[must_use]
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        config: &AppConfig,
    ) -> Self {
        let retriever = Retriever::new(index, embedder, RetrieverConfig::from_app_config(config));

        Self {
            retriever,
            context_assembler: ContextAssembler::default(),
            completer,
        }
    }

    /// Answer a question against the complaint corpus
    ///
    /// Retrieval failures degrade to an empty context; the model then says
    /// it has no matching data. Completion failures are returned to the
    /// caller.
    ///
    /// # Errors
    /// - Empty question
    /// - Completion failures that survive the retry policy
    pub async fn answer_question(
        &self,
        question: &str,
        conversation_history: &str,
    ) -> Result<RagAnswer> {
        if question.trim().is_empty() {
            return Err(CivicRagError::InvalidInput(
                "Question cannot be empty".to_string(),
            ));
        }

        info!("Processing RAG query: {}", question);

        debug!("Step 1: Retrieving documents");
        let documents = self.retriever.retrieve(question, None, None).await;
        debug!("Retrieved {} documents", documents.len());

        debug!("Step 2: Assembling context");
        let context = self.context_assembler.assemble(&documents);

        debug!("Step 3: Generating answer");
        let history = if conversation_history.trim().is_empty() {
            NO_HISTORY
        } else {
            conversation_history
        };
        let prompt = ComplaintPrompts::question_answering().render(&HashMap::from([
            ("question".to_string(), question.to_string()),
            ("context_complaints".to_string(), context),
            ("conversation_history".to_string(), history.to_string()),
        ]));

        let answer = self
            .completer
            .complete(ComplaintPrompts::data_assistant(), &prompt)
            .await?;

        info!("RAG query completed successfully");

        Ok(RagAnswer {
            answer: answer.trim().to_string(),
            retrieval_method: self.retriever.config().strategy.as_str().to_string(),
            model_used: self.completer.model().to_string(),
            question: question.to_string(),
        })
    }

    /// Get retriever reference
    #[must_use]
    pub const fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Get context assembler reference
    #[must_use]
    pub const fn context_assembler(&self) -> &ContextAssembler {
        &self.context_assembler
    }
}
