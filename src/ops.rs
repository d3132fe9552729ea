//! Operation surface behind the command line.
//!
//! Every operation takes a JSON payload and produces the standard
//! `{success, data, error}` envelope. Failures never escape as panics or
//! process aborts; they are logged and reported through the envelope so
//! callers can script against a single response shape.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::analysis::ComplaintAnalyzer;
use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingService;
use crate::errors::CivicRagError;
use crate::errors::Result;
use crate::index::VectorIndex;
use crate::llm::Completer;
use crate::llm::LlmClient;
use crate::models::Complaint;
use crate::rag::DocumentLoader;
use crate::rag::RagService;
use crate::rag::RetrievalStrategy;
use crate::rag::Retriever;
use crate::rag::RetrieverConfig;

/// Operations exposed by the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Operation {
    AnalyzeComplaint,
    AnswerQuestion,
    Chat,
    CreateEmbeddings,
    CreateVectorStore,
    SearchDocuments,
    HealthCheck,
    GetStats,
}

impl Operation {
    pub const ALL: [Self; 8] = [
        Self::AnalyzeComplaint,
        Self::AnswerQuestion,
        Self::Chat,
        Self::CreateEmbeddings,
        Self::CreateVectorStore,
        Self::SearchDocuments,
        Self::HealthCheck,
        Self::GetStats,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnalyzeComplaint => "analyze_complaint",
            Self::AnswerQuestion => "answer_question",
            Self::Chat => "chat",
            Self::CreateEmbeddings => "create_embeddings",
            Self::CreateVectorStore => "create_vector_store",
            Self::SearchDocuments => "search_documents",
            Self::HealthCheck => "health_check",
            Self::GetStats => "get_stats",
        }
    }
}

/// Standard operation response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeComplaintRequest {
    complaint_data: Option<Complaint>,
}

#[derive(Debug, Deserialize)]
struct AnswerQuestionRequest {
    question: Option<String>,
    #[serde(default)]
    complaint_embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    complaint_data: Option<Vec<Complaint>>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    complaint_embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    complaint_data: Option<Vec<Complaint>>,
}

#[derive(Debug, Deserialize)]
struct CreateEmbeddingsRequest {
    #[serde(default)]
    texts: Option<Vec<String>>,
    #[serde(default)]
    complaints: Option<Vec<Complaint>>,
}

#[derive(Debug, Deserialize)]
struct CreateVectorStoreRequest {
    #[serde(default)]
    complaints: Option<Vec<Complaint>>,
    #[serde(default)]
    store_path: Option<String>,
    #[serde(default = "default_chunk_documents")]
    chunk_documents: bool,
}

fn default_chunk_documents() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SearchDocumentsRequest {
    query: Option<String>,
    #[serde(default = "default_search_k")]
    k: usize,
    #[serde(default)]
    strategy: Option<String>,
}

fn default_search_k() -> usize {
    5
}

/// Owns the wired component graph and dispatches operations
pub struct Runner {
    config: AppConfig,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    index: Arc<VectorIndex>,
    loader: DocumentLoader,
    analyzer: ComplaintAnalyzer,
    rag: RagService,
    chat: ChatService,
}

impl Runner {
    /// Wire up the component graph from configuration
    ///
    /// A persisted index at the configured path is loaded when present;
    /// anything else starts empty rather than failing startup.
    ///
    /// # Errors
    /// - `ConfigError` when a provider client cannot be constructed
    pub async fn new(config: AppConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::new(&config)?);
        let completer: Arc<dyn Completer> = Arc::new(LlmClient::new(&config)?);

        let index = match VectorIndex::load(config.index_path(), Arc::clone(&embedder)).await {
            Ok(index) => {
                info!("Using persisted vector index at {}", config.index_path());
                Arc::new(index)
            }
            Err(CivicRagError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No persisted index at {}, starting empty",
                    config.index_path()
                );
                Arc::new(VectorIndex::new(Arc::clone(&embedder)))
            }
            Err(e) => {
                warn!("Failed to load persisted index: {e}; starting empty");
                Arc::new(VectorIndex::new(Arc::clone(&embedder)))
            }
        };

        Ok(Self::from_parts(config, embedder, completer, index))
    }

    /// Assemble a runner from preconstructed components
    #[must_use]
    pub fn from_parts(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        index: Arc<VectorIndex>,
    ) -> Self {
        let loader = DocumentLoader::from_config(&config);
        let analyzer = ComplaintAnalyzer::new(Arc::clone(&completer), config.risk.clone());
        let rag = RagService::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            Arc::clone(&completer),
            &config,
        );
        let chat = ChatService::new(Arc::clone(&completer));

        Self {
            config,
            embedder,
            completer,
            index,
            loader,
            analyzer,
            rag,
            chat,
        }
    }

    /// Execute one operation, capturing any failure in the envelope
    pub async fn run(&self, operation: Operation, data: Value) -> ApiResponse<Value> {
        info!("Executing operation: {}", operation.as_str());

        let result = match operation {
            Operation::AnalyzeComplaint => self.analyze_complaint(data).await,
            Operation::AnswerQuestion => self.answer_question(data).await,
            Operation::Chat => self.chat_turn(data).await,
            Operation::CreateEmbeddings => self.create_embeddings(data).await,
            Operation::CreateVectorStore => self.create_vector_store(data).await,
            Operation::SearchDocuments => self.search_documents(data).await,
            Operation::HealthCheck => self.health_check().await,
            Operation::GetStats => self.get_stats().await,
        };

        match result {
            Ok(value) => ApiResponse::success(value),
            Err(e) => {
                error!("Operation {} failed: {}", operation.as_str(), e);
                ApiResponse::error(e.to_string())
            }
        }
    }

    async fn analyze_complaint(&self, data: Value) -> Result<Value> {
        let request: AnalyzeComplaintRequest = serde_json::from_value(data)?;
        let complaint = request.complaint_data.ok_or_else(|| {
            CivicRagError::InvalidInput("complaint_data is required".to_string())
        })?;

        let analysis = self.analyzer.analyze(&complaint).await;

        Ok(json!({
            "analysis": analysis,
            "complaint_id": complaint.id_string().unwrap_or_else(|| "unknown".to_string()),
            "model_used": self.completer.model(),
        }))
    }

    async fn answer_question(&self, data: Value) -> Result<Value> {
        let request: AnswerQuestionRequest = serde_json::from_value(data)?;
        let question = request
            .question
            .ok_or_else(|| CivicRagError::InvalidInput("question is required".to_string()))?;

        let override_service = self
            .corpus_override(request.complaint_data, request.complaint_embeddings)
            .await?;
        let service = override_service.as_ref().unwrap_or(&self.rag);

        let answer = service.answer_question(&question, "").await?;
        Ok(serde_json::to_value(answer)?)
    }

    async fn chat_turn(&self, data: Value) -> Result<Value> {
        let request: ChatRequest = serde_json::from_value(data)?;
        let message = request
            .message
            .ok_or_else(|| CivicRagError::InvalidInput("message is required".to_string()))?;

        let override_service = self
            .corpus_override(request.complaint_data, request.complaint_embeddings)
            .await?;
        let service = override_service.as_ref().unwrap_or(&self.rag);

        let reply = self
            .chat
            .chat(service, &message, request.session_id.as_deref())
            .await?;
        Ok(serde_json::to_value(reply)?)
    }

    async fn create_embeddings(&self, data: Value) -> Result<Value> {
        let request: CreateEmbeddingsRequest = serde_json::from_value(data)?;

        let texts: Vec<String> = match (request.texts, request.complaints) {
            (Some(texts), _) if !texts.is_empty() => texts,
            (_, Some(complaints)) if !complaints.is_empty() => self
                .loader
                .complaints_to_documents(&complaints)
                .into_iter()
                .map(|document| document.content)
                .collect(),
            _ => {
                return Err(CivicRagError::InvalidInput(
                    "Either texts or complaints must be provided".to_string(),
                ))
            }
        };

        let embeddings = self.embedder.embed_many(&texts).await?;
        let dimension = embeddings.first().map_or(0, Vec::len);

        Ok(json!({
            "embeddings": embeddings,
            "count": embeddings.len(),
            "dimension": dimension,
            "model": self.embedder.model(),
        }))
    }

    async fn create_vector_store(&self, data: Value) -> Result<Value> {
        let request: CreateVectorStoreRequest = serde_json::from_value(data)?;
        let complaints = request
            .complaints
            .filter(|complaints| !complaints.is_empty())
            .ok_or_else(|| {
                CivicRagError::InvalidInput("complaints data is required".to_string())
            })?;

        let documents = if request.chunk_documents {
            self.loader.load_and_chunk(&complaints)
        } else {
            self.loader.complaints_to_documents(&complaints)
        };

        let created = self.index.build(documents).await?;

        let store_path = request
            .store_path
            .unwrap_or_else(|| self.config.index_path().to_string());
        self.index.save(&store_path).await?;

        let stats = self.index.manifest().await;
        Ok(json!({
            "created": created,
            "saved": true,
            "store_path": store_path,
            "stats": stats,
        }))
    }

    async fn search_documents(&self, data: Value) -> Result<Value> {
        let request: SearchDocumentsRequest = serde_json::from_value(data)?;
        let query = request
            .query
            .ok_or_else(|| CivicRagError::InvalidInput("query is required".to_string()))?;

        let mut retriever_config = RetrieverConfig::from_app_config(&self.config);
        retriever_config.k = request.k;
        if let Some(name) = request.strategy.as_deref() {
            retriever_config.strategy = RetrievalStrategy::from_name(name).unwrap_or_else(|_| {
                warn!("Unknown search strategy '{}', using vector_only", name);
                RetrievalStrategy::VectorOnly
            });
        }
        let strategy = retriever_config.strategy;

        let retriever = Retriever::new(
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
            retriever_config,
        );

        let mut documents = retriever.retrieve(&query, None, None).await;
        documents.truncate(request.k);

        let results: Vec<Value> = documents
            .iter()
            .map(|document| {
                json!({
                    "content": document.content,
                    "metadata": document.metadata,
                    "score": document.metadata_f64("retrieval_score").unwrap_or(0.0),
                })
            })
            .collect();

        Ok(json!({
            "results": results,
            "query": query,
            "count": results.len(),
            "strategy": strategy.as_str(),
        }))
    }

    async fn health_check(&self) -> Result<Value> {
        let mut healthy = true;

        let openai = match self.completer.probe().await {
            Ok(_) => json!("healthy"),
            Err(e) => {
                healthy = false;
                json!(format!("unhealthy: {e}"))
            }
        };

        let embeddings = match self.embedder.embed_one("test").await {
            Ok(_) => json!("healthy"),
            Err(e) => {
                healthy = false;
                json!(format!("unhealthy: {e}"))
            }
        };

        // An empty index is a normal state for a fresh install, not a fault.
        let vector_store = if self.index.is_empty().await {
            json!("not_initialized")
        } else {
            let manifest = self.index.manifest().await;
            json!(format!("healthy ({} documents)", manifest.document_count))
        };

        Ok(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "components": {
                "openai": openai,
                "embeddings": embeddings,
                "vector_store": vector_store,
            },
            "config": {
                "chat_model": self.config.chat_model(),
                "embedding_model": self.config.embedding_model(),
                "api_base": self.config.api_base(),
                "index_path": self.config.index_path(),
            },
        }))
    }

    async fn get_stats(&self) -> Result<Value> {
        let manifest = self.index.manifest().await;
        let vector_store = if manifest.document_count == 0 {
            json!("not_initialized")
        } else {
            serde_json::to_value(&manifest)?
        };

        let retrieval = self.rag.retriever().config();

        Ok(json!({
            "system": {
                "available_operations": Operation::ALL
                    .iter()
                    .map(|op| op.as_str())
                    .collect::<Vec<_>>(),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "components": {
                "document_loader": {
                    "chunk_size": self.loader.chunk_size(),
                    "chunk_overlap": self.loader.chunk_overlap(),
                },
                "vector_store": vector_store,
                "retriever": {
                    "strategy": retrieval.strategy.as_str(),
                    "top_k": retrieval.k,
                    "rerank": retrieval.rerank,
                    "score_threshold": retrieval.score_threshold,
                    "vector_weight": retrieval.vector_weight,
                    "keyword_weight": retrieval.keyword_weight,
                },
                "chat": {
                    "active_sessions": self.chat.sessions().session_count(),
                    "session_ids": self.chat.sessions().session_ids(),
                },
            },
        }))
    }

    /// Build a one-off RAG service over caller-supplied complaints.
    ///
    /// Callers may ship precomputed vectors alongside the complaints; when
    /// both are present the index reuses them instead of calling the
    /// embedding API.
    async fn corpus_override(
        &self,
        complaints: Option<Vec<Complaint>>,
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> Result<Option<RagService>> {
        let Some(complaints) = complaints else {
            return Ok(None);
        };
        if complaints.is_empty() {
            return Ok(None);
        }

        let documents = self.loader.complaints_to_documents(&complaints);
        let index = match embeddings {
            Some(vectors) if !vectors.is_empty() => {
                VectorIndex::from_precomputed(Arc::clone(&self.embedder), documents, vectors)?
            }
            _ => {
                let index = VectorIndex::new(Arc::clone(&self.embedder));
                index.build(documents).await?;
                index
            }
        };

        info!(
            "Answering over {} caller-supplied complaints",
            complaints.len()
        );
        Ok(Some(RagService::new(
            Arc::new(index),
            Arc::clone(&self.embedder),
            Arc::clone(&self.completer),
            &self.config,
        )))
    }
}
