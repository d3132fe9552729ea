use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> usize {
    2000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_concurrency() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default)]
    pub query_expansion: bool,
    #[serde(default = "default_max_query_terms")]
    pub max_query_terms: usize,
    #[serde(default = "default_rerank")]
    pub rerank: bool,
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f32,
}

fn default_strategy() -> String {
    "vector_only".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_max_query_terms() -> usize {
    10
}

fn default_rerank() -> bool {
    true
}

fn default_diversity_threshold() -> f32 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Scores at or above this bound are medium risk.
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f32,
    /// Scores at or above this bound are high risk.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    /// Scores above this bound trigger escalation handling.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f32,
}

fn default_medium_threshold() -> f32 {
    0.4
}

fn default_high_threshold() -> f32 {
    0.7
}

fn default_escalation_threshold() -> f32 {
    0.7
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 0.4,
            high_threshold: 0.7,
            escalation_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub backtrace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub embeddings: EmbeddingsConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    pub logging: LoggingConfig,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::CivicRagError::Io)?;

        let mut config: AppConfig =
            toml::from_str(&content).map_err(crate::CivicRagError::TomlParsing)?;

        // An empty key in the file defers to the environment.
        if config.provider.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                config.provider.api_key = key;
            }
        }

        Ok(config)
    }

    /// Load configuration from default config file path
    pub fn load() -> crate::Result<Self> {
        // Try to load from config.toml first, then fall back to config.example.toml
        if Path::new("config.toml").exists() {
            Self::from_file("config.toml")
        } else if Path::new("config.example.toml").exists() {
            tracing::warn!(
                "Using config.example.toml. Please create config.toml for production use."
            );
            Self::from_file("config.example.toml")
        } else {
            Err(crate::CivicRagError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config file found. Please create config.toml or config.example.toml",
            )))
        }
    }

    /// Validate settings that would otherwise fail deep inside a request
    pub fn validate(&self) -> crate::Result<()> {
        if url::Url::parse(&self.provider.api_base).is_err() {
            return Err(crate::CivicRagError::ConfigError(format!(
                "provider.api_base is not a valid URL: {}",
                self.provider.api_base
            )));
        }
        if self.provider.api_key.trim().is_empty() {
            return Err(crate::CivicRagError::ConfigError(
                "provider.api_key is empty (set it in config.toml or via OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
        if self.embeddings.dimension == 0 {
            return Err(crate::CivicRagError::ConfigError(
                "embeddings.dimension must be at least 1".to_string(),
            ));
        }
        if self.embeddings.batch_size == 0 || self.embeddings.max_concurrency == 0 {
            return Err(crate::CivicRagError::ConfigError(
                "embeddings.batch_size and embeddings.max_concurrency must be at least 1"
                    .to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(crate::CivicRagError::ConfigError(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.retrieval.vector_weight < 0.0 || self.retrieval.keyword_weight < 0.0 {
            return Err(crate::CivicRagError::ConfigError(
                "retrieval weights must be non-negative".to_string(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(crate::CivicRagError::ConfigError(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size".to_string(),
            ));
        }
        if self.risk.medium_threshold > self.risk.high_threshold {
            return Err(crate::CivicRagError::ConfigError(
                "risk.medium_threshold must not exceed risk.high_threshold".to_string(),
            ));
        }
        Ok(())
    }

    /// Get provider API base URL
    pub fn api_base(&self) -> &str {
        &self.provider.api_base
    }

    /// Get provider API key
    pub fn api_key(&self) -> &str {
        &self.provider.api_key
    }

    /// Get chat completion model name
    pub fn chat_model(&self) -> &str {
        &self.provider.chat_model
    }

    /// Get embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.provider.embedding_model
    }

    /// Get completion sampling temperature
    pub fn temperature(&self) -> f32 {
        self.provider.temperature
    }

    /// Get completion token budget
    pub fn max_tokens(&self) -> usize {
        self.provider.max_tokens
    }

    /// Get upstream request timeout in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.provider.timeout_secs
    }

    /// Get retry bound for transient provider failures
    pub fn max_retries(&self) -> usize {
        self.provider.max_retries
    }

    /// Get base delay for exponential backoff in milliseconds
    pub fn retry_base_delay_ms(&self) -> u64 {
        self.provider.retry_base_delay_ms
    }

    /// Get embedding dimension
    pub fn embedding_dimension(&self) -> usize {
        self.embeddings.dimension
    }

    /// Get embedding batch chunk size
    pub fn embedding_batch_size(&self) -> usize {
        self.embeddings.batch_size
    }

    /// Get bound on concurrent upstream embedding calls
    pub fn embedding_max_concurrency(&self) -> usize {
        self.embeddings.max_concurrency
    }

    /// Get vector index directory
    pub fn index_path(&self) -> &str {
        &self.index.path
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                chat_model: "gpt-4o-mini".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                temperature: 0.1,
                max_tokens: 2000,
                timeout_secs: 30,
                max_retries: 3,
                retry_base_delay_ms: 1000,
            },
            embeddings: EmbeddingsConfig {
                dimension: 1536,
                batch_size: 50,
                max_concurrency: 3,
            },
            index: IndexConfig {
                path: "storage/vector_index".to_string(),
            },
            retrieval: RetrievalConfig {
                strategy: "vector_only".to_string(),
                top_k: 5,
                score_threshold: 0.0,
                vector_weight: 0.7,
                keyword_weight: 0.3,
                query_expansion: false,
                max_query_terms: 10,
                rerank: true,
                diversity_threshold: 0.1,
            },
            chunking: ChunkingConfig::default(),
            risk: RiskConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                backtrace: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_except_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = "sk-test".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = AppConfig::default();
        config.provider.api_key = "sk-test".to_string();
        config.provider.api_base = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weights() {
        let mut config = AppConfig::default();
        config.provider.api_key = "sk-test".to_string();
        config.retrieval.vector_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_toml_applies_defaults() {
        let toml_str = r#"
            [provider]
            api_base = "https://api.openai.com/v1"
            api_key = "sk-test"

            [embeddings]
            dimension = 1536

            [index]
            path = "storage/vector_index"

            [retrieval]

            [logging]
            level = "info"
            backtrace = false
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embeddings.batch_size, 50);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert!((config.retrieval.vector_weight - 0.7).abs() < f32::EPSILON);
        assert!(config.retrieval.rerank);
    }
}
