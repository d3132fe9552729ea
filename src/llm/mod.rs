//! Chat completion client and prompt templates
//!
//! The completion side of the provider API. [`LlmClient`] talks to an
//! OpenAI-compatible `/chat/completions` endpoint; services depend on the
//! [`Completer`] trait so tests can substitute canned responses.

use async_trait::async_trait;

use crate::errors::Result;

pub mod client;
pub mod prompts;

pub use client::LlmClient;
pub use prompts::ComplaintPrompts;
pub use prompts::PromptTemplate;

/// Text completion backend
#[async_trait]
pub trait Completer: Send + Sync {
    /// Run one completion with the configured sampling parameters
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Cheap connectivity check used by health reporting
    ///
    /// The default issues a tiny completion; implementations may override
    /// with something lighter.
    async fn probe(&self) -> Result<String> {
        self.complete("You are a connectivity probe.", "Test").await
    }

    /// Chat model identifier, reported in operation responses
    fn model(&self) -> &str;
}
