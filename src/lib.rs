pub mod analysis;
pub mod chat;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod ops;
pub mod rag;

#[cfg(test)]
pub mod tests;

pub use config::AppConfig;
pub use errors::*;
