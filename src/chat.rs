//! Multi-turn chat over the complaint corpus.
//!
//! Each turn is routed one of two ways: messages that look like questions
//! about the data go through the RAG pipeline, everything else gets a direct
//! completion with the chat persona. Session transcripts live in memory and
//! feed the most recent turns back into prompts.

use crate::errors::{CivicRagError, Result};
use crate::llm::{Completer, ComplaintPrompts};
use crate::rag::pipeline::NO_HISTORY;
use crate::rag::RagService;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest transcript a session keeps before the oldest exchange is dropped.
const MAX_SESSION_MESSAGES: usize = 20;

/// How many recent messages are rendered into prompt context.
const HISTORY_WINDOW: usize = 6;

/// Sessions idle longer than this are removed on the next chat turn.
const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 3600;

/// Reply text when a turn fails downstream. The failure itself goes to
/// the transcript and the reply metadata, not to the user-facing text.
const ERROR_REPLY: &str =
    "I'm sorry, I encountered an error processing your message. Please try again.";

/// Phrases that signal the user is asking about complaint data.
const DATA_KEYWORDS: &[&str] = &[
    "show me",
    "find",
    "search",
    "how many",
    "what are",
    "list",
    "complaints about",
    "in brooklyn",
    "in manhattan",
    "in queens",
    "last week",
    "last month",
    "recent",
    "open complaints",
    "high risk",
    "escalated",
    "resolved",
    "agency",
    "department",
];

/// Interrogatives that mark a data question when they open the message.
const QUESTION_WORDS: &[&str] = &["what", "how", "when", "where", "which", "who"];

/// One message in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// A single conversation and its rolling transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
    pub last_activity: i64,
}

impl ChatSession {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message, dropping the oldest exchange once the cap is hit.
    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(ChatMessage::new(role, content));
        self.last_activity = chrono::Utc::now().timestamp();

        if self.messages.len() > MAX_SESSION_MESSAGES {
            self.messages.drain(0..2);
        }
    }

    /// Render the most recent `limit` messages for prompt context.
    #[must_use]
    pub fn formatted_history(&self, limit: usize) -> String {
        if self.messages.is_empty() {
            return NO_HISTORY.to_string();
        }

        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..]
            .iter()
            .map(|message| {
                let speaker = if message.role == "user" {
                    "User"
                } else {
                    "Assistant"
                };
                format!("{speaker}: {}", message.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn is_expired(&self, timeout_secs: i64) -> bool {
        chrono::Utc::now().timestamp() - self.last_activity > timeout_secs
    }
}

/// In-memory session registry keyed by session id.
///
/// Expired sessions are swept lazily on each chat turn rather than by a
/// background task; a one-shot CLI process never needs the sweep, while a
/// long-lived embedder gets it for free.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, ChatSession>,
    timeout_secs: i64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT_SECS)
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(timeout_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout_secs,
        }
    }

    /// Fetch a session, creating it on first use.
    pub fn get_or_create(&self, session_id: &str) -> ChatSession {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ChatSession::new(session_id))
            .clone()
    }

    /// Store a session back after mutating a copy of it.
    pub fn update(&self, session: ChatSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    #[must_use]
    pub fn history(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        self.sessions
            .get(session_id)
            .map(|session| session.messages.clone())
    }

    /// Remove a session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop sessions idle past the timeout. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired(self.timeout_secs));
        before - self.sessions.len()
    }
}

/// How a chat reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Rag,
    Direct,
    Error,
}

impl ResponseKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::Direct => "direct",
            Self::Error => "error",
        }
    }
}

/// The outcome of one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub response_type: ResponseKind,
    pub session_id: String,
    pub metadata: serde_json::Value,
}

/// Routes chat turns and owns the session registry.
pub struct ChatService {
    completer: Arc<dyn Completer>,
    sessions: SessionManager,
}

impl ChatService {
    #[must_use]
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            sessions: SessionManager::default(),
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Handle one chat turn.
    ///
    /// When `session_id` is absent a fresh id is generated and echoed in the
    /// reply so the caller can continue the conversation. Failed turns are
    /// still recorded in the transcript; only an empty message is an error.
    pub async fn chat(
        &self,
        rag: &RagService,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CivicRagError::InvalidInput(
                "Message cannot be empty".to_string(),
            ));
        }

        let swept = self.sessions.cleanup_expired();
        if swept > 0 {
            debug!("Removed {} expired chat sessions", swept);
        }

        let session_id =
            session_id.map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        let mut session = self.sessions.get_or_create(&session_id);
        let history = session.formatted_history(HISTORY_WINDOW);

        let (response, response_type, metadata) = if wants_retrieval(message) {
            debug!("Routing chat message through retrieval: {}", message);
            match rag.answer_question(message, &history).await {
                Ok(answer) => {
                    let metadata = serde_json::to_value(&answer)?;
                    (answer.answer, ResponseKind::Rag, metadata)
                }
                Err(e) => {
                    warn!("RAG chat turn failed: {}", e);
                    (
                        ERROR_REPLY.to_string(),
                        ResponseKind::Error,
                        serde_json::json!({ "error": e.to_string() }),
                    )
                }
            }
        } else {
            debug!("Answering chat message directly");
            let prompt = format!("Conversation history:\n{history}\n\nUser: {message}");
            match self
                .completer
                .complete(ComplaintPrompts::chat_agent(), &prompt)
                .await
            {
                Ok(text) => (
                    text.trim().to_string(),
                    ResponseKind::Direct,
                    serde_json::json!({ "model_used": self.completer.model() }),
                ),
                Err(e) => {
                    warn!("Direct chat turn failed: {}", e);
                    (
                        ERROR_REPLY.to_string(),
                        ResponseKind::Error,
                        serde_json::json!({ "error": e.to_string() }),
                    )
                }
            }
        };

        // Failed turns are recorded too so the transcript reflects what the
        // user actually saw.
        session.add_message("user", message);
        session.add_message("assistant", &response);
        self.sessions.update(session);

        info!(
            "Chat turn complete for session {} ({})",
            session_id,
            response_type.as_str()
        );

        Ok(ChatReply {
            response,
            response_type,
            session_id,
            metadata,
        })
    }
}

/// Heuristic for whether a message is asking about complaint data.
fn wants_retrieval(message: &str) -> bool {
    let lowered = message.to_lowercase();
    if DATA_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        return true;
    }
    lowered
        .split_whitespace()
        .take(3)
        .any(|word| QUESTION_WORDS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::index::VectorIndex;
    use crate::AppConfig;
    use async_trait::async_trait;

    struct StaticEmbedder;

    #[async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5, 0.5, 0.5, 0.5])
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5, 0.5, 0.5, 0.5]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model(&self) -> &str {
            "static-test-embed"
        }
    }

    struct CannedCompleter {
        reply: std::result::Result<String, String>,
    }

    #[async_trait]
    impl Completer for CannedCompleter {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            self.reply
                .clone()
                .map_err(CivicRagError::ProviderUnavailable)
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn harness(reply: std::result::Result<String, String>) -> (ChatService, RagService) {
        let embedder: Arc<dyn Embedder> = Arc::new(StaticEmbedder);
        let index = Arc::new(VectorIndex::new(Arc::clone(&embedder)));
        let completer: Arc<dyn Completer> = Arc::new(CannedCompleter { reply });
        let rag = RagService::new(
            index,
            embedder,
            Arc::clone(&completer),
            &AppConfig::default(),
        );
        (ChatService::new(completer), rag)
    }

    #[test]
    fn test_data_keywords_trigger_retrieval() {
        assert!(wants_retrieval("show me complaints in brooklyn"));
        assert!(wants_retrieval("anything escalated lately?"));
        assert!(wants_retrieval("How many noise complaints last week"));
    }

    #[test]
    fn test_question_word_must_open_the_message() {
        assert!(wants_retrieval("what is the loudest borough"));
        assert!(wants_retrieval("so, what happened downtown"));
        assert!(!wants_retrieval("tell me more regarding that topic"));
        assert!(!wants_retrieval("hello there friend"));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (chat, rag) = harness(Ok("hi".to_string()));
        let result = chat.chat(&rag, "   ", Some("s1")).await;
        assert!(matches!(result, Err(CivicRagError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_direct_turn_records_transcript() {
        let (chat, rag) = harness(Ok("Hello! How can I help?".to_string()));
        let reply = chat
            .chat(&rag, "hello friend", Some("s1"))
            .await
            .unwrap();

        assert_eq!(reply.response_type, ResponseKind::Direct);
        assert_eq!(reply.response, "Hello! How can I help?");
        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.metadata["model_used"], "test-model");

        let history = chat.sessions().history("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn test_data_question_goes_through_rag() {
        let (chat, rag) = harness(Ok("There are no open complaints.".to_string()));
        let reply = chat
            .chat(&rag, "how many open complaints in brooklyn", Some("s1"))
            .await
            .unwrap();

        assert_eq!(reply.response_type, ResponseKind::Rag);
        assert_eq!(reply.response, "There are no open complaints.");
        assert!(reply.metadata["retrieval_method"].is_string());
        assert_eq!(reply.metadata["model_used"], "test-model");
    }

    #[tokio::test]
    async fn test_failed_turn_is_reported_and_recorded() {
        let (chat, rag) = harness(Err("upstream offline".to_string()));
        let reply = chat
            .chat(&rag, "hello friend", Some("s1"))
            .await
            .unwrap();

        assert_eq!(reply.response_type, ResponseKind::Error);
        assert_eq!(reply.response, ERROR_REPLY);
        assert!(reply.metadata["error"]
            .as_str()
            .unwrap()
            .contains("upstream offline"));

        let history = chat.sessions().history("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, ERROR_REPLY);
    }

    #[tokio::test]
    async fn test_missing_session_id_generates_one() {
        let (chat, rag) = harness(Ok("hi".to_string()));
        let reply = chat.chat(&rag, "hello friend", None).await.unwrap();

        assert!(Uuid::parse_str(&reply.session_id).is_ok());
        assert_eq!(chat.sessions().session_count(), 1);
    }

    #[test]
    fn test_transcript_caps_at_twenty_messages() {
        let mut session = ChatSession::new("cap");
        for i in 0..30 {
            session.add_message("user", &format!("message {i}"));
        }

        assert!(session.messages.len() <= MAX_SESSION_MESSAGES);
        assert_eq!(session.messages[0].content, "message 10");
    }

    #[test]
    fn test_formatted_history_takes_recent_window() {
        let mut session = ChatSession::new("w");
        for i in 0..8 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            session.add_message(role, &format!("turn {i}"));
        }

        let rendered = session.formatted_history(HISTORY_WINDOW);
        assert!(!rendered.contains("turn 1"));
        assert!(rendered.contains("User: turn 2"));
        assert!(rendered.contains("Assistant: turn 7"));
        assert_eq!(rendered.lines().count(), 6);

        assert_eq!(ChatSession::new("empty").formatted_history(6), NO_HISTORY);
    }

    #[test]
    fn test_cleanup_removes_idle_sessions() {
        let manager = SessionManager::default();
        let mut stale = manager.get_or_create("stale");
        stale.last_activity -= 7200;
        manager.update(stale);
        manager.get_or_create("fresh");

        assert_eq!(manager.cleanup_expired(), 1);
        assert_eq!(manager.session_ids(), vec!["fresh".to_string()]);
        assert!(manager.clear("fresh"));
        assert_eq!(manager.session_count(), 0);
    }
}
