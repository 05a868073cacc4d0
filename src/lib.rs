//! # agent-memory - Context & memory for conversational agents
//!
//! Keeps an agent's conversation inside a token budget and maintains a
//! durable, full-text searchable store of memories that can be injected back
//! into that budget.

pub mod config;
pub mod context;
pub mod error;
pub mod importance;
pub mod manager;
pub mod query;
pub mod search;
pub mod storage_backend;
pub mod store;
pub mod tokens;
pub mod types;

pub use config::{MemorySystemConfig, RetrievalConfig, RetrievalConfigBuilder};
pub use context::{
    ContextConfig, ContextConfigBuilder, ContextManager, ContextWindow, TokenUsage,
    MEMORY_BLOCK_HEADER,
};
pub use error::{MemoryError, Result};
pub use importance::{
    rank_messages_by_importance, select_messages_to_prune, ImportanceCalculator,
    ImportanceWeights,
};
pub use manager::MemoryManager;
pub use query::{MemoryRetriever, QueryEngine};
pub use search::MemoryIndex;
pub use storage_backend::StorageBackend;
pub use store::{MemoryQuery, MemoryStore, SessionOrder};
pub use tokens::{estimate_tokens, estimate_tokens_for_messages};
pub use types::{
    AgentState, ConversationEntry, MemoryId, MemoryRecord, MemoryType, Message, MessageKind,
    Metadata, Role, Session, SessionId, SessionSummary, StoredMessage,
};

use chrono::Utc;
use std::sync::Arc;

/// Main memory system
///
/// Wires storage, session management, retrieval and the context budget
/// manager together. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct MemorySystem {
    config: MemorySystemConfig,
    manager: Arc<MemoryManager>,
    retriever: MemoryRetriever,
    context: ContextManager,
}

impl std::fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySystem")
            .field("data_dir", &self.config.data_dir)
            .field("backend", &self.manager.storage().backend_name())
            .finish()
    }
}

impl MemorySystem {
    /// Open (or create) the store under `config.data_dir`
    pub async fn open(config: MemorySystemConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::open(&config.data_dir).await?;
        Ok(Self::with_backend(store, config))
    }

    /// A system backed by an in-memory database and index
    pub async fn in_memory(config: MemorySystemConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::in_memory().await?;
        Ok(Self::with_backend(store, config))
    }

    /// Build on any storage backend
    pub fn with_backend(storage: Arc<dyn StorageBackend>, config: MemorySystemConfig) -> Self {
        let manager = Arc::new(MemoryManager::new(storage));
        let engine = QueryEngine::new(Arc::clone(&manager), config.retrieval.clone());
        let retriever = MemoryRetriever::new(engine);
        let context = ContextManager::new(config.context.clone());

        Self {
            config,
            manager,
            retriever,
            context,
        }
    }

    pub fn config(&self) -> &MemorySystemConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    pub fn retriever(&self) -> &MemoryRetriever {
        &self.retriever
    }

    pub fn query_engine(&self) -> &QueryEngine {
        self.retriever.engine()
    }

    pub fn context_manager(&self) -> &ContextManager {
        &self.context
    }

    // ---- sessions ----

    /// Create a session, generating an id when none is given
    pub async fn create_session(
        &self,
        session_id: Option<SessionId>,
        metadata: Metadata,
    ) -> Result<SessionId> {
        self.manager.create_session(session_id, metadata).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.manager.get_session(session_id).await
    }

    pub async fn list_sessions(
        &self,
        limit: i64,
        offset: i64,
        order: SessionOrder,
    ) -> Result<Vec<Session>> {
        self.manager.list_sessions(limit, offset, order).await
    }

    pub async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &Metadata,
    ) -> Result<Session> {
        self.manager
            .update_session_metadata(session_id, metadata)
            .await
    }

    /// Delete a session and its messages, history and agent state
    ///
    /// Memories survive; see [`delete_session_memories`](Self::delete_session_memories).
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.manager.delete_session(session_id).await
    }

    pub async fn delete_session_memories(&self, agent_id: &str, session_id: &str) -> Result<u64> {
        self.manager
            .delete_session_memories(agent_id, session_id)
            .await
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        self.manager.session_summary(session_id).await
    }

    // ---- context budget ----

    pub fn should_prune(&self, messages: &[Message]) -> bool {
        self.context.should_prune(messages)
    }

    pub fn prepare_context(
        &self,
        messages: &[Message],
        memories: Option<&[MemoryRecord]>,
    ) -> ContextWindow {
        self.context.prepare_context(messages, memories)
    }

    pub fn get_token_usage(&self, messages: &[Message]) -> TokenUsage {
        self.context.get_token_usage(messages)
    }

    /// Stored history of an agent plus `additional` messages, fitted to the budget
    pub async fn prepare_context_for_session(
        &self,
        agent_id: &str,
        session_id: &str,
        additional: &[Message],
        memories: Option<&[MemoryRecord]>,
    ) -> Result<ContextWindow> {
        let history = self
            .manager
            .get_conversation_history(agent_id, session_id, None, 0.0)
            .await?;

        let mut messages: Vec<Message> = history.iter().map(ConversationEntry::to_message).collect();
        messages.extend_from_slice(additional);

        Ok(self.context.prepare_context(&messages, memories))
    }

    /// Retrieve memories for `message` and build the window for answering it
    pub async fn build_context_for_message(
        &self,
        agent_id: &str,
        session_id: &str,
        history: &[Message],
        message: &str,
    ) -> Result<ContextWindow> {
        let memories = self
            .retrieve_for_message(agent_id, message, session_id)
            .await?;

        let mut messages = history.to_vec();
        messages.push(Message::user(message));

        Ok(self.context.prepare_context(&messages, Some(&memories)))
    }

    // ---- retrieval ----

    /// Memories relevant to an incoming message
    pub async fn retrieve_for_message(
        &self,
        agent_id: &str,
        message: &str,
        session_id: &str,
    ) -> Result<Vec<MemoryRecord>> {
        self.retriever
            .retrieve_for_message(agent_id, message, session_id, self.config.retrieval.message_limit)
            .await
    }

    /// Full-text search over an agent's memories
    pub async fn search_memories(
        &self,
        agent_id: &str,
        query: &str,
        memory_type: Option<MemoryType>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryRecord>> {
        let limit = limit.unwrap_or(self.config.retrieval.default_limit);
        self.query_engine()
            .search(agent_id, query, memory_type, limit, 0.0)
            .await
    }

    // ---- storage ----

    pub async fn store_message(&self, message: &StoredMessage) -> Result<String> {
        self.manager.store_message(message).await
    }

    /// Append to an agent's history
    ///
    /// Without an explicit importance the entry is scored by
    /// [`ImportanceCalculator`] at the time of storing.
    pub async fn store_conversation_entry(
        &self,
        agent_id: &str,
        session_id: &str,
        role: Role,
        content: &str,
        importance: Option<f32>,
    ) -> Result<i64> {
        let mut entry = ConversationEntry::new(agent_id, session_id, role, content);
        entry.importance_score = match importance {
            Some(score) => types::clamp_importance(score),
            None => {
                ImportanceCalculator::calculate(content, role.as_str(), entry.timestamp, Utc::now(), false)
            }
        };
        self.manager.store_conversation_entry(&entry).await
    }

    pub async fn get_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ConversationEntry>> {
        self.manager
            .get_conversation_history(agent_id, session_id, limit, 0.0)
            .await
    }

    pub async fn save_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
        state_data: serde_json::Value,
    ) -> Result<()> {
        self.manager
            .save_agent_state(agent_id, session_id, state_data)
            .await
    }

    pub async fn load_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        self.manager.load_agent_state(agent_id, session_id).await
    }

    pub async fn store_memory(&self, memory: MemoryRecord) -> Result<MemoryId> {
        self.manager.store_memory(memory).await
    }

    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.manager.get_memory(id).await
    }

    pub async fn delete_memories(&self, agent_id: &str, ids: &[MemoryId]) -> Result<u64> {
        self.manager.delete_memories(agent_id, ids).await
    }
}
