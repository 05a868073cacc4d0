use crate::error::Result;
use crate::store::{MemoryQuery, MemoryStore, SessionOrder};
use crate::types::{
    AgentState, ConversationEntry, MemoryId, MemoryRecord, Metadata, Session, StoredMessage,
};
use async_trait::async_trait;

/// Persistence capability consumed by the memory manager
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn list_sessions(
        &self,
        limit: i64,
        offset: i64,
        order: SessionOrder,
    ) -> Result<Vec<Session>>;
    async fn update_session(&self, session_id: &str, metadata: &Metadata) -> Result<Session>;
    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    async fn store_message(&self, message: &StoredMessage) -> Result<String>;
    async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
        offset: i64,
        sender: Option<&str>,
    ) -> Result<Vec<StoredMessage>>;
    async fn get_message_count(&self, session_id: &str) -> Result<i64>;

    async fn store_conversation_entry(&self, entry: &ConversationEntry) -> Result<i64>;
    async fn get_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<i64>,
        min_importance: f32,
    ) -> Result<Vec<ConversationEntry>>;
    async fn delete_conversation_entries(
        &self,
        agent_id: &str,
        session_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64>;

    async fn save_agent_state(&self, state: &AgentState) -> Result<()>;
    async fn load_agent_state(&self, agent_id: &str, session_id: &str)
        -> Result<Option<AgentState>>;

    async fn store_memory(&self, memory: &MemoryRecord) -> Result<MemoryId>;
    async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>>;
    async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>>;
    async fn update_memory_access(&self, id: MemoryId) -> Result<bool>;
    async fn update_memory_metadata(&self, id: MemoryId, metadata: &Metadata) -> Result<()>;
    async fn delete_memories(&self, agent_id: &str, ids: &[MemoryId]) -> Result<u64>;
    async fn delete_session_memories(&self, agent_id: &str, session_id: &str) -> Result<u64>;
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        self.create_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.get_session(session_id).await
    }

    async fn list_sessions(
        &self,
        limit: i64,
        offset: i64,
        order: SessionOrder,
    ) -> Result<Vec<Session>> {
        self.list_sessions(limit, offset, order).await
    }

    async fn update_session(&self, session_id: &str, metadata: &Metadata) -> Result<Session> {
        self.update_session(session_id, metadata).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.delete_session(session_id).await
    }

    async fn store_message(&self, message: &StoredMessage) -> Result<String> {
        self.store_message(message).await
    }

    async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
        offset: i64,
        sender: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        self.get_messages(session_id, limit, offset, sender).await
    }

    async fn get_message_count(&self, session_id: &str) -> Result<i64> {
        self.get_message_count(session_id).await
    }

    async fn store_conversation_entry(&self, entry: &ConversationEntry) -> Result<i64> {
        self.store_conversation_entry(entry).await
    }

    async fn get_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<i64>,
        min_importance: f32,
    ) -> Result<Vec<ConversationEntry>> {
        self.get_conversation_history(agent_id, session_id, limit, min_importance)
            .await
    }

    async fn delete_conversation_entries(
        &self,
        agent_id: &str,
        session_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64> {
        self.delete_conversation_entries(agent_id, session_id, ids)
            .await
    }

    async fn save_agent_state(&self, state: &AgentState) -> Result<()> {
        self.save_agent_state(state).await
    }

    async fn load_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<AgentState>> {
        self.load_agent_state(agent_id, session_id).await
    }

    async fn store_memory(&self, memory: &MemoryRecord) -> Result<MemoryId> {
        self.store_memory(memory).await
    }

    async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.get_memory(id).await
    }

    async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        self.retrieve_memories(query).await
    }

    async fn update_memory_access(&self, id: MemoryId) -> Result<bool> {
        self.update_memory_access(id).await
    }

    async fn update_memory_metadata(&self, id: MemoryId, metadata: &Metadata) -> Result<()> {
        self.update_memory_metadata(id, metadata).await
    }

    async fn delete_memories(&self, agent_id: &str, ids: &[MemoryId]) -> Result<u64> {
        self.delete_memories(agent_id, ids).await
    }

    async fn delete_session_memories(&self, agent_id: &str, session_id: &str) -> Result<u64> {
        self.delete_session_memories(agent_id, session_id).await
    }
}
