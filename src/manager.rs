//! Session lifecycle and storage orchestration
//!
//! `MemoryManager` is the layer agents and the router talk to. It owns no
//! state of its own: everything goes through the injected `StorageBackend`.

use crate::error::{MemoryError, Result};
use crate::store::{MemoryQuery, SessionOrder};
use crate::storage_backend::StorageBackend;
use crate::types::{
    clamp_importance, AgentState, ConversationEntry, MemoryId, MemoryRecord, MemoryType, Metadata,
    Session, SessionId, SessionSummary, StoredMessage,
};
use chrono::Utc;
use std::sync::Arc;

/// High-level interface over a storage backend
#[derive(Clone)]
pub struct MemoryManager {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// The underlying backend
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    // ---- sessions ----

    /// Create a session; a UUID v4 id is generated when none is given
    pub async fn create_session(
        &self,
        session_id: Option<SessionId>,
        metadata: Metadata,
    ) -> Result<SessionId> {
        let session_id = session_id.unwrap_or_else(Session::generate_id);
        let session = Session::new(session_id.clone(), metadata);
        self.storage.create_session(&session).await?;

        tracing::debug!(session_id = %session_id, "Created session");
        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.storage.get_session(session_id).await
    }

    /// Like `get_session`, but a missing session is an error
    pub async fn require_session(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("Session {}", session_id)))
    }

    pub async fn list_sessions(
        &self,
        limit: i64,
        offset: i64,
        order: SessionOrder,
    ) -> Result<Vec<Session>> {
        self.storage.list_sessions(limit, offset, order).await
    }

    /// Merge metadata into a session and mark it active
    pub async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &Metadata,
    ) -> Result<Session> {
        self.storage.update_session(session_id, metadata).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.storage.delete_session(session_id).await
    }

    // ---- messages ----

    pub async fn store_message(&self, message: &StoredMessage) -> Result<String> {
        self.storage.store_message(message).await
    }

    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
        offset: i64,
        sender: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        self.storage
            .get_messages(session_id, limit, offset, sender)
            .await
    }

    pub async fn get_message_count(&self, session_id: &str) -> Result<i64> {
        self.storage.get_message_count(session_id).await
    }

    // ---- conversation history ----

    pub async fn store_conversation_entry(&self, entry: &ConversationEntry) -> Result<i64> {
        self.storage.store_conversation_entry(entry).await
    }

    pub async fn get_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<i64>,
        min_importance: f32,
    ) -> Result<Vec<ConversationEntry>> {
        self.storage
            .get_conversation_history(agent_id, session_id, limit, min_importance)
            .await
    }

    /// Remove specific history entries, e.g. after the context manager pruned them
    pub async fn prune_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        entry_ids: &[i64],
    ) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        self.storage
            .delete_conversation_entries(agent_id, session_id, Some(entry_ids))
            .await
    }

    // ---- agent state ----

    pub async fn save_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
        state_data: serde_json::Value,
    ) -> Result<()> {
        let state = AgentState {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            state_data,
            updated_at: Utc::now(),
        };
        self.storage.save_agent_state(&state).await
    }

    /// The saved state blob, if any
    pub async fn load_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .storage
            .load_agent_state(agent_id, session_id)
            .await?
            .map(|state| state.state_data))
    }

    // ---- memories ----

    /// Store a memory; importance is clamped into `[0, 1]`
    pub async fn store_memory(&self, memory: MemoryRecord) -> Result<MemoryId> {
        let memory = MemoryRecord {
            importance_score: clamp_importance(memory.importance_score),
            ..memory
        };
        self.storage.store_memory(&memory).await
    }

    /// Convenience wrapper building the record from parts
    pub async fn remember(
        &self,
        agent_id: &str,
        session_id: &str,
        content: &str,
        memory_type: MemoryType,
        importance: f32,
    ) -> Result<MemoryId> {
        let record =
            MemoryRecord::new(agent_id, session_id, memory_type, content).with_importance(importance);
        self.store_memory(record).await
    }

    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.storage.get_memory(id).await
    }

    /// Full-text retrieval that records an access on every returned memory
    ///
    /// The returned records already reflect the new access count and time.
    pub async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let mut memories = self.storage.retrieve_memories(query).await?;

        let now = Utc::now();
        for memory in &mut memories {
            let Some(id) = memory.id else { continue };
            if self.storage.update_memory_access(id).await? {
                memory.access_count += 1;
                memory.last_accessed = Some(now);
            }
        }

        Ok(memories)
    }

    pub async fn update_memory_metadata(&self, id: MemoryId, metadata: &Metadata) -> Result<()> {
        self.storage.update_memory_metadata(id, metadata).await
    }

    pub async fn delete_memories(&self, agent_id: &str, ids: &[MemoryId]) -> Result<u64> {
        self.storage.delete_memories(agent_id, ids).await
    }

    /// Memories outlive their session; this removes them explicitly
    pub async fn delete_session_memories(&self, agent_id: &str, session_id: &str) -> Result<u64> {
        self.storage
            .delete_session_memories(agent_id, session_id)
            .await
    }

    // ---- utilities ----

    /// Session overview, `None` for unknown sessions
    pub async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let Some(session) = self.storage.get_session(session_id).await? else {
            return Ok(None);
        };
        let message_count = self.storage.get_message_count(session_id).await?;

        Ok(Some(SessionSummary {
            session_id: session.id,
            created_at: session.created_at,
            last_active: session.last_active,
            message_count,
            metadata: session.metadata,
        }))
    }
}
