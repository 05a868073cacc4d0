//! Session, conversation and memory storage using SQLite
//!
//! Rows live in SQLite; memory text is mirrored into a Tantivy index for
//! full-text matching. A memory write touches both and succeeds only if both do.

use crate::error::{MemoryError, Result};
use crate::search::{IndexFilter, IndexedText, MemoryIndex};
use crate::types::{
    clamp_importance, AgentState, ConversationEntry, MemoryId, MemoryRecord, MemoryType, Metadata,
    Role, Session, StoredMessage,
};

use chrono::Utc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Ordering for session listings (most recent first)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrder {
    CreatedAt,
    #[default]
    LastActive,
}

impl SessionOrder {
    fn column(self) -> &'static str {
        match self {
            SessionOrder::CreatedAt => "created_at",
            SessionOrder::LastActive => "last_active",
        }
    }
}

/// Filters for a full-text memory retrieval
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    pub agent_id: String,
    /// Full-text query; blank matches nothing
    pub text: String,
    pub memory_type: Option<MemoryType>,
    pub session_id: Option<String>,
    pub limit: usize,
    pub min_importance: f32,
}

impl MemoryQuery {
    pub fn new(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            text: text.into(),
            memory_type: None,
            session_id: None,
            limit: 10,
            min_importance: 0.0,
        }
    }

    pub fn with_type(mut self, memory_type: Option<MemoryType>) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn min_importance(mut self, min_importance: f32) -> Self {
        self.min_importance = min_importance;
        self
    }
}

/// SQLite + Tantivy storage engine
pub struct MemoryStore {
    pool: SqlitePool,
    index: MemoryIndex,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("pool", &"<SqlitePool>")
            .field("index", &self.index)
            .finish()
    }
}

const MEMORY_COLUMNS: &str = "id, agent_id, session_id, memory_type, content, search_text, \
     importance_score, access_count, last_accessed, created_at, metadata";

impl MemoryStore {
    /// Open (or create) a store under `data_dir`
    ///
    /// The search index is rebuilt from the memory rows on every open.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("memory.db"))
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = Self::connect(options).await?;
        let index = MemoryIndex::open_in_dir(data_dir)?;

        let store = Arc::new(Self { pool, index });
        store.reindex_all().await?;

        tracing::info!("Opened memory store at {}", data_dir.display());
        Ok(store)
    }

    /// A throwaway store held entirely in memory
    pub async fn in_memory() -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = Self::connect(options).await?;
        let index = MemoryIndex::in_memory()?;

        Ok(Arc::new(Self { pool, index }))
    }

    /// One connection that never expires: it serializes access and keeps
    /// an in-memory database alive.
    async fn connect(options: SqliteConnectOptions) -> Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| MemoryError::Database(e.into()))?;

        Ok(pool)
    }

    /// Get a reference to the SQLite pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rebuild the full-text index from the memory rows
    pub async fn reindex_all(&self) -> Result<usize> {
        let mut rows = sqlx::query(
            "SELECT id, agent_id, session_id, memory_type, content, search_text FROM memories",
        )
        .fetch(&self.pool);

        let mut texts = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let memory_type: String = row.try_get("memory_type")?;
            texts.push(IndexedText {
                id: row.try_get("id")?,
                agent_id: row.try_get("agent_id")?,
                session_id: row.try_get("session_id")?,
                memory_type: memory_type.parse().map_err(MemoryError::Serialization)?,
                content: row.try_get("content")?,
                search_text: row.try_get("search_text")?,
            });
        }
        drop(rows);

        self.index.rebuild(&texts)
    }

    // ---- sessions ----

    /// Create a session row
    pub async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, last_active, metadata)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.created_at)
        .bind(session.last_active)
        .bind(serde_json::to_string(&session.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a session by ID
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, created_at, last_active, metadata FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// List sessions, most recent first
    pub async fn list_sessions(
        &self,
        limit: i64,
        offset: i64,
        order: SessionOrder,
    ) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT id, created_at, last_active, metadata FROM sessions \
             ORDER BY {} DESC, id ASC LIMIT ? OFFSET ?",
            order.column()
        );

        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// Merge `metadata` into the session's metadata and bump `last_active`
    ///
    /// Read-modify-write without locking: concurrent updates may lose keys.
    pub async fn update_session(&self, session_id: &str, metadata: &Metadata) -> Result<Session> {
        let mut session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("Session {}", session_id)))?;

        for (key, value) in metadata {
            session.metadata.insert(key.clone(), value.clone());
        }
        session.last_active = Utc::now();

        sqlx::query("UPDATE sessions SET last_active = ?, metadata = ? WHERE id = ?")
            .bind(session.last_active)
            .bind(serde_json::to_string(&session.metadata)?)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(session)
    }

    /// Delete a session with its messages, conversation history and agent state
    ///
    /// Memories recorded in the session are kept.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- raw messages ----

    /// Append a routed message and bump the session's `last_active`
    pub async fn store_message(&self, message: &StoredMessage) -> Result<String> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, session_id, timestamp, kind, sender, recipient, content, metadata,
                importance_score
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.timestamp)
        .bind(message.kind.to_string())
        .bind(&message.sender)
        .bind(message.recipient.as_deref())
        .bind(&message.content)
        .bind(serde_json::to_string(&message.metadata)?)
        .bind(clamp_importance(message.importance_score))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE sessions SET last_active = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&message.session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message.id.clone())
    }

    /// Messages of a session in chronological order
    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
        offset: i64,
        sender: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, timestamp, kind, sender, recipient, content, metadata,
                   importance_score
            FROM messages
            WHERE session_id = ? AND (? IS NULL OR sender = ?)
            ORDER BY timestamp ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(session_id)
        .bind(sender)
        .bind(sender)
        .bind(limit.unwrap_or(-1))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_stored_message).collect()
    }

    /// Number of messages in a session
    pub async fn get_message_count(&self, session_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ---- conversation history ----

    /// Append one turn of an agent's conversation; returns its id
    pub async fn store_conversation_entry(&self, entry: &ConversationEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_history (
                agent_id, session_id, role, content, timestamp, importance_score
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.agent_id)
        .bind(&entry.session_id)
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(entry.timestamp)
        .bind(clamp_importance(entry.importance_score))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The most recent `limit` entries (all when `None`), oldest first
    pub async fn get_conversation_history(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<i64>,
        min_importance: f32,
    ) -> Result<Vec<ConversationEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, agent_id, session_id, role, content, timestamp, importance_score
                FROM conversation_history
                WHERE agent_id = ? AND session_id = ? AND importance_score >= ?
                ORDER BY timestamp DESC, id DESC
                LIMIT ?
            )
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(agent_id)
        .bind(session_id)
        .bind(min_importance)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_conversation_entry).collect()
    }

    /// Delete specific entries of an agent's history, or all of it when `ids` is `None`
    pub async fn delete_conversation_entries(
        &self,
        agent_id: &str,
        session_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64> {
        let id_list = match ids {
            Some([]) => return Ok(0),
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        };

        let result = sqlx::query(
            r#"
            DELETE FROM conversation_history
            WHERE agent_id = ? AND session_id = ?
              AND (? IS NULL OR id IN (SELECT value FROM json_each(?)))
            "#,
        )
        .bind(agent_id)
        .bind(session_id)
        .bind(&id_list)
        .bind(&id_list)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ---- agent state ----

    /// Insert or replace the state blob for `(agent_id, session_id)`
    pub async fn save_agent_state(&self, state: &AgentState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO agent_states (agent_id, session_id, state_data, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&state.agent_id)
        .bind(&state.session_id)
        .bind(serde_json::to_string(&state.state_data)?)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_agent_state(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<AgentState>> {
        let row = sqlx::query(
            r#"
            SELECT agent_id, session_id, state_data, updated_at
            FROM agent_states
            WHERE agent_id = ? AND session_id = ?
            "#,
        )
        .bind(agent_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_agent_state).transpose()
    }

    // ---- memories ----

    /// Persist a memory and index it; returns the assigned id
    ///
    /// The row and the index document are written together: an index failure
    /// rolls the row back, a failed row commit removes the index document.
    pub async fn store_memory(&self, memory: &MemoryRecord) -> Result<MemoryId> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO memories (
                agent_id, session_id, memory_type, content, search_text, importance_score,
                access_count, last_accessed, created_at, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&memory.agent_id)
        .bind(&memory.session_id)
        .bind(memory.memory_type.to_string())
        .bind(&memory.content)
        .bind(&memory.search_text)
        .bind(clamp_importance(memory.importance_score))
        .bind(memory.access_count.max(0))
        .bind(memory.last_accessed)
        .bind(memory.created_at)
        .bind(serde_json::to_string(&memory.metadata)?)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        // Dropping `tx` on the error path rolls the insert back
        self.index.add(&IndexedText {
            id,
            agent_id: memory.agent_id.clone(),
            session_id: memory.session_id.clone(),
            memory_type: memory.memory_type,
            content: memory.content.clone(),
            search_text: memory.search_text.clone(),
        })?;

        if let Err(e) = tx.commit().await {
            if let Err(index_err) = self.index.remove(&[id]) {
                tracing::warn!(memory_id = id, "Failed to unindex uncommitted memory: {}", index_err);
            }
            return Err(e.into());
        }

        tracing::debug!(memory_id = id, agent_id = %memory.agent_id, "Stored memory");
        Ok(id)
    }

    /// Load a memory by ID
    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_memory).transpose()
    }

    /// Full-text retrieval with agent, type, session and importance filters
    ///
    /// Ordered by importance, then newest first. Access is not recorded here.
    pub async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let filter = IndexFilter {
            agent_id: &query.agent_id,
            memory_type: query.memory_type,
            session_id: query.session_id.as_deref(),
        };
        let ids = self.index.search(&query.text, &filter)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // The id list travels as one JSON parameter, whatever its length
        let sql = format!(
            r#"
            SELECT {} FROM memories
            WHERE id IN (SELECT value FROM json_each(?))
              AND agent_id = ?
              AND importance_score >= ?
              AND (? IS NULL OR memory_type = ?)
              AND (? IS NULL OR session_id = ?)
            ORDER BY importance_score DESC, created_at DESC, id DESC
            LIMIT ?
            "#,
            MEMORY_COLUMNS
        );
        let memory_type = query.memory_type.map(|t| t.to_string());
        let rows = sqlx::query(&sql)
            .bind(serde_json::to_string(&ids)?)
            .bind(&query.agent_id)
            .bind(query.min_importance)
            .bind(&memory_type)
            .bind(&memory_type)
            .bind(&query.session_id)
            .bind(&query.session_id)
            .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        let memories = rows.iter().map(row_to_memory).collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            agent_id = %query.agent_id,
            matches = ids.len(),
            returned = memories.len(),
            "Retrieved memories"
        );
        Ok(memories)
    }

    /// Record one access: `access_count += 1`, `last_accessed = now`
    ///
    /// Returns false when the memory no longer exists.
    pub async fn update_memory_access(&self, id: MemoryId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE memories
            SET access_count = access_count + 1, last_accessed = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Merge keys into a memory's metadata
    pub async fn update_memory_metadata(&self, id: MemoryId, metadata: &Metadata) -> Result<()> {
        let mut memory = self
            .get_memory(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("Memory {}", id)))?;

        for (key, value) in metadata {
            memory.metadata.insert(key.clone(), value.clone());
        }

        sqlx::query("UPDATE memories SET metadata = ? WHERE id = ?")
            .bind(serde_json::to_string(&memory.metadata)?)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete memories owned by `agent_id`; ids of other agents are ignored
    pub async fn delete_memories(&self, agent_id: &str, ids: &[MemoryId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let owned: Vec<MemoryId> = sqlx::query_scalar(
            "SELECT id FROM memories WHERE agent_id = ? AND id IN (SELECT value FROM json_each(?))",
        )
        .bind(agent_id)
        .bind(serde_json::to_string(ids)?)
        .fetch_all(&self.pool)
        .await?;

        self.delete_memory_rows(&owned).await
    }

    /// Delete every memory an agent recorded in a session
    pub async fn delete_session_memories(&self, agent_id: &str, session_id: &str) -> Result<u64> {
        let owned: Vec<MemoryId> =
            sqlx::query_scalar("SELECT id FROM memories WHERE agent_id = ? AND session_id = ?")
                .bind(agent_id)
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;

        self.delete_memory_rows(&owned).await
    }

    /// Delete rows first, then their index documents
    ///
    /// A document left behind by a failed index cleanup matches no row, so
    /// retrieval never returns it; the next reindex drops it.
    async fn delete_memory_rows(&self, ids: &[MemoryId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM memories WHERE id IN (SELECT value FROM json_each(?))")
            .bind(serde_json::to_string(ids)?)
            .execute(&self.pool)
            .await?;

        if let Err(e) = self.index.remove(ids) {
            tracing::warn!(count = ids.len(), "Failed to unindex deleted memories: {}", e);
        }

        tracing::debug!(count = result.rows_affected(), "Deleted memories");
        Ok(result.rows_affected())
    }
}

fn parse_metadata(row: &SqliteRow) -> Result<Metadata> {
    let json: Option<String> = row.try_get("metadata")?;
    match json.as_deref() {
        None | Some("") => Ok(Metadata::new()),
        Some(s) => Ok(serde_json::from_str(s)?),
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        last_active: row.try_get("last_active")?,
        metadata: parse_metadata(row)?,
    })
}

fn row_to_stored_message(row: &SqliteRow) -> Result<StoredMessage> {
    let kind: String = row.try_get("kind")?;

    Ok(StoredMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        timestamp: row.try_get("timestamp")?,
        kind: kind.parse().map_err(MemoryError::Serialization)?,
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        content: row.try_get("content")?,
        metadata: parse_metadata(row)?,
        importance_score: row.try_get("importance_score")?,
    })
}

fn row_to_conversation_entry(row: &SqliteRow) -> Result<ConversationEntry> {
    let role: String = row.try_get("role")?;

    Ok(ConversationEntry {
        id: Some(row.try_get("id")?),
        agent_id: row.try_get("agent_id")?,
        session_id: row.try_get("session_id")?,
        role: role.parse::<Role>().map_err(MemoryError::Serialization)?,
        content: row.try_get("content")?,
        timestamp: row.try_get("timestamp")?,
        importance_score: row.try_get("importance_score")?,
    })
}

fn row_to_agent_state(row: &SqliteRow) -> Result<AgentState> {
    let state_data: String = row.try_get("state_data")?;

    Ok(AgentState {
        agent_id: row.try_get("agent_id")?,
        session_id: row.try_get("session_id")?,
        state_data: serde_json::from_str(&state_data)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_memory(row: &SqliteRow) -> Result<MemoryRecord> {
    let memory_type: String = row.try_get("memory_type")?;

    Ok(MemoryRecord {
        id: Some(row.try_get("id")?),
        agent_id: row.try_get("agent_id")?,
        session_id: row.try_get("session_id")?,
        memory_type: memory_type.parse().map_err(MemoryError::Serialization)?,
        content: row.try_get("content")?,
        search_text: row.try_get("search_text")?,
        importance_score: row.try_get("importance_score")?,
        access_count: row.try_get("access_count")?,
        last_accessed: row.try_get("last_accessed")?,
        created_at: row.try_get("created_at")?,
        metadata: parse_metadata(row)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::tempdir;

    async fn store_with_session(session_id: &str) -> Arc<MemoryStore> {
        let store = MemoryStore::in_memory().await.unwrap();
        store
            .create_session(&Session::new(session_id, Metadata::new()))
            .await
            .unwrap();
        store
    }

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_session_round_trip_and_merge() {
        let store = MemoryStore::in_memory().await.unwrap();
        let session = Session::new("s1", metadata(json!({"topic": "deploy", "n": 1})));
        store.create_session(&session).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.metadata, session.metadata);
        assert!(store.get_session("missing").await.unwrap().is_none());

        let updated = store
            .update_session("s1", &metadata(json!({"n": 2, "owner": "ops"})))
            .await
            .unwrap();
        assert_eq!(updated.metadata, metadata(json!({"topic": "deploy", "n": 2, "owner": "ops"})));
        assert!(updated.last_active >= loaded.last_active);

        let reloaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(reloaded.metadata, updated.metadata);

        let err = store.update_session("missing", &Metadata::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_sessions_order_and_paging() {
        let store = MemoryStore::in_memory().await.unwrap();
        let base = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut session = Session::new(*id, Metadata::new());
            session.created_at = base + Duration::seconds(i as i64);
            session.last_active = base - Duration::seconds(i as i64);
            store.create_session(&session).await.unwrap();
        }

        let ids = |sessions: Vec<Session>| sessions.into_iter().map(|s| s.id).collect::<Vec<_>>();

        let by_created = store.list_sessions(10, 0, SessionOrder::CreatedAt).await.unwrap();
        assert_eq!(ids(by_created), vec!["c", "b", "a"]);

        let by_active = store.list_sessions(10, 0, SessionOrder::LastActive).await.unwrap();
        assert_eq!(ids(by_active), vec!["a", "b", "c"]);

        let page = store.list_sessions(1, 1, SessionOrder::CreatedAt).await.unwrap();
        assert_eq!(ids(page), vec!["b"]);
    }

    #[tokio::test]
    async fn test_messages_filter_and_count() {
        let store = store_with_session("s1").await;
        let base = Utc::now();
        for (i, sender) in ["alice", "bot", "alice"].iter().enumerate() {
            let mut message = StoredMessage::new("s1", *sender, format!("message {i}"), MessageKind::User);
            message.timestamp = base + Duration::seconds(i as i64);
            store.store_message(&message).await.unwrap();
        }

        assert_eq!(store.get_message_count("s1").await.unwrap(), 3);

        let all = store.get_messages("s1", None, 0, None).await.unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 0", "message 1", "message 2"]);

        let from_alice = store.get_messages("s1", None, 0, Some("alice")).await.unwrap();
        assert_eq!(from_alice.len(), 2);

        let paged = store.get_messages("s1", Some(1), 1, None).await.unwrap();
        assert_eq!(paged[0].content, "message 1");
    }

    #[tokio::test]
    async fn test_message_requires_existing_session() {
        let store = MemoryStore::in_memory().await.unwrap();
        let message = StoredMessage::new("nope", "alice", "hi", MessageKind::User);
        assert!(store.store_message(&message).await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_history_limit_keeps_latest() {
        let store = store_with_session("s1").await;
        let base = Utc::now();
        for i in 0..5 {
            let mut entry = ConversationEntry::new("agent", "s1", Role::User, format!("turn {i}"));
            entry.timestamp = base + Duration::seconds(i);
            entry.importance_score = if i == 3 { 0.1 } else { 0.6 };
            store.store_conversation_entry(&entry).await.unwrap();
        }

        let last_two = store
            .get_conversation_history("agent", "s1", Some(2), 0.0)
            .await
            .unwrap();
        let contents: Vec<_> = last_two.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4"]);

        let important = store
            .get_conversation_history("agent", "s1", None, 0.5)
            .await
            .unwrap();
        assert_eq!(important.len(), 4);

        let ids: Vec<i64> = important.iter().filter_map(|e| e.id).take(2).collect();
        assert_eq!(
            store.delete_conversation_entries("agent", "s1", Some(&ids)).await.unwrap(),
            2
        );
        assert_eq!(
            store.delete_conversation_entries("agent", "s1", None).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_agent_state_round_trip() {
        let store = store_with_session("s1").await;
        assert!(store.load_agent_state("agent", "s1").await.unwrap().is_none());

        let state = AgentState {
            agent_id: "agent".into(),
            session_id: "s1".into(),
            state_data: json!({"step": 3, "plan": ["a", "b"]}),
            updated_at: Utc::now(),
        };
        store.save_agent_state(&state).await.unwrap();

        let replaced = AgentState {
            state_data: json!({"step": 4}),
            ..state
        };
        store.save_agent_state(&replaced).await.unwrap();

        let loaded = store.load_agent_state("agent", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.state_data, json!({"step": 4}));
    }

    #[tokio::test]
    async fn test_session_delete_cascades_except_memories() {
        let store = store_with_session("s1").await;
        store
            .store_message(&StoredMessage::new("s1", "alice", "hello", MessageKind::User))
            .await
            .unwrap();
        store
            .store_conversation_entry(&ConversationEntry::new("agent", "s1", Role::User, "hello"))
            .await
            .unwrap();
        store
            .save_agent_state(&AgentState {
                agent_id: "agent".into(),
                session_id: "s1".into(),
                state_data: json!({}),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let memory_id = store
            .store_memory(&MemoryRecord::new("agent", "s1", MemoryType::Semantic, "deploy on fridays"))
            .await
            .unwrap();

        assert!(store.delete_session("s1").await.unwrap());
        assert!(!store.delete_session("s1").await.unwrap());

        assert_eq!(store.get_message_count("s1").await.unwrap(), 0);
        assert!(store
            .get_conversation_history("agent", "s1", None, 0.0)
            .await
            .unwrap()
            .is_empty());
        assert!(store.load_agent_state("agent", "s1").await.unwrap().is_none());
        assert!(store.get_memory(memory_id).await.unwrap().is_some());

        assert_eq!(store.delete_session_memories("agent", "s1").await.unwrap(), 1);
        assert!(store.get_memory(memory_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_and_retrieve_memory() {
        let store = MemoryStore::in_memory().await.unwrap();
        let record = MemoryRecord::new("agent", "s1", MemoryType::Semantic, "The database is PostgreSQL")
            .with_importance(0.8);
        let id = store.store_memory(&record).await.unwrap();

        let found = store
            .retrieve_memories(&MemoryQuery::new("agent", "database"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
        assert_eq!(found[0].content, record.content);
        assert_eq!(found[0].importance_score, 0.8);
        assert_eq!(found[0].access_count, 0);

        // other agent, wrong type, too strict, blank query
        for query in [
            MemoryQuery::new("other", "database"),
            MemoryQuery::new("agent", "database").with_type(Some(MemoryType::Episodic)),
            MemoryQuery::new("agent", "database").min_importance(0.9),
            MemoryQuery::new("agent", "  "),
        ] {
            assert!(store.retrieve_memories(&query).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_importance_then_recency() {
        let store = MemoryStore::in_memory().await.unwrap();
        let base = Utc::now();
        let specs = [("low", 0.3, 0), ("high old", 0.9, 0), ("high new", 0.9, 10)];
        for (tag, importance, offset) in specs {
            let mut record = MemoryRecord::new("agent", "s1", MemoryType::Episodic, format!("release notes {tag}"))
                .with_importance(importance);
            record.created_at = base + Duration::seconds(offset);
            store.store_memory(&record).await.unwrap();
        }

        let found = store
            .retrieve_memories(&MemoryQuery::new("agent", "release").limit(2))
            .await
            .unwrap();
        let contents: Vec<_> = found.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["release notes high new", "release notes high old"]);

        let scoped = store
            .retrieve_memories(&MemoryQuery::new("agent", "release").in_session("s2"))
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn test_update_access_and_metadata() {
        let store = MemoryStore::in_memory().await.unwrap();
        let id = store
            .store_memory(&MemoryRecord::new("agent", "s1", MemoryType::Semantic, "fact"))
            .await
            .unwrap();

        assert!(store.update_memory_access(id).await.unwrap());
        assert!(store.update_memory_access(id).await.unwrap());
        assert!(!store.update_memory_access(id + 100).await.unwrap());

        store
            .update_memory_metadata(id, &metadata(json!({"source": "chat"})))
            .await
            .unwrap();

        let loaded = store.get_memory(id).await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.last_accessed.is_some());
        assert_eq!(loaded.metadata, metadata(json!({"source": "chat"})));

        let err = store
            .update_memory_metadata(id + 100, &Metadata::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_memories_is_scoped_to_agent() {
        let store = MemoryStore::in_memory().await.unwrap();
        let mine = store
            .store_memory(&MemoryRecord::new("me", "s1", MemoryType::Semantic, "shared keyword"))
            .await
            .unwrap();
        let theirs = store
            .store_memory(&MemoryRecord::new("them", "s1", MemoryType::Semantic, "shared keyword"))
            .await
            .unwrap();

        assert_eq!(store.delete_memories("me", &[mine, theirs]).await.unwrap(), 1);

        assert!(store.get_memory(mine).await.unwrap().is_none());
        assert!(store.get_memory(theirs).await.unwrap().is_some());
        let left = store
            .retrieve_memories(&MemoryQuery::new("them", "keyword"))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(store.delete_memories("me", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_with_many_matches_from_other_agents() {
        let store = MemoryStore::in_memory().await.unwrap();
        sqlx::query(
            r#"
            WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < ?)
            INSERT INTO memories (
                agent_id, session_id, memory_type, content, search_text, importance_score,
                access_count, last_accessed, created_at, metadata
            )
            SELECT 'other', 's1', 'episodic', 'shared deploy note', 'shared deploy note', 0.5,
                   0, NULL, ?, '{}'
            FROM n
            "#,
        )
        .bind(32_999_i64)
        .bind(Utc::now())
        .execute(store.pool())
        .await
        .unwrap();
        let mine = store
            .store_memory(&MemoryRecord::new("me", "s1", MemoryType::Episodic, "shared deploy note"))
            .await
            .unwrap();
        assert_eq!(store.reindex_all().await.unwrap(), 33_000);

        let found = store
            .retrieve_memories(&MemoryQuery::new("me", "deploy").limit(5))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(mine));

        let theirs = store
            .retrieve_memories(&MemoryQuery::new("other", "deploy").limit(5))
            .await
            .unwrap();
        assert_eq!(theirs.len(), 5);
        assert!(theirs.iter().all(|m| m.agent_id == "other"));
    }

    #[tokio::test]
    async fn test_failed_index_write_rolls_back_row() {
        let store = MemoryStore::in_memory().await.unwrap();
        store.index.poison_writer();

        let err = store
            .store_memory(&MemoryRecord::new("agent", "s1", MemoryType::Semantic, "never kept"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SearchIndex(_)));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(store.get_memory(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_survives_failed_index_cleanup() {
        let store = MemoryStore::in_memory().await.unwrap();
        let id = store
            .store_memory(&MemoryRecord::new("agent", "s1", MemoryType::Semantic, "stale keyword"))
            .await
            .unwrap();
        store.index.poison_writer();

        assert_eq!(store.delete_memories("agent", &[id]).await.unwrap(), 1);
        assert!(store.get_memory(id).await.unwrap().is_none());
        let found = store
            .retrieve_memories(&MemoryQuery::new("agent", "keyword"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = tempdir().unwrap();
        let id = {
            let store = MemoryStore::open(dir.path()).await.unwrap();
            store
                .store_memory(&MemoryRecord::new("agent", "s1", MemoryType::Semantic, "persistent fact about kafka"))
                .await
                .unwrap()
        };

        let store = MemoryStore::open(dir.path()).await.unwrap();
        let found = store
            .retrieve_memories(&MemoryQuery::new("agent", "kafka"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
    }
}
