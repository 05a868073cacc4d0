//! Conversation and memory data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Identifier assigned to a memory record by the store
pub type MemoryId = i64;

/// Unique identifier for sessions/conversations
pub type SessionId = String;

/// Free-form JSON metadata attached to sessions, messages and memories
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Role of a message in an LLM conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single conversation message handed to the context manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Memory tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Current conversation context (auto-managed)
    Working,
    /// Specific past interactions
    #[default]
    Episodic,
    /// Extracted facts and knowledge
    Semantic,
}

impl MemoryType {
    /// All memory types
    pub const ALL: &[MemoryType] = &[
        MemoryType::Working,
        MemoryType::Episodic,
        MemoryType::Semantic,
    ];
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Working => write!(f, "working"),
            MemoryType::Episodic => write!(f, "episodic"),
            MemoryType::Semantic => write!(f, "semantic"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "working" => Ok(MemoryType::Working),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

/// A persisted, independently retrievable fact or past interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    /// Assigned by the store; `None` until stored
    pub id: Option<MemoryId>,
    pub agent_id: String,
    pub session_id: SessionId,
    pub memory_type: MemoryType,
    pub content: String,
    /// Text indexed for search (defaults to the content)
    pub search_text: String,
    /// Importance score (0.0 - 1.0)
    pub importance_score: f32,
    /// Number of times returned by a retrieval
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl MemoryRecord {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<SessionId>,
        memory_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: None,
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            memory_type,
            search_text: content.clone(),
            content,
            importance_score: 0.5,
            access_count: 0,
            last_accessed: None,
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Set importance; out-of-range values are clamped
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance_score = clamp_importance(importance);
        self
    }

    /// Index different text than the content
    pub fn with_search_text(mut self, search_text: impl Into<String>) -> Self {
        self.search_text = search_text.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Clamp an importance score into `[0.0, 1.0]`; NaN becomes 0.0
pub fn clamp_importance(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// One conversation (router-level session)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, metadata: Metadata) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active: now,
            metadata,
        }
    }

    /// Generate a fresh session identifier
    pub fn generate_id() -> SessionId {
        Uuid::new_v4().to_string()
    }
}

/// Kind of a routed message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    #[default]
    Agent,
    System,
    Broadcast,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::User => write!(f, "user"),
            MessageKind::Agent => write!(f, "agent"),
            MessageKind::System => write!(f, "system"),
            MessageKind::Broadcast => write!(f, "broadcast"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageKind::User),
            "agent" => Ok(MessageKind::Agent),
            "system" => Ok(MessageKind::System),
            "broadcast" => Ok(MessageKind::Broadcast),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A raw message as routed between agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub importance_score: f32,
}

impl StoredMessage {
    pub fn new(
        session_id: impl Into<SessionId>,
        sender: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
            sender: sender.into(),
            recipient: None,
            content: content.into(),
            metadata: Metadata::new(),
            importance_score: 0.5,
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// One turn of an agent's LLM conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    /// Assigned by the store; `None` until stored
    pub id: Option<i64>,
    pub agent_id: String,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub importance_score: f32,
}

impl ConversationEntry {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<SessionId>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            importance_score: 0.5,
        }
    }

    /// The entry as a context-manager message
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Opaque agent state persisted per `(agent_id, session_id)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub agent_id: String,
    pub session_id: SessionId,
    pub state_data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Overview of a session for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: i64,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_round_trips_through_str() {
        for t in MemoryType::ALL {
            assert_eq!(t.to_string().parse::<MemoryType>().unwrap(), *t);
        }
        assert!("fact".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_importance_is_clamped() {
        let record = MemoryRecord::new("a", "s", MemoryType::Semantic, "x").with_importance(3.0);
        assert_eq!(record.importance_score, 1.0);
        let record = record.with_importance(-1.0);
        assert_eq!(record.importance_score, 0.0);
        assert_eq!(clamp_importance(f32::NAN), 0.0);
    }

    #[test]
    fn test_search_text_defaults_to_content() {
        let record = MemoryRecord::new("a", "s", MemoryType::Episodic, "hello world");
        assert_eq!(record.search_text, "hello world");
        assert_eq!(record.access_count, 0);
        assert!(record.id.is_none());
    }

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("User".parse::<Role>().unwrap(), Role::User);
        assert!("tool".parse::<Role>().is_err());
    }
}
