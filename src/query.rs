//! Keyword extraction and memory retrieval for agents
//!
//! `QueryEngine` turns free text into index queries; `MemoryRetriever` picks
//! the memories worth injecting while an agent handles a message.

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::manager::MemoryManager;
use crate::store::MemoryQuery;
use crate::types::{MemoryRecord, MemoryType};
use std::collections::HashMap;
use std::sync::Arc;

/// Words never used as keywords
pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "can", "i", "you", "he",
    "she", "it", "we", "they", "what", "which", "who", "when", "where", "why", "how", "this",
    "that", "these", "those",
];

/// Keywords must be longer than this many characters
const MIN_KEYWORD_CHARS: usize = 3;

/// Full-text search over an agent's memories
#[derive(Debug, Clone)]
pub struct QueryEngine {
    manager: Arc<MemoryManager>,
    config: RetrievalConfig,
}

impl QueryEngine {
    pub fn new(manager: Arc<MemoryManager>, config: RetrievalConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Most frequent non stop-word tokens, ties broken by first occurrence
    pub fn extract_keywords(text: &str, top_k: usize) -> Vec<String> {
        let lower = text.to_lowercase();

        let mut counts: Vec<(&str, usize)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        let words = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| w.chars().count() > MIN_KEYWORD_CHARS && !STOP_WORDS.contains(w));

        for word in words {
            match positions.get(word) {
                Some(&pos) => counts[pos].1 += 1,
                None => {
                    positions.insert(word, counts.len());
                    counts.push((word, 1));
                }
            }
        }

        // stable: equal counts keep first-occurrence order
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
            .into_iter()
            .take(top_k)
            .map(|(word, _)| word.to_string())
            .collect()
    }

    /// Normalize free text into a safe index query
    ///
    /// Lowercases, replaces anything but `[a-z0-9]`, whitespace and `-` with a
    /// space and collapses whitespace. Hyphens survive only inside words so
    /// they never turn into exclusion operators.
    pub fn preprocess_query(query: &str) -> String {
        let cleaned: String = query
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        cleaned
            .split_whitespace()
            .map(|token| token.trim_matches('-'))
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Search memories whose text contains every query term
    pub async fn search(
        &self,
        agent_id: &str,
        query: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
        min_importance: f32,
    ) -> Result<Vec<MemoryRecord>> {
        let processed = Self::preprocess_query(query);
        self.run(
            MemoryQuery::new(agent_id, processed)
                .with_type(memory_type)
                .limit(limit)
                .min_importance(min_importance),
        )
        .await
    }

    /// Search memories containing any of the keywords
    pub async fn search_by_keywords(
        &self,
        agent_id: &str,
        keywords: &[String],
        memory_type: Option<MemoryType>,
        limit: usize,
        min_importance: f32,
    ) -> Result<Vec<MemoryRecord>> {
        let text = keywords
            .iter()
            .map(|k| Self::preprocess_query(k))
            .filter(|k| !k.is_empty())
            .map(|k| {
                if k.contains(' ') {
                    format!("({})", k)
                } else {
                    k
                }
            })
            .collect::<Vec<_>>()
            .join(" OR ");

        self.run(
            MemoryQuery::new(agent_id, text)
                .with_type(memory_type)
                .limit(limit)
                .min_importance(min_importance),
        )
        .await
    }

    /// Search within one session using the recent-memory importance floor
    pub async fn search_recent(
        &self,
        agent_id: &str,
        query: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let processed = Self::preprocess_query(query);
        self.run(
            MemoryQuery::new(agent_id, processed)
                .in_session(session_id)
                .limit(limit)
                .min_importance(self.config.recent_min_importance),
        )
        .await
    }

    async fn run(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>> {
        if query.text.is_empty() {
            return Ok(Vec::new());
        }
        self.manager.retrieve_memories(&query).await
    }
}

/// Picks memories to surface for an agent's current turn
#[derive(Debug, Clone)]
pub struct MemoryRetriever {
    engine: QueryEngine,
}

impl MemoryRetriever {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Memories relevant to an incoming message
    ///
    /// Uses the message's keywords; a message without any falls back to a
    /// search on its raw text.
    pub async fn retrieve_for_message(
        &self,
        agent_id: &str,
        message: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let config = self.engine.config();
        let keywords = QueryEngine::extract_keywords(message, config.keyword_count);

        let memories = if keywords.is_empty() {
            self.engine
                .search(agent_id, message, None, limit, config.message_min_importance)
                .await?
        } else {
            self.engine
                .search_by_keywords(agent_id, &keywords, None, limit, config.message_min_importance)
                .await?
        };

        tracing::debug!(
            agent_id,
            session_id,
            keywords = keywords.len(),
            retrieved = memories.len(),
            "Retrieved memories for message"
        );
        Ok(memories)
    }

    /// Facts and knowledge
    pub async fn retrieve_semantic_memories(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let floor = self.engine.config().semantic_min_importance;
        self.engine
            .search(agent_id, query, Some(MemoryType::Semantic), limit, floor)
            .await
    }

    /// Past interactions
    pub async fn retrieve_episodic_memories(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let floor = self.engine.config().episodic_min_importance;
        self.engine
            .search(agent_id, query, Some(MemoryType::Episodic), limit, floor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn retriever() -> (Arc<MemoryManager>, MemoryRetriever) {
        let store = MemoryStore::in_memory().await.unwrap();
        let manager = Arc::new(MemoryManager::new(store));
        let engine = QueryEngine::new(Arc::clone(&manager), RetrievalConfig::default());
        (manager, MemoryRetriever::new(engine))
    }

    #[test]
    fn test_extract_keywords_scenario() {
        let keywords = QueryEngine::extract_keywords(
            "I'm working on a project that uses a database and needs API endpoints",
            5,
        );
        assert_eq!(keywords, vec!["working", "project", "uses", "database", "needs"]);
    }

    #[test]
    fn test_extract_keywords_ranks_by_frequency() {
        let keywords =
            QueryEngine::extract_keywords("Deploy the cache. Cache warmup, then deploy cache again", 3);
        assert_eq!(keywords, vec!["cache", "deploy", "warmup"]);

        assert!(QueryEngine::extract_keywords("", 5).is_empty());
        assert!(QueryEngine::extract_keywords("ok??", 5).is_empty());
        assert!(QueryEngine::extract_keywords("what would they have been", 5).is_empty());
    }

    #[test]
    fn test_preprocess_query() {
        assert_eq!(QueryEngine::preprocess_query("Hello, World!"), "hello world");
        assert_eq!(QueryEngine::preprocess_query("  ok??  "), "ok");
        assert_eq!(QueryEngine::preprocess_query("re-run the job -- now"), "re-run the job now");
        assert_eq!(QueryEngine::preprocess_query("?!"), "");
    }

    #[tokio::test]
    async fn test_store_then_search_by_content_keyword() {
        let (manager, retriever) = retriever().await;
        let id = manager
            .remember("agent", "s1", "The billing service runs on Postgres", MemoryType::Semantic, 0.8)
            .await
            .unwrap();

        let found = retriever
            .engine()
            .search("agent", "BILLING?", None, 10, 0.0)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
        assert_eq!(found[0].access_count, 1);

        let again = retriever
            .engine()
            .search("agent", "postgres", None, 10, 0.0)
            .await
            .unwrap();
        assert_eq!(again[0].access_count, 2);
    }

    #[tokio::test]
    async fn test_keyword_search_matches_any_keyword() {
        let (manager, retriever) = retriever().await;
        manager
            .remember("agent", "s1", "Schema migrations run nightly", MemoryType::Episodic, 0.6)
            .await
            .unwrap();
        manager
            .remember("agent", "s1", "Endpoints are documented in the wiki", MemoryType::Episodic, 0.6)
            .await
            .unwrap();

        let keywords = vec!["migrations".to_string(), "endpoints".to_string()];
        let found = retriever
            .engine()
            .search_by_keywords("agent", &keywords, None, 10, 0.0)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let none = retriever
            .engine()
            .search_by_keywords("agent", &[], None, 10, 0.0)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_for_message_uses_keywords_and_floor() {
        let (manager, retriever) = retriever().await;
        manager
            .remember("agent", "s1", "The database is Postgres 16", MemoryType::Semantic, 0.9)
            .await
            .unwrap();
        manager
            .remember("agent", "s1", "Database backups are weekly", MemoryType::Episodic, 0.2)
            .await
            .unwrap();

        let found = retriever
            .retrieve_for_message("agent", "Which database should the new service use?", "s1", 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "The database is Postgres 16");
    }

    #[tokio::test]
    async fn test_retrieve_for_message_falls_back_to_raw_text() {
        let (manager, retriever) = retriever().await;
        manager
            .remember("agent", "s1", "User replied ok to the rollout plan", MemoryType::Episodic, 0.5)
            .await
            .unwrap();

        let found = retriever
            .retrieve_for_message("agent", "ok??", "s1", 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_search_recent_is_session_scoped() {
        let (manager, retriever) = retriever().await;
        manager
            .remember("agent", "current", "Retry budget raised to five", MemoryType::Working, 0.5)
            .await
            .unwrap();
        manager
            .remember("agent", "older", "Retry budget was three", MemoryType::Working, 0.5)
            .await
            .unwrap();
        manager
            .remember("agent", "current", "Retry logic rewritten", MemoryType::Working, 0.2)
            .await
            .unwrap();

        let found = retriever
            .engine()
            .search_recent("agent", "retry", "current", 5)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "Retry budget raised to five");
    }

    #[tokio::test]
    async fn test_typed_retrieval_floors() {
        let (manager, retriever) = retriever().await;
        manager
            .remember("agent", "s1", "Kafka topic retention is seven days", MemoryType::Semantic, 0.45)
            .await
            .unwrap();
        manager
            .remember("agent", "s1", "Discussed kafka lag with the user", MemoryType::Episodic, 0.45)
            .await
            .unwrap();

        let semantic = retriever
            .retrieve_semantic_memories("agent", "kafka", 5)
            .await
            .unwrap();
        assert!(semantic.is_empty());

        let episodic = retriever
            .retrieve_episodic_memories("agent", "kafka", 5)
            .await
            .unwrap();
        assert_eq!(episodic.len(), 1);
        assert_eq!(episodic[0].memory_type, MemoryType::Episodic);
    }
}
