//! Configuration for the memory system

use crate::context::ContextConfig;
use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result sizes and importance floors used by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Limit for plain searches
    pub default_limit: usize,
    /// Memories surfaced per incoming message
    pub message_limit: usize,
    /// Keywords extracted from an incoming message
    pub keyword_count: usize,
    pub message_min_importance: f32,
    pub recent_min_importance: f32,
    pub semantic_min_importance: f32,
    pub episodic_min_importance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            message_limit: 3,
            keyword_count: 5,
            message_min_importance: 0.4,
            recent_min_importance: 0.3,
            semantic_min_importance: 0.5,
            episodic_min_importance: 0.4,
        }
    }
}

/// Builder for retrieval configuration
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
        }
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.config.default_limit = limit;
        self
    }

    pub fn message_limit(mut self, limit: usize) -> Self {
        self.config.message_limit = limit;
        self
    }

    pub fn keyword_count(mut self, count: usize) -> Self {
        self.config.keyword_count = count;
        self
    }

    pub fn message_min_importance(mut self, floor: f32) -> Self {
        self.config.message_min_importance = floor;
        self
    }

    pub fn build(self) -> RetrievalConfig {
        self.config
    }
}

impl Default for RetrievalConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySystemConfig {
    /// Directory holding the database and the search index
    pub data_dir: PathBuf,
    pub context: ContextConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for MemorySystemConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/memory"),
            context: ContextConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl MemorySystemConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            MemoryError::Configuration(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets that leave no room for any message
    pub fn validate(&self) -> Result<()> {
        if self.context.buffer_tokens >= self.context.max_tokens {
            return Err(MemoryError::Configuration(format!(
                "buffer_tokens ({}) must be smaller than max_tokens ({})",
                self.context.buffer_tokens, self.context.max_tokens
            )));
        }
        Ok(())
    }
}
