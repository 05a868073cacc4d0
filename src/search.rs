//! Full-text index over memory text, powered by Tantivy
//!
//! The index answers "which of this agent's memory ids match this query";
//! importance filtering, ordering and the records themselves come from SQLite.

use crate::error::{MemoryError, Result};
use crate::types::{MemoryId, MemoryType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tantivy::collector::DocSetCollector;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, DocId, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

/// Heap for the single indexing thread
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// One memory as it goes into the index
#[derive(Debug, Clone)]
pub struct IndexedText {
    pub id: MemoryId,
    pub agent_id: String,
    pub session_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub search_text: String,
}

/// Exact-match scope applied inside the index
#[derive(Debug, Clone, Copy)]
pub struct IndexFilter<'a> {
    pub agent_id: &'a str,
    pub memory_type: Option<MemoryType>,
    pub session_id: Option<&'a str>,
}

impl<'a> IndexFilter<'a> {
    pub fn agent(agent_id: &'a str) -> Self {
        Self {
            agent_id,
            memory_type: None,
            session_id: None,
        }
    }
}

/// Tantivy schema field handles
#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    agent_id: Field,
    session_id: Field,
    memory_type: Field,
    content: Field,
    search_text: Field,
}

/// Full-text memory index
pub struct MemoryIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("index", &"<TantivyIndex>")
            .finish()
    }
}

impl MemoryIndex {
    /// Build the Tantivy schema for memory indexing
    fn build_schema() -> (Schema, SchemaFields) {
        let mut schema_builder = Schema::builder();

        let id = schema_builder.add_i64_field("id", INDEXED | STORED | FAST);
        let agent_id = schema_builder.add_text_field("agent_id", STRING);
        let session_id = schema_builder.add_text_field("session_id", STRING);
        let memory_type = schema_builder.add_text_field("memory_type", STRING);
        let content = schema_builder.add_text_field("content", TEXT);
        let search_text = schema_builder.add_text_field("search_text", TEXT);

        let schema = schema_builder.build();
        let fields = SchemaFields {
            id,
            agent_id,
            session_id,
            memory_type,
            content,
            search_text,
        };

        (schema, fields)
    }

    /// Open or create an index under `index_dir/search_index`
    pub fn open_in_dir(index_dir: impl AsRef<Path>) -> Result<Self> {
        let (schema, fields) = Self::build_schema();
        let index_path = index_dir.as_ref().join("search_index");
        std::fs::create_dir_all(&index_path)
            .map_err(|e| MemoryError::SearchIndex(format!("Failed to create index dir: {}", e)))?;

        let index = Index::create_in_dir(&index_path, schema.clone())
            .or_else(|_| Index::open_in_dir(&index_path))
            .map_err(|e| MemoryError::SearchIndex(format!("Failed to open index: {}", e)))?;

        Self::from_index(index, fields)
    }

    /// Create an index held in RAM
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = Self::build_schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    fn from_index(index: Index, fields: SchemaFields) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| MemoryError::SearchIndex(format!("Failed to create reader: {}", e)))?;

        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| MemoryError::SearchIndex(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::SearchIndex("Index writer lock poisoned".to_string()))
    }

    /// Apply `op` and commit; pending operations are rolled back on failure
    fn commit_with<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> tantivy::Result<()>,
    {
        let mut writer = self.lock_writer()?;

        let outcome = op(&mut writer).and_then(|_| writer.commit().map(|_| ()));
        if let Err(e) = outcome {
            if let Err(rollback_err) = writer.rollback() {
                tracing::warn!("Index rollback failed: {}", rollback_err);
            }
            return Err(MemoryError::SearchIndex(format!("Failed to commit: {}", e)));
        }
        drop(writer);

        self.reader
            .reload()
            .map_err(|e| MemoryError::SearchIndex(format!("Failed to reload reader: {}", e)))
    }

    /// Index one memory (replacing any document with the same id)
    pub fn add(&self, text: &IndexedText) -> Result<()> {
        let fields = self.fields;
        self.commit_with(|writer| {
            writer.delete_term(Term::from_field_i64(fields.id, text.id));
            writer.add_document(fields.document(text))?;
            Ok(())
        })
    }

    /// Remove documents by memory id
    pub fn remove(&self, ids: &[MemoryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let fields = self.fields;
        self.commit_with(|writer| {
            for id in ids {
                writer.delete_term(Term::from_field_i64(fields.id, *id));
            }
            Ok(())
        })
    }

    /// Replace the whole index with the given documents
    pub fn rebuild(&self, texts: &[IndexedText]) -> Result<usize> {
        let fields = self.fields;
        self.commit_with(|writer| {
            writer.delete_all_documents()?;
            for text in texts {
                writer.add_document(fields.document(text))?;
            }
            Ok(())
        })?;

        tracing::info!("Reindexed {} memories", texts.len());
        Ok(texts.len())
    }

    /// Ids of the memories in `filter`'s scope matching `query`, ascending
    ///
    /// Space separated terms must all match; `OR` between terms makes
    /// either sufficient. Blank queries match nothing.
    pub fn search(&self, query: &str, filter: &IndexFilter<'_>) -> Result<Vec<MemoryId>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.content, self.fields.search_text]);
        parser.set_conjunction_by_default();

        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(query, errors = errors.len(), "Lenient query parse dropped parts");
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Must, parsed),
            (Occur::Must, exact(self.fields.agent_id, filter.agent_id)),
        ];
        if let Some(memory_type) = filter.memory_type {
            clauses.push((Occur::Must, exact(self.fields.memory_type, &memory_type.to_string())));
        }
        if let Some(session_id) = filter.session_id {
            clauses.push((Occur::Must, exact(self.fields.session_id, session_id)));
        }
        let scoped = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let addresses = searcher
            .search(&scoped, &DocSetCollector)
            .map_err(|e| MemoryError::SearchIndex(format!("Search failed: {}", e)))?;

        let mut by_segment: BTreeMap<u32, Vec<DocId>> = BTreeMap::new();
        for address in addresses {
            by_segment
                .entry(address.segment_ord)
                .or_default()
                .push(address.doc_id);
        }

        let mut ids = Vec::new();
        for (segment_ord, docs) in by_segment {
            let column = searcher
                .segment_reader(segment_ord)
                .fast_fields()
                .i64("id")?;
            ids.extend(docs.into_iter().filter_map(|doc| column.first(doc)));
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Number of indexed documents
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Leave the writer lock poisoned so every later write fails
    #[cfg(test)]
    pub(crate) fn poison_writer(&self) {
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = self.writer.lock();
                    panic!("index writer poisoned for test");
                })
                .join()
        });
    }
}

impl SchemaFields {
    fn document(&self, text: &IndexedText) -> TantivyDocument {
        doc!(
            self.id => text.id,
            self.agent_id => text.agent_id.as_str(),
            self.session_id => text.session_id.as_str(),
            self.memory_type => text.memory_type.to_string(),
            self.content => text.content.as_str(),
            self.search_text => text.search_text.as_str(),
        )
    }
}

/// Untokenized exact match on a STRING field
fn exact(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(id: MemoryId, agent_id: &str, content: &str) -> IndexedText {
        IndexedText {
            id,
            agent_id: agent_id.to_string(),
            session_id: "s1".to_string(),
            memory_type: MemoryType::Episodic,
            content: content.to_string(),
            search_text: content.to_string(),
        }
    }

    fn search(index: &MemoryIndex, query: &str) -> Vec<MemoryId> {
        index.search(query, &IndexFilter::agent("agent")).unwrap()
    }

    #[test]
    fn test_add_and_search() {
        let index = MemoryIndex::in_memory().unwrap();
        index.add(&text(1, "agent", "The project uses a PostgreSQL database")).unwrap();
        index.add(&text(2, "agent", "API endpoints are versioned")).unwrap();

        assert_eq!(search(&index, "database"), vec![1]);
        assert_eq!(search(&index, "database OR endpoints"), vec![1, 2]);
        assert!(search(&index, "database endpoints").is_empty());
        assert!(search(&index, "   ").is_empty());
        assert_eq!(index.num_docs(), 2);
    }

    #[test]
    fn test_search_is_scoped() {
        let index = MemoryIndex::in_memory().unwrap();
        index.add(&text(1, "agent", "shared deploy note")).unwrap();
        index.add(&text(2, "other", "shared deploy note")).unwrap();
        let mut semantic = text(3, "agent", "deploy checklist");
        semantic.memory_type = MemoryType::Semantic;
        semantic.session_id = "s2".to_string();
        index.add(&semantic).unwrap();

        assert_eq!(search(&index, "deploy"), vec![1, 3]);
        assert_eq!(
            index.search("deploy", &IndexFilter::agent("other")).unwrap(),
            vec![2]
        );

        let typed = IndexFilter {
            memory_type: Some(MemoryType::Semantic),
            ..IndexFilter::agent("agent")
        };
        assert_eq!(index.search("deploy", &typed).unwrap(), vec![3]);

        let in_session = IndexFilter {
            session_id: Some("s1"),
            ..IndexFilter::agent("agent")
        };
        assert_eq!(index.search("deploy", &in_session).unwrap(), vec![1]);
    }

    #[test]
    fn test_search_text_is_indexed() {
        let index = MemoryIndex::in_memory().unwrap();
        let mut memory = text(7, "agent", "short");
        memory.search_text = "kubernetes rollout notes".to_string();
        index.add(&memory).unwrap();
        assert_eq!(search(&index, "kubernetes"), vec![7]);
    }

    #[test]
    fn test_remove_and_rebuild() {
        let index = MemoryIndex::in_memory().unwrap();
        index.add(&text(1, "agent", "alpha beta")).unwrap();
        index.add(&text(2, "agent", "alpha gamma")).unwrap();

        index.remove(&[1]).unwrap();
        assert_eq!(search(&index, "alpha"), vec![2]);

        index.rebuild(&[text(3, "agent", "alpha delta")]).unwrap();
        assert_eq!(search(&index, "alpha"), vec![3]);
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_reindexing_same_id_replaces_document() {
        let index = MemoryIndex::in_memory().unwrap();
        index.add(&text(1, "agent", "old wording")).unwrap();
        index.add(&text(1, "agent", "new wording")).unwrap();

        assert!(search(&index, "old").is_empty());
        assert_eq!(search(&index, "wording"), vec![1]);
    }

    #[test]
    fn test_poisoned_writer_rejects_writes() {
        let index = MemoryIndex::in_memory().unwrap();
        index.poison_writer();

        let err = index.add(&text(1, "agent", "never indexed")).unwrap_err();
        assert!(matches!(err, MemoryError::SearchIndex(_)));
        assert!(search(&index, "indexed").is_empty());
    }
}
