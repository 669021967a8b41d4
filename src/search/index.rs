//! Search index management
//!
//! One Tantivy index exists per (index name, tenant). Writers are opened inside a
//! per-index lease and dropped at its end, so at most one writer touches an index
//! at a time and uncommitted work is discarded when a lease ends early.

use crate::search::config::SearchConfig;
use crate::search::document::{
    autocomplete_tokenizer_name, build_index_schema, EntityRecord, SearchDocument,
};
use crate::search::error::{DocumentFailure, SearchError, SearchResult};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::schema::{validate_path_segment, EntitySearchDescriptor, SchemaRegistry};
use crate::search::source::EntitySource;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::{Display, EnumString};
use tantivy::schema::Schema;
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How a batch is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexMode {
    /// Full rebuild path
    Replace,

    /// Incremental path used by change flushes
    Upsert,
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Index name
    pub index: String,

    /// Total number of live documents
    pub total_documents: u64,

    /// Number of segments
    pub num_segments: usize,

    /// Number of schema fields, hidden companions included
    pub num_fields: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    index: String,
    tenant: Option<String>,
}

/// An open index with its reader and write lease
pub(crate) struct IndexHandle {
    pub(crate) descriptor: Arc<EntitySearchDescriptor>,
    pub(crate) index: Index,
    pub(crate) reader: IndexReader,
    pub(crate) schema: Schema,

    /// `index` or `tenant/index`
    label: String,

    write_lock: Mutex<()>,
}

impl IndexHandle {
    fn writer(&self, config: &SearchConfig) -> SearchResult<IndexWriter> {
        self.index
            .writer_with_num_threads(config.indexing_threads, config.writer_heap_size)
            .map_err(|e| SearchError::index_io(&self.label, e))
    }

    fn commit(&self, writer: &mut IndexWriter) -> SearchResult<()> {
        writer
            .commit()
            .map_err(|e| SearchError::index_io(&self.label, e))?;
        self.reader
            .reload()
            .map_err(|e| SearchError::index_io(&self.label, e))?;
        SEARCH_METRICS.record_commit(self.descriptor.index_name());
        Ok(())
    }

    fn id_term(&self, id: &str) -> SearchResult<Term> {
        let id_field = self
            .schema
            .get_field(self.descriptor.id_field_name())
            .map_err(|e| SearchError::index_io(&self.label, e))?;
        Ok(Term::from_field_text(id_field, id))
    }

    /// Delete-then-add every record; returns the number written and the rejects
    fn write_records(
        &self,
        writer: &mut IndexWriter,
        records: &[EntityRecord],
    ) -> (usize, Vec<DocumentFailure>) {
        let mut indexed = 0;
        let mut failures = Vec::new();

        for record in records {
            match self.write_record(writer, record) {
                Ok(()) => indexed += 1,
                Err(error) => failures.push(DocumentFailure {
                    entity_id: record.id(&self.descriptor),
                    error,
                }),
            }
        }

        (indexed, failures)
    }

    fn write_record(&self, writer: &mut IndexWriter, record: &EntityRecord) -> SearchResult<()> {
        let document = record.map(&self.descriptor)?;
        let tantivy_doc = document.to_tantivy_doc(&self.schema)?;

        writer.delete_term(self.id_term(document.document_id())?);
        writer
            .add_document(tantivy_doc)
            .map_err(|e| SearchError::index_io(&self.label, e))?;
        Ok(())
    }
}

/// Owns index storage and every writer lifecycle
pub struct IndexManager {
    config: SearchConfig,
    registry: Arc<SchemaRegistry>,
    handles: DashMap<IndexKey, Arc<IndexHandle>>,
    open_lock: Mutex<()>,
}

impl IndexManager {
    /// Create a new IndexManager; indices are opened lazily
    pub fn new(config: SearchConfig, registry: Arc<SchemaRegistry>) -> SearchResult<Self> {
        config.validate()?;

        if let Some(root) = &config.index_root {
            std::fs::create_dir_all(root).map_err(|e| {
                SearchError::index_io(root.display().to_string(), e)
            })?;
        }

        Ok(Self {
            config,
            registry,
            handles: DashMap::new(),
            open_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Resolve (and open on first use) the index of an entity type
    pub(crate) async fn handle(
        &self,
        entity_type: &str,
        tenant: Option<&str>,
    ) -> SearchResult<Arc<IndexHandle>> {
        let descriptor = self.registry.require(entity_type)?;
        let key = self.key(&descriptor, tenant)?;

        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }

        let _guard = self.open_lock.lock().await;
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }

        let handle = Arc::new(self.open(descriptor, &key)?);
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    fn key(&self, descriptor: &EntitySearchDescriptor, tenant: Option<&str>) -> SearchResult<IndexKey> {
        let tenant = match tenant {
            Some(tenant) if self.config.per_tenant_isolation => {
                validate_path_segment("tenant", tenant)?;
                Some(tenant.to_string())
            }
            _ => None,
        };

        Ok(IndexKey {
            index: descriptor.index_name().to_string(),
            tenant,
        })
    }

    fn directory(&self, key: &IndexKey) -> Option<PathBuf> {
        self.config.index_root.as_ref().map(|root| match &key.tenant {
            Some(tenant) => root.join(tenant).join(&key.index),
            None => root.join(&key.index),
        })
    }

    fn open(&self, descriptor: Arc<EntitySearchDescriptor>, key: &IndexKey) -> SearchResult<IndexHandle> {
        let label = match &key.tenant {
            Some(tenant) => format!("{}/{}", tenant, key.index),
            None => key.index.clone(),
        };
        let schema = build_index_schema(&descriptor, self.config.analyzer);

        let index = match self.directory(key) {
            None => Index::create_in_ram(schema.clone()),
            Some(dir) => open_or_create(&dir, &schema, &label)?,
        };

        register_tokenizers(&index, &descriptor)?;

        // Reload explicitly after each commit for read-after-write visibility
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::index_io(&label, e))?;

        tracing::info!(
            index = %label,
            entity_type = %descriptor.entity_type(),
            in_memory = self.config.index_root.is_none(),
            "Opened search index"
        );

        Ok(IndexHandle {
            descriptor,
            index,
            reader,
            schema,
            label,
            write_lock: Mutex::new(()),
        })
    }

    /// Reset an index to an empty structure; returns the number of schema fields
    pub async fn rebuild(&self, entity_type: &str, tenant: Option<&str>) -> SearchResult<usize> {
        let handle = self.handle(entity_type, tenant).await?;
        let _lease = handle.write_lock.lock().await;

        let mut writer = handle.writer(&self.config)?;
        writer
            .delete_all_documents()
            .map_err(|e| SearchError::index_io(&handle.label, e))?;
        handle.commit(&mut writer)?;

        SEARCH_METRICS.record_rebuild(handle.descriptor.index_name());
        let fields = handle.schema.fields().count();
        tracing::info!(index = %handle.label, fields, "Rebuilt search index");
        Ok(fields)
    }

    /// Map and write a batch, then commit.
    ///
    /// Rejected documents do not abort the batch: the rest are committed and a
    /// `DocumentsRejected` error names every failed id.
    pub async fn index_range(
        &self,
        entity_type: &str,
        records: &[EntityRecord],
        mode: IndexMode,
        tenant: Option<&str>,
    ) -> SearchResult<usize> {
        let handle = self.handle(entity_type, tenant).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let _lease = handle.write_lock.lock().await;
        let mut writer = handle.writer(&self.config)?;
        let (indexed, failures) = handle.write_records(&mut writer, records);
        handle.commit(&mut writer)?;

        let index_name = handle.descriptor.index_name();
        SEARCH_METRICS.record_indexed(index_name, &mode.to_string(), indexed);
        tracing::debug!(index = %handle.label, %mode, indexed, rejected = failures.len(), "Indexed batch");

        if failures.is_empty() {
            Ok(indexed)
        } else {
            SEARCH_METRICS.record_rejected(index_name, failures.len());
            Err(SearchError::DocumentsRejected {
                index: handle.label.clone(),
                indexed,
                failures,
            })
        }
    }

    /// Index typed entities through the descriptor registered for `E`
    pub async fn index_entities<E>(
        &self,
        entities: Vec<E>,
        mode: IndexMode,
        tenant: Option<&str>,
    ) -> SearchResult<usize>
    where
        E: Any + Send + Sync,
    {
        let descriptor = self.registry.get_for::<E>().ok_or_else(|| {
            SearchError::Configuration(format!(
                "no search descriptor registered for {}",
                std::any::type_name::<E>()
            ))
        })?;

        let records: Vec<EntityRecord> = entities.into_iter().map(EntityRecord::instance).collect();
        self.index_range(descriptor.entity_type(), &records, mode, tenant)
            .await
    }

    /// Remove documents by id; returns how many live documents went away.
    /// Unknown ids are ignored.
    pub async fn delete_range(
        &self,
        entity_type: &str,
        ids: &[String],
        tenant: Option<&str>,
    ) -> SearchResult<usize> {
        let handle = self.handle(entity_type, tenant).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        // The lease excludes other writers, so the count delta is ours
        let _lease = handle.write_lock.lock().await;
        let before = handle.reader.searcher().num_docs();
        let mut writer = handle.writer(&self.config)?;
        for id in ids {
            writer.delete_term(handle.id_term(id)?);
        }
        handle.commit(&mut writer)?;
        let deleted = before.saturating_sub(handle.reader.searcher().num_docs()) as usize;

        SEARCH_METRICS.record_deleted(handle.descriptor.index_name(), deleted);
        tracing::debug!(index = %handle.label, requested = ids.len(), deleted, "Deleted documents");
        Ok(deleted)
    }

    /// Live document count as of the last commit
    pub async fn document_count(&self, entity_type: &str, tenant: Option<&str>) -> SearchResult<u64> {
        let handle = self.handle(entity_type, tenant).await?;
        Ok(handle.reader.searcher().num_docs())
    }

    /// Get index statistics
    pub async fn stats(&self, entity_type: &str, tenant: Option<&str>) -> SearchResult<IndexStats> {
        let handle = self.handle(entity_type, tenant).await?;
        let searcher = handle.reader.searcher();

        Ok(IndexStats {
            index: handle.label.clone(),
            total_documents: searcher.num_docs(),
            num_segments: searcher.segment_readers().len(),
            num_fields: handle.schema.fields().count(),
        })
    }

    /// Clear the index, then page every entity out of `source` and index it.
    ///
    /// The write lease is held for the whole run. Work is committed every
    /// `rebuild_commit_every` batches; on cancellation the committed batches
    /// stay and the rest is discarded.
    pub async fn rebuild_and_index_all(
        &self,
        entity_type: &str,
        batch_size: usize,
        source: &dyn EntitySource,
        cancel: &CancellationToken,
        tenant: Option<&str>,
    ) -> SearchResult<usize> {
        if batch_size == 0 {
            return Err(SearchError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }

        let handle = self.handle(entity_type, tenant).await?;
        let _lease = handle.write_lock.lock().await;
        let index_name = handle.descriptor.index_name();

        let mut writer = handle.writer(&self.config)?;
        writer
            .delete_all_documents()
            .map_err(|e| SearchError::index_io(&handle.label, e))?;
        handle.commit(&mut writer)?;
        SEARCH_METRICS.record_rebuild(index_name);

        let commit_every = self.config.rebuild_commit_every.max(1);
        let mut offset = 0;
        let mut batches = 0;
        let mut committed = 0;
        let mut pending = 0;
        let mut failures = Vec::new();

        loop {
            if cancel.is_cancelled() {
                tracing::warn!(
                    index = %handle.label,
                    committed,
                    discarded = pending,
                    "Rebuild cancelled"
                );
                return Err(SearchError::Cancelled { indexed: committed });
            }

            let page = source.fetch_page(entity_type, offset, batch_size).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            batches += 1;

            let (indexed, mut rejected) = handle.write_records(&mut writer, &page);
            pending += indexed;
            failures.append(&mut rejected);

            if batches % commit_every == 0 {
                handle.commit(&mut writer)?;
                committed += pending;
                pending = 0;
                tracing::debug!(index = %handle.label, batches, committed, "Committed rebuild batch");
            }

            if page.len() < batch_size {
                break;
            }
        }

        if pending > 0 {
            handle.commit(&mut writer)?;
            committed += pending;
        }

        SEARCH_METRICS.record_indexed(index_name, &IndexMode::Replace.to_string(), committed);
        tracing::info!(
            index = %handle.label,
            indexed = committed,
            rejected = failures.len(),
            batches,
            "Rebuilt and indexed all entities"
        );

        if failures.is_empty() {
            Ok(committed)
        } else {
            SEARCH_METRICS.record_rejected(index_name, failures.len());
            Err(SearchError::DocumentsRejected {
                index: handle.label.clone(),
                indexed: committed,
                failures,
            })
        }
    }
}

/// Open the index in `dir`, recreating it when its schema has drifted
fn open_or_create(dir: &Path, schema: &Schema, label: &str) -> SearchResult<Index> {
    std::fs::create_dir_all(dir).map_err(|e| SearchError::index_io(label, e))?;

    if dir.join("meta.json").exists() {
        let existing = Index::open_in_dir(dir).map_err(|e| SearchError::index_io(label, e))?;
        if same_schema(&existing.schema(), schema)? {
            return Ok(existing);
        }

        tracing::warn!(index = %label, path = %dir.display(), "Index schema changed, recreating index");
        drop(existing);
        std::fs::remove_dir_all(dir).map_err(|e| SearchError::index_io(label, e))?;
        std::fs::create_dir_all(dir).map_err(|e| SearchError::index_io(label, e))?;
    }

    Index::create_in_dir(dir, schema.clone()).map_err(|e| SearchError::index_io(label, e))
}

fn same_schema(existing: &Schema, expected: &Schema) -> SearchResult<bool> {
    let encode = |schema: &Schema| {
        serde_json::to_string(schema)
            .map_err(|e| SearchError::Configuration(format!("Failed to encode schema: {}", e)))
    };
    Ok(encode(existing)? == encode(expected)?)
}

fn register_tokenizers(index: &Index, descriptor: &EntitySearchDescriptor) -> SearchResult<()> {
    for field in descriptor.fields() {
        if let Some((min, max)) = field.autocomplete_range() {
            let tokenizer = NgramTokenizer::new(min, max, true).map_err(|e| {
                SearchError::Configuration(format!(
                    "invalid autocomplete range for '{}': {}",
                    field.name(),
                    e
                ))
            })?;
            let analyzer = TextAnalyzer::builder(tokenizer).filter(LowerCaser).build();
            index
                .tokenizers()
                .register(&autocomplete_tokenizer_name(min, max), analyzer);
        }
    }
    Ok(())
}
