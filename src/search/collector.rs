//! Change collection and flush-on-commit
//!
//! A [`ChangeCollector`] belongs to one unit of work. Lifecycle events add
//! upsert and delete intents; the first flush registration hooks the
//! transaction's completion, and the flush drains everything exactly once.

use crate::search::document::EntityRecord;
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::{IndexManager, IndexMode};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::schema::SchemaRegistry;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Callback run once a transaction has completed
pub type CompletionCallback = Box<dyn FnOnce() -> BoxFuture<'static, SearchResult<()>> + Send>;

/// Hook into the completion of a persistence transaction
pub trait TransactionHandle: Send + Sync {
    /// Register a callback to run after the transaction commits
    fn register_on_completed(&self, callback: CompletionCallback);
}

/// Minimal unit of work for hosts without their own transaction manager
#[derive(Default)]
pub struct UnitOfWork {
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Run every registered callback; the first error is returned after all have run
    pub async fn complete(self) -> SearchResult<()> {
        let callbacks = self.callbacks.into_inner();
        let mut first_error = None;

        for callback in callbacks {
            if let Err(e) = callback().await {
                tracing::error!(error = %e, "Completion callback failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard registered callbacks without running them
    pub fn rollback(self) {
        let discarded = self.callbacks.into_inner().len();
        tracing::debug!(discarded, "Unit of work rolled back");
    }
}

impl TransactionHandle for UnitOfWork {
    fn register_on_completed(&self, callback: CompletionCallback) {
        self.callbacks.lock().push(callback);
    }
}

/// Pending changes of one unit of work
#[derive(Debug, Default)]
struct ChangeSet {
    upserts: BTreeMap<String, BTreeMap<String, EntityRecord>>,
    deletes: BTreeMap<String, BTreeSet<String>>,
    registered: bool,
}

/// What a flush wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub indexed: usize,
    /// Live documents removed; ids with no document are not counted
    pub deleted: usize,
}

/// Buffers entity changes and flushes them into the index once
#[derive(Clone)]
pub struct ChangeCollector {
    registry: Arc<SchemaRegistry>,
    tenant: Option<String>,
    auto_indexing: bool,
    state: Arc<Mutex<ChangeSet>>,
}

impl ChangeCollector {
    pub fn new(registry: Arc<SchemaRegistry>, auto_indexing: bool) -> Self {
        Self {
            registry,
            tenant: None,
            auto_indexing,
            state: Arc::new(Mutex::new(ChangeSet::default())),
        }
    }

    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Queue an upsert; the last record for an id wins
    pub fn upsert_record(&self, entity_type: &str, id: impl Into<String>, record: EntityRecord) {
        if self.registry.get(entity_type).is_none() {
            tracing::debug!(entity_type, "Ignoring upsert for unindexed entity type");
            return;
        }

        self.state
            .lock()
            .upserts
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.into(), record);
    }

    /// Queue an upsert of a typed entity
    pub fn upsert<E: Any + Send + Sync>(&self, entity: E, id: impl Into<String>) {
        match self.registry.get_for::<E>() {
            Some(descriptor) => {
                self.upsert_record(descriptor.entity_type(), id, EntityRecord::instance(entity))
            }
            None => tracing::debug!(
                entity = std::any::type_name::<E>(),
                "Ignoring upsert for unindexed entity type"
            ),
        }
    }

    /// Queue a delete by entity type name
    pub fn delete_by_type(&self, entity_type: &str, id: impl Into<String>) {
        if self.registry.get(entity_type).is_none() {
            tracing::debug!(entity_type, "Ignoring delete for unindexed entity type");
            return;
        }

        self.state
            .lock()
            .deletes
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.into());
    }

    /// Queue a delete of a typed entity by id
    pub fn delete<E: Any>(&self, id: impl Into<String>) {
        if let Some(descriptor) = self.registry.get_for::<E>() {
            self.delete_by_type(descriptor.entity_type(), id);
        }
    }

    pub fn on_created<E: Any + Send + Sync>(&self, entity: E) -> SearchResult<()> {
        self.on_saved(entity)
    }

    pub fn on_updated<E: Any + Send + Sync>(&self, entity: E) -> SearchResult<()> {
        self.on_saved(entity)
    }

    pub fn on_deleted<E: Any>(&self, entity: &E) -> SearchResult<()> {
        if !self.auto_indexing {
            return Ok(());
        }
        let Some(descriptor) = self.registry.get_for::<E>() else {
            return Ok(());
        };

        let id = descriptor
            .entity_id(entity)
            .ok_or_else(|| SearchError::EntityIdUnresolved(descriptor.entity_type().to_string()))?;
        self.delete_by_type(descriptor.entity_type(), id);
        Ok(())
    }

    fn on_saved<E: Any + Send + Sync>(&self, entity: E) -> SearchResult<()> {
        if !self.auto_indexing {
            return Ok(());
        }
        let Some(descriptor) = self.registry.get_for::<E>() else {
            return Ok(());
        };

        let id = descriptor
            .entity_id(&entity)
            .ok_or_else(|| SearchError::EntityIdUnresolved(descriptor.entity_type().to_string()))?;
        self.upsert_record(descriptor.entity_type(), id, EntityRecord::instance(entity));
        Ok(())
    }

    /// Hook the flush into `transaction`; only the first call per scope registers
    pub fn register_flush(&self, transaction: &dyn TransactionHandle, index_manager: Arc<IndexManager>) -> bool {
        {
            let mut state = self.state.lock();
            if state.registered {
                return false;
            }
            state.registered = true;
        }

        let collector = self.clone();
        transaction.register_on_completed(Box::new(move || {
            Box::pin(async move { collector.flush(&index_manager).await.map(|_| ()) })
        }));
        true
    }

    /// Register against the transaction when there is one, flush immediately otherwise
    pub async fn flush_or_register(
        &self,
        transaction: Option<&dyn TransactionHandle>,
        index_manager: Arc<IndexManager>,
    ) -> SearchResult<Option<FlushSummary>> {
        match transaction {
            Some(transaction) => {
                self.register_flush(transaction, index_manager);
                Ok(None)
            }
            None => self.flush(&index_manager).await.map(Some),
        }
    }

    /// Drain pending changes into the index.
    ///
    /// Deletes win over upserts of the same id. Every entity type is attempted;
    /// failures are logged and returned together.
    pub async fn flush(&self, index_manager: &IndexManager) -> SearchResult<FlushSummary> {
        let ChangeSet {
            mut upserts,
            deletes,
            ..
        } = std::mem::take(&mut *self.state.lock());

        for (entity_type, ids) in &deletes {
            if let Some(pending) = upserts.get_mut(entity_type) {
                pending.retain(|id, _| !ids.contains(id));
            }
        }

        let tenant = self.tenant.as_deref();
        let mut summary = FlushSummary::default();
        let mut failures = Vec::new();

        for (entity_type, records) in upserts {
            let records: Vec<EntityRecord> = records.into_values().collect();
            match index_manager
                .index_range(&entity_type, &records, IndexMode::Upsert, tenant)
                .await
            {
                Ok(indexed) => summary.indexed += indexed,
                Err(e) => {
                    if let SearchError::DocumentsRejected { indexed, .. } = &e {
                        summary.indexed += indexed;
                    }
                    tracing::error!(entity_type = %entity_type, error = %e, "Failed to index pending changes");
                    failures.push((entity_type, e));
                }
            }
        }

        for (entity_type, ids) in deletes {
            let ids: Vec<String> = ids.into_iter().collect();
            match index_manager.delete_range(&entity_type, &ids, tenant).await {
                Ok(deleted) => summary.deleted += deleted,
                Err(e) => {
                    tracing::error!(entity_type = %entity_type, error = %e, "Failed to delete pending changes");
                    failures.push((entity_type, e));
                }
            }
        }

        SEARCH_METRICS.record_flush(failures.is_empty());

        if failures.is_empty() {
            tracing::debug!(indexed = summary.indexed, deleted = summary.deleted, "Flushed changes");
            Ok(summary)
        } else {
            Err(SearchError::FlushFailed { failures })
        }
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.upserts.values().all(|m| m.is_empty()) && state.deletes.values().all(|s| s.is_empty())
    }

    /// Ids with a pending upsert for an entity type
    pub fn pending_upserts(&self, entity_type: &str) -> Vec<String> {
        self.state
            .lock()
            .upserts
            .get(entity_type)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids with a pending delete for an entity type
    pub fn pending_deletes(&self, entity_type: &str) -> Vec<String> {
        self.state
            .lock()
            .deletes
            .get(entity_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::config::SearchConfig;
    use crate::search::schema::{EntitySearchDescriptor, FieldDescriptor};

    #[derive(Clone)]
    struct Note {
        id: Option<u32>,
        text: String,
    }

    struct Unindexed;

    fn registry() -> Arc<SchemaRegistry> {
        let descriptor = EntitySearchDescriptor::builder::<Note>("Note")
            .id("Id", |n: &Note| n.id)
            .field(FieldDescriptor::property("Text", |n: &Note| Some(n.text.clone())).stored())
            .build()
            .unwrap();
        SchemaRegistry::builder().register(descriptor).unwrap().build()
    }

    fn note(id: u32, text: &str) -> Note {
        Note {
            id: Some(id),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_events_queue_changes() {
        let collector = ChangeCollector::new(registry(), true);
        collector.on_created(note(1, "a")).unwrap();
        collector.on_updated(note(1, "b")).unwrap();
        collector.on_deleted(&note(2, "c")).unwrap();

        assert_eq!(collector.pending_upserts("Note"), vec!["1".to_string()]);
        assert_eq!(collector.pending_deletes("Note"), vec!["2".to_string()]);
    }

    #[test]
    fn test_unregistered_types_and_disabled_indexing_are_ignored() {
        let collector = ChangeCollector::new(registry(), true);
        collector.on_created(Unindexed).unwrap();
        collector.upsert_record("Missing", "1", EntityRecord::instance(Unindexed));
        assert!(collector.is_empty());

        let disabled = ChangeCollector::new(registry(), false);
        disabled.on_created(note(1, "a")).unwrap();
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let collector = ChangeCollector::new(registry(), true);
        let result = collector.on_created(Note {
            id: None,
            text: "x".to_string(),
        });
        assert!(matches!(result, Err(SearchError::EntityIdUnresolved(_))));
    }

    #[test]
    fn test_register_flush_is_at_most_once() {
        let registry = registry();
        let manager = Arc::new(IndexManager::new(SearchConfig::default(), registry.clone()).unwrap());
        let collector = ChangeCollector::new(registry, true);
        let unit = UnitOfWork::new();

        assert!(collector.register_flush(&unit, manager.clone()));
        assert!(!collector.register_flush(&unit, manager.clone()));
        assert!(!collector.register_flush(&unit, manager));
        assert_eq!(unit.pending_callbacks(), 1);
    }

    #[tokio::test]
    async fn test_flush_resets_state_for_reuse() {
        let registry = registry();
        let manager = Arc::new(IndexManager::new(SearchConfig::default(), registry.clone()).unwrap());
        let collector = ChangeCollector::new(registry, true);

        collector.on_created(note(1, "a")).unwrap();
        collector.on_created(note(2, "b")).unwrap();
        collector.on_deleted(&note(2, "b")).unwrap();

        let unit = UnitOfWork::new();
        assert!(collector.register_flush(&unit, manager.clone()));
        unit.complete().await.unwrap();

        assert!(collector.is_empty());
        assert_eq!(manager.document_count("Note", None).await.unwrap(), 1);

        // A new scope can register again
        let next = UnitOfWork::new();
        assert!(collector.register_flush(&next, manager));
    }

    #[tokio::test]
    async fn test_rollback_discards_flush() {
        let registry = registry();
        let manager = Arc::new(IndexManager::new(SearchConfig::default(), registry.clone()).unwrap());
        let collector = ChangeCollector::new(registry, true);

        collector.on_created(note(1, "a")).unwrap();
        let unit = UnitOfWork::new();
        collector.register_flush(&unit, manager.clone());
        unit.rollback();

        assert_eq!(manager.document_count("Note", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_immediate_flush_without_transaction() {
        let registry = registry();
        let manager = Arc::new(IndexManager::new(SearchConfig::default(), registry.clone()).unwrap());
        let collector = ChangeCollector::new(registry, true);

        collector.on_created(note(7, "a")).unwrap();
        let summary = collector.flush_or_register(None, manager.clone()).await.unwrap();

        assert_eq!(summary, Some(FlushSummary { indexed: 1, deleted: 0 }));
        assert_eq!(manager.document_count("Note", None).await.unwrap(), 1);
    }
}
