//! Main search service implementation

use crate::search::collector::{ChangeCollector, FlushSummary};
use crate::search::config::SearchConfig;
use crate::search::document::{stored_payload, EntityRecord};
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::{IndexHandle, IndexManager, IndexMode, IndexStats};
use crate::search::metrics::{init_search_metrics, SEARCH_METRICS};
use crate::search::query::{MultiEntitySearchRequest, QueryBuilder, SearchRequest, SortOrder};
use crate::search::schema::{validate_path_segment, EntitySearchDescriptor, SchemaRegistry};
use crate::search::source::EntitySource;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::Query;
use tantivy::{DocAddress, DocId, Score, Searcher, SegmentReader, TantivyDocument};
use tokio_util::sync::CancellationToken;

/// A single search result hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Entity type the hit belongs to
    pub entity_type: String,

    /// Entity id
    pub entity_id: String,

    /// Relevance score; filters never contribute to it
    pub score: f32,

    /// Stored field values, id included
    pub payload: BTreeMap<String, String>,

    /// Always empty, highlighting is not performed
    pub highlights: HashMap<String, Vec<String>>,
}

/// Search response with results and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Number of matching documents before paging
    pub total_count: usize,

    pub hits: Vec<SearchHit>,

    pub skip: usize,

    /// Effective page size after the configured cap
    pub take: usize,

    /// Search execution time in milliseconds
    pub search_time_ms: u64,
}

/// A hit before its document is loaded
struct RankedHit {
    /// Sort value; constant when ranking by relevance
    key: i128,
    score: Score,

    /// Position of the entity type in the request
    entity: usize,
    address: DocAddress,
}

/// Highest sort key first, then score, then request order, then index order
fn compare_ranked(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.key
        .cmp(&a.key)
        .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        .then_with(|| a.entity.cmp(&b.entity))
        .then_with(|| a.address.cmp(&b.address))
}

/// One index participating in a search
struct SearchTarget {
    handle: Arc<IndexHandle>,
    searcher: Searcher,
    query: Box<dyn Query>,
    sort: Option<(String, SortOrder)>,
}

/// Main search service
#[derive(Clone)]
pub struct SearchService {
    /// Index manager
    index_manager: Arc<IndexManager>,

    /// Configuration
    config: SearchConfig,

    /// Tenant scope for every operation
    tenant: Option<String>,
}

impl SearchService {
    /// Create a new search service
    pub async fn new(config: SearchConfig, registry: Arc<SchemaRegistry>) -> SearchResult<Self> {
        init_search_metrics();
        let index_manager = Arc::new(IndexManager::new(config.clone(), registry)?);

        if config.rebuild_on_startup {
            let entity_types: Vec<String> = index_manager
                .registry()
                .entity_types()
                .map(str::to_string)
                .collect();
            for entity_type in &entity_types {
                index_manager.rebuild(entity_type, None).await?;
            }
            tracing::info!(indexes = entity_types.len(), "Rebuilt indexes on startup");
        }

        Ok(Self {
            index_manager,
            config,
            tenant: None,
        })
    }

    /// A view of this service scoped to `tenant`, sharing the same indexes
    pub fn for_tenant(&self, tenant: &str) -> SearchResult<Self> {
        validate_path_segment("tenant", tenant)?;
        Ok(Self {
            tenant: Some(tenant.to_string()),
            ..self.clone()
        })
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn index_manager(&self) -> &Arc<IndexManager> {
        &self.index_manager
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search one entity type
    pub async fn search(&self, entity_type: &str, request: &SearchRequest) -> SearchResult<SearchResponse> {
        let start_time = Instant::now();

        let handle = self
            .index_manager
            .handle(entity_type, self.tenant.as_deref())
            .await?;
        let sort = match &request.sort {
            Some(spec) => Some((sort_field(&handle.descriptor, &spec.field)?, spec.order)),
            None => None,
        };
        let query = QueryBuilder::new(&handle.descriptor, &handle.index, &handle.schema, &self.config)
            .build(request)?;
        let searcher = handle.reader.searcher();

        let target = SearchTarget {
            handle,
            searcher,
            query,
            sort,
        };
        let response = self.execute(std::slice::from_ref(&target), request, start_time)?;

        tracing::debug!(
            entity_type = %entity_type,
            query = %request.query,
            total = response.total_count,
            returned = response.hits.len(),
            elapsed_ms = response.search_time_ms,
            "Search completed"
        );
        Ok(response)
    }

    /// Search several entity types and merge the hits by score.
    ///
    /// An entity type that lacks a field named by the filter, the field list or
    /// the sort contributes no hits. Scores from different indexes are merged
    /// as-is.
    pub async fn search_many(&self, request: &MultiEntitySearchRequest) -> SearchResult<SearchResponse> {
        let start_time = Instant::now();
        let inner = &request.request;

        let mut targets = Vec::with_capacity(request.entities.len());
        for entity_type in &request.entities {
            let handle = self
                .index_manager
                .handle(entity_type, self.tenant.as_deref())
                .await?;
            if !request_applies(inner, &handle.descriptor) {
                tracing::debug!(entity_type = %entity_type, "Skipping index without requested fields");
                continue;
            }

            let sort = match &inner.sort {
                Some(spec) => Some((sort_field(&handle.descriptor, &spec.field)?, spec.order)),
                None => None,
            };
            let query = QueryBuilder::new(&handle.descriptor, &handle.index, &handle.schema, &self.config)
                .build(inner)?;
            let searcher = handle.reader.searcher();
            targets.push(SearchTarget {
                handle,
                searcher,
                query,
                sort,
            });
        }

        let response = self.execute(&targets, inner, start_time)?;
        tracing::debug!(
            entities = request.entities.len(),
            query = %inner.query,
            total = response.total_count,
            "Multi-entity search completed"
        );
        Ok(response)
    }

    fn execute(
        &self,
        targets: &[SearchTarget],
        request: &SearchRequest,
        start_time: Instant,
    ) -> SearchResult<SearchResponse> {
        let take = request.take.min(self.config.max_results);
        let limit = request.skip.saturating_add(take);

        let counts = targets
            .iter()
            .map(|target| target.searcher.search(target.query.as_ref(), &Count))
            .collect::<Result<Vec<_>, _>>()?;
        let total_count: usize = counts.iter().sum();

        // TopDocs preallocates its limit and rejects zero, so never ask for
        // more hits than a target actually has
        let mut ranked = Vec::new();
        if take > 0 && request.skip < total_count {
            for (position, (target, &count)) in targets.iter().zip(&counts).enumerate() {
                if count > 0 {
                    ranked.extend(collect_ranked(target, position, limit.min(count))?);
                }
            }
        }

        ranked.sort_by(compare_ranked);

        let mut hits = Vec::with_capacity(take);
        for hit in ranked.into_iter().skip(request.skip).take(take) {
            let target = &targets[hit.entity];
            let doc: TantivyDocument = target.searcher.doc(hit.address)?;
            let descriptor = &target.handle.descriptor;
            let payload = stored_payload(&doc, &target.handle.schema, descriptor);

            hits.push(SearchHit {
                entity_type: descriptor.entity_type().to_string(),
                entity_id: payload
                    .get(descriptor.id_field_name())
                    .cloned()
                    .unwrap_or_default(),
                score: hit.score,
                payload,
                highlights: HashMap::new(),
            });
        }

        let elapsed = start_time.elapsed();
        for target in targets {
            SEARCH_METRICS.record_search(target.handle.descriptor.index_name(), elapsed.as_secs_f64());
        }

        Ok(SearchResponse {
            total_count,
            hits,
            skip: request.skip,
            take,
            search_time_ms: elapsed.as_millis() as u64,
        })
    }

    /// Reset an entity type's index; returns the number of schema fields
    pub async fn rebuild_index(&self, entity_type: &str) -> SearchResult<usize> {
        self.index_manager
            .rebuild(entity_type, self.tenant.as_deref())
            .await
    }

    /// Clear an index and repopulate it from `source`
    pub async fn rebuild_and_index_all(
        &self,
        entity_type: &str,
        batch_size: Option<usize>,
        source: &dyn EntitySource,
        cancel: &CancellationToken,
    ) -> SearchResult<usize> {
        let batch_size = batch_size.unwrap_or(self.config.rebuild_batch_size);
        self.index_manager
            .rebuild_and_index_all(entity_type, batch_size, source, cancel, self.tenant.as_deref())
            .await
    }

    pub async fn get_index_document_count(&self, entity_type: &str) -> SearchResult<u64> {
        self.index_manager
            .document_count(entity_type, self.tenant.as_deref())
            .await
    }

    /// Get index statistics
    pub async fn index_stats(&self, entity_type: &str) -> SearchResult<IndexStats> {
        self.index_manager
            .stats(entity_type, self.tenant.as_deref())
            .await
    }

    /// Upsert records directly, bypassing change collection
    pub async fn index_records(&self, entity_type: &str, records: &[EntityRecord]) -> SearchResult<usize> {
        self.index_manager
            .index_range(entity_type, records, IndexMode::Upsert, self.tenant.as_deref())
            .await
    }

    pub async fn delete_documents(&self, entity_type: &str, ids: &[String]) -> SearchResult<usize> {
        self.index_manager
            .delete_range(entity_type, ids, self.tenant.as_deref())
            .await
    }

    /// A fresh change collector for one unit of work in this service's tenant
    pub fn change_collector(&self) -> ChangeCollector {
        ChangeCollector::new(self.index_manager.registry().clone(), self.config.auto_indexing)
            .with_tenant(self.tenant.clone())
    }

    /// Flush a collector against this service's indexes
    pub async fn flush(&self, collector: &ChangeCollector) -> SearchResult<FlushSummary> {
        collector.flush(&self.index_manager).await
    }
}

/// Resolve a sort field; only numeric and date fields are sortable
fn sort_field(descriptor: &EntitySearchDescriptor, name: &str) -> SearchResult<String> {
    let field = descriptor.find_field(name).ok_or_else(|| {
        SearchError::QuerySyntax(format!(
            "unknown sort field '{}' for entity type '{}'",
            name,
            descriptor.entity_type()
        ))
    })?;

    if !field.numeric_kind().is_numeric() {
        return Err(SearchError::QuerySyntax(format!(
            "sort field '{}' is not numeric",
            field.name()
        )));
    }
    Ok(field.name().to_string())
}

fn request_applies(request: &SearchRequest, descriptor: &EntitySearchDescriptor) -> bool {
    let filter_applies = request
        .filter
        .as_ref()
        .map_or(true, |filter| filter.applies_to(descriptor));
    let fields_apply = request
        .fields
        .iter()
        .all(|name| descriptor.find_field(name).is_some());
    let sort_applies = request.sort.as_ref().map_or(true, |spec| {
        descriptor
            .find_field(&spec.field)
            .is_some_and(|field| field.numeric_kind().is_numeric())
    });
    filter_applies && fields_apply && sort_applies
}

fn collect_ranked(target: &SearchTarget, entity: usize, limit: usize) -> SearchResult<Vec<RankedHit>> {
    let query = target.query.as_ref();

    let Some((field, order)) = &target.sort else {
        let top = target.searcher.search(query, &TopDocs::with_limit(limit))?;
        return Ok(top
            .into_iter()
            .map(|(score, address)| RankedHit {
                key: 0,
                score,
                entity,
                address,
            })
            .collect());
    };

    let field = field.clone();
    let ascending = *order == SortOrder::Ascending;
    // Missing values sort last in either direction
    let collector = TopDocs::with_limit(limit).tweak_score(move |segment_reader: &SegmentReader| {
        let column = segment_reader.fast_fields().i64(&field).ok();
        move |doc: DocId, score: Score| {
            let key = match column.as_ref().and_then(|c| c.first(doc)) {
                Some(value) if ascending => -(value as i128),
                Some(value) => value as i128,
                None => i128::MIN,
            };
            (key, score)
        }
    });

    let top = target.searcher.search(query, &collector)?;
    Ok(top
        .into_iter()
        .map(|((key, score), address)| RankedHit {
            key,
            score,
            entity,
            address,
        })
        .collect())
}
