//! Entity-to-index synchronization and query construction powered by Tantivy
//!
//! This module keeps a full-text index per entity type in step with an
//! application's entities and translates free-text searches into index
//! queries:
//!
//! - **Schema Registry**: per-type descriptors naming the indexed fields and how each is analyzed
//! - **Document Mapping**: entity instances or value maps become index documents
//! - **Change Collection**: creates, updates and deletes are buffered per unit of work and flushed once
//! - **Index Management**: rebuild, batch upsert, delete and paged full reindex with cancellation
//! - **Query Building**: boolean syntax, phrases, prefix, fuzzy, boosts and structured filters
//! - **Search**: paged, scored results across one or several entity types
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           Search Service API                     │
//! ├─────────────────────────────────────────────────┤
//! │  - search()          - search_many()            │
//! │  - rebuild_index()   - rebuild_and_index_all()  │
//! │  - change_collector() - for_tenant()            │
//! └─────────────────────────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//! ┌──────────────────────┐  ┌──────────────────────┐
//! │   Query Builder       │  │   Change Collector    │
//! │  - parser, filters    │  │  - dedup, delete-wins │
//! └──────────────────────┘  └──────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           Index Manager                          │
//! ├─────────────────────────────────────────────────┤
//! │  - One index per (entity type, tenant)          │
//! │  - Write lease per index                        │
//! │  - Schema drift detection                       │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │              Tantivy Index                       │
//! ├─────────────────────────────────────────────────┤
//! │  - Analyzed text and keyword fields             │
//! │  - Fast numeric fields (filters, sorting)       │
//! │  - Edge n-gram autocomplete companions          │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use entity_search::search::{
//!     EntitySearchDescriptor, FieldDescriptor, SchemaRegistry, SearchConfig, SearchRequest,
//!     SearchService,
//! };
//!
//! #[derive(Clone)]
//! struct Book {
//!     id: i64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let descriptor = EntitySearchDescriptor::builder::<Book>("Book")
//!         .id("Id", |b: &Book| Some(b.id))
//!         .field(FieldDescriptor::property("Title", |b: &Book| Some(b.title.clone())).stored())
//!         .build()?;
//!     let registry = SchemaRegistry::builder().register(descriptor)?.build();
//!
//!     let search = SearchService::new(SearchConfig::default(), registry).await?;
//!     let collector = search.change_collector();
//!     collector.on_created(Book { id: 1, title: "Lucene in Action".into() })?;
//!     search.flush(&collector).await?;
//!
//!     let results = search
//!         .search("Book", &SearchRequest::new("lucene").with_prefix(true))
//!         .await?;
//!     println!("Found {} books", results.total_count);
//!
//!     Ok(())
//! }
//! ```

mod collector;
mod config;
mod definition;
mod document;
mod error;
mod filter;
mod index;
mod metrics;
mod parser;
mod query;
mod schema;
mod service;
mod source;
mod value;

pub use collector::{ChangeCollector, CompletionCallback, FlushSummary, TransactionHandle, UnitOfWork};
pub use config::{
    AnalyzerKind, FuzzyConfig, HighlightConfig, MultiFieldMode, SearchConfig, SearchConfigBuilder,
};
pub use definition::{build_registry, EntityDefinition, FieldDefinition};
pub use document::{
    build_index_schema, map_entity, map_values, EncodedValue, EntityRecord, IndexDocument,
    IndexField, SearchDocument,
};
pub use error::{DocumentFailure, SearchError, SearchResult};
pub use filter::FilterPredicate;
pub use index::{IndexManager, IndexMode, IndexStats};
pub use metrics::{init_search_metrics, SearchMetrics, SEARCH_METRICS};
pub use parser::{parse_query, ClauseOccur, ClauseText, ParsedQuery, QueryClause};
pub use query::{
    MultiEntitySearchRequest, QueryBuilder, SearchRequest, SortOrder, SortSpec, DEFAULT_TAKE,
    MAX_FUZZY_EDITS,
};
pub use schema::{
    DescriptorBuilder, EntitySearchDescriptor, FieldDescriptor, FieldEncoding, SchemaRegistry,
    SchemaRegistryBuilder, TermVectors, ValueSource, DEFAULT_ID_FIELD,
};
pub use service::{SearchHit, SearchResponse, SearchService};
pub use source::{parse_json_lines, EntitySource, InMemorySource, JsonLinesSource};
pub use value::{fold_keyword, FieldValue, FieldValues, NumericKind};
