//! Entity search
//!
//! Keeps per-entity-type full-text indexes in sync with application entities
//! and builds scored, filtered, paged searches over them. See [`search`].

pub mod config;
pub mod search;

pub use config::{Config, ObservabilityConfig};
pub use search::{SearchConfig, SearchError, SearchResult, SearchService};
