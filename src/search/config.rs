//! Search configuration

use crate::search::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};

/// Smallest writer heap the engine accepts per indexing thread
pub const MIN_WRITER_HEAP_PER_THREAD: usize = 15_000_000;

/// Text analyzer applied to tokenized fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalyzerKind {
    /// Split on non-alphanumerics, lower-case, drop very long tokens
    #[default]
    Standard,

    /// Standard pipeline plus English stemming
    EnglishStem,

    /// Split on whitespace only, case preserved
    Whitespace,
}

impl AnalyzerKind {
    /// Name of the engine tokenizer implementing this analyzer
    pub fn tokenizer_name(&self) -> &'static str {
        match self {
            AnalyzerKind::Standard => "default",
            AnalyzerKind::EnglishStem => "en_stem",
            AnalyzerKind::Whitespace => "whitespace",
        }
    }
}

/// How per-field clauses are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MultiFieldMode {
    /// A document must match in every targeted field
    And,

    /// A document may match in any targeted field
    #[default]
    Or,
}

/// Fuzzy matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyConfig {
    pub enabled: bool,

    /// Maximum edit distance, at most 2
    pub max_edits: u8,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_edits: 2,
        }
    }
}

/// Highlighting settings. Accepted and validated, not applied yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub enabled: bool,
    pub fragment_size: usize,
    pub max_fragments: usize,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fragment_size: 100,
            max_fragments: 3,
        }
    }
}

/// Search service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Root directory for index storage; `None` keeps every index in memory
    pub index_root: Option<PathBuf>,

    /// Analyzer for tokenized fields
    pub analyzer: AnalyzerKind,

    /// Store each tenant's indices under its own directory
    pub per_tenant_isolation: bool,

    /// Rebuild every registered index when the service starts
    pub rebuild_on_startup: bool,

    /// Default multi-field combination mode
    pub multi_field_mode: MultiFieldMode,

    pub fuzzy: FuzzyConfig,

    /// Allow prefix queries
    pub prefix_enabled: bool,

    pub highlight: HighlightConfig,

    /// Feed entity lifecycle events into the change collector
    pub auto_indexing: bool,

    /// Index writer heap size in bytes (default: 50MB)
    pub writer_heap_size: usize,

    /// Number of threads for indexing
    pub indexing_threads: usize,

    /// Maximum search results to return in one page
    pub max_results: usize,

    /// Default page size for full rebuilds
    pub rebuild_batch_size: usize,

    /// Commit after this many batches during a full rebuild
    pub rebuild_commit_every: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_root: None,
            analyzer: AnalyzerKind::Standard,
            per_tenant_isolation: false,
            rebuild_on_startup: false,
            multi_field_mode: MultiFieldMode::Or,
            fuzzy: FuzzyConfig::default(),
            prefix_enabled: true,
            highlight: HighlightConfig::default(),
            auto_indexing: true,
            writer_heap_size: 50_000_000, // 50MB
            indexing_threads: 1,
            max_results: 1000,
            rebuild_batch_size: 1000,
            rebuild_commit_every: 1,
        }
    }
}

impl SearchConfig {
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::new()
    }

    /// Reject settings the engine or the query builder cannot honor
    pub fn validate(&self) -> SearchResult<()> {
        if self.indexing_threads == 0 {
            return Err(SearchError::Configuration(
                "indexing_threads must be at least 1".to_string(),
            ));
        }
        if self.writer_heap_size < MIN_WRITER_HEAP_PER_THREAD * self.indexing_threads {
            return Err(SearchError::Configuration(format!(
                "writer_heap_size must be at least {} bytes per indexing thread",
                MIN_WRITER_HEAP_PER_THREAD
            )));
        }
        if self.fuzzy.max_edits > 2 {
            return Err(SearchError::Configuration(format!(
                "fuzzy.max_edits must be at most 2, got {}",
                self.fuzzy.max_edits
            )));
        }
        if self.max_results == 0 {
            return Err(SearchError::Configuration(
                "max_results must be at least 1".to_string(),
            ));
        }
        if self.rebuild_batch_size == 0 || self.rebuild_commit_every == 0 {
            return Err(SearchError::Configuration(
                "rebuild_batch_size and rebuild_commit_every must be at least 1".to_string(),
            ));
        }
        if self.highlight.enabled && self.highlight.fragment_size == 0 {
            return Err(SearchError::Configuration(
                "highlight.fragment_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SearchConfig
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn index_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_root = Some(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.index_root = None;
        self
    }

    pub fn analyzer(mut self, analyzer: AnalyzerKind) -> Self {
        self.config.analyzer = analyzer;
        self
    }

    pub fn per_tenant_isolation(mut self, enabled: bool) -> Self {
        self.config.per_tenant_isolation = enabled;
        self
    }

    pub fn rebuild_on_startup(mut self, enabled: bool) -> Self {
        self.config.rebuild_on_startup = enabled;
        self
    }

    pub fn multi_field_mode(mut self, mode: MultiFieldMode) -> Self {
        self.config.multi_field_mode = mode;
        self
    }

    pub fn fuzzy(mut self, enabled: bool, max_edits: u8) -> Self {
        self.config.fuzzy = FuzzyConfig { enabled, max_edits };
        self
    }

    pub fn prefix_enabled(mut self, enabled: bool) -> Self {
        self.config.prefix_enabled = enabled;
        self
    }

    pub fn highlight(mut self, enabled: bool, fragment_size: usize, max_fragments: usize) -> Self {
        self.config.highlight = HighlightConfig {
            enabled,
            fragment_size,
            max_fragments,
        };
        self
    }

    pub fn auto_indexing(mut self, enabled: bool) -> Self {
        self.config.auto_indexing = enabled;
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn indexing_threads(mut self, threads: usize) -> Self {
        self.config.indexing_threads = threads;
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.config.max_results = max;
        self
    }

    pub fn rebuild_batch_size(mut self, size: usize) -> Self {
        self.config.rebuild_batch_size = size;
        self
    }

    pub fn rebuild_commit_every(mut self, batches: usize) -> Self {
        self.config.rebuild_commit_every = batches;
        self
    }

    pub fn build(self) -> SearchConfig {
        self.config
    }
}

impl Default for SearchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
