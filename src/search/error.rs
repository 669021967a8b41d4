//! Error types for search operations

use crate::search::value::NumericKind;
use std::fmt;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// A single document that could not be written during a batch operation
#[derive(Debug)]
pub struct DocumentFailure {
    /// Entity id, when it could be resolved
    pub entity_id: Option<String>,

    /// Why the document was rejected
    pub error: SearchError,
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_id {
            Some(id) => write!(f, "{}: {}", id, self.error),
            None => write!(f, "<unresolved id>: {}", self.error),
        }
    }
}

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Unregistered entity type, duplicate registration or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A numeric or date field value could not be coerced
    #[error("Cannot coerce field '{field}' to {kind}: {message}")]
    FieldCoercion {
        field: String,
        kind: NumericKind,
        message: String,
    },

    /// Storage open/commit failure
    #[error("Index I/O error on '{index}': {message}")]
    IndexIo { index: String, message: String },

    /// Malformed free-text query or filter
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    /// No id could be derived for an entity
    #[error("Cannot resolve id for entity of type '{0}'")]
    EntityIdUnresolved(String),

    /// Some documents of a batch were rejected; the rest were committed
    #[error(
        "{} document(s) rejected while indexing '{index}' ({indexed} indexed): {}",
        failures.len(),
        summarize(failures)
    )]
    DocumentsRejected {
        index: String,
        indexed: usize,
        failures: Vec<DocumentFailure>,
    },

    /// At least one entity type failed to flush
    #[error("Flush failed for {} entity type(s): {}", failures.len(), summarize_flush(failures))]
    FlushFailed { failures: Vec<(String, SearchError)> },

    /// A long-running operation observed its cancellation token
    #[error("Operation cancelled after committing {indexed} document(s)")]
    Cancelled { indexed: usize },

    /// The persistence paging source failed
    #[error("Entity source error: {0}")]
    Source(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),
}

fn summarize(failures: &[DocumentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_flush(failures: &[(String, SearchError)]) -> String {
    failures
        .iter()
        .map(|(entity_type, err)| format!("{}: {}", entity_type, err))
        .collect::<Vec<_>>()
        .join("; ")
}

impl SearchError {
    /// Build an I/O error for the given index
    pub fn index_io(index: impl Into<String>, err: impl fmt::Display) -> Self {
        SearchError::IndexIo {
            index: index.into(),
            message: err.to_string(),
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            SearchError::Configuration(_) => "CONFIGURATION_ERROR",
            SearchError::FieldCoercion { .. } => "FIELD_COERCION_ERROR",
            SearchError::IndexIo { .. } => "INDEX_IO_ERROR",
            SearchError::QuerySyntax(_) => "QUERY_SYNTAX_ERROR",
            SearchError::EntityIdUnresolved(_) => "ENTITY_ID_UNRESOLVED",
            SearchError::DocumentsRejected { .. } => "DOCUMENTS_REJECTED",
            SearchError::FlushFailed { .. } => "FLUSH_FAILED",
            SearchError::Cancelled { .. } => "CANCELLED",
            SearchError::Source(_) => "SOURCE_ERROR",
            SearchError::SearchFailed(_) => "SEARCH_FAILED",
        }
    }

    /// Whether the error is a validation failure the caller should show to the user
    pub fn is_user_error(&self) -> bool {
        matches!(self, SearchError::QuerySyntax(_))
    }
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::SearchFailed(err.to_string())
    }
}
