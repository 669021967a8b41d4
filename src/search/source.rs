//! Persistence paging sources used by full rebuilds

use crate::search::document::EntityRecord;
use crate::search::error::{SearchError, SearchResult};
use crate::search::value::{FieldValue, FieldValues};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// Pages entities out of the system of record
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetch up to `limit` entities starting at `offset`; a short page ends the scan
    async fn fetch_page(
        &self,
        entity_type: &str,
        offset: usize,
        limit: usize,
    ) -> SearchResult<Vec<EntityRecord>>;
}

/// Source backed by in-memory record lists
#[derive(Default)]
pub struct InMemorySource {
    records: RwLock<HashMap<String, Vec<EntityRecord>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entity_type: &str, record: EntityRecord) {
        self.records
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .push(record);
    }

    pub fn extend<I>(&self, entity_type: &str, records: I)
    where
        I: IntoIterator<Item = EntityRecord>,
    {
        self.records
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .extend(records);
    }

    pub fn len(&self, entity_type: &str) -> usize {
        self.records
            .read()
            .get(entity_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EntitySource for InMemorySource {
    async fn fetch_page(
        &self,
        entity_type: &str,
        offset: usize,
        limit: usize,
    ) -> SearchResult<Vec<EntityRecord>> {
        let records = self.records.read();
        Ok(records
            .get(entity_type)
            .map(|all| all.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Source reading one entity type from a JSON-lines file of flat objects
pub struct JsonLinesSource {
    entity_type: String,
    path: PathBuf,
    records: OnceCell<Vec<EntityRecord>>,
}

impl JsonLinesSource {
    pub fn new(entity_type: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            entity_type: entity_type.into(),
            path: path.as_ref().to_path_buf(),
            records: OnceCell::new(),
        }
    }

    async fn load(&self) -> SearchResult<&Vec<EntityRecord>> {
        self.records
            .get_or_try_init(|| async {
                let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                    SearchError::Source(format!("Failed to read {}: {}", self.path.display(), e))
                })?;
                let records = parse_json_lines(&content)?;
                tracing::debug!(
                    path = %self.path.display(),
                    records = records.len(),
                    "Loaded JSON-lines source"
                );
                Ok(records)
            })
            .await
    }
}

#[async_trait]
impl EntitySource for JsonLinesSource {
    async fn fetch_page(
        &self,
        entity_type: &str,
        offset: usize,
        limit: usize,
    ) -> SearchResult<Vec<EntityRecord>> {
        if entity_type != self.entity_type {
            return Err(SearchError::Source(format!(
                "{} holds '{}' entities, not '{}'",
                self.path.display(),
                self.entity_type,
                entity_type
            )));
        }

        let records = self.load().await?;
        Ok(records.iter().skip(offset).take(limit).cloned().collect())
    }
}

/// Parse flat JSON objects, one per non-blank line
pub fn parse_json_lines(content: &str) -> SearchResult<Vec<EntityRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
                .map_err(|e| SearchError::Source(format!("line {}: {}", number + 1, e)))?;

            let values: FieldValues = object
                .iter()
                .filter_map(|(key, value)| FieldValue::from_json(value).map(|v| (key.clone(), v)))
                .collect();
            Ok(EntityRecord::values(values))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_in_memory_paging() {
        let source = InMemorySource::new();
        source.extend(
            "Book",
            (0..5).map(|i| {
                let mut values = FieldValues::new();
                values.insert("Id".to_string(), FieldValue::from(i as i64));
                EntityRecord::values(values)
            }),
        );

        assert_eq!(source.len("Book"), 5);

        let page = |offset| tokio_test::block_on(source.fetch_page("Book", offset, 2)).unwrap();
        assert_eq!(page(0).len(), 2);
        assert_eq!(page(4).len(), 1);
        assert!(tokio_test::block_on(source.fetch_page("Author", 0, 2))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Id": "b-1", "Title": "Dune", "Year": 1965}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"Id": "b-2", "Title": null}}"#).unwrap();

        let source = JsonLinesSource::new("Book", file.path());
        let page = source.fetch_page("Book", 0, 10).await.unwrap();
        assert_eq!(page.len(), 2);

        match &page[1] {
            EntityRecord::Values(values) => assert!(!values.contains_key("Title")),
            other => panic!("unexpected record {:?}", other),
        }

        assert!(source.fetch_page("Author", 0, 10).await.is_err());
    }

    #[test]
    fn test_malformed_line_names_line_number() {
        let err = parse_json_lines("{\"Id\": 1}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
