//! Document mapping and index schema construction

use crate::search::config::AnalyzerKind;
use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{
    EntitySearchDescriptor, FieldDescriptor, FieldEncoding, AUTOCOMPLETE_SUFFIX,
};
use crate::search::value::{fold_keyword, FieldValue, FieldValues};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tantivy::schema::*;
use tantivy::TantivyDocument;

/// Tokenizer used for exact-match fields
pub(crate) const RAW_TOKENIZER: &str = "raw";

/// Trait for documents that can be written to the index
pub trait SearchDocument {
    /// Convert to Tantivy document
    fn to_tantivy_doc(&self, schema: &Schema) -> SearchResult<TantivyDocument>;

    /// Get document ID
    fn document_id(&self) -> &str;
}

/// An entity as held by the change collector and passed to batch indexing
#[derive(Clone)]
pub enum EntityRecord {
    /// A live entity instance
    Instance(Arc<dyn Any + Send + Sync>),

    /// A flat value map, e.g. a projection read during rebuild
    Values(Arc<FieldValues>),
}

impl EntityRecord {
    pub fn instance<E: Any + Send + Sync>(entity: E) -> Self {
        EntityRecord::Instance(Arc::new(entity))
    }

    pub fn values(values: FieldValues) -> Self {
        EntityRecord::Values(Arc::new(values))
    }

    /// Id derived through the descriptor
    pub fn id(&self, descriptor: &EntitySearchDescriptor) -> Option<String> {
        match self {
            EntityRecord::Instance(entity) => descriptor.entity_id(entity.as_ref()),
            EntityRecord::Values(values) => descriptor.values_id(values),
        }
    }

    /// Map into an index-ready document
    pub fn map(&self, descriptor: &EntitySearchDescriptor) -> SearchResult<IndexDocument> {
        match self {
            EntityRecord::Instance(entity) => map_entity(descriptor, entity.as_ref()),
            EntityRecord::Values(values) => map_values(descriptor, values),
        }
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRecord::Instance(_) => f.write_str("Instance(..)"),
            EntityRecord::Values(values) => f.debug_tuple("Values").field(values).finish(),
        }
    }
}

/// Index-native encoding of one field value
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// Tokenized free text
    Text(String),

    /// Untokenized, exact-match string
    Keyword(String),

    /// Range-queryable integer
    Numeric(i64),

    /// Opaque stored-only string
    Stored(String),
}

/// A mapped field of an [`IndexDocument`]
#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub name: String,
    pub value: EncodedValue,
    pub stored: bool,

    /// Set only when the boost differs from 1.0
    pub boost: Option<f32>,

    /// Also feed the hidden autocomplete field
    pub autocomplete: bool,
}

/// Mapped, index-ready representation of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id_field: String,
    pub id: String,
    pub fields: Vec<IndexField>,
}

impl IndexDocument {
    pub fn field(&self, name: &str) -> Option<&IndexField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl SearchDocument for IndexDocument {
    fn to_tantivy_doc(&self, schema: &Schema) -> SearchResult<TantivyDocument> {
        let lookup = |name: &str| {
            schema.get_field(name).map_err(|_| {
                SearchError::Configuration(format!("index schema has no field '{}'", name))
            })
        };

        let mut doc = TantivyDocument::new();
        doc.add_text(lookup(&self.id_field)?, &self.id);

        for field in &self.fields {
            let target = lookup(&field.name)?;
            match &field.value {
                EncodedValue::Numeric(n) => doc.add_i64(target, *n),
                EncodedValue::Text(s) | EncodedValue::Keyword(s) | EncodedValue::Stored(s) => {
                    doc.add_text(target, s)
                }
            }

            if field.autocomplete {
                if let EncodedValue::Text(s) | EncodedValue::Keyword(s) = &field.value {
                    let companion = format!("{}{}", field.name, AUTOCOMPLETE_SUFFIX);
                    doc.add_text(lookup(&companion)?, s);
                }
            }
        }

        Ok(doc)
    }

    fn document_id(&self) -> &str {
        &self.id
    }
}

/// Map a live entity
pub fn map_entity(descriptor: &EntitySearchDescriptor, entity: &dyn Any) -> SearchResult<IndexDocument> {
    if !descriptor.accepts(entity) {
        return Err(SearchError::Configuration(format!(
            "entity passed for '{}' has a different Rust type",
            descriptor.entity_type()
        )));
    }

    let id = descriptor
        .entity_id(entity)
        .ok_or_else(|| SearchError::EntityIdUnresolved(descriptor.entity_type().to_string()))?;

    map_fields(descriptor, id, |field| field.resolve(entity))
}

/// Map a flat value map; properties are read by property name, computed values by field name
pub fn map_values(descriptor: &EntitySearchDescriptor, values: &FieldValues) -> SearchResult<IndexDocument> {
    let id = descriptor
        .values_id(values)
        .ok_or_else(|| SearchError::EntityIdUnresolved(descriptor.entity_type().to_string()))?;

    map_fields(descriptor, id, |field| field.resolve_value(values))
}

fn map_fields<F>(descriptor: &EntitySearchDescriptor, id: String, resolve: F) -> SearchResult<IndexDocument>
where
    F: Fn(&FieldDescriptor) -> Option<FieldValue>,
{
    let mut fields = Vec::with_capacity(descriptor.fields().len());

    for field in descriptor.fields() {
        let Some(raw) = resolve(field) else {
            continue;
        };

        let value = match field.encoding() {
            FieldEncoding::StoredOnly => EncodedValue::Stored(raw.to_text()),
            FieldEncoding::Numeric(kind) => EncodedValue::Numeric(kind.coerce(field.name(), &raw)?),
            FieldEncoding::Keyword if field.lower_cases_keyword() => {
                EncodedValue::Keyword(fold_keyword(&raw.to_text(), field.culture()))
            }
            FieldEncoding::Keyword => EncodedValue::Keyword(raw.to_text()),
            FieldEncoding::Text => EncodedValue::Text(raw.to_text()),
        };

        let boost = field.boost_factor();
        fields.push(IndexField {
            name: field.name().to_string(),
            value,
            stored: field.is_stored(),
            boost: (boost != 1.0).then_some(boost),
            autocomplete: field.autocomplete_range().is_some(),
        });
    }

    Ok(IndexDocument {
        id_field: descriptor.id_field_name().to_string(),
        id,
        fields,
    })
}

/// Name of the edge n-gram tokenizer for an autocomplete range
pub(crate) fn autocomplete_tokenizer_name(min: usize, max: usize) -> String {
    format!("autocomplete_{}_{}", min, max)
}

/// Build the index schema for a descriptor
pub fn build_index_schema(descriptor: &EntitySearchDescriptor, analyzer: AnalyzerKind) -> Schema {
    let mut schema_builder = Schema::builder();

    // Id - exact match, always stored
    schema_builder.add_text_field(descriptor.id_field_name(), STRING | STORED);

    for field in descriptor.fields() {
        let stored = field.is_stored();

        match field.encoding() {
            FieldEncoding::StoredOnly => {
                schema_builder.add_text_field(field.name(), STORED);
            }
            FieldEncoding::Numeric(_) => {
                let mut options = NumericOptions::default().set_indexed().set_fast();
                if stored {
                    options = options.set_stored();
                }
                schema_builder.add_i64_field(field.name(), options);
            }
            FieldEncoding::Keyword => {
                let indexing = TextFieldIndexing::default()
                    .set_tokenizer(RAW_TOKENIZER)
                    .set_index_option(IndexRecordOption::Basic);
                schema_builder.add_text_field(field.name(), text_options(indexing, stored));
            }
            FieldEncoding::Text => {
                let indexing = TextFieldIndexing::default()
                    .set_tokenizer(analyzer.tokenizer_name())
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions);
                schema_builder.add_text_field(field.name(), text_options(indexing, stored));
            }
        }

        if let Some((min, max)) = field.autocomplete_range() {
            let indexing = TextFieldIndexing::default()
                .set_tokenizer(&autocomplete_tokenizer_name(min, max))
                .set_index_option(IndexRecordOption::Basic);
            schema_builder.add_text_field(
                &field.autocomplete_field_name(),
                TextOptions::default().set_indexing_options(indexing),
            );
        }
    }

    schema_builder.build()
}

fn text_options(indexing: TextFieldIndexing, stored: bool) -> TextOptions {
    let options = TextOptions::default().set_indexing_options(indexing);
    if stored {
        options.set_stored()
    } else {
        options
    }
}

/// Stored fields of a hit, as strings; numeric values come back as integer strings
pub(crate) fn stored_payload(
    doc: &TantivyDocument,
    schema: &Schema,
    descriptor: &EntitySearchDescriptor,
) -> BTreeMap<String, String> {
    let names = std::iter::once(descriptor.id_field_name())
        .chain(descriptor.fields().iter().filter(|f| f.is_stored()).map(|f| f.name()));

    let mut payload = BTreeMap::new();
    for name in names {
        let Ok(field) = schema.get_field(name) else {
            continue;
        };
        let value = doc.get_first(field).and_then(|v| {
            v.as_str()
                .map(str::to_string)
                .or_else(|| v.as_i64().map(|n| n.to_string()))
        });
        if let Some(value) = value {
            payload.insert(name.to_string(), value);
        }
    }
    payload
}
