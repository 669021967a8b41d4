//! Entity search descriptors and the schema registry
//!
//! Descriptors are declared once at startup with a fluent builder. Field
//! accessors are ordinary closures over the entity type; they are erased to
//! `&dyn Any` at registration so the registry, the change collector and the
//! index manager can work with every entity type through one table.

use crate::search::error::{SearchError, SearchResult};
use crate::search::value::{FieldValue, FieldValues, NumericKind};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Default id field name
pub const DEFAULT_ID_FIELD: &str = "Id";

/// Suffix of the hidden companion field holding autocomplete n-grams
pub(crate) const AUTOCOMPLETE_SUFFIX: &str = "__ac";

pub(crate) type Accessor = Arc<dyn Fn(&dyn Any) -> Option<FieldValue> + Send + Sync>;

fn erase<E, V, F>(accessor: F) -> Accessor
where
    E: Any,
    V: Into<FieldValue>,
    F: Fn(&E) -> Option<V> + Send + Sync + 'static,
{
    Arc::new(move |entity: &dyn Any| {
        entity
            .downcast_ref::<E>()
            .and_then(|e| accessor(e))
            .map(Into::into)
    })
}

/// Where a field's raw value comes from
#[derive(Clone)]
pub enum ValueSource {
    /// A property of the entity; value maps are looked up by `property`
    Property { property: String, accessor: Accessor },

    /// A value computed from the whole entity; value maps are looked up by field name
    Computed { compute: Accessor },
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Property { property, .. } => {
                f.debug_struct("Property").field("property", property).finish()
            }
            ValueSource::Computed { .. } => f.write_str("Computed"),
        }
    }
}

/// Term vector flags, recorded for future highlighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermVectors {
    pub positions: bool,
    pub offsets: bool,
}

/// How a field ends up in the index, after the descriptor invariants are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    StoredOnly,
    Numeric(NumericKind),
    Keyword,
    Text,
}

/// One mapped property or computed value
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    source: ValueSource,
    source_type: TypeId,
    boost: f32,
    store: bool,
    searchable: bool,
    keyword: bool,
    lower_case_keyword: bool,
    culture: Option<String>,
    autocomplete: Option<(usize, usize)>,
    term_vectors: Option<TermVectors>,
    numeric_kind: NumericKind,
    depends: Vec<String>,
}

impl FieldDescriptor {
    fn with_source(name: String, source: ValueSource, source_type: TypeId) -> Self {
        Self {
            name,
            source,
            source_type,
            boost: 1.0,
            store: false,
            searchable: true,
            keyword: false,
            lower_case_keyword: false,
            culture: None,
            autocomplete: None,
            term_vectors: None,
            numeric_kind: NumericKind::None,
            depends: Vec::new(),
        }
    }

    /// Field backed by a property accessor
    pub fn property<E, V, F>(name: impl Into<String>, accessor: F) -> Self
    where
        E: Any,
        V: Into<FieldValue>,
        F: Fn(&E) -> Option<V> + Send + Sync + 'static,
    {
        let name = name.into();
        let source = ValueSource::Property {
            property: name.clone(),
            accessor: erase(accessor),
        };
        Self::with_source(name, source, TypeId::of::<E>())
    }

    /// Field backed by a function of the whole entity
    pub fn computed<E, V, F>(name: impl Into<String>, compute: F) -> Self
    where
        E: Any,
        V: Into<FieldValue>,
        F: Fn(&E) -> Option<V> + Send + Sync + 'static,
    {
        let source = ValueSource::Computed {
            compute: erase(compute),
        };
        Self::with_source(name.into(), source, TypeId::of::<E>())
    }

    /// Field read from a [`FieldValues`] map under `property`
    pub fn value(name: impl Into<String>, property: impl Into<String>) -> Self {
        let property = property.into();
        let key = property.clone();
        let accessor: Accessor = Arc::new(move |entity: &dyn Any| {
            entity
                .downcast_ref::<FieldValues>()
                .and_then(|values| values.get(&key).cloned())
        });
        Self::with_source(
            name.into(),
            ValueSource::Property { property, accessor },
            TypeId::of::<FieldValues>(),
        )
    }

    /// Name used when looking this property up in a value map
    pub fn property_name(mut self, property: impl Into<String>) -> Self {
        if let ValueSource::Property { property: p, .. } = &mut self.source {
            *p = property.into();
        }
        self
    }

    pub fn boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn stored(self) -> Self {
        self.store(true)
    }

    pub fn store(mut self, store: bool) -> Self {
        self.store = store;
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    /// Shorthand for a stored-only field
    pub fn stored_only(self) -> Self {
        self.searchable(false)
    }

    pub fn keyword(mut self) -> Self {
        self.keyword = true;
        self
    }

    /// Lower-case keyword values before indexing, optionally for a culture
    pub fn lower_case_keyword(mut self, culture: Option<&str>) -> Self {
        self.keyword = true;
        self.lower_case_keyword = true;
        self.culture = culture.map(str::to_string);
        self
    }

    pub fn autocomplete(mut self, min: usize, max: usize) -> Self {
        self.autocomplete = Some((min, max));
        self
    }

    pub fn term_vectors(mut self, positions: bool, offsets: bool) -> Self {
        self.term_vectors = Some(TermVectors { positions, offsets });
        self
    }

    pub fn numeric(mut self, kind: NumericKind) -> Self {
        self.numeric_kind = kind;
        self
    }

    pub fn depends_on<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ValueSource {
        &self.source
    }

    pub fn boost_factor(&self) -> f32 {
        self.boost
    }

    pub fn is_searchable(&self) -> bool {
        self.searchable
    }

    /// Stored-only fields are always stored
    pub fn is_stored(&self) -> bool {
        self.store || !self.searchable
    }

    pub fn lower_cases_keyword(&self) -> bool {
        self.lower_case_keyword
    }

    pub fn culture(&self) -> Option<&str> {
        self.culture.as_deref()
    }

    pub fn autocomplete_range(&self) -> Option<(usize, usize)> {
        match self.encoding() {
            FieldEncoding::Text | FieldEncoding::Keyword => self.autocomplete,
            _ => None,
        }
    }

    pub fn term_vector_flags(&self) -> Option<TermVectors> {
        self.term_vectors
    }

    pub fn numeric_kind(&self) -> NumericKind {
        self.numeric_kind
    }

    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    pub fn encoding(&self) -> FieldEncoding {
        if !self.searchable {
            FieldEncoding::StoredOnly
        } else if self.numeric_kind.is_numeric() {
            FieldEncoding::Numeric(self.numeric_kind)
        } else if self.keyword {
            FieldEncoding::Keyword
        } else {
            FieldEncoding::Text
        }
    }

    /// Name of the hidden autocomplete companion field
    pub(crate) fn autocomplete_field_name(&self) -> String {
        format!("{}{}", self.name, AUTOCOMPLETE_SUFFIX)
    }

    /// Resolve the raw value from a live entity
    pub(crate) fn resolve(&self, entity: &dyn Any) -> Option<FieldValue> {
        match &self.source {
            ValueSource::Property { accessor, .. } => accessor(entity),
            ValueSource::Computed { compute } => compute(entity),
        }
    }

    /// Resolve the raw value from a value map
    pub(crate) fn resolve_value(&self, values: &FieldValues) -> Option<FieldValue> {
        let key = match &self.source {
            ValueSource::Property { property, .. } => property.as_str(),
            ValueSource::Computed { .. } => self.name.as_str(),
        };
        values.get(key).cloned()
    }
}

/// Schema of one indexed entity type
#[derive(Debug, Clone)]
pub struct EntitySearchDescriptor {
    entity_type: String,
    index_name: String,
    id_field_name: String,
    id_source: Option<IdSource>,
    entity_type_id: TypeId,
    fields: Vec<FieldDescriptor>,
}

#[derive(Clone)]
struct IdSource(Accessor);

impl fmt::Debug for IdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdSource")
    }
}

impl EntitySearchDescriptor {
    /// Start a descriptor for a typed entity
    pub fn builder<E: Any>(entity_type: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(entity_type.into(), TypeId::of::<E>())
    }

    /// Start a descriptor whose entities are [`FieldValues`] maps
    pub fn values_builder(entity_type: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(entity_type.into(), TypeId::of::<FieldValues>())
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn id_field_name(&self) -> &str {
        &self.id_field_name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Exact match first, then ASCII case-insensitive
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field(name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// Fields targeted by free text when the request names none
    pub fn default_search_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| {
            matches!(f.encoding(), FieldEncoding::Text | FieldEncoding::Keyword)
        })
    }

    pub(crate) fn accepts(&self, entity: &dyn Any) -> bool {
        entity.type_id() == self.entity_type_id
    }

    /// Derive the string id of a live entity
    pub fn entity_id(&self, entity: &dyn Any) -> Option<String> {
        match &self.id_source {
            Some(IdSource(accessor)) => accessor(entity),
            None => entity
                .downcast_ref::<FieldValues>()
                .and_then(|values| values.get(&self.id_field_name).cloned()),
        }
        .map(|value| value.to_text())
        .filter(|id| !id.is_empty())
    }

    /// Read the id out of a value map
    pub fn values_id(&self, values: &FieldValues) -> Option<String> {
        values
            .get(&self.id_field_name)
            .map(FieldValue::to_text)
            .filter(|id| !id.is_empty())
    }
}

/// Fluent builder for [`EntitySearchDescriptor`]
pub struct DescriptorBuilder {
    entity_type: String,
    entity_type_id: TypeId,
    index_name: Option<String>,
    id_field_name: String,
    id_source: Option<(TypeId, Accessor)>,
    fields: Vec<FieldDescriptor>,
}

impl DescriptorBuilder {
    fn new(entity_type: String, entity_type_id: TypeId) -> Self {
        Self {
            entity_type,
            entity_type_id,
            index_name: None,
            id_field_name: DEFAULT_ID_FIELD.to_string(),
            id_source: None,
            fields: Vec::new(),
        }
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Id field name, read from value maps
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field_name = name.into();
        self
    }

    /// Id field name and the accessor producing the id of a live entity
    pub fn id<E, V, F>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        E: Any,
        V: Into<FieldValue>,
        F: Fn(&E) -> Option<V> + Send + Sync + 'static,
    {
        self.id_field_name = name.into();
        self.id_source = Some((TypeId::of::<E>(), erase(accessor)));
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields<I: IntoIterator<Item = FieldDescriptor>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn build(self) -> SearchResult<EntitySearchDescriptor> {
        let entity_type = self.entity_type;
        if entity_type.trim().is_empty() {
            return Err(SearchError::Configuration(
                "entity type name must not be empty".to_string(),
            ));
        }

        let index_name = self.index_name.unwrap_or_else(|| entity_type.clone());
        validate_path_segment("index name", &index_name)?;

        let id_source = match self.id_source {
            Some((type_id, _)) if type_id != self.entity_type_id => {
                return Err(SearchError::Configuration(format!(
                    "id accessor of '{}' is declared for a different entity type",
                    entity_type
                )));
            }
            Some((_, accessor)) => Some(IdSource(accessor)),
            None if self.entity_type_id == TypeId::of::<FieldValues>() => None,
            None => {
                return Err(SearchError::Configuration(format!(
                    "entity type '{}' has no id accessor",
                    entity_type
                )));
            }
        };

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_field(&entity_type, &self.id_field_name, self.entity_type_id, field)?;
            if !seen.insert(field.name.as_str()) {
                return Err(SearchError::Configuration(format!(
                    "duplicate field '{}' in entity type '{}'",
                    field.name, entity_type
                )));
            }
        }

        Ok(EntitySearchDescriptor {
            entity_type,
            index_name,
            id_field_name: self.id_field_name,
            id_source,
            entity_type_id: self.entity_type_id,
            fields: self.fields,
        })
    }
}

fn validate_field(
    entity_type: &str,
    id_field_name: &str,
    entity_type_id: TypeId,
    field: &FieldDescriptor,
) -> SearchResult<()> {
    let invalid = |reason: String| {
        SearchError::Configuration(format!(
            "field '{}' of entity type '{}' {}",
            field.name, entity_type, reason
        ))
    };

    if field.name.trim().is_empty() {
        return Err(invalid("has an empty name".to_string()));
    }
    if field.name.eq_ignore_ascii_case(id_field_name) {
        return Err(invalid("collides with the id field".to_string()));
    }
    if field.name.ends_with(AUTOCOMPLETE_SUFFIX) {
        return Err(invalid(format!(
            "uses the reserved suffix '{}'",
            AUTOCOMPLETE_SUFFIX
        )));
    }
    if field.source_type != entity_type_id {
        return Err(invalid("is declared for a different entity type".to_string()));
    }
    if !field.boost.is_finite() || field.boost <= 0.0 {
        return Err(invalid(format!("has invalid boost {}", field.boost)));
    }
    if let Some((min, max)) = field.autocomplete {
        if min == 0 || min > max {
            return Err(invalid(format!(
                "has invalid autocomplete range ({}, {})",
                min, max
            )));
        }
    }
    Ok(())
}

/// Index and tenant names become directory names
pub(crate) fn validate_path_segment(what: &str, value: &str) -> SearchResult<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(SearchError::Configuration(format!(
            "invalid {} '{}'",
            what, value
        )));
    }
    Ok(())
}

/// Read-only registry of entity descriptors
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_name: HashMap<String, Arc<EntitySearchDescriptor>>,
    by_type: HashMap<TypeId, String>,
    order: Vec<String>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            registry: SchemaRegistry::default(),
        }
    }

    /// Descriptor for an entity type; `None` means the type is not indexed
    pub fn get(&self, entity_type: &str) -> Option<Arc<EntitySearchDescriptor>> {
        self.by_name.get(entity_type).cloned()
    }

    /// Descriptor registered for a Rust type
    pub fn get_for<E: Any>(&self) -> Option<Arc<EntitySearchDescriptor>> {
        self.get_for_type_id(TypeId::of::<E>())
    }

    pub(crate) fn get_for_type_id(&self, type_id: TypeId) -> Option<Arc<EntitySearchDescriptor>> {
        self.by_type.get(&type_id).and_then(|name| self.get(name))
    }

    /// Like [`get`](Self::get), but a miss is a configuration error
    pub fn require(&self, entity_type: &str) -> SearchResult<Arc<EntitySearchDescriptor>> {
        self.get(entity_type).ok_or_else(|| {
            SearchError::Configuration(format!("entity type '{}' is not registered", entity_type))
        })
    }

    /// Registered entity type names, in registration order
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for [`SchemaRegistry`]
pub struct SchemaRegistryBuilder {
    registry: SchemaRegistry,
}

impl SchemaRegistryBuilder {
    pub fn register(mut self, descriptor: EntitySearchDescriptor) -> SearchResult<Self> {
        let registry = &mut self.registry;

        if registry.by_name.contains_key(&descriptor.entity_type) {
            return Err(SearchError::Configuration(format!(
                "entity type '{}' is already registered",
                descriptor.entity_type
            )));
        }
        if let Some(other) = registry
            .by_name
            .values()
            .find(|d| d.index_name == descriptor.index_name)
        {
            return Err(SearchError::Configuration(format!(
                "index '{}' is already used by entity type '{}'",
                descriptor.index_name, other.entity_type
            )));
        }

        // Value-map descriptors share one Rust type and are looked up by name only
        let type_id = descriptor.entity_type_id;
        if type_id != TypeId::of::<FieldValues>() {
            if let Some(existing) = registry.by_type.get(&type_id) {
                return Err(SearchError::Configuration(format!(
                    "Rust type of '{}' is already registered as '{}'",
                    descriptor.entity_type, existing
                )));
            }
            registry
                .by_type
                .insert(type_id, descriptor.entity_type.clone());
        }

        tracing::debug!(
            entity_type = %descriptor.entity_type,
            index = %descriptor.index_name,
            fields = descriptor.fields.len(),
            "Registered search descriptor"
        );

        registry.order.push(descriptor.entity_type.clone());
        registry
            .by_name
            .insert(descriptor.entity_type.clone(), Arc::new(descriptor));
        Ok(self)
    }

    pub fn build(self) -> Arc<SchemaRegistry> {
        Arc::new(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Book {
        id: u32,
        title: String,
    }

    struct Author {
        id: u32,
    }

    fn book_descriptor() -> DescriptorBuilder {
        EntitySearchDescriptor::builder::<Book>("Book")
            .id("Id", |b: &Book| Some(b.id))
            .field(FieldDescriptor::property("Title", |b: &Book| Some(b.title.clone())).stored())
    }

    #[test]
    fn test_defaults() {
        let descriptor = book_descriptor().build().unwrap();
        assert_eq!(descriptor.index_name(), "Book");
        assert_eq!(descriptor.id_field_name(), DEFAULT_ID_FIELD);

        let title = descriptor.field("Title").unwrap();
        assert_eq!(title.boost_factor(), 1.0);
        assert_eq!(title.encoding(), FieldEncoding::Text);
        assert!(title.is_stored());
    }

    #[test]
    fn test_encoding_invariants() {
        let numeric_keyword = FieldDescriptor::value("Year", "year")
            .keyword()
            .numeric(NumericKind::Int32);
        assert_eq!(
            numeric_keyword.encoding(),
            FieldEncoding::Numeric(NumericKind::Int32)
        );

        let stored_only = FieldDescriptor::value("Raw", "raw")
            .keyword()
            .numeric(NumericKind::Int64)
            .stored_only();
        assert_eq!(stored_only.encoding(), FieldEncoding::StoredOnly);
        assert!(stored_only.is_stored());
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let result = book_descriptor()
            .field(FieldDescriptor::property("Title", |b: &Book| Some(b.title.clone())))
            .build();
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_field_for_other_type_is_rejected() {
        let result = book_descriptor()
            .field(FieldDescriptor::property("AuthorId", |a: &Author| Some(a.id)))
            .build();
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_invalid_boost_and_autocomplete() {
        let bad_boost = book_descriptor()
            .field(FieldDescriptor::property("Sub", |b: &Book| Some(b.title.clone())).boost(0.0))
            .build();
        assert!(bad_boost.is_err());

        let bad_range = book_descriptor()
            .field(
                FieldDescriptor::property("Sub", |b: &Book| Some(b.title.clone()))
                    .autocomplete(4, 2),
            )
            .build();
        assert!(bad_range.is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = SchemaRegistry::builder()
            .register(book_descriptor().build().unwrap())
            .unwrap();
        let result = registry.register(book_descriptor().build().unwrap());
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_lookup() {
        let registry = SchemaRegistry::builder()
            .register(book_descriptor().index_name("books").build().unwrap())
            .unwrap()
            .register(
                EntitySearchDescriptor::values_builder("Shelf")
                    .field(FieldDescriptor::value("Name", "name"))
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .build();

        assert_eq!(registry.get_for::<Book>().unwrap().index_name(), "books");
        assert!(registry.get("Missing").is_none());
        assert!(registry.require("Missing").is_err());
        assert_eq!(registry.entity_types().collect::<Vec<_>>(), vec!["Book", "Shelf"]);
    }

    #[test]
    fn test_entity_id_resolution() {
        let descriptor = book_descriptor().build().unwrap();
        let book = Book {
            id: 9,
            title: "Dune".to_string(),
        };
        assert_eq!(descriptor.entity_id(&book), Some("9".to_string()));

        let values_descriptor = EntitySearchDescriptor::values_builder("Shelf")
            .build()
            .unwrap();
        let mut values = FieldValues::new();
        assert_eq!(values_descriptor.entity_id(&values), None);
        values.insert("Id".to_string(), FieldValue::from("s-1"));
        assert_eq!(values_descriptor.entity_id(&values), Some("s-1".to_string()));
    }

    #[test]
    fn test_rejects_path_like_index_names() {
        let result = book_descriptor().index_name("../escape").build();
        assert!(result.is_err());
    }
}
