//! Declarative entity definitions
//!
//! Entity types described in configuration instead of code. Records of these
//! types are value maps keyed by property name, as produced by the JSON-lines
//! source.

use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{
    EntitySearchDescriptor, FieldDescriptor, SchemaRegistry, DEFAULT_ID_FIELD,
};
use crate::search::value::NumericKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One field of a declared entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Index field name
    pub name: String,

    /// Source property; defaults to the field name
    #[serde(default)]
    pub property: Option<String>,

    #[serde(default = "default_boost")]
    pub boost: f32,

    #[serde(default)]
    pub store: bool,

    #[serde(default = "default_true")]
    pub searchable: bool,

    /// Index the whole value as one token
    #[serde(default)]
    pub keyword: bool,

    /// Keyword folded to lower case
    #[serde(default)]
    pub lower_case_keyword: bool,

    /// Culture used for lower-case folding, e.g. "tr"
    #[serde(default)]
    pub culture: Option<String>,

    /// Edge n-gram range `[min, max]`
    #[serde(default)]
    pub autocomplete: Option<(usize, usize)>,

    #[serde(default)]
    pub numeric: NumericKind,

    /// Properties whose change should reindex this field
    #[serde(default)]
    pub depends: Vec<String>,
}

fn default_boost() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

/// A declared entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Entity type name
    pub name: String,

    /// Defaults to the entity type name
    #[serde(default)]
    pub index_name: Option<String>,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

impl FieldDefinition {
    fn into_descriptor(self) -> SearchResult<FieldDescriptor> {
        if self.keyword && self.numeric.is_numeric() {
            return Err(SearchError::Configuration(format!(
                "field '{}' cannot be both keyword and numeric",
                self.name
            )));
        }

        let property = self.property.unwrap_or_else(|| self.name.clone());
        let mut field = FieldDescriptor::value(self.name, property)
            .boost(self.boost)
            .store(self.store)
            .searchable(self.searchable)
            .depends_on(self.depends);

        if self.lower_case_keyword {
            field = field.lower_case_keyword(self.culture.as_deref());
        } else if self.keyword {
            field = field.keyword();
        }
        if self.numeric.is_numeric() {
            field = field.numeric(self.numeric);
        }
        if let Some((min, max)) = self.autocomplete {
            field = field.autocomplete(min, max);
        }
        Ok(field)
    }
}

impl EntityDefinition {
    /// Build the descriptor; records of this type are value maps
    pub fn into_descriptor(self) -> SearchResult<EntitySearchDescriptor> {
        let mut builder = EntitySearchDescriptor::values_builder(self.name).id_field(self.id_field);
        if let Some(index_name) = self.index_name {
            builder = builder.index_name(index_name);
        }
        for field in self.fields {
            builder = builder.field(field.into_descriptor()?);
        }
        builder.build()
    }
}

/// Register every definition into a fresh registry
pub fn build_registry(definitions: &[EntityDefinition]) -> SearchResult<Arc<SchemaRegistry>> {
    let mut builder = SchemaRegistry::builder();
    for definition in definitions {
        builder = builder.register(definition.clone().into_descriptor()?)?;
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::schema::FieldEncoding;

    const BOOKS: &str = r#"
        [[entities]]
        name = "Book"
        index_name = "books"

        [[entities.fields]]
        name = "Title"
        boost = 2.0
        store = true
        autocomplete = [2, 10]

        [[entities.fields]]
        name = "Library"
        property = "LibraryId"
        lower_case_keyword = true

        [[entities.fields]]
        name = "Year"
        numeric = "int32"
        store = true
    "#;

    #[derive(Deserialize)]
    struct Definitions {
        entities: Vec<EntityDefinition>,
    }

    fn definitions() -> Vec<EntityDefinition> {
        toml::from_str::<Definitions>(BOOKS).unwrap().entities
    }

    #[test]
    fn test_definition_to_descriptor() {
        let registry = build_registry(&definitions()).unwrap();
        let book = registry.get("Book").unwrap();

        assert_eq!(book.index_name(), "books");
        assert_eq!(book.id_field_name(), "Id");

        let title = book.field("Title").unwrap();
        assert_eq!(title.boost_factor(), 2.0);
        assert!(title.is_stored());
        assert_eq!(title.autocomplete_range(), Some((2, 10)));

        let library = book.field("Library").unwrap();
        assert_eq!(library.encoding(), FieldEncoding::Keyword);
        assert!(library.lower_cases_keyword());

        assert_eq!(
            book.field("Year").unwrap().encoding(),
            FieldEncoding::Numeric(NumericKind::Int32)
        );
    }

    #[test]
    fn test_invalid_definitions() {
        let mut defs = definitions();
        defs[0].fields[0].boost = 0.0;
        assert!(matches!(build_registry(&defs), Err(SearchError::Configuration(_))));

        let mut defs = definitions();
        defs[0].fields[1].numeric = NumericKind::Int64;
        defs[0].fields[1].keyword = true;
        assert!(build_registry(&defs).is_err());

        let mut defs = definitions();
        defs.push(defs[0].clone());
        assert!(build_registry(&defs).is_err());
    }
}
