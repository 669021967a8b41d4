//! Search requests and query construction

use crate::search::config::{MultiFieldMode, SearchConfig};
use crate::search::error::{SearchError, SearchResult};
use crate::search::filter::FilterPredicate;
use crate::search::parser::{parse_query, ClauseOccur, ClauseText, ParsedQuery, QueryClause};
use crate::search::schema::{EntitySearchDescriptor, FieldDescriptor, FieldEncoding};
use crate::search::value::{fold_keyword, FieldValue};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tantivy::query::{
    BooleanQuery, BoostQuery, ConstScoreQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery,
    Query, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption, Schema};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, Term};

/// Largest supported fuzzy edit distance
pub const MAX_FUZZY_EDITS: u8 = 2;

/// Default page size
pub const DEFAULT_TAKE: usize = 20;

/// Sort order for search results
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortOrder {
    #[strum(serialize = "asc", serialize = "ascending")]
    Ascending,
    #[default]
    #[strum(serialize = "desc", serialize = "descending")]
    Descending,
}

/// Sort by a numeric field instead of relevance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// A search over one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Free-text query
    pub query: String,

    /// Fields to search; empty means every searchable text and keyword field
    pub fields: Vec<String>,

    pub fuzzy: bool,

    /// Overrides the configured maximum edit distance
    pub fuzzy_max_edits: Option<u8>,

    pub prefix: bool,

    /// Accepted for compatibility; fragments are never produced
    pub highlight: bool,

    /// Overrides the configured multi-field mode
    pub multi_field_mode: Option<MultiFieldMode>,

    pub filter: Option<FilterPredicate>,

    pub skip: usize,
    pub take: usize,

    /// Relevance order when unset
    pub sort: Option<SortSpec>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            fields: Vec::new(),
            fuzzy: false,
            fuzzy_max_edits: None,
            prefix: false,
            highlight: false,
            multi_field_mode: None,
            filter: None,
            skip: 0,
            take: DEFAULT_TAKE,
            sort: None,
        }
    }
}

impl SearchRequest {
    /// Create a new search request
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Enable fuzzy matching, optionally overriding the edit distance
    pub fn with_fuzzy(mut self, max_edits: Option<u8>) -> Self {
        self.fuzzy = true;
        self.fuzzy_max_edits = max_edits;
        self
    }

    pub fn with_prefix(mut self, prefix: bool) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_highlight(mut self, highlight: bool) -> Self {
        self.highlight = highlight;
        self
    }

    pub fn with_multi_field_mode(mut self, mode: MultiFieldMode) -> Self {
        self.multi_field_mode = Some(mode);
        self
    }

    pub fn with_filter(mut self, filter: FilterPredicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_paging(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }
}

/// A search fanned out over several entity types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiEntitySearchRequest {
    /// Entity types to search; their order breaks score ties
    pub entities: Vec<String>,

    #[serde(flatten)]
    pub request: SearchRequest,
}

impl MultiEntitySearchRequest {
    pub fn new<I, S>(entities: I, request: SearchRequest) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: entities.into_iter().map(Into::into).collect(),
            request,
        }
    }
}

/// Effective matching options after config and request are combined
#[derive(Debug, Clone, Copy)]
struct MatchOptions {
    /// Zero disables fuzzy matching
    fuzzy_edits: u8,
    prefix: bool,
    mode: MultiFieldMode,
}

#[derive(Clone, Copy)]
enum Target<'d> {
    Id,
    Field(&'d FieldDescriptor),
}

fn occur_of(occur: ClauseOccur) -> Occur {
    match occur {
        ClauseOccur::Should => Occur::Should,
        ClauseOccur::Must => Occur::Must,
        ClauseOccur::MustNot => Occur::MustNot,
    }
}

fn boosted(query: Box<dyn Query>, boost: f32) -> Box<dyn Query> {
    if boost == 1.0 {
        query
    } else {
        Box::new(BoostQuery::new(query, boost))
    }
}

/// Translates search requests into Tantivy queries for one index
pub struct QueryBuilder<'a> {
    descriptor: &'a EntitySearchDescriptor,
    index: &'a Index,
    schema: &'a Schema,
    config: &'a SearchConfig,
}

impl<'a> QueryBuilder<'a> {
    /// Create a new query builder
    pub fn new(
        descriptor: &'a EntitySearchDescriptor,
        index: &'a Index,
        schema: &'a Schema,
        config: &'a SearchConfig,
    ) -> Self {
        Self {
            descriptor,
            index,
            schema,
            config,
        }
    }

    /// Build the query for a request.
    ///
    /// An empty query matches nothing unless a filter is given, in which case
    /// it matches everything the filter admits. Filters never change scores.
    pub fn build(&self, request: &SearchRequest) -> SearchResult<Box<dyn Query>> {
        let options = self.options(request)?;
        let filter = request
            .filter
            .as_ref()
            .map(|f| f.to_query(self.descriptor, self.schema))
            .transpose()?;
        let parsed = parse_query(&request.query)?;

        let text = if parsed.is_empty() {
            None
        } else {
            Some(self.text_query(&parsed, request, options)?)
        };

        Ok(match (text, filter) {
            (None, None) => Box::new(EmptyQuery),
            (None, Some(filter)) => Box::new(ConstScoreQuery::new(filter, 0.0)),
            (Some(text), None) => text,
            (Some(text), Some(filter)) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, text),
                (Occur::Must, Box::new(ConstScoreQuery::new(filter, 0.0)) as Box<dyn Query>),
            ])),
        })
    }

    fn options(&self, request: &SearchRequest) -> SearchResult<MatchOptions> {
        let max_edits = request
            .fuzzy_max_edits
            .unwrap_or(self.config.fuzzy.max_edits);
        if max_edits > MAX_FUZZY_EDITS {
            return Err(SearchError::QuerySyntax(format!(
                "fuzzy distance {} exceeds the maximum of {}",
                max_edits, MAX_FUZZY_EDITS
            )));
        }

        let fuzzy = request.fuzzy && self.config.fuzzy.enabled;
        Ok(MatchOptions {
            fuzzy_edits: if fuzzy { max_edits } else { 0 },
            prefix: request.prefix && self.config.prefix_enabled,
            mode: request
                .multi_field_mode
                .unwrap_or(self.config.multi_field_mode),
        })
    }

    fn target_fields(&self, request: &SearchRequest) -> SearchResult<Vec<&'a FieldDescriptor>> {
        if request.fields.is_empty() {
            return Ok(self.descriptor.default_search_fields().collect());
        }

        request
            .fields
            .iter()
            .map(|name| {
                self.descriptor.find_field(name).ok_or_else(|| {
                    SearchError::QuerySyntax(format!(
                        "unknown search field '{}' for entity type '{}'",
                        name,
                        self.descriptor.entity_type()
                    ))
                })
            })
            .collect()
    }

    fn resolve_qualifier(&self, name: &str) -> Option<Target<'a>> {
        if name.eq_ignore_ascii_case(self.descriptor.id_field_name()) {
            return Some(Target::Id);
        }
        self.descriptor.find_field(name).map(Target::Field)
    }

    fn text_query(
        &self,
        parsed: &ParsedQuery,
        request: &SearchRequest,
        options: MatchOptions,
    ) -> SearchResult<Box<dyn Query>> {
        let mut qualified: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let mut group: Vec<(Occur, ClauseText)> = Vec::new();
        let mut exclusions: Vec<ClauseText> = Vec::new();

        for clause in &parsed.clauses {
            let target = clause
                .field
                .as_deref()
                .and_then(|name| self.resolve_qualifier(name));

            match target {
                Some(target) => {
                    let mut query = self.field_query(target, &clause.text, options)?;
                    if let Target::Field(field) = target {
                        query = boosted(query, field.boost_factor());
                    }
                    qualified.push((occur_of(clause.occur), query));
                }
                None => {
                    let text = unqualified_text(clause);
                    match clause.occur {
                        ClauseOccur::MustNot => exclusions.push(text),
                        occur => group.push((occur_of(occur), text)),
                    }
                }
            }
        }

        let mut clauses = qualified;

        if !group.is_empty() || !exclusions.is_empty() {
            let fields = self.target_fields(request)?;

            if !group.is_empty() {
                let field_occur = match options.mode {
                    MultiFieldMode::And => Occur::Must,
                    MultiFieldMode::Or => Occur::Should,
                };

                let mut per_field: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(fields.len());
                for &field in &fields {
                    let terms = group
                        .iter()
                        .map(|(occur, text)| {
                            self.field_query(Target::Field(field), text, options)
                                .map(|q| (*occur, q))
                        })
                        .collect::<SearchResult<Vec<_>>>()?;

                    let query = boosted(Box::new(BooleanQuery::new(terms)), field.boost_factor());
                    per_field.push((field_occur, query));
                }

                let group_occur = if group.iter().any(|(occur, _)| *occur == Occur::Must) {
                    Occur::Must
                } else {
                    Occur::Should
                };
                let group_query: Box<dyn Query> = if per_field.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    Box::new(BooleanQuery::new(per_field))
                };
                clauses.push((group_occur, group_query));
            }

            // Excluded when the term matches in any targeted field
            for text in &exclusions {
                let any_field = fields
                    .iter()
                    .map(|&field| {
                        self.field_query(Target::Field(field), text, options)
                            .map(|q| (Occur::Should, q))
                    })
                    .collect::<SearchResult<Vec<_>>>()?;
                clauses.push((Occur::MustNot, Box::new(BooleanQuery::new(any_field))));
            }
        }

        if clauses.len() == 1 && clauses[0].0 != Occur::MustNot {
            if let Some((_, query)) = clauses.pop() {
                return Ok(query);
            }
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn field_query(
        &self,
        target: Target<'a>,
        text: &ClauseText,
        options: MatchOptions,
    ) -> SearchResult<Box<dyn Query>> {
        let field = match target {
            Target::Id => {
                let id_field = self.schema_field(self.descriptor.id_field_name())?;
                return Ok(self.keyword_query(id_field, None, text, None, options));
            }
            Target::Field(field) => field,
        };

        match field.encoding() {
            FieldEncoding::StoredOnly => Ok(Box::new(EmptyQuery)),
            FieldEncoding::Numeric(kind) => {
                let raw = match text {
                    ClauseText::Word { text, .. } | ClauseText::Phrase(text) => text,
                };
                let schema_field = self.schema_field(field.name())?;
                Ok(match kind.coerce(field.name(), &FieldValue::Text(raw.clone())) {
                    Ok(value) => Box::new(TermQuery::new(
                        Term::from_field_i64(schema_field, value),
                        IndexRecordOption::Basic,
                    )),
                    Err(_) => Box::new(EmptyQuery),
                })
            }
            FieldEncoding::Keyword => {
                let schema_field = self.schema_field(field.name())?;
                let fold = field.lower_cases_keyword().then(|| field.culture());
                Ok(self.keyword_query(schema_field, Some(field), text, fold, options))
            }
            FieldEncoding::Text => self.text_field_query(field, text, options),
        }
    }

    fn keyword_query(
        &self,
        schema_field: Field,
        field: Option<&FieldDescriptor>,
        text: &ClauseText,
        fold: Option<Option<&str>>,
        options: MatchOptions,
    ) -> Box<dyn Query> {
        let (value, is_prefix) = match text {
            ClauseText::Phrase(phrase) => (phrase.clone(), false),
            ClauseText::Word { text, prefix: true } if !options.prefix => (format!("{}*", text), false),
            ClauseText::Word { text, .. } => (text.clone(), options.prefix),
        };
        let value = match fold {
            Some(culture) => fold_keyword(&value, culture),
            None => value,
        };

        if matches!(text, ClauseText::Phrase(_)) {
            return Box::new(TermQuery::new(
                Term::from_field_text(schema_field, &value),
                IndexRecordOption::Basic,
            ));
        }
        self.single_term(schema_field, field, &value, is_prefix, options, IndexRecordOption::Basic)
    }

    fn text_field_query(
        &self,
        field: &FieldDescriptor,
        text: &ClauseText,
        options: MatchOptions,
    ) -> SearchResult<Box<dyn Query>> {
        let schema_field = self.schema_field(field.name())?;

        let (source, is_prefix) = match text {
            ClauseText::Phrase(phrase) => (phrase.clone(), false),
            // With prefix matching off a trailing `*` is part of the text
            ClauseText::Word { text, prefix: true } if !options.prefix => (format!("{}*", text), false),
            ClauseText::Word { text, .. } => (text.clone(), options.prefix),
        };

        let tokens = self.analyze(schema_field, &source)?;
        Ok(match tokens.as_slice() {
            [] => Box::new(EmptyQuery),
            [token] => self.single_term(
                schema_field,
                Some(field),
                token,
                is_prefix,
                options,
                IndexRecordOption::WithFreqs,
            ),
            _ => Box::new(PhraseQuery::new(
                tokens
                    .iter()
                    .map(|token| Term::from_field_text(schema_field, token))
                    .collect(),
            )),
        })
    }

    fn single_term(
        &self,
        schema_field: Field,
        field: Option<&FieldDescriptor>,
        token: &str,
        is_prefix: bool,
        options: MatchOptions,
        record_option: IndexRecordOption,
    ) -> Box<dyn Query> {
        let term = Term::from_field_text(schema_field, token);

        if is_prefix {
            let prefix: Box<dyn Query> =
                Box::new(FuzzyTermQuery::new_prefix(term, options.fuzzy_edits, true));
            return match field.and_then(|f| self.autocomplete_query(f, token)) {
                Some(completion) => Box::new(BooleanQuery::new(vec![
                    (Occur::Should, prefix),
                    (Occur::Should, completion),
                ])),
                None => prefix,
            };
        }

        if options.fuzzy_edits > 0 {
            return Box::new(FuzzyTermQuery::new(term, options.fuzzy_edits, true));
        }

        Box::new(TermQuery::new(term, record_option))
    }

    /// Match on the edge n-gram companion field, i.e. values starting with `token`
    fn autocomplete_query(&self, field: &FieldDescriptor, token: &str) -> Option<Box<dyn Query>> {
        let (min, max) = field.autocomplete_range()?;
        let length = token.chars().count();
        if length < min || length > max {
            return None;
        }

        let companion = self.schema.get_field(&field.autocomplete_field_name()).ok()?;
        Some(Box::new(TermQuery::new(
            Term::from_field_text(companion, &token.to_lowercase()),
            IndexRecordOption::Basic,
        )))
    }

    fn analyze(&self, schema_field: Field, text: &str) -> SearchResult<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(schema_field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        stream.process(&mut |token| tokens.push(token.text.clone()));
        Ok(tokens)
    }

    fn schema_field(&self, name: &str) -> SearchResult<Field> {
        self.schema
            .get_field(name)
            .map_err(|_| SearchError::Configuration(format!("index schema has no field '{}'", name)))
    }
}

/// A clause whose qualifier is not a known field is searched as plain text
fn unqualified_text(clause: &QueryClause) -> ClauseText {
    if clause.field.is_none() {
        return clause.text.clone();
    }
    match clause.raw.strip_suffix('*') {
        Some(stem) => ClauseText::Word {
            text: stem.to_string(),
            prefix: true,
        },
        None => ClauseText::Word {
            text: clause.raw.clone(),
            prefix: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::document::build_index_schema;
    use crate::search::value::NumericKind;

    fn descriptor() -> EntitySearchDescriptor {
        EntitySearchDescriptor::values_builder("Book")
            .field(FieldDescriptor::value("Title", "Title").boost(2.0).autocomplete(2, 10))
            .field(FieldDescriptor::value("Author", "Author"))
            .field(FieldDescriptor::value("LibraryId", "LibraryId").lower_case_keyword(None))
            .field(FieldDescriptor::value("Year", "Year").numeric(NumericKind::Int32))
            .build()
            .unwrap()
    }

    fn build(request: &SearchRequest, config: &SearchConfig) -> SearchResult<Box<dyn Query>> {
        let descriptor = descriptor();
        let schema = build_index_schema(&descriptor, config.analyzer);
        let index = Index::create_in_ram(schema.clone());
        QueryBuilder::new(&descriptor, &index, &schema, config).build(request)
    }

    #[test]
    fn test_request_defaults() {
        let request = SearchRequest::new("dune");
        assert_eq!(request.take, DEFAULT_TAKE);
        assert!(!request.fuzzy && !request.prefix && !request.highlight);

        let parsed: SearchRequest = serde_json::from_str(r#"{"query": "x", "prefix": true}"#).unwrap();
        assert!(parsed.prefix);
        assert_eq!(parsed.take, DEFAULT_TAKE);
    }

    #[test]
    fn test_fuzzy_distance_limit() {
        let config = SearchConfig::default();
        let request = SearchRequest::new("lucene").with_fuzzy(Some(3));
        assert!(matches!(build(&request, &config), Err(SearchError::QuerySyntax(_))));

        let request = SearchRequest::new("lucene").with_fuzzy(Some(2));
        assert!(build(&request, &config).is_ok());
    }

    #[test]
    fn test_malformed_queries() {
        let config = SearchConfig::default();
        for bad in ["\"open", "a AND", ":x"] {
            assert!(matches!(
                build(&SearchRequest::new(bad), &config),
                Err(SearchError::QuerySyntax(_))
            ));
        }

        let unknown_field = SearchRequest::new("x").with_fields(["Shelf"]);
        assert!(matches!(build(&unknown_field, &config), Err(SearchError::QuerySyntax(_))));

        let unknown_filter = SearchRequest::new("x").with_filter(FilterPredicate::eq("Shelf", "a"));
        assert!(matches!(build(&unknown_filter, &config), Err(SearchError::QuerySyntax(_))));
    }

    #[test]
    fn test_builds_every_clause_shape() {
        let config = SearchConfig::default();
        for query in [
            "lucene",
            "Luc*",
            "\"lucene in action\"",
            "Title:lucene Author:\"erik hatcher\"",
            "Year:2004 Id:b-1",
            "libraryid:LIB-1",
            "unknown:thing -manning",
            "+lucene -java",
        ] {
            let request = SearchRequest::new(query)
                .with_prefix(true)
                .with_fuzzy(Some(1));
            assert!(build(&request, &config).is_ok(), "failed to build {:?}", query);
        }
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Descending);
    }
}
