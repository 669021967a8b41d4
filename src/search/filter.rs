//! Structural filter predicates
//!
//! Filters are translated into constant-scored clauses over exact-match
//! fields: keyword fields, numeric fields and the id field.

use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{EntitySearchDescriptor, FieldEncoding};
use crate::search::value::{fold_keyword, FieldValue, NumericKind};
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, RangeQuery, TermQuery, TermSetQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema};
use tantivy::Term;

/// A filter over exact-match fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterPredicate {
    Eq {
        field: String,
        value: FieldValue,
    },
    In {
        field: String,
        values: Vec<FieldValue>,
    },
    /// Numeric fields only
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<FieldValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<FieldValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<FieldValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<FieldValue>,
    },
    And {
        predicates: Vec<FilterPredicate>,
    },
    Or {
        predicates: Vec<FilterPredicate>,
    },
    Not {
        predicate: Box<FilterPredicate>,
    },
}

impl FilterPredicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        FilterPredicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn in_set<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        FilterPredicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Inclusive range; `None` leaves a side open
    pub fn between(
        field: impl Into<String>,
        gte: Option<impl Into<FieldValue>>,
        lte: Option<impl Into<FieldValue>>,
    ) -> Self {
        FilterPredicate::Range {
            field: field.into(),
            gt: None,
            gte: gte.map(Into::into),
            lt: None,
            lte: lte.map(Into::into),
        }
    }

    pub fn and(predicates: Vec<FilterPredicate>) -> Self {
        FilterPredicate::And { predicates }
    }

    pub fn or(predicates: Vec<FilterPredicate>) -> Self {
        FilterPredicate::Or { predicates }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: FilterPredicate) -> Self {
        FilterPredicate::Not {
            predicate: Box::new(predicate),
        }
    }

    /// Every field name referenced by this predicate
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterPredicate::Eq { field, .. }
            | FilterPredicate::In { field, .. }
            | FilterPredicate::Range { field, .. } => out.push(field),
            FilterPredicate::And { predicates } | FilterPredicate::Or { predicates } => {
                predicates.iter().for_each(|p| p.collect_fields(out))
            }
            FilterPredicate::Not { predicate } => predicate.collect_fields(out),
        }
    }

    /// Whether every referenced field can be filtered on in this descriptor
    pub fn applies_to(&self, descriptor: &EntitySearchDescriptor) -> bool {
        self.fields()
            .into_iter()
            .all(|name| FilterTarget::resolve(descriptor, name).is_ok())
    }

    /// Translate into an index query
    pub fn to_query(&self, descriptor: &EntitySearchDescriptor, schema: &Schema) -> SearchResult<Box<dyn Query>> {
        match self {
            FilterPredicate::Eq { field, value } => {
                let target = FilterTarget::resolve(descriptor, field)?;
                let term = target.term(schema, value)?;
                Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            FilterPredicate::In { field, values } => {
                let target = FilterTarget::resolve(descriptor, field)?;
                if values.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                let terms = values
                    .iter()
                    .map(|value| target.term(schema, value))
                    .collect::<SearchResult<Vec<_>>>()?;
                Ok(Box::new(TermSetQuery::new(terms)))
            }
            FilterPredicate::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => {
                let target = FilterTarget::resolve(descriptor, field)?;
                let FilterTarget::Numeric { name, .. } = &target else {
                    return Err(SearchError::QuerySyntax(format!(
                        "range filter on non-numeric field '{}'",
                        field
                    )));
                };
                let lower = target.bound(gt.as_ref(), gte.as_ref(), "gt", "gte")?;
                let upper = target.bound(lt.as_ref(), lte.as_ref(), "lt", "lte")?;
                Ok(Box::new(RangeQuery::new_i64_bounds(name.clone(), lower, upper)))
            }
            FilterPredicate::And { predicates } => {
                if predicates.is_empty() {
                    return Ok(Box::new(AllQuery));
                }
                let clauses = predicates
                    .iter()
                    .map(|p| p.to_query(descriptor, schema).map(|q| (Occur::Must, q)))
                    .collect::<SearchResult<Vec<_>>>()?;
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
            FilterPredicate::Or { predicates } => {
                if predicates.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                let clauses = predicates
                    .iter()
                    .map(|p| p.to_query(descriptor, schema).map(|q| (Occur::Should, q)))
                    .collect::<SearchResult<Vec<_>>>()?;
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
            FilterPredicate::Not { predicate } => {
                let inner = predicate.to_query(descriptor, schema)?;
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, Box::new(AllQuery) as Box<dyn Query>),
                    (Occur::MustNot, inner),
                ])))
            }
        }
    }
}

/// A field a filter can target
enum FilterTarget<'a> {
    Keyword {
        name: String,
        fold: Option<Option<&'a str>>,
    },
    Numeric {
        name: String,
        kind: NumericKind,
    },
}

impl<'a> FilterTarget<'a> {
    fn resolve(descriptor: &'a EntitySearchDescriptor, name: &str) -> SearchResult<Self> {
        if name.eq_ignore_ascii_case(descriptor.id_field_name()) {
            return Ok(FilterTarget::Keyword {
                name: descriptor.id_field_name().to_string(),
                fold: None,
            });
        }

        let field = descriptor.find_field(name).ok_or_else(|| {
            SearchError::QuerySyntax(format!(
                "unknown filter field '{}' for entity type '{}'",
                name,
                descriptor.entity_type()
            ))
        })?;

        match field.encoding() {
            FieldEncoding::Keyword => Ok(FilterTarget::Keyword {
                name: field.name().to_string(),
                fold: field.lower_cases_keyword().then(|| field.culture()),
            }),
            FieldEncoding::Numeric(kind) => Ok(FilterTarget::Numeric {
                name: field.name().to_string(),
                kind,
            }),
            _ => Err(SearchError::QuerySyntax(format!(
                "field '{}' is not a keyword or numeric field and cannot be filtered",
                field.name()
            ))),
        }
    }

    fn field(&self, schema: &Schema) -> SearchResult<Field> {
        let name = match self {
            FilterTarget::Keyword { name, .. } | FilterTarget::Numeric { name, .. } => name,
        };
        schema
            .get_field(name)
            .map_err(|_| SearchError::Configuration(format!("index schema has no field '{}'", name)))
    }

    fn term(&self, schema: &Schema, value: &FieldValue) -> SearchResult<Term> {
        let field = self.field(schema)?;
        match self {
            FilterTarget::Keyword { fold, .. } => {
                let text = value.to_text();
                let text = match fold {
                    Some(culture) => fold_keyword(&text, *culture),
                    None => text,
                };
                Ok(Term::from_field_text(field, &text))
            }
            FilterTarget::Numeric { name, kind } => {
                Ok(Term::from_field_i64(field, coerce_filter_value(name, *kind, value)?))
            }
        }
    }

    fn bound(
        &self,
        exclusive: Option<&FieldValue>,
        inclusive: Option<&FieldValue>,
        exclusive_name: &str,
        inclusive_name: &str,
    ) -> SearchResult<Bound<i64>> {
        let FilterTarget::Numeric { name, kind } = self else {
            return Ok(Bound::Unbounded);
        };

        match (exclusive, inclusive) {
            (Some(_), Some(_)) => Err(SearchError::QuerySyntax(format!(
                "range on '{}' sets both '{}' and '{}'",
                name, exclusive_name, inclusive_name
            ))),
            (Some(value), None) => Ok(Bound::Excluded(coerce_filter_value(name, *kind, value)?)),
            (None, Some(value)) => Ok(Bound::Included(coerce_filter_value(name, *kind, value)?)),
            (None, None) => Ok(Bound::Unbounded),
        }
    }
}

fn coerce_filter_value(
    name: &str,
    kind: NumericKind,
    value: &FieldValue,
) -> SearchResult<i64> {
    kind.coerce(name, value)
        .map_err(|e| SearchError::QuerySyntax(format!("invalid filter value: {}", e)))
}
