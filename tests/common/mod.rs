//! Common test utilities for search integration tests
//!
//! Typed fixtures (`Book`, `Article`) and helpers to stand up a search
//! service over them.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use entity_search::search::{
    EntitySearchDescriptor, FieldDescriptor, NumericKind, SchemaRegistry, SearchConfig,
    SearchService,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub library_id: String,
    pub year: i32,
    pub summary: Option<String>,
}

impl Book {
    pub fn new(id: i64, title: &str, author: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            author: author.to_string(),
            library_id: "LIB-1".to_string(),
            year: 2000,
            summary: None,
        }
    }

    pub fn in_library(mut self, library_id: &str) -> Self {
        self.library_id = library_id.to_string();
        self
    }

    pub fn published(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub headline: String,
    pub published_at: DateTime<Utc>,
}

impl Article {
    pub fn new(id: &str, headline: &str) -> Self {
        Self {
            id: id.to_string(),
            headline: headline.to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }
}

pub fn book_descriptor() -> EntitySearchDescriptor {
    EntitySearchDescriptor::builder::<Book>("Book")
        .index_name("books")
        .id("Id", |b: &Book| Some(b.id))
        .field(
            FieldDescriptor::property("Title", |b: &Book| Some(b.title.clone()))
                .boost(2.0)
                .stored()
                .autocomplete(2, 15),
        )
        .field(FieldDescriptor::property("Author", |b: &Book| Some(b.author.clone())).stored())
        .field(
            FieldDescriptor::property("LibraryId", |b: &Book| Some(b.library_id.clone()))
                .lower_case_keyword(None),
        )
        .field(
            FieldDescriptor::property("Year", |b: &Book| Some(b.year))
                .numeric(NumericKind::Int32)
                .stored(),
        )
        .field(FieldDescriptor::property("Summary", |b: &Book| b.summary.clone()))
        .build()
        .unwrap()
}

pub fn article_descriptor() -> EntitySearchDescriptor {
    EntitySearchDescriptor::builder::<Article>("Article")
        .id("Id", |a: &Article| Some(a.id.clone()))
        .field(FieldDescriptor::property("Headline", |a: &Article| Some(a.headline.clone())).stored())
        .field(
            FieldDescriptor::property("PublishedAt", |a: &Article| Some(a.published_at))
                .numeric(NumericKind::DateEpochMillis)
                .stored(),
        )
        .build()
        .unwrap()
}

pub fn registry() -> Arc<SchemaRegistry> {
    SchemaRegistry::builder()
        .register(book_descriptor())
        .unwrap()
        .register(article_descriptor())
        .unwrap()
        .build()
}

/// In-memory service over `Book` and `Article`
pub async fn create_test_service() -> SearchService {
    create_service(SearchConfig::default()).await
}

pub async fn create_service(config: SearchConfig) -> SearchService {
    SearchService::new(config, registry()).await.unwrap()
}

/// Index books immediately, outside any unit of work
pub async fn index_books(service: &SearchService, books: Vec<Book>) {
    let collector = service.change_collector();
    for book in books {
        collector.on_created(book).unwrap();
    }
    service.flush(&collector).await.unwrap();
}

pub fn ids(response: &entity_search::search::SearchResponse) -> Vec<String> {
    response.hits.iter().map(|h| h.entity_id.clone()).collect()
}
