//! Integration tests for change collection and flush-on-commit

mod common;

use common::*;
use entity_search::search::*;

struct Untracked;

async fn titles(service: &SearchService, query: &str) -> Vec<String> {
    let response = service
        .search("Book", &SearchRequest::new(query).with_fields(["Title"]))
        .await
        .unwrap();
    ids(&response)
}

#[tokio::test]
async fn test_last_upsert_wins() {
    let service = create_test_service().await;
    let collector = service.change_collector();

    collector.on_created(Book::new(1, "First draft", "Ann")).unwrap();
    collector.on_updated(Book::new(1, "Second edition", "Ann")).unwrap();
    assert_eq!(collector.pending_upserts("Book"), vec!["1"]);

    let summary = service.flush(&collector).await.unwrap();
    assert_eq!(summary, FlushSummary { indexed: 1, deleted: 0 });

    assert_eq!(titles(&service, "second").await, vec!["1"]);
    assert!(titles(&service, "draft").await.is_empty());
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_wins_in_either_order() {
    let service = create_test_service().await;
    index_books(&service, vec![Book::new(2, "Already indexed", "Bob")]).await;

    let collector = service.change_collector();
    let first = Book::new(1, "Upsert then delete", "Ann");
    collector.on_created(first.clone()).unwrap();
    collector.on_deleted(&first).unwrap();

    let second = Book::new(2, "Delete then upsert", "Bob");
    collector.on_deleted(&second).unwrap();
    collector.on_updated(second).unwrap();

    // Only book 2 was live; book 1 never reached the index
    let summary = service.flush(&collector).await.unwrap();
    assert_eq!(summary, FlushSummary { indexed: 0, deleted: 1 });
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 0);
    assert!(collector.is_empty());
}

#[tokio::test]
async fn test_flush_registers_at_most_once() {
    let service = create_test_service().await;
    let collector = service.change_collector();
    let unit_of_work = UnitOfWork::new();

    collector.on_created(Book::new(1, "Transactional", "Ann")).unwrap();
    let registrations: Vec<bool> = (0..3)
        .map(|_| collector.register_flush(&unit_of_work, service.index_manager().clone()))
        .collect();
    assert_eq!(registrations, vec![true, false, false]);
    assert_eq!(unit_of_work.pending_callbacks(), 1);

    collector.on_created(Book::new(2, "Joined later", "Bob")).unwrap();
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 0);

    unit_of_work.complete().await.unwrap();
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 2);
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let service = create_test_service().await;
    let collector = service.change_collector();
    let unit_of_work = UnitOfWork::new();

    collector.on_created(Book::new(1, "Never committed", "Ann")).unwrap();
    let flushed = collector
        .flush_or_register(Some(&unit_of_work), service.index_manager().clone())
        .await
        .unwrap();
    assert!(flushed.is_none());

    unit_of_work.rollback();
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 0);
}

#[tokio::test]
async fn test_flush_without_transaction_is_immediate() {
    let service = create_test_service().await;
    let collector = service.change_collector();

    collector.on_created(Book::new(1, "Immediate", "Ann")).unwrap();
    let summary = collector
        .flush_or_register(None, service.index_manager().clone())
        .await
        .unwrap();
    assert_eq!(summary, Some(FlushSummary { indexed: 1, deleted: 0 }));
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 1);
}

#[tokio::test]
async fn test_disabled_auto_indexing_and_unknown_types_are_ignored() {
    let service = create_service(SearchConfig::builder().auto_indexing(false).build()).await;
    let collector = service.change_collector();
    collector.on_created(Book::new(1, "Ignored", "Ann")).unwrap();
    assert!(collector.is_empty());

    let service = create_test_service().await;
    let collector = service.change_collector();
    collector.on_created(Untracked).unwrap();
    collector.on_deleted(&Untracked).unwrap();
    assert!(collector.is_empty());
}

#[tokio::test]
async fn test_missing_id_is_reported() {
    let service = create_test_service().await;
    let collector = service.change_collector();

    let err = collector.on_created(Article::new("", "No id")).unwrap_err();
    assert!(matches!(err, SearchError::EntityIdUnresolved(ref t) if t == "Article"));
}

#[tokio::test]
async fn test_flush_reports_every_failure() {
    let service = create_test_service().await;
    let collector = service.change_collector();

    let mut values = FieldValues::new();
    values.insert("Id".to_string(), FieldValue::from("a-1"));
    values.insert("Headline".to_string(), FieldValue::from("Bad date"));
    values.insert("PublishedAt".to_string(), FieldValue::from("yesterday"));
    collector.upsert_record("Article", "a-1", EntityRecord::values(values));
    collector.on_created(Book::new(1, "Still indexed", "Ann")).unwrap();

    let err = service.flush(&collector).await.unwrap_err();
    match err {
        SearchError::FlushFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "Article");
            assert!(matches!(failures[0].1, SearchError::DocumentsRejected { indexed: 0, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 1);
}

#[tokio::test]
async fn test_collectors_flush_into_their_tenant() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = SearchConfig::builder()
        .index_root(temp_dir.path())
        .per_tenant_isolation(true)
        .build();
    let service = create_service(config).await;
    let tenant = service.for_tenant("acme").unwrap();

    let collector = tenant.change_collector();
    assert_eq!(collector.tenant(), Some("acme"));
    collector.on_created(Book::new(1, "Tenant book", "Ann")).unwrap();
    tenant.flush(&collector).await.unwrap();

    assert_eq!(tenant.get_index_document_count("Book").await.unwrap(), 1);
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_share_one_index() {
    let service = create_test_service().await;

    let tasks: Vec<_> = (1..=16)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let book = Book::new(i, &format!("Concurrent {}", i), "Writer");
                if i % 2 == 0 {
                    let collector = service.change_collector();
                    collector.on_created(book).unwrap();
                    service.flush(&collector).await.map(|summary| summary.indexed)
                } else {
                    service
                        .index_records("Book", &[EntityRecord::instance(book)])
                        .await
                }
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
    assert_eq!(service.get_index_document_count("Book").await.unwrap(), 16);
}
