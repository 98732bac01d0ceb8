mod common;

use common::{ScriptedProvider, WrongDimensionProvider, abc_provider, docs, in_memory_store};
use embedstore::{
    BackendConfig, DistanceFunction, Document, EmbeddingError, EmbeddingRecord,
    LazyEmbeddingStore, StoreError,
};
use std::sync::Arc;

#[tokio::test]
async fn second_add_of_same_id_never_calls_provider() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());

    let first = store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert_eq!(first.added, vec!["a", "b"]);
    assert_eq!(provider.calls(), 2);

    let second = store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert!(second.added.is_empty());
    assert_eq!(second.skipped, vec!["a", "b"]);
    assert_eq!(provider.calls(), 2);
    assert_eq!(store.len().unwrap(), 2);
}

#[tokio::test]
async fn changed_content_keeps_first_embedding() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());

    store.add(docs(&[("doc", "a")])).await.unwrap();
    let report = store.add(docs(&[("doc", "y")])).await.unwrap();

    assert_eq!(report.skipped, vec!["doc"]);
    assert_eq!(provider.calls_for("y"), 0);
    let record = store.get("doc").unwrap().unwrap();
    assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
    assert_eq!(record.content, "a");
}

#[tokio::test]
async fn duplicate_ids_within_one_batch_embed_once() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());

    let report = store
        .add(docs(&[("a", "a"), ("a", "a"), ("b", "b"), ("a", "c")]))
        .await
        .unwrap();

    assert_eq!(report.added, vec!["a", "b"]);
    assert_eq!(report.skipped, vec!["a", "a"]);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn failed_document_is_retried_on_next_add() {
    let provider = Arc::new(abc_provider());
    provider.fail_on("b");
    let store = in_memory_store(provider.clone());

    let report = store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert_eq!(report.added, vec!["a"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "b");
    assert!(matches!(
        report.failed[0].error,
        StoreError::Embedding(EmbeddingError::Unavailable(_))
    ));
    assert!(!store.contains("b").unwrap());

    provider.recover("b");
    let retry = store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert_eq!(retry.added, vec!["b"]);
    assert_eq!(retry.skipped, vec!["a"]);
    assert_eq!(provider.calls_for("a"), 1);
    assert_eq!(provider.calls_for("b"), 2);
}

#[tokio::test]
async fn partial_failure_surfaces_through_ensure_complete() {
    let provider = Arc::new(abc_provider());
    provider.fail_on("c");
    let store = in_memory_store(provider);

    let report = store.add(docs(&[("a", "a"), ("c", "c")])).await.unwrap();
    match report.ensure_complete() {
        Err(StoreError::PartialIngest { failed, total }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 2);
        }
        other => panic!("expected partial ingest, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_length_provider_vector_counts_as_failure() {
    let backend = BackendConfig::in_memory()
        .build(3, DistanceFunction::Cosine)
        .unwrap();
    let store = LazyEmbeddingStore::new(
        backend,
        Arc::new(WrongDimensionProvider {
            claimed: 3,
            actual: 4,
        }),
    )
    .unwrap();

    let report = store.add(docs(&[("a", "a")])).await.unwrap();
    assert!(report.added.is_empty());
    assert!(matches!(
        report.failed[0].error,
        StoreError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
    ));
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn non_finite_provider_vector_counts_as_failure() {
    let provider = Arc::new(
        abc_provider()
            .with_vector("bad", vec![f32::NAN, 0.0, 0.0])
            .with_vector("good", vec![1.0, 0.0, 0.0]),
    );
    let store = in_memory_store(provider);

    let report = store.add(docs(&[("bad", "bad"), ("good", "good")])).await.unwrap();
    assert_eq!(report.added, vec!["good"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "bad");
    assert!(matches!(report.failed[0].error, StoreError::InvalidVector(_)));
    assert!(!store.contains("bad").unwrap());

    let hits = store.search(&[1.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "good");

    let rejected = store
        .insert(EmbeddingRecord::new("inf", "inf", vec![0.0, f32::INFINITY, 0.0]))
        .await;
    assert!(matches!(rejected, Err(StoreError::InvalidVector(_))));
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test]
async fn insert_rejects_wrong_dimension_and_skips_known_ids() {
    let provider = Arc::new(ScriptedProvider::new(3));
    let store = in_memory_store(provider.clone());

    let bad = store
        .insert(EmbeddingRecord::new("x", "x", vec![1.0, 0.0]))
        .await;
    assert!(matches!(
        bad,
        Err(StoreError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert!(store.is_empty().unwrap());

    assert!(store
        .insert(EmbeddingRecord::new("x", "x", vec![0.0, 1.0, 0.0]))
        .await
        .unwrap());
    assert!(!store
        .insert(EmbeddingRecord::new("x", "other", vec![1.0, 0.0, 0.0]))
        .await
        .unwrap());
    assert_eq!(store.get("x").unwrap().unwrap().embedding, vec![0.0, 1.0, 0.0]);

    let report = store.add(vec![Document::new("x", "x")]).await.unwrap();
    assert_eq!(report.skipped, vec!["x"]);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn delete_allows_reembedding() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());

    store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert_eq!(store.delete(["a", "missing"]).await.unwrap(), 1);
    assert!(!store.contains("a").unwrap());

    let report = store.add(docs(&[("a", "a")])).await.unwrap();
    assert_eq!(report.added, vec!["a"]);
    assert_eq!(provider.calls_for("a"), 2);
}

#[tokio::test]
async fn metadata_is_stored_with_the_record() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider);

    let doc = Document::new("a", "a")
        .with_metadata("lang", "en")
        .with_metadata("pages", 12);
    store.add(vec![doc]).await.unwrap();

    let record = store.get("a").unwrap().unwrap();
    assert_eq!(record.metadata["lang"], "en");
    assert_eq!(record.metadata["pages"], 12);
}
