mod common;

use common::{abc_provider, docs, in_memory_store};
use embedstore::{
    BackendConfig, DistanceFunction, LazyEmbeddingStore, Snapshot, StoreError,
};
use std::sync::Arc;
use tempfile::tempdir;

const SEED: &str = r#"[
    {"id": "a", "content": "a", "embedding": [1.0, 0.0, 0.0]},
    {"id": "b", "content": "b", "embedding": [0.0, 1.0, 0.0], "metadata": {"source": "seed"}},
    {"id": "c", "content": "c"}
]"#;

#[tokio::test]
async fn seeds_vectors_and_defers_unembedded_entries() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());

    let report = store.hydrate(Snapshot::from_json(SEED).unwrap()).await.unwrap();
    assert_eq!(report.seeded, 2);
    assert_eq!(report.deferred, 1);
    assert!(!report.skipped);
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.pending_len().unwrap(), 1);
    assert_eq!(store.get("b").unwrap().unwrap().metadata["source"], "seed");

    // The next add embeds the deferred entry even when called with nothing new.
    let add = store.add(Vec::new()).await.unwrap();
    assert_eq!(add.added, vec!["c"]);
    assert_eq!(provider.calls(), 1);
    assert_eq!(store.pending_len().unwrap(), 0);
    assert_eq!(store.get("c").unwrap().unwrap().embedding, vec![0.9, 0.1, 0.0]);
}

#[tokio::test]
async fn seeded_documents_are_never_reembedded() {
    let provider = Arc::new(abc_provider());
    let store = in_memory_store(provider.clone());
    store.hydrate(Snapshot::from_json(SEED).unwrap()).await.unwrap();

    let report = store.add(docs(&[("a", "a"), ("b", "b")])).await.unwrap();
    assert_eq!(report.skipped, vec!["a", "b"]);
    assert_eq!(provider.calls_for("a"), 0);
    assert_eq!(provider.calls_for("b"), 0);
}

#[tokio::test]
async fn hydration_runs_only_on_an_empty_backend() {
    let store = in_memory_store(Arc::new(abc_provider()));
    store.add(docs(&[("existing", "x")])).await.unwrap();

    let report = store.hydrate(Snapshot::from_json(SEED).unwrap()).await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.seeded, 0);
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.pending_len().unwrap(), 0);
}

#[tokio::test]
async fn bad_dimension_in_snapshot_leaves_store_empty() {
    let store = in_memory_store(Arc::new(abc_provider()));
    let snapshot = Snapshot::from_json(
        r#"[
            {"id": "a", "content": "a", "embedding": [1.0, 0.0, 0.0]},
            {"id": "b", "content": "b", "embedding": [1.0, 0.0]}
        ]"#,
    )
    .unwrap();

    assert!(matches!(
        store.hydrate(snapshot).await,
        Err(StoreError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn non_finite_vector_in_snapshot_leaves_store_empty() {
    let store = in_memory_store(Arc::new(abc_provider()));
    let snapshot = Snapshot::from_json(
        r#"[
            {"id": "a", "content": "a", "embedding": [1.0, 0.0, 0.0]},
            {"id": "b", "content": "b", "embedding": [1.0, 0.0, 1e39]}
        ]"#,
    )
    .unwrap();

    assert!(matches!(
        store.hydrate(snapshot).await,
        Err(StoreError::InvalidVector(_))
    ));
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn repeated_id_in_snapshot_keeps_first_entry() {
    let store = in_memory_store(Arc::new(abc_provider()));
    let snapshot = Snapshot::from_json(
        r#"[
            {"id": "a", "content": "first", "embedding": [1.0, 0.0, 0.0]},
            {"id": "a", "content": "second", "embedding": [0.0, 1.0, 0.0]}
        ]"#,
    )
    .unwrap();

    let report = store.hydrate(snapshot).await.unwrap();
    assert_eq!(report.seeded, 1);
    assert_eq!(report.existing, 1);
    let record = store.get("a").unwrap().unwrap();
    assert_eq!(record.content, "first");
    assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn flush_keeps_deferred_entries_for_the_next_start() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(
        &path,
        r#"[
            {"id": "a", "content": "a", "embedding": [1.0, 0.0, 0.0]},
            {"id": "p", "content": "b"}
        ]"#,
    )
    .unwrap();

    let open = |provider: Arc<common::ScriptedProvider>| {
        let backend = BackendConfig::in_memory_with_snapshot(&path)
            .build(3, DistanceFunction::Cosine)
            .unwrap();
        LazyEmbeddingStore::new(backend, provider).unwrap()
    };

    {
        let store = open(Arc::new(abc_provider()));
        store.hydrate_from_file(&path).await.unwrap();
        assert_eq!(store.pending_len().unwrap(), 1);
        store.flush().unwrap();
    }

    let on_disk = Snapshot::from_file(&path).unwrap();
    assert_eq!(on_disk.len(), 2);
    assert!(on_disk
        .entries()
        .iter()
        .any(|e| e.id == "p" && e.embedding.is_none()));

    let provider = Arc::new(abc_provider());
    let store = open(provider.clone());
    let report = store.hydrate_from_file(&path).await.unwrap();
    assert_eq!(report.seeded, 1);
    assert_eq!(report.deferred, 1);

    let add = store.add(Vec::new()).await.unwrap();
    assert_eq!(add.added, vec!["p"]);
    assert_eq!(provider.calls_for("b"), 1);
    assert_eq!(store.get("p").unwrap().unwrap().embedding, vec![0.0, 1.0, 0.0]);

    store.flush().unwrap();
    let on_disk = Snapshot::from_file(&path).unwrap();
    assert!(on_disk.entries().iter().all(|e| e.embedding.is_some()));
}

#[tokio::test]
async fn keyed_snapshot_files_are_accepted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("keyed.json");
    std::fs::write(
        &path,
        r#"{
            "a": {"id": "a", "content": "a", "embedding": [1.0, 0.0, 0.0]},
            "b": {"id": "b", "content": "b", "embedding": [0.0, 1.0, 0.0]}
        }"#,
    )
    .unwrap();

    let store = in_memory_store(Arc::new(abc_provider()));
    let report = store.hydrate_from_file(&path).await.unwrap();
    assert_eq!(report.seeded, 2);
    assert_eq!(store.search(&[0.0, 1.0, 0.0], 1).unwrap()[0].id, "b");
}

#[tokio::test]
async fn export_then_hydrate_restores_the_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("export.json");

    let source = in_memory_store(Arc::new(abc_provider()));
    source
        .add(docs(&[("a", "a"), ("b", "b"), ("c", "c")]))
        .await
        .unwrap();
    source.export().unwrap().write_to(&path).unwrap();

    let provider = Arc::new(abc_provider());
    let restored = in_memory_store(provider.clone());
    let report = restored.hydrate_from_file(&path).await.unwrap();
    assert_eq!(report.seeded, 3);
    assert_eq!(provider.calls(), 0);

    let hits = restored.search(&[1.0, 0.0, 0.0], 2).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["a", "c"]);
}

#[test]
fn malformed_snapshot_is_a_snapshot_error() {
    assert!(matches!(
        Snapshot::from_json("{not json"),
        Err(StoreError::Snapshot(_))
    ));
}
