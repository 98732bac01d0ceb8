//! The lazy embedding store.
//!
//! [`LazyEmbeddingStore`] is the only component that decides whether an
//! embedding gets computed: a document whose id the backend already holds is
//! skipped, everything else goes through the provider exactly once.
//!
//! Check, embed and write for one id run under that id's lock, so concurrent
//! adds of the same new document produce a single provider call while
//! unrelated ids proceed in parallel.

use crate::backend::StoreBackend;
use crate::embedding::EmbeddingProvider;
use crate::error::StoreError;
use crate::metrics::{MetricsSpan, StoreMetrics};
use crate::query::{self, DEFAULT_OVERSAMPLE_FACTOR, SearchHit, SearchRequest};
use crate::snapshot::{Snapshot, SnapshotItem};
use crate::types::{Document, EmbeddingRecord, Metadata};
use dashmap::DashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{Instrument, debug, info, info_span, warn};

/// A document that could not be ingested, with the reason.
#[derive(Debug)]
pub struct AddFailure {
    pub id: String,
    pub error: StoreError,
}

/// Per-document outcome of [`LazyEmbeddingStore::add`], in processing order.
#[derive(Debug, Default)]
pub struct AddReport {
    /// Ids whose embedding was computed and stored.
    pub added: Vec<String>,
    /// Ids that already had an embedding.
    pub skipped: Vec<String>,
    pub failed: Vec<AddFailure>,
}

impl AddReport {
    pub fn total(&self) -> usize {
        self.added.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn any per-document failure into [`StoreError::PartialIngest`].
    pub fn ensure_complete(self) -> Result<Self, StoreError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(StoreError::PartialIngest {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    /// Records written with the embedding the snapshot carried.
    pub seeded: usize,
    /// Entries without an embedding, queued for the next `add`.
    pub deferred: usize,
    /// Embedded entries whose id was already stored when its turn came.
    pub existing: usize,
    /// True when the backend already held data and nothing was seeded.
    pub skipped: bool,
}

/// Releases the per-id lock and drops the map entry once nobody else holds it.
struct IdLock<'a> {
    locks: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct LazyEmbeddingStore {
    backend: Box<dyn StoreBackend>,
    provider: Arc<dyn EmbeddingProvider>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    pending: Mutex<Vec<Document>>,
    oversample_factor: usize,
    metrics: Option<Arc<dyn StoreMetrics>>,
}

impl LazyEmbeddingStore {
    /// Fails with [`StoreError::Config`] when the provider and the backend
    /// disagree on the vector dimension.
    pub fn new(
        backend: Box<dyn StoreBackend>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, StoreError> {
        if provider.dimension() != backend.dimension() {
            return Err(StoreError::Config(format!(
                "provider `{}` produces {}-dimensional vectors, backend `{}` stores {}",
                provider.name(),
                provider.dimension(),
                backend.name(),
                backend.dimension()
            )));
        }
        Ok(Self {
            backend,
            provider,
            locks: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_oversample_factor(mut self, factor: usize) -> Self {
        self.oversample_factor = factor.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Documents deferred by hydration that the next `add` will process.
    pub fn pending_len(&self) -> Result<usize, StoreError> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(pending.len())
    }

    async fn lock_id(&self, id: &str) -> IdLock<'_> {
        let mutex = Arc::clone(
            self.locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        );
        let guard = mutex.lock_owned().await;
        IdLock {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    fn take_pending(&self) -> Result<Vec<Document>, StoreError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(std::mem::take(&mut *pending))
    }

    fn requeue(&self, docs: Vec<Document>) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        self.pending
            .lock()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .extend(docs);
        Ok(())
    }

    /// Ingest documents, computing embeddings only for ids the backend does
    /// not hold yet.
    ///
    /// Provider failures are per document and land in
    /// [`AddReport::failed`]; a backend failure aborts the batch.
    pub async fn add<I>(&self, documents: I) -> Result<AddReport, StoreError>
    where
        I: IntoIterator<Item = Document>,
    {
        let pending = self.take_pending()?;
        let pending_count = pending.len();
        let queue: Vec<Document> = pending.into_iter().chain(documents).collect();

        let span = info_span!(
            "store.add",
            backend = self.backend.name(),
            provider = %self.provider.name(),
            documents = queue.len(),
            pending = pending_count
        );
        self.add_queue(queue, pending_count).instrument(span).await
    }

    async fn add_queue(
        &self,
        queue: Vec<Document>,
        pending_count: usize,
    ) -> Result<AddReport, StoreError> {
        let mut report = AddReport::default();
        let mut retry_later = Vec::new();
        let mut docs = queue.into_iter().enumerate();

        while let Some((position, doc)) = docs.next() {
            let from_pending = position < pending_count;
            let requeue_copy = from_pending.then(|| doc.clone());
            match self.add_one(doc, &mut report).await {
                Ok(true) => {}
                Ok(false) => retry_later.extend(requeue_copy),
                Err(err) => {
                    retry_later.extend(requeue_copy);
                    retry_later.extend(
                        docs.filter(|(position, _)| *position < pending_count)
                            .map(|(_, doc)| doc),
                    );
                    self.requeue(retry_later)?;
                    return Err(err);
                }
            }
        }
        self.requeue(retry_later)?;

        info!(
            added = report.added.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "store_add_complete"
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when the provider failed for this document.
    async fn add_one(&self, doc: Document, report: &mut AddReport) -> Result<bool, StoreError> {
        let _lock = self.lock_id(&doc.id).await;

        if self.backend.contains(&doc.id)? {
            debug!(doc_id = %doc.id, "embedding_skipped");
            if let Some(metrics) = &self.metrics {
                metrics.record_skip();
            }
            report.skipped.push(doc.id);
            return Ok(true);
        }

        let start = Instant::now();
        let span = MetricsSpan::start(self.metrics.as_ref());
        let outcome = match self.provider.embed(&doc.content, &doc.metadata).await {
            Ok(vector) => StoreError::check_dimension(self.backend.dimension(), vector.len())
                .and_then(|()| StoreError::check_finite(&vector))
                .map(|()| vector),
            Err(err) => Err(StoreError::from(err)),
        };
        let elapsed_micros = start.elapsed().as_micros() as u64;
        if let Some(span) = span {
            span.record_embedding(outcome.is_ok());
        }

        match outcome {
            Ok(vector) => {
                let id = doc.id.clone();
                self.backend.put(doc.into_record(vector))?;
                info!(doc_id = %id, elapsed_micros, "embedding_computed");
                report.added.push(id);
                Ok(true)
            }
            Err(error) => {
                warn!(doc_id = %doc.id, error = %error, elapsed_micros, "embedding_failed");
                report.failed.push(AddFailure { id: doc.id, error });
                Ok(false)
            }
        }
    }

    /// Store a precomputed record unless its id is already present.
    ///
    /// Returns `false` when skipped. A wrong-length or non-finite vector is
    /// rejected and leaves the store unchanged.
    pub async fn insert(&self, record: EmbeddingRecord) -> Result<bool, StoreError> {
        StoreError::check_dimension(self.backend.dimension(), record.dimension())?;
        StoreError::check_finite(&record.embedding)?;
        let _lock = self.lock_id(&record.id).await;
        if self.backend.contains(&record.id)? {
            debug!(doc_id = %record.id, "embedding_skipped");
            return Ok(false);
        }
        self.backend.put(record)?;
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        self.backend.get(id)
    }

    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        self.backend.contains(id)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.backend.is_empty()
    }

    /// Remove records by id. Returns how many existed.
    pub async fn delete<I, S>(&self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0;
        for id in ids {
            let id = id.as_ref();
            let _lock = self.lock_id(id).await;
            if self.backend.delete(id)? {
                debug!(doc_id = %id, "embedding_deleted");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Seed an empty backend from `snapshot`.
    ///
    /// A backend that already holds entries is left untouched. Entries with an
    /// embedding are written as-is once every one of them has the right
    /// length and only finite components; entries without one are queued for
    /// the next [`add`](Self::add).
    ///
    /// Each entry is written under its id's lock and only if the id is still
    /// absent, so a concurrent `add` of the same id keeps its embedding and a
    /// repeated id within the snapshot keeps its first occurrence.
    pub async fn hydrate(&self, snapshot: Snapshot) -> Result<HydrationReport, StoreError> {
        if !self.backend.is_empty()? {
            info!(
                backend = self.backend.name(),
                entries = snapshot.len(),
                "hydrate_skipped"
            );
            return Ok(HydrationReport {
                skipped: true,
                ..HydrationReport::default()
            });
        }

        let dimension = self.backend.dimension();
        for entry in snapshot.entries() {
            if let Some(embedding) = &entry.embedding {
                StoreError::check_dimension(dimension, embedding.len())?;
                StoreError::check_finite(embedding)?;
            }
        }

        let mut report = HydrationReport::default();
        let mut deferred = Vec::new();
        for entry in snapshot.into_entries() {
            match entry.into_item() {
                SnapshotItem::Embedded(record) => {
                    let _lock = self.lock_id(&record.id).await;
                    if self.backend.contains(&record.id)? {
                        debug!(doc_id = %record.id, "hydrate_entry_exists");
                        report.existing += 1;
                        continue;
                    }
                    self.backend.put(record)?;
                    report.seeded += 1;
                }
                SnapshotItem::Pending(doc) => deferred.push(doc),
            }
        }
        report.deferred = deferred.len();
        self.requeue(deferred)?;

        info!(
            backend = self.backend.name(),
            seeded = report.seeded,
            deferred = report.deferred,
            existing = report.existing,
            "hydrate_complete"
        );
        Ok(report)
    }

    pub async fn hydrate_from_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<HydrationReport, StoreError> {
        self.hydrate(Snapshot::from_file(path)?).await
    }

    /// Everything stored, plus pending documents without an embedding.
    pub fn export(&self) -> Result<Snapshot, StoreError> {
        let mut snapshot = Snapshot::from_records(self.backend.load_all()?);
        let pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        for doc in pending.iter() {
            snapshot.push(doc.clone());
        }
        Ok(snapshot)
    }

    /// Persist the backend. A snapshot-backed store writes [`export`](Self::export)
    /// so documents still waiting for an embedding survive a restart.
    pub fn flush(&self) -> Result<(), StoreError> {
        match self.backend.snapshot_path() {
            Some(path) => {
                let snapshot = self.export()?;
                debug!(path = %path.display(), entries = snapshot.len(), "snapshot_flush");
                snapshot.write_to(path)
            }
            None => self.backend.flush(),
        }
    }

    /// Top `k` records by similarity to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
        self.search_with(&SearchRequest::new(query.to_vec(), k))
    }

    pub fn search_with(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, StoreError> {
        let span = MetricsSpan::start(self.metrics.as_ref());
        let hits = query::search(self.backend.as_ref(), request, self.oversample_factor)?;
        debug!(k = request.k, hits = hits.len(), "search_complete");
        if let Some(span) = span {
            span.record_search(hits.len());
        }
        Ok(hits)
    }

    /// Embed `text` with the store's provider, then search.
    pub async fn similarity_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let vector = self.provider.embed(text, &Metadata::new()).await?;
        self.search(&vector, k)
    }
}
