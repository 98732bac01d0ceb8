use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observer for store activity. Install one per store with
/// [`LazyEmbeddingStore::with_metrics`](crate::LazyEmbeddingStore::with_metrics).
pub trait StoreMetrics: Send + Sync {
    /// A provider call finished; `ok` is false when it failed or returned a
    /// vector of the wrong length.
    fn record_embedding(&self, latency: Duration, ok: bool);
    /// A document was skipped because its id already had a vector.
    fn record_skip(&self);
    fn record_search(&self, latency: Duration, hits: usize);
}

/// Times one operation against an optional recorder.
pub(crate) struct MetricsSpan {
    recorder: Arc<dyn StoreMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start(recorder: Option<&Arc<dyn StoreMetrics>>) -> Option<Self> {
        recorder.map(|recorder| Self {
            recorder: Arc::clone(recorder),
            start: Instant::now(),
        })
    }

    pub(crate) fn record_embedding(self, ok: bool) {
        self.recorder.record_embedding(self.start.elapsed(), ok);
    }

    pub(crate) fn record_search(self, hits: usize) {
        self.recorder.record_search(self.start.elapsed(), hits);
    }
}
