//! Shared test providers.

#![allow(dead_code)]

use async_trait::async_trait;
use embedstore::{
    BackendConfig, DistanceFunction, Document, EmbeddingError, EmbeddingProvider,
    LazyEmbeddingStore, Metadata,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maps content to a fixed vector and counts every call.
///
/// Unknown content gets a vector derived from its length so that every
/// document still embeds. Content listed in `failing` returns
/// `EmbeddingError::Unavailable`.
pub struct ScriptedProvider {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    per_content: Mutex<HashMap<String, usize>>,
}

impl ScriptedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            failing: Mutex::new(HashSet::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            per_content: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_vector(mut self, content: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(content.to_string(), vector);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on(&self, content: &str) {
        self.failing.lock().unwrap().insert(content.to_string());
    }

    pub fn recover(&self, content: &str) {
        self.failing.lock().unwrap().remove(content);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, content: &str) -> usize {
        self.per_content
            .lock()
            .unwrap()
            .get(content)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(&self, content: &str, _metadata: &Metadata) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_content
            .lock()
            .unwrap()
            .entry(content.to_string())
            .or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(content) {
            return Err(EmbeddingError::Unavailable(format!(
                "scripted failure for `{content}`"
            )));
        }
        Ok(self.vectors.get(content).cloned().unwrap_or_else(|| {
            let mut v = vec![0.0; self.dimension];
            v[content.len() % self.dimension] = 1.0;
            v
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Claims dimension `claimed` but always returns `actual` entries.
pub struct WrongDimensionProvider {
    pub claimed: usize,
    pub actual: usize,
}

#[async_trait]
impl EmbeddingProvider for WrongDimensionProvider {
    async fn embed(&self, _content: &str, _metadata: &Metadata) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![0.5; self.actual])
    }

    fn dimension(&self) -> usize {
        self.claimed
    }

    fn name(&self) -> &str {
        "wrong-dimension"
    }
}

/// `a -> [1,0,0]`, `b -> [0,1,0]`, `c -> [0.9,0.1,0]` keyed by content.
pub fn abc_provider() -> ScriptedProvider {
    ScriptedProvider::new(3)
        .with_vector("a", vec![1.0, 0.0, 0.0])
        .with_vector("b", vec![0.0, 1.0, 0.0])
        .with_vector("c", vec![0.9, 0.1, 0.0])
        .with_vector("x", vec![1.0, 0.0, 0.0])
        .with_vector("y", vec![0.0, 0.0, 1.0])
}

pub fn in_memory_store(provider: Arc<ScriptedProvider>) -> LazyEmbeddingStore {
    let backend = BackendConfig::in_memory()
        .build(provider.dimension(), DistanceFunction::Cosine)
        .unwrap();
    LazyEmbeddingStore::new(backend, provider).unwrap()
}

pub fn docs(pairs: &[(&str, &str)]) -> Vec<Document> {
    pairs
        .iter()
        .map(|(id, content)| Document::new(*id, *content))
        .collect()
}
