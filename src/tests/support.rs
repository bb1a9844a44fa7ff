//! Deterministic fakes shared by unit and scenario tests.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::semantic::embeddings::{EmbeddingError, ModelHandle, ModelLoader, ModelRunner, RawOutput};
use crate::semantic::{EmbeddingCache, EmbeddingProvider};
use crate::sync::document::InterchangeDocument;
use crate::sync::remote::{RemoteError, RemoteRepository};

pub fn provider_with<L: ModelLoader + 'static>(loader: L) -> (EmbeddingProvider, Arc<EmbeddingCache>) {
    let cache = Arc::new(EmbeddingCache::new(
        NonZeroUsize::new(64).unwrap(),
        Duration::from_secs(3600),
    ));
    (EmbeddingProvider::new(Arc::new(loader), cache.clone()), cache)
}

/// Bag-of-words model over four axes: baking, bread, finance, misc.
///
/// Emits one token vector per word so the provider's pooling path runs.
#[derive(Default)]
pub struct LexiconLoader;

struct LexiconRunner;

impl LexiconRunner {
    fn word_vector(word: &str) -> [f32; 4] {
        match word {
            "bake" | "baking" => [1.0, 0.0, 0.0, 0.0],
            "bread" => [0.6, 0.8, 0.0, 0.0],
            "sourdough" => [0.7, 0.7, 0.0, 0.0],
            "tips" => [0.0, 0.0, 0.0, 1.0],
            "tax" | "quarterly" | "filing" => [0.0, 0.0, 1.0, 0.0],
            _ => [0.0, 0.0, 0.0, 0.2],
        }
    }
}

#[async_trait]
impl ModelRunner for LexiconRunner {
    fn dimensions(&self) -> usize {
        4
    }

    async fn run(&self, text: &str) -> Result<RawOutput, EmbeddingError> {
        let tokens: Vec<Vec<f32>> = text
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty())
            .map(|word| Self::word_vector(word).to_vec())
            .collect();
        Ok(RawOutput::Tokens(tokens))
    }
}

#[async_trait]
impl ModelLoader for LexiconLoader {
    fn model_name(&self) -> &str {
        "lexicon-test"
    }

    async fn load(&self) -> Result<ModelHandle, EmbeddingError> {
        Ok(Arc::new(LexiconRunner))
    }
}

/// Counts loads and model runs of the wrapped loader.
pub struct CountingLoader<L> {
    inner: L,
    pub loads: Arc<AtomicUsize>,
    pub runs: Arc<AtomicUsize>,
}

impl<L> CountingLoader<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            loads: Arc::new(AtomicUsize::new(0)),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct CountingRunner {
    inner: ModelHandle,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelRunner for CountingRunner {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn run(&self, text: &str) -> Result<RawOutput, EmbeddingError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        // widen the window for concurrent callers
        tokio::task::yield_now().await;
        self.inner.run(text).await
    }
}

#[async_trait]
impl<L: ModelLoader> ModelLoader for CountingLoader<L> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn load(&self) -> Result<ModelHandle, EmbeddingError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.load().await?;
        Ok(Arc::new(CountingRunner {
            inner,
            runs: self.runs.clone(),
        }))
    }
}

/// Fails the first `failures` loads, then behaves like [`LexiconLoader`].
pub struct FailingLoader {
    failures: usize,
    pub attempts: Arc<AtomicUsize>,
}

impl FailingLoader {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ModelLoader for FailingLoader {
    fn model_name(&self) -> &str {
        "lexicon-test"
    }

    async fn load(&self) -> Result<ModelHandle, EmbeddingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(EmbeddingError::InitFailed("model files missing".into()));
        }
        LexiconLoader.load().await
    }
}

/// In-memory remote with switchable failures and latency.
#[derive(Default)]
pub struct MemoryRepository {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    unreachable: AtomicBool,
    delay: Mutex<Duration>,
}

impl MemoryRepository {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn put_raw(&self, location: &str, bytes: &[u8]) {
        self.documents
            .lock()
            .unwrap()
            .insert(location.to_string(), bytes.to_vec());
    }

    pub fn document(&self, location: &str) -> Option<InterchangeDocument> {
        let bytes = self.documents.lock().unwrap().get(location).cloned()?;
        InterchangeDocument::from_slice(&bytes).ok()
    }

    async fn transport(&self) -> Result<(), RemoteError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for MemoryRepository {
    async fn put_document(&self, location: &str, document: &InterchangeDocument) -> Result<(), RemoteError> {
        self.transport().await?;
        self.put_raw(location, &document.to_vec()?);
        Ok(())
    }

    async fn get_document(&self, location: &str) -> Result<InterchangeDocument, RemoteError> {
        self.transport().await?;
        let bytes = self
            .documents
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(location.to_string()))?;
        Ok(InterchangeDocument::from_slice(&bytes)?)
    }
}
