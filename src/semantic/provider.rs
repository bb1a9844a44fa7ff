//! Cache-first embedding provider.
//!
//! Wraps an injected [`ModelLoader`]:
//! - the model is loaded lazily on the first cache miss and stays resident
//! - a failed load latches `ModelUnavailable` until [`EmbeddingProvider::retry`]
//! - model invocations are serialized; callers waiting on the same content
//!   find the vector in the cache once the first caller finishes
//! - the model sees normalized text, so one cache key means one model input

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OnceCell;

use super::cache::EmbeddingCache;
use super::embeddings::{model_id_hash, EmbeddingError, ModelHandle, ModelLoader, RawOutput};
use super::normalize::{hash_normalized, l2_normalize, mean_pool, normalize_text};
use super::snapshot::{CacheSnapshot, SnapshotError};

pub struct EmbeddingProvider {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<ModelHandle>,
    load_failure: Mutex<Option<String>>,
    cache: Arc<EmbeddingCache>,
    inflight: tokio::sync::Mutex<()>,
    snapshot: Option<CacheSnapshot>,
}

impl EmbeddingProvider {
    pub fn new(loader: Arc<dyn ModelLoader>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            load_failure: Mutex::new(None),
            cache,
            inflight: tokio::sync::Mutex::new(()),
            snapshot: None,
        }
    }

    /// Restore the cache from `snapshot` when the model loads, and allow
    /// [`EmbeddingProvider::persist_cache`] to write it back.
    pub fn with_snapshot(mut self, snapshot: CacheSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn model_name(&self) -> &str {
        self.loader.model_name()
    }

    /// Embedding width, once the model is resident.
    pub fn dimensions(&self) -> Option<usize> {
        self.model.get().map(|model| model.dimensions())
    }

    /// Reason of the last failed load, if the provider is latched.
    pub fn unavailable_reason(&self) -> Option<String> {
        self.failure_slot().clone()
    }

    /// Clear a latched load failure; the next call tries to load again.
    pub fn retry(&self) {
        if self.failure_slot().take().is_some() {
            log::info!("retrying embedding model '{}' on next use", self.model_name());
        }
    }

    /// Load the model if needed and return its dimensions.
    pub async fn ensure_loaded(&self) -> Result<usize, EmbeddingError> {
        Ok(self.handle().await?.dimensions())
    }

    /// Embed `text`, serving from the cache when possible.
    ///
    /// Blank text is rejected with [`EmbeddingError::EmptyInput`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = normalize_text(text).ok_or(EmbeddingError::EmptyInput)?;
        let hash = hash_normalized(&normalized);

        if let Some(vector) = self.cache.get_by_hash(&hash, Utc::now()) {
            return Ok(vector);
        }

        let _inflight = self.inflight.lock().await;

        // another caller may have embedded the same content while we waited
        if let Some(vector) = self.cache.get_by_hash(&hash, Utc::now()) {
            return Ok(vector);
        }

        let model = self.handle().await?;
        let raw = model.run(&normalized).await?;
        let vector = finish_vector(raw, model.dimensions())?;

        self.cache
            .put_by_hash(hash, vector.clone(), self.cache.default_ttl(), Utc::now());
        Ok(vector)
    }

    /// Forget the cached vector for `text` so the next `embed` recomputes it.
    pub fn invalidate(&self, text: &str) -> bool {
        self.cache.invalidate(text)
    }

    /// Write the cache snapshot, if one is configured and the model is loaded.
    pub fn persist_cache(&self) -> Result<usize, SnapshotError> {
        let (Some(snapshot), Some(model)) = (&self.snapshot, self.model.get()) else {
            return Ok(0);
        };

        let now = Utc::now();
        let purged = self.cache.purge_expired(now);
        if purged > 0 {
            log::debug!("dropped {purged} expired embeddings before saving");
        }
        if self.cache.is_empty() {
            return Ok(0);
        }

        let entries = self.cache.snapshot(now);
        let written = snapshot.save(&entries, &model_id_hash(self.model_name()), model.dimensions())?;
        log::debug!("saved {written} of {} cached embeddings", self.cache.len());
        Ok(written)
    }

    async fn handle(&self) -> Result<ModelHandle, EmbeddingError> {
        if let Some(reason) = self.unavailable_reason() {
            return Err(EmbeddingError::ModelUnavailable(reason));
        }

        let result = self
            .model
            .get_or_try_init(|| async {
                log::info!("loading embedding model '{}'", self.model_name());
                let model = self.loader.load().await?;
                self.restore_cache(model.dimensions());
                Ok::<_, EmbeddingError>(model)
            })
            .await;

        match result {
            Ok(model) => Ok(model.clone()),
            Err(err) => {
                log::error!("embedding model '{}' failed to load: {err}", self.model_name());
                *self.failure_slot() = Some(err.to_string());
                Err(EmbeddingError::ModelUnavailable(err.to_string()))
            }
        }
    }

    fn restore_cache(&self, dimensions: usize) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        if !snapshot.exists() {
            return;
        }

        match snapshot.load(&model_id_hash(self.model_name()), dimensions) {
            Ok(entries) => {
                let restored = self.cache.restore(entries, Utc::now());
                log::info!("restored {restored} cached embeddings");
            }
            Err(err @ (SnapshotError::ModelMismatch | SnapshotError::DimensionMismatch { .. })) => {
                log::warn!("discarding embedding snapshot: {err}");
                if let Err(err) = snapshot.delete() {
                    log::warn!("failed to delete stale snapshot: {err}");
                }
            }
            Err(err) => log::warn!("ignoring unreadable embedding snapshot: {err}"),
        }
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.load_failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pool and normalize raw model output into a unit vector of the model's width.
fn finish_vector(raw: RawOutput, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
    let pooled = match raw {
        RawOutput::Pooled(vector) => vector,
        RawOutput::Tokens(tokens) => mean_pool(&tokens).ok_or(EmbeddingError::DegenerateVector)?,
    };

    if pooled.len() != dimensions {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            got: pooled.len(),
        });
    }

    l2_normalize(pooled).ok_or(EmbeddingError::DegenerateVector)
}
